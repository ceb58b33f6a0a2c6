//! robots.txt parsing and rule evaluation.
//!
//! Implements the de facto standard: rules grouped by `User-agent`, the
//! most specific matching agent group wins, path patterns support `*`
//! wildcards and a trailing `$` anchor, the longest matching rule wins
//! and ties go to `Allow`. Patterns compile to anchored regexes at parse
//! time; the non-backtracking engine keeps evaluation linear no matter
//! what an origin puts in its robots file.

use log::debug;
use regex::Regex;

/// A single Allow/Disallow line, pre-compiled for evaluation.
#[derive(Debug, Clone)]
struct PathRule {
    allow: bool,
    /// Original pattern text; its length is the rule's specificity.
    pattern: String,
    matcher: Option<Regex>,
}

impl PathRule {
    fn new(allow: bool, pattern: &str) -> Self {
        Self {
            allow,
            pattern: pattern.to_string(),
            matcher: compile_path_pattern(pattern),
        }
    }

    fn matches(&self, path: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(path))
    }
}

/// Rules for one `User-agent:` group.
#[derive(Debug, Clone, Default)]
struct RuleGroup {
    agents: Vec<String>,
    rules: Vec<PathRule>,
    crawl_delay: Option<f64>,
}

impl RuleGroup {
    /// Specificity of this group for a user agent: length of the longest
    /// matching agent token, 0 for the `*` group, `None` when the group
    /// does not apply at all.
    fn agent_specificity(&self, user_agent_lower: &str) -> Option<usize> {
        self.agents
            .iter()
            .filter_map(|agent| {
                if agent == "*" {
                    Some(0)
                } else if user_agent_lower.contains(agent.as_str()) {
                    Some(agent.len())
                } else {
                    None
                }
            })
            .max()
    }
}

/// Parsed robots.txt ruleset for one origin.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<RuleGroup>,
    sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Parse robots.txt content. Never fails; unrecognized or malformed
    /// lines are skipped the way every major crawler skips them.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut sitemaps = Vec::new();
        let mut current: Option<RuleGroup> = None;
        // Consecutive User-agent lines share one group; a User-agent
        // line after rules starts a new group.
        let mut in_agent_run = false;

        for raw_line in content.lines() {
            // Strip comments and surrounding whitespace.
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if !in_agent_run {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(RuleGroup::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                    in_agent_run = true;
                }
                "allow" | "disallow" => {
                    in_agent_run = false;
                    // An empty Disallow means "nothing disallowed": no rule.
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = current.as_mut() {
                        group.rules.push(PathRule::new(directive == "allow", value));
                    }
                }
                "crawl-delay" => {
                    in_agent_run = false;
                    if let (Some(group), Ok(delay)) = (current.as_mut(), value.parse::<f64>()) {
                        if delay >= 0.0 {
                            group.crawl_delay = Some(delay);
                        }
                    }
                }
                "sitemap" => {
                    // Sitemap directives are global, not per-group.
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                other => {
                    debug!("ignoring robots.txt directive `{other}`");
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups, sitemaps }
    }

    /// A ruleset that permits everything.
    ///
    /// Installed for origins whose robots.txt could not be fetched.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Evaluate whether `user_agent` may fetch `path`.
    ///
    /// Longest matching rule in the winning agent group decides; on a
    /// length tie `Allow` wins; no matching rule means allowed.
    #[must_use]
    pub fn allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };
        let path = if path.is_empty() { "/" } else { path };

        let mut verdict = true;
        let mut best_len = 0usize;
        for rule in &group.rules {
            if rule.matches(path) {
                let len = rule.pattern.len();
                if len > best_len || (len == best_len && rule.allow) {
                    best_len = len;
                    verdict = rule.allow;
                }
            }
        }
        verdict
    }

    /// `Crawl-delay` for the winning agent group, in seconds.
    ///
    /// Parsed but advisory: the engine's token bucket is the enforced
    /// politeness mechanism.
    #[must_use]
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        self.group_for(user_agent).and_then(|g| g.crawl_delay)
    }

    /// `Sitemap:` directives found in the file.
    #[must_use]
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// The most specific group matching a user agent, `*` as fallback.
    fn group_for(&self, user_agent: &str) -> Option<&RuleGroup> {
        let ua = user_agent.to_lowercase();
        self.groups
            .iter()
            .filter_map(|g| g.agent_specificity(&ua).map(|s| (s, g)))
            .max_by_key(|(specificity, _)| *specificity)
            .map(|(_, g)| g)
    }
}

/// Compile a robots path pattern to an anchored regex.
///
/// `*` matches any run of characters; a trailing `$` anchors at the end
/// of the path; everything else is matched literally as a prefix.
fn compile_path_pattern(pattern: &str) -> Option<Regex> {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(body) => (body, true),
        None => (pattern, false),
    };

    let mut regex = String::with_capacity(body.len() + 8);
    regex.push('^');
    for (i, part) in body.split('*').enumerate() {
        if i > 0 {
            regex.push_str(".*");
        }
        regex.push_str(&regex::escape(part));
    }
    if anchored {
        regex.push('$');
    }

    match Regex::new(&regex) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("unusable robots path pattern `{pattern}`: {e}");
            None
        }
    }
}
