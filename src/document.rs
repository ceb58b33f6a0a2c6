//! Parsed document model.
//!
//! The engine treats HTML parsing as a pure function: raw fetched bytes
//! in, an owned [`Document`] out. The scraper DOM is built and dropped
//! inside [`Document::parse`], so the non-`Send` tree never crosses an
//! await point in worker tasks.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

use crate::retriever::FetchedDocument;

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static anchor selector compiles"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("static title selector compiles"));
static META_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta").expect("static meta selector compiles"));

/// One hyperlink found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocLink {
    /// The raw `href` attribute, unresolved.
    pub href: String,
    /// Collapsed anchor text.
    pub text: String,
}

/// An owned, parsed document handed to extraction code.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// URL the document was actually served from.
    pub url: Url,
    /// HTTP status of the fetch.
    pub status: u16,
    /// `<title>` content, when present and non-empty.
    pub title: Option<String>,
    /// Whitespace-collapsed body text.
    pub text: String,
    /// Hyperlinks in document order.
    pub links: Vec<DocLink>,
    /// `<meta>` name/property to content map.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Parse a fetched response into an owned document.
    ///
    /// Non-HTML bodies still produce a document (empty links and
    /// metadata, body text as-is), so extractors decide what to do with
    /// plain-text or JSON responses.
    #[must_use]
    pub fn parse(fetched: &FetchedDocument) -> Self {
        let html = Html::parse_document(&fetched.body);

        let title = html
            .select(&TITLE_SELECTOR)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let links = html
            .select(&ANCHOR_SELECTOR)
            .filter_map(|el| {
                let href = el.value().attr("href")?.trim();
                if href.is_empty() {
                    return None;
                }
                Some(DocLink {
                    href: href.to_string(),
                    text: collapse_whitespace(&el.text().collect::<String>()),
                })
            })
            .collect();

        let mut metadata = HashMap::new();
        for el in html.select(&META_SELECTOR) {
            let value = el.value();
            let key = value.attr("name").or_else(|| value.attr("property"));
            if let (Some(key), Some(content)) = (key, value.attr("content")) {
                metadata.insert(key.to_lowercase(), content.to_string());
            }
        }

        let text = collapse_whitespace(&html.root_element().text().collect::<String>());

        Self {
            url: fetched.final_url.clone(),
            status: fetched.status,
            title,
            text,
            links,
            metadata,
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(body: &str) -> FetchedDocument {
        FetchedDocument {
            final_url: Url::parse("http://a.test/page").unwrap(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.to_string(),
        }
    }

    #[test]
    fn extracts_title_links_and_metadata() {
        let doc = Document::parse(&fetched(
            r#"<html><head>
                 <title>  A   Page </title>
                 <meta name="description" content="about things">
                 <meta property="og:type" content="article">
               </head><body>
                 <a href="/x">first <b>link</b></a>
                 <a href="http://b.test/y">second</a>
                 <a href="">empty</a>
               </body></html>"#,
        ));

        assert_eq!(doc.title.as_deref(), Some("A Page"));
        assert_eq!(doc.metadata.get("description").map(String::as_str), Some("about things"));
        assert_eq!(doc.metadata.get("og:type").map(String::as_str), Some("article"));
        assert_eq!(
            doc.links,
            vec![
                DocLink {
                    href: "/x".to_string(),
                    text: "first link".to_string()
                },
                DocLink {
                    href: "http://b.test/y".to_string(),
                    text: "second".to_string()
                },
            ]
        );
    }

    #[test]
    fn plain_text_body_still_parses() {
        let doc = Document::parse(&fetched("just words, no markup"));
        assert!(doc.title.is_none());
        assert!(doc.links.is_empty());
        assert_eq!(doc.text, "just words, no markup");
    }
}
