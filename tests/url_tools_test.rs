//! Property tests for URL canonicalization.

use proptest::prelude::*;
use trawler::url_tools::{normalize, same_domain};

fn query_string(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

prop_compose! {
    fn arbitrary_http_url()(
        scheme in prop_oneof![Just("http"), Just("https"), Just("HTTP"), Just("Https")],
        host in "[a-z][a-z0-9]{0,7}\\.[a-z]{2,4}",
        port in prop_oneof![Just(None), Just(Some(80u16)), Just(Some(443u16)), (1024u16..9999).prop_map(Some)],
        path in "(/[a-zA-Z0-9._~-]{0,6}){0,4}",
        pairs in prop::collection::vec(("[a-z]{1,5}", "[a-zA-Z0-9]{0,5}"), 0..4),
        fragment in prop_oneof![Just(None), "[a-z]{1,6}".prop_map(Some)],
    ) -> String {
        let mut url = format!("{scheme}://{host}");
        if let Some(port) = port {
            url.push_str(&format!(":{port}"));
        }
        url.push_str(&path);
        if !pairs.is_empty() {
            url.push('?');
            url.push_str(&query_string(&pairs));
        }
        if let Some(fragment) = fragment {
            url.push('#');
            url.push_str(&fragment);
        }
        url
    }
}

proptest! {
    /// normalize(normalize(u)) == normalize(u) for every parseable URL.
    #[test]
    fn normalization_is_idempotent(raw in arbitrary_http_url()) {
        let once = normalize(&raw).expect("generated urls are valid");
        let twice = normalize(once.as_str()).expect("normalized urls stay valid");
        prop_assert_eq!(once.as_str(), twice.as_str());
    }

    /// Canonical form invariants: lowercase scheme and host, no
    /// fragment, no empty query, sorted query keys, non-empty path.
    #[test]
    fn canonical_form_invariants(raw in arbitrary_http_url()) {
        let url = normalize(&raw).expect("generated urls are valid");

        prop_assert!(matches!(url.scheme(), "http" | "https"));
        let host = url.host_str().expect("canonical urls have hosts");
        let lowered = host.to_lowercase();
        prop_assert_eq!(lowered.as_str(), host);
        prop_assert!(url.fragment().is_none());
        prop_assert_ne!(url.query(), Some(""));
        prop_assert!(!url.path().is_empty());

        if let Some(query) = url.query() {
            let keys: Vec<&str> = query
                .split('&')
                .map(|part| part.split('=').next().unwrap_or(part))
                .collect();
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            prop_assert_eq!(keys, sorted);
        }
    }

    /// A URL is always on its own host's domain, and never on an
    /// unrelated one.
    #[test]
    fn same_domain_is_reflexive(raw in arbitrary_http_url()) {
        let url = normalize(&raw).expect("generated urls are valid");
        let host = url.host_str().expect("canonical urls have hosts").to_string();
        prop_assert!(same_domain(&url, &host));
        prop_assert!(!same_domain(&url, "unrelated.example"));
    }
}
