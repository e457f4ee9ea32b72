//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Serialize the origin (scheme, host, port) of a parsed URL.
///
/// Returns `None` for opaque origins such as `data:` URLs.
pub fn origin_of(url: &Url) -> Option<String> {
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Parse a URL string and serialize its origin.
pub fn origin_str(url_str: &str) -> Option<String> {
    Url::parse(url_str).ok().as_ref().and_then(origin_of)
}

/// Path plus query, the part of a URL that robots.txt prefixes match against.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_str() {
        assert_eq!(
            origin_str("https://example.com/path?q=1"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            origin_str("http://example.com:8080/x"),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(
            origin_str("https://example.com:443/x"),
            Some("https://example.com".to_string())
        );
        assert_eq!(origin_str("data:text/plain,hi"), None);
        assert_eq!(origin_str("nope"), None);
    }

    #[test]
    fn test_path_and_query() {
        let url = Url::parse("https://example.com/search?q=rust").unwrap();
        assert_eq!(path_and_query(&url), "/search?q=rust");
        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(path_and_query(&url), "/");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b  "), "a b");
        assert_eq!(normalize_whitespace(" \n "), "");
    }
}
