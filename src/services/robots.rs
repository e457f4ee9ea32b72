// src/services/robots.rs

//! Robots.txt resolver.
//!
//! Rules are parsed from cached policy text at evaluation time. Among the
//! rules that apply to our identity, the longest matching path prefix wins
//! and allow beats disallow on ties. Anything unexpected (missing policy,
//! fetch failure, unparsable lines) resolves to "allowed".

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::models::PolicyConfig;
use crate::services::fetcher::Fetcher;
use crate::utils::{origin_of, path_and_query};

/// Raw robots.txt text cached for one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    pub origin: String,
    /// Empty when the origin has no usable policy
    pub raw_text: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Disallow,
}

/// One `Allow` / `Disallow` line bound to one user-agent token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Lowercased user-agent token, `*` for everyone
    pub agent_pattern: String,
    pub kind: RuleKind,
    pub path_prefix: String,
}

impl PolicyRule {
    fn applies_to(&self, identity_lower: &str) -> bool {
        self.agent_pattern == "*"
            || (!self.agent_pattern.is_empty() && identity_lower.contains(&self.agent_pattern))
    }
}

/// Rules parsed from a policy document.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub rules: Vec<PolicyRule>,
    /// Non-empty lines that were not `key: value` directives
    pub skipped_lines: usize,
}

/// Parse robots.txt text into rules.
///
/// Consecutive `User-agent` lines form a group; the first rule line closes
/// the group for new agents, and a blank line discards it.
pub fn parse_policy(text: &str) -> ParsedPolicy {
    let mut parsed = ParsedPolicy::default();
    let mut agents: Vec<String> = Vec::new();
    let mut group_has_rules = false;

    for raw in text.lines() {
        let raw = raw.trim_start_matches('\u{feff}');
        if raw.trim().is_empty() {
            agents.clear();
            group_has_rules = false;
            continue;
        }

        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            parsed.skipped_lines += 1;
            continue;
        };
        let value = value.trim();

        match key.trim().to_ascii_lowercase().as_str() {
            "user-agent" => {
                if group_has_rules {
                    agents.clear();
                    group_has_rules = false;
                }
                agents.push(value.to_lowercase());
            }
            directive @ ("allow" | "disallow") => {
                group_has_rules = true;
                let kind = if directive == "allow" {
                    RuleKind::Allow
                } else {
                    RuleKind::Disallow
                };
                for agent in &agents {
                    parsed.rules.push(PolicyRule {
                        agent_pattern: agent.clone(),
                        kind,
                        path_prefix: value.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    parsed
}

/// Decide whether `path` may be fetched by `identity` under `rules`.
pub fn evaluate_rules(rules: &[PolicyRule], identity: &str, path: &str) -> bool {
    let identity_lower = identity.to_lowercase();
    let mut applicable: Vec<&PolicyRule> = rules
        .iter()
        .filter(|rule| rule.applies_to(&identity_lower))
        .collect();

    if applicable.is_empty() {
        return true;
    }

    applicable.sort_by(|a, b| {
        b.path_prefix
            .len()
            .cmp(&a.path_prefix.len())
            .then_with(|| (a.kind == RuleKind::Disallow).cmp(&(b.kind == RuleKind::Disallow)))
    });

    applicable
        .iter()
        .filter(|rule| !rule.path_prefix.is_empty())
        .find(|rule| path.starts_with(&rule.path_prefix))
        .is_none_or(|rule| rule.kind == RuleKind::Allow)
}

/// Per-origin policy cache plus whitelist, bound to one client identity.
pub struct PolicyResolver {
    fetcher: Arc<Fetcher>,
    identity: String,
    whitelist: Vec<String>,
    ttl: Option<Duration>,
    cache: RwLock<HashMap<String, Arc<PolicyDocument>>>,
}

impl PolicyResolver {
    pub fn new(fetcher: Arc<Fetcher>, identity: impl Into<String>, config: &PolicyConfig) -> Self {
        Self {
            fetcher,
            identity: identity.into(),
            whitelist: config
                .whitelist
                .iter()
                .map(|entry| entry.trim().trim_end_matches('/').to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect(),
            ttl: config.cache_ttl_secs.map(Duration::from_secs),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the URL's origin is exempt from policy evaluation.
    ///
    /// Entries are either hosts (subdomains match too) or full origins.
    pub fn is_whitelisted(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let origin = origin_of(url).map(|o| o.to_ascii_lowercase());

        self.whitelist.iter().any(|entry| {
            if entry.contains("://") {
                origin.as_deref() == Some(entry.as_str())
            } else {
                host == *entry || host.ends_with(&format!(".{entry}"))
            }
        })
    }

    /// Check a URL against the cached (or freshly fetched) policy.
    ///
    /// Never fails: unparsable URLs and unavailable policies are allowed.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            log::warn!("Policy check skipped for unparsable URL {}", url);
            return true;
        };
        if self.is_whitelisted(&parsed) {
            log::debug!("{} is whitelisted", url);
            return true;
        }
        let Some(origin) = origin_of(&parsed) else {
            return true;
        };

        let document = self.document(&origin).await;
        if document.raw_text.is_empty() {
            return true;
        }

        let policy = parse_policy(&document.raw_text);
        let allowed = evaluate_rules(&policy.rules, &self.identity, &path_and_query(&parsed));
        log::debug!(
            "Policy for {}: {}",
            url,
            if allowed { "allowed" } else { "disallowed" }
        );
        allowed
    }

    /// Cached document for an origin, if present and fresh.
    pub fn cached(&self, origin: &str) -> Option<Arc<PolicyDocument>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(origin)
            .filter(|document| self.is_fresh(document))
            .cloned()
    }

    /// Drop the cached policy for one origin. Returns whether one was cached.
    pub fn invalidate(&self, origin: &str) -> bool {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.remove(origin).is_some()
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.clear();
    }

    async fn document(&self, origin: &str) -> Arc<PolicyDocument> {
        if let Some(document) = self.cached(origin) {
            return document;
        }

        let raw_text = self.fetch_policy_text(origin).await;
        let policy = parse_policy(&raw_text);
        if policy.skipped_lines > 0 {
            log::warn!(
                "robots.txt for {} has {} malformed line(s); they are ignored",
                origin,
                policy.skipped_lines
            );
        }

        let document = Arc::new(PolicyDocument {
            origin: origin.to_string(),
            raw_text,
            fetched_at: Utc::now(),
        });

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(origin.to_string(), Arc::clone(&document));
        document
    }

    async fn fetch_policy_text(&self, origin: &str) -> String {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        match self.fetcher.fetch_once(&robots_url).await {
            Ok(response) if response.status_code == 200 => {
                log::info!(
                    "Fetched robots.txt for {} ({} bytes)",
                    origin,
                    response.size_bytes
                );
                response.body
            }
            Ok(response) => {
                log::info!(
                    "No robots.txt for {} (HTTP {}), allowing all paths",
                    origin,
                    response.status_code
                );
                String::new()
            }
            Err(e) => {
                log::warn!(
                    "robots.txt fetch for {} failed ({}), allowing all paths",
                    origin,
                    e
                );
                String::new()
            }
        }
    }

    fn is_fresh(&self, document: &PolicyDocument) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(document.fetched_at);
                age.to_std().map_or(true, |age| age < ttl)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BOT: &str = "Mozilla/5.0 (compatible; harvest/0.1)";

    fn allowed(text: &str, path: &str) -> bool {
        evaluate_rules(&parse_policy(text).rules, BOT, path)
    }

    fn resolver(whitelist: Vec<String>) -> PolicyResolver {
        let crawler = CrawlerConfig {
            min_delay_ms: Some(0),
            max_delay_ms: Some(0),
            backoff_base_ms: 0,
            ..CrawlerConfig::default()
        };
        let fetcher = Arc::new(Fetcher::new(&crawler).unwrap());
        let policy = PolicyConfig {
            whitelist,
            cache_ttl_secs: None,
        };
        PolicyResolver::new(fetcher, BOT, &policy)
    }

    async fn serve_robots(server: &MockServer, body: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[test]
    fn test_disallow_prefix() {
        let text = "User-agent: *\nDisallow: /x";
        assert!(!allowed(text, "/x/y"));
        assert!(allowed(text, "/y"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let text = "User-agent: *\nDisallow: /a\nAllow: /a/b";
        assert!(allowed(text, "/a/b/c"));
        assert!(!allowed(text, "/a/c"));
    }

    #[test]
    fn test_tie_favors_allow() {
        let text = "User-agent: *\nDisallow: /same\nAllow: /same";
        assert!(allowed(text, "/same/page"));
    }

    #[test]
    fn test_empty_disallow_is_skipped() {
        let text = "User-agent: *\nDisallow:";
        assert!(allowed(text, "/anything"));
    }

    #[test]
    fn test_no_applicable_rules() {
        let text = "User-agent: googlebot\nDisallow: /";
        assert!(allowed(text, "/page"));
    }

    #[test]
    fn test_agent_substring_match() {
        let text = "User-agent: harvest\nDisallow: /private";
        assert!(!allowed(text, "/private/x"));
        assert!(allowed(text, "/public"));
    }

    #[test]
    fn test_agent_group_accumulates() {
        let text = "User-agent: googlebot\nUser-agent: harvest\nDisallow: /shared";
        let policy = parse_policy(text);
        assert_eq!(policy.rules.len(), 2);
        assert!(!allowed(text, "/shared/x"));
    }

    #[test]
    fn test_rule_line_closes_group() {
        let text = "User-agent: *\nDisallow: /a\nUser-agent: googlebot\nDisallow: /b";
        assert!(!allowed(text, "/a"));
        assert!(allowed(text, "/b"));
    }

    #[test]
    fn test_blank_line_resets_group() {
        let text = "User-agent: *\n\nDisallow: /orphan";
        assert!(parse_policy(text).rules.is_empty());
        assert!(allowed(text, "/orphan"));
    }

    #[test]
    fn test_comments_and_case() {
        let text = "# site policy\nUSER-AGENT: * # everyone\nDISALLOW: /tmp # scratch\n";
        assert!(!allowed(text, "/tmp/file"));
        assert!(allowed(text, "/home"));
    }

    #[test]
    fn test_malformed_lines_are_counted_and_ignored() {
        let text = "User-agent: *\nthis is garbage\nDisallow: /x";
        let policy = parse_policy(text);
        assert_eq!(policy.skipped_lines, 1);
        assert!(!allowed(text, "/x"));
    }

    #[test]
    fn test_wildcard_heavy_policy_is_literal() {
        let text = "User-agent: *\nDisallow: /*.php$";
        assert!(allowed(text, "/index.php"));
    }

    #[tokio::test]
    async fn test_resolver_applies_policy() {
        let server = MockServer::start().await;
        serve_robots(&server, "User-agent: *\nDisallow: /x", 1).await;

        let resolver = resolver(Vec::new());
        assert!(!resolver.is_allowed(&format!("{}/x/y", server.uri())).await);
        assert!(resolver.is_allowed(&format!("{}/y", server.uri())).await);
    }

    #[tokio::test]
    async fn test_policy_is_cached_per_origin() {
        let server = MockServer::start().await;
        serve_robots(&server, "User-agent: *\nDisallow: /x", 1).await;

        let resolver = resolver(Vec::new());
        for _ in 0..3 {
            resolver.is_allowed(&format!("{}/page", server.uri())).await;
        }
        assert!(resolver.cached(&server.uri()).is_some());
    }

    #[tokio::test]
    async fn test_whitelist_skips_fetch() {
        let server = MockServer::start().await;
        serve_robots(&server, "User-agent: *\nDisallow: /", 0).await;

        let resolver = resolver(vec!["127.0.0.1".to_string()]);
        assert!(resolver.is_allowed(&format!("{}/anything", server.uri())).await);
        assert!(resolver.is_allowed(&format!("{}/", server.uri())).await);
        assert!(resolver.cached(&server.uri()).is_none());
    }

    #[tokio::test]
    async fn test_missing_policy_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(Vec::new());
        assert!(resolver.is_allowed(&format!("{}/private", server.uri())).await);
        assert!(resolver.is_allowed(&format!("{}/", server.uri())).await);
    }

    #[tokio::test]
    async fn test_network_error_fails_open() {
        let resolver = resolver(Vec::new());
        assert!(resolver.is_allowed("http://127.0.0.1:1/private").await);

        let cached = resolver.cached("http://127.0.0.1:1").unwrap();
        assert!(cached.raw_text.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        serve_robots(&server, "User-agent: *\nDisallow: /x", 2).await;

        let resolver = resolver(Vec::new());
        resolver.is_allowed(&format!("{}/x", server.uri())).await;
        assert!(resolver.invalidate(&server.uri()));
        resolver.is_allowed(&format!("{}/x", server.uri())).await;
    }

    #[test]
    fn test_whitelist_matching() {
        let resolver = resolver(vec![
            "Example.org".to_string(),
            "http://localhost:8080".to_string(),
        ]);
        let check = |u: &str| resolver.is_whitelisted(&Url::parse(u).unwrap());

        assert!(check("https://example.org/a"));
        assert!(check("https://www.example.org/a"));
        assert!(!check("https://notexample.org/a"));
        assert!(check("http://localhost:8080/x"));
        assert!(!check("http://localhost:9090/x"));
    }
}
