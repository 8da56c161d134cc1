//! Route rule matching.
//!
//! # Responsibilities
//! - Compile an agent-advertised rule into an anchored prefix pattern
//! - Match request paths against it
//!
//! # Design Decisions
//! - Rules ending in `/` are used as-is as a prefix pattern
//! - Other rules must be followed by a non-word character or end of path,
//!   so `/test` matches `/test`, `/test/x` and `/test?q` but not `/testing`
//! - Path matching is case-sensitive
//! - Rules are compiled once, at registration, never on the request path

use regex::Regex;
use std::fmt;

/// A compiled routing rule.
#[derive(Clone)]
pub struct RouteRule {
    pattern: String,
    regex: Regex,
}

impl RouteRule {
    /// Compile a rule.
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let anchored = if pattern.ends_with('/') {
            format!("^(?:{})", pattern)
        } else {
            format!("^(?:{})(?:[^0-9A-Za-z_]|$)", pattern)
        };
        let regex = Regex::new(&anchored)?;
        Ok(Self { pattern, regex })
    }

    /// The catch-all rule `/`.
    pub fn root() -> Self {
        Self {
            pattern: "/".to_string(),
            regex: Regex::new("^(?:/)").expect("static pattern"),
        }
    }

    /// Returns true if the rule matches at the start of `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The rule as advertised by the agent.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Rule length, the specificity measure used for route selection.
    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }
}

impl Default for RouteRule {
    fn default() -> Self {
        Self::root()
    }
}

impl PartialEq for RouteRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for RouteRule {}

impl fmt::Debug for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RouteRule").field(&self.pattern).finish()
    }
}

impl fmt::Display for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_boundary() {
        let rule = RouteRule::new("/test").unwrap();
        assert!(rule.matches("/test"));
        assert!(rule.matches("/test/x"));
        assert!(rule.matches("/test?page=2"));
        assert!(!rule.matches("/testing"));
        assert!(!rule.matches("/other/test"));
    }

    #[test]
    fn test_trailing_slash_rule() {
        let rule = RouteRule::new("/api/").unwrap();
        assert!(rule.matches("/api/v1"));
        assert!(rule.matches("/api/"));
        assert!(!rule.matches("/api"));
    }

    #[test]
    fn test_root_matches_everything() {
        let rule = RouteRule::root();
        assert!(rule.matches("/"));
        assert!(rule.matches("/anything/at/all"));
        assert_eq!(rule, RouteRule::new("/").unwrap());
    }

    #[test]
    fn test_match_must_start_at_index_zero() {
        let rule = RouteRule::new("/b").unwrap();
        assert!(!rule.matches("/a/b"));
    }

    #[test]
    fn test_rules_are_patterns() {
        let rule = RouteRule::new("/v[0-9]+").unwrap();
        assert!(rule.matches("/v2/users"));
        assert!(!rule.matches("/vx/users"));
        assert!(RouteRule::new("/broken(").is_err());
    }
}
