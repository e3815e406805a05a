//! Path prefix matching.
//!
//! # Responsibilities
//! - Match a request path against a configured prefix
//! - Strip a matched prefix before forwarding
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Matching respects segment boundaries: `/svc` matches `/svc` and
//!   `/svc/items` but not `/svcx`
//! - A trailing `/*` or `/` in the configured prefix is ignored
//! - No regex to guarantee O(n) matching

/// Matches the request path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('*').trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }

    /// Normalized prefix (empty for the root route).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of significant characters; longer prefixes are more specific.
    pub fn specificity(&self) -> usize {
        self.prefix.len()
    }

    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.is_empty(),
            None => false,
        }
    }

    /// Remove the prefix from `path`, keeping a leading slash.
    pub fn strip<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        match path.strip_prefix(self.prefix.as_str()) {
            Some("") => "/".into(),
            Some(rest) if rest.starts_with('/') => rest.into(),
            Some(rest) => format!("/{rest}").into(),
            None => path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        assert!(matcher.matches("/api"));
        assert!(matcher.matches("/api/v1"));
        assert!(!matcher.matches("/apiary"));
        assert!(!matcher.matches("/images"));
        assert!(!matcher.matches("/API/v1"));
    }

    #[test]
    fn test_wildcard_and_root() {
        let svc = PathPrefixMatcher::new("/svc/*");
        assert_eq!(svc.prefix(), "/svc");
        assert!(svc.matches("/svc/items"));

        let root = PathPrefixMatcher::new("/");
        assert!(root.matches("/"));
        assert!(root.matches("/anything/else"));
    }

    #[test]
    fn test_strip() {
        let matcher = PathPrefixMatcher::new("/svc");
        assert_eq!(matcher.strip("/svc/items"), "/items");
        assert_eq!(matcher.strip("/svc"), "/");

        let root = PathPrefixMatcher::new("/");
        assert_eq!(root.strip("/items"), "/items");
    }
}
