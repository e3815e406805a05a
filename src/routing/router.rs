//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the route for a request path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Longest prefix wins; ties keep configuration order
//! - Explicit NoMatch rather than silent default

use std::borrow::Cow;

use crate::config::{RouteConfig, RouteRateLimit};
use crate::routing::matcher::PathPrefixMatcher;

/// A compiled route: path prefix → logical service.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub matcher: PathPrefixMatcher,
    pub service: String,
    pub strip_prefix: bool,
    pub rate_limit: Option<RouteRateLimit>,
}

impl RouteEntry {
    pub fn new(path_prefix: &str, service: impl Into<String>) -> Self {
        Self {
            matcher: PathPrefixMatcher::new(path_prefix),
            service: service.into(),
            strip_prefix: false,
            rate_limit: None,
        }
    }

    pub fn path_prefix(&self) -> &str {
        self.matcher.prefix()
    }

    /// Path to forward to the backend.
    pub fn upstream_path<'a>(&self, path: &'a str) -> Cow<'a, str> {
        if self.strip_prefix {
            self.matcher.strip(path)
        } else {
            Cow::Borrowed(path)
        }
    }
}

impl From<&RouteConfig> for RouteEntry {
    fn from(config: &RouteConfig) -> Self {
        Self {
            matcher: PathPrefixMatcher::new(config.path_prefix.as_str()),
            service: config.service.clone(),
            strip_prefix: config.strip_prefix,
            rate_limit: config.rate_limit,
        }
    }
}

/// Static table of routes consulted once per inbound request.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<RouteEntry>) -> Self {
        // Stable sort keeps configuration order among equal prefixes.
        routes.sort_by(|a, b| b.matcher.specificity().cmp(&a.matcher.specificity()));
        Self { routes }
    }

    pub fn from_config(configs: &[RouteConfig]) -> Self {
        Self::new(configs.iter().map(RouteEntry::from).collect())
    }

    /// Find the most specific route for `path`.
    pub fn resolve(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|route| route.matcher.matches(path))
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::new(vec![
            RouteEntry::new("/", "web"),
            RouteEntry::new("/api", "api"),
            RouteEntry::new("/api/orders", "orders"),
        ]);

        assert_eq!(table.resolve("/api/orders/7").unwrap().service, "orders");
        assert_eq!(table.resolve("/api/users").unwrap().service, "api");
        assert_eq!(table.resolve("/index.html").unwrap().service, "web");
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new(vec![RouteEntry::new("/svc/*", "orders")]);
        assert!(table.resolve("/other").is_none());
        assert!(table.resolve("/svcx").is_none());
    }

    #[test]
    fn test_upstream_path() {
        let config = RouteConfig {
            path_prefix: "/svc".into(),
            service: "orders".into(),
            strip_prefix: true,
            rate_limit: None,
        };
        let table = RouteTable::from_config(&[config]);
        let route = table.resolve("/svc/items").unwrap();
        assert_eq!(route.upstream_path("/svc/items"), "/items");

        let keep = RouteEntry::new("/svc", "orders");
        assert_eq!(keep.upstream_path("/svc/items"), "/svc/items");
    }
}
