//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher (GET only):
//!     → ResponseCache::get("service:path?query")
//!         hit  → return CachedResponse, backend untouched
//!         miss → dispatch, then ResponseCache::set(key, response, ttl)
//! ```
//!
//! # Design Decisions
//! - The dispatcher only sees the `ResponseCache` trait
//! - Writes are best-effort: a failed `set` is logged by the caller
//! - Entries expire by TTL; expired entries are never served

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

pub use memory::InMemoryResponseCache;

/// A stored backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache is full ({max_entries} entries)")]
    Full { max_entries: usize },
}

/// Key/value store for cacheable responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<CachedResponse>;

    async fn set(&self, key: &str, value: CachedResponse, ttl: Duration) -> Result<(), CacheError>;
}

/// Cache key for a request to `service`.
pub fn cache_key(service: &str, path_and_query: &str) -> String {
    format!("{service}:{path_and_query}")
}
