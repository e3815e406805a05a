//! In-process response cache.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::{CacheError, CachedResponse, ResponseCache};
use crate::resilience::deadline_after;

#[derive(Debug, Clone)]
struct Entry {
    response: CachedResponse,
    expires_at: Instant,
}

/// A concurrent TTL cache bounded by entry count.
#[derive(Debug)]
pub struct InMemoryResponseCache {
    inner: DashMap<String, Entry>,
    max_entries: usize,
}

impl InMemoryResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: DashMap::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.inner.len())
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        let hit = self
            .inner
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.response.clone()))?;

        if hit.is_none() {
            self.inner.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    async fn set(&self, key: &str, value: CachedResponse, ttl: Duration) -> Result<(), CacheError> {
        if !self.inner.contains_key(key) && self.inner.len() >= self.max_entries {
            self.purge_expired();
            if self.inner.len() >= self.max_entries {
                return Err(CacheError::Full {
                    max_entries: self.max_entries,
                });
            }
        }

        self.inner.insert(
            key.to_string(),
            Entry {
                response: value,
                expires_at: deadline_after(Instant::now(), ttl),
            },
        );
        Ok(())
    }
}
