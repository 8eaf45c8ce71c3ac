//! Key-value store seam.
//!
//! The cache and circuit breaker persist through [`KvStore`]; the core never
//! names a concrete driver. [`MemoryKv`] is the embedded default (and the test
//! double): a concurrent map with per-entry expiry, checked lazily on read.
//! A Redis-class store slots in behind the same trait unchanged.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::RouterError;

/// Health of an external service as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    Ok,
    Error,
    Unknown,
    Disabled,
}

/// Async key-value contract: string keys, opaque string values, optional TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RouterError>;

    /// Set `key` to `value`; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), RouterError>;

    async fn delete(&self, key: &str) -> Result<(), RouterError>;

    /// Remove every key starting with `prefix`; returns the number removed.
    async fn clear_prefix(&self, prefix: &str) -> Result<u64, RouterError>;

    /// Liveness for the health endpoint.
    async fn ping(&self) -> ServiceHealth;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now > t)
    }
}

/// Embedded in-process store.
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live (unexpired) entries. Test/introspection helper.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, RouterError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expired(now) {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), RouterError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RouterError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<u64, RouterError> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let removed = keys.len() as u64;
        for key in keys {
            self.entries.remove(&key);
        }
        Ok(removed)
    }

    async fn ping(&self) -> ServiceHealth {
        ServiceHealth::Ok
    }
}

/// Test double that fails every operation; used to verify swallow semantics.
#[cfg(test)]
pub struct FailingKv;

#[cfg(test)]
use crate::error::ErrorKind;

#[cfg(test)]
#[async_trait]
impl KvStore for FailingKv {
    async fn get(&self, _key: &str) -> Result<Option<String>, RouterError> {
        Err(RouterError::new(ErrorKind::CacheError, "kv down").with_source("cache"))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), RouterError> {
        Err(RouterError::new(ErrorKind::CacheError, "kv down").with_source("cache"))
    }

    async fn delete(&self, _key: &str) -> Result<(), RouterError> {
        Err(RouterError::new(ErrorKind::CacheError, "kv down").with_source("cache"))
    }

    async fn clear_prefix(&self, _prefix: &str) -> Result<u64, RouterError> {
        Err(RouterError::new(ErrorKind::CacheError, "kv down").with_source("cache"))
    }

    async fn ping(&self) -> ServiceHealth {
        ServiceHealth::Error
    }
}
