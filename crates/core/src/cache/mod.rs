//! Key/value cache with TTL, JSON pass-through, pattern deletion and counters.
//!
//! The cache is never allowed to block a primary operation: every backend
//! failure is logged and downgraded to the operation's safe default
//! (`None`, `false`, `0` or `-2`).

use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

mod memory;

pub use memory::MemoryBackend;

/// Raw primitives offered by a backing key/value store
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write without expiry
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write with an expiry in seconds
    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()>;

    /// Returns the number of keys removed
    async fn del(&self, key: &str) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Remaining lifetime in seconds, `-1` without expiry, `-2` when missing
    async fn ttl(&self, key: &str) -> Result<i64>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Cache facade shared by every subsystem
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Cache backed by the in-process memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Reads a value, parsing JSON when possible and passing raw strings through
    pub async fn get(&self, key: &str) -> Option<Value> {
        let raw = self.get_raw(key).await?;
        Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }

    /// Reads and deserializes a typed value
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(_) => match serde_json::from_value(Value::String(raw)) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Cache value for {} has unexpected shape: {}", key, e);
                    None
                }
            },
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cache get failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Stores a value; strings are written verbatim, everything else as JSON.
    ///
    /// With a TTL only the expiring write primitive is used, without one only
    /// the plain write.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> bool {
        let encoded = match serde_json::to_value(value) {
            Ok(Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(e) => {
                tracing::warn!("Cache set skipped for {}: {}", key, e);
                return false;
            }
        };

        let result = match ttl {
            Some(ttl) => self.backend.setex(key, ttl, &encoded).await,
            None => self.backend.set(key, &encoded).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Cache set failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Removes a key, returning how many keys were deleted
    pub async fn del(&self, key: &str) -> u64 {
        self.backend.del(key).await.unwrap_or_else(|e| {
            tracing::warn!("Cache del failed for {}: {}", key, e);
            0
        })
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.backend.exists(key).await.unwrap_or_else(|e| {
            tracing::warn!("Cache exists failed for {}: {}", key, e);
            false
        })
    }

    /// Deletes every key matching a glob pattern
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let keys = match self.backend.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Cache keys failed for {}: {}", pattern, e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            removed += self.del(&key).await;
        }
        removed
    }

    pub async fn incr(&self, key: &str) -> i64 {
        self.incr_by(key, 1).await
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> i64 {
        self.backend.incr_by(key, delta).await.unwrap_or_else(|e| {
            tracing::warn!("Cache incr failed for {}: {}", key, e);
            0
        })
    }

    pub async fn expire(&self, key: &str, ttl: u64) -> bool {
        self.backend.expire(key, ttl).await.unwrap_or_else(|e| {
            tracing::warn!("Cache expire failed for {}: {}", key, e);
            false
        })
    }

    pub async fn ttl(&self, key: &str) -> i64 {
        self.backend.ttl(key).await.unwrap_or_else(|e| {
            tracing::warn!("Cache ttl failed for {}: {}", key, e);
            -2
        })
    }

    pub async fn close(&self) {
        if let Err(e) = self.backend.close().await {
            tracing::warn!("Cache close failed: {}", e);
        }
    }
}

/// Key for a cached analysis of source with the given hash
pub fn analysis_key(hash: &str) -> String {
    format!("analysis:{hash}")
}

/// Key for a cached simulation of a request with the given hash
pub fn simulation_key(hash: &str) -> String {
    format!("simulation:{hash}")
}

/// Key for cached artifact metadata
pub fn artifact_key(id: &str) -> String {
    format!("artifact:{id}")
}

/// Key for a job status row
pub fn job_key(id: &str) -> String {
    format!("job:{id}")
}
