//! In-process cache backend

use super::CacheBackend;
use crate::{
    error::{Error, Result},
    utils::glob_match,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Memory-backed store with lazily expired entries
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let live = self.live_entry(key).is_some();
        self.entries.lock().remove(key);
        Ok(u64::from(live))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        // Read, add and write under one guard
        let mut entries = self.entries.lock();
        let current = entries.get(key).filter(|entry| entry.is_live(now));
        let value = match current {
            Some(entry) => entry
                .value
                .parse::<i64>()
                .map_err(|_| Error::Cache(format!("value at {key} is not an integer")))?,
            None => 0,
        };
        let expires_at = current.and_then(|entry| entry.expires_at);

        let next = value
            .checked_add(delta)
            .ok_or_else(|| Error::Cache(format!("increment of {key} overflows")))?;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let Some(entry) = self.live_entry(key) else {
            return Ok(-2);
        };
        match entry.expires_at {
            None => Ok(-1),
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                Ok(remaining.as_millis().div_ceil(1000) as i64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let backend = MemoryBackend::new();
        backend.setex("short", 5, "v").await.unwrap();
        backend.set("forever", "v").await.unwrap();

        assert_eq!(backend.ttl("short").await.unwrap(), 5);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(backend.get("short").await.unwrap(), None);
        assert!(!backend.exists("short").await.unwrap());
        assert_eq!(backend.ttl("short").await.unwrap(), -2);
        assert_eq!(backend.get("forever").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let backend = MemoryBackend::new();
        backend.set("name", "abc").await.unwrap();
        assert!(backend.incr_by("name", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_incr_overflow_is_an_error() {
        let backend = MemoryBackend::new();
        backend.set("counter", &i64::MAX.to_string()).await.unwrap();

        assert!(matches!(
            backend.incr_by("counter", 1).await,
            Err(Error::Cache(_))
        ));
        assert_eq!(
            backend.get("counter").await.unwrap(),
            Some(i64::MAX.to_string())
        );
        assert_eq!(backend.incr_by("counter", -1).await.unwrap(), i64::MAX - 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_incr_loses_no_updates() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let backend = backend.clone();
            tasks.spawn(async move {
                for _ in 0..500 {
                    backend.incr_by("hits", 1).await.unwrap();
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert_eq!(backend.get("hits").await.unwrap().as_deref(), Some("4000"));
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let backend = MemoryBackend::new();
        backend.set("job:2", "b").await.unwrap();
        backend.set("job:1", "a").await.unwrap();
        backend.set("other", "c").await.unwrap();
        assert_eq!(backend.keys("job:*").await.unwrap(), vec!["job:1", "job:2"]);
    }
}
