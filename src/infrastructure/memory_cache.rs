use crate::domain::ports::{Cache, CacheError, DistributedLock, RateLimitDecision};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Counter(i64),
    Lock,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Single-node stand-in for the shared remote cache.
///
/// Every operation runs under one mutex, so lock acquisition is a genuine
/// test-and-set and rate-limit counting is a genuine atomic increment. Expiry
/// uses `tokio::time`, which lets tests drive TTLs with a paused clock.
///
/// Clones share the same state, which is how tests model several service
/// instances talking to one cache.
#[derive(Clone)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    epoch: Instant,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            epoch: Instant::now(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable(
                "in-memory cache is marked unavailable".to_string(),
            ))
        }
    }

    fn window_key(&self, key: &str, window: Duration, now: Instant) -> String {
        let elapsed = now.duration_since(self.epoch).as_nanos();
        let bucket = elapsed / window.as_nanos().max(1);
        format!("{key}:{bucket}")
    }
}

fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    (!ttl.is_zero()).then(|| now + ttl)
}

/// Drops every expired entry. Rate-limit buckets are never read again once
/// their window has passed, so lookups alone would not evict them.
fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, e| e.is_live(now));
}

fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key, now).map(|e| match &e.value {
            Value::Bytes(bytes) => bytes.clone(),
            Value::Counter(count) => count.to_string().into_bytes(),
            Value::Lock => b"locked".to_vec(),
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                let current = match &entry.value {
                    Value::Counter(count) => *count,
                    Value::Bytes(bytes) => std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            CacheError::Operation(format!("value at {key} is not an integer"))
                        })?,
                    Value::Lock => {
                        return Err(CacheError::Operation(format!("{key} holds a lock")));
                    }
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CacheError::Operation(format!("counter {key} overflowed")))?;
                entry.value = Value::Counter(next);
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Counter(delta),
                        expires_at: None,
                    },
                );
                Ok(delta)
            }
        }
    }

    async fn is_rate_limited(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let window_key = self.window_key(key, window, now);
        let mut entries = self.entries.lock().await;

        purge_expired(&mut entries, now);
        let entry = entries.entry(window_key).or_insert(Entry {
            value: Value::Counter(0),
            expires_at: None,
        });
        let count = match &mut entry.value {
            Value::Counter(count) => {
                *count += 1;
                *count as u64
            }
            _ => return Err(CacheError::Operation("rate limit key clobbered".to_string())),
        };
        if count == 1 {
            entry.expires_at = expiry(now, window);
        }

        if count > limit {
            let retry_after = entry
                .expires_at
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(window);
            Ok(RateLimitDecision::Limited { retry_after })
        } else {
            Ok(RateLimitDecision::Allowed { count })
        }
    }
}

#[async_trait]
impl DistributedLock for InMemoryCache {
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Lock,
                expires_at: expiry(now, ttl),
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().await;
        if entries
            .get(key)
            .is_some_and(|e| matches!(e.value, Value::Lock))
        {
            entries.remove(key);
        }
        Ok(())
    }

    async fn extend_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) if matches!(entry.value, Value::Lock) => {
                entry.expires_at = expiry(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
