//! Mock implementations for unit testing without a real Redis server.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! rtac-scheduler = { path = "...", features = ["test-support"] }
//! ```

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::traits::LockStore;

// ── InMemoryLockStore ─────────────────────────────────────────────────────────

/// Atomic lock store backed by a mutex-guarded map.
///
/// Expiry uses `tokio::time::Instant`, so tests running with
/// `start_paused = true` control TTLs with `tokio::time::advance`. Clones share
/// the same map, which is how several replicas in one test see one store.
#[derive(Clone)]
pub struct InMemoryLockStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    reachable: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            reachable: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails with a connection error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Current live value of `key`, ignoring expired entries.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.value_of(key).is_some()
    }

    /// Remaining TTL of `key`, if live.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    /// Overwrite `key` as if another replica had taken it over.
    pub fn force_value(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Live keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of store operations attempted, reachable or not.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_reachable() {
            Ok(())
        } else {
            Err(StoreError::Connection("in-memory store unreachable".into()))
        }
    }
}

impl LockStore for InMemoryLockStore {
    async fn acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(e) if e.expires_at > now && e.value == expected => {
                e.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let owned = entries
            .get(key)
            .is_some_and(|e| e.expires_at > now && e.value == expected);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    async fn ping(&self) -> Result<bool, StoreError> {
        self.check()?;
        Ok(true)
    }
}

// ── MockClock ─────────────────────────────────────────────────────────────────

/// Wall clock that moves with tokio's (possibly paused) clock.
///
/// `now()` is `origin_wall + (tokio::Instant::now() - origin)`, so
/// `tokio::time::advance` moves slots and TTLs together.
#[derive(Clone)]
pub struct MockClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl MockClock {
    pub fn starting_at(origin_wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.origin_wall
            + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}
