//! Key-value storage behind the response cache.
//!
//! The coordinator only needs `get` and `set` with a per-entry TTL. Cleanup is
//! left entirely to expiry; there is no delete.

use std::{
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry as MapEntry};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::debug;

/// How often [`MemoryStore`] drops expired entries by default.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Errors surfaced by a [`CacheStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },

    #[error("cache store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// An async key-value store with per-entry TTL.
///
/// `set` is last-write-wins. Implementations must be safe to share across
/// tasks; the coordinator never locks around store calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Stores `value` only if `key` holds no live value. Returns whether the
    /// write happened.
    ///
    /// The default is a plain read followed by a write, so two concurrent
    /// callers can both observe the key as absent and both "win". Backends
    /// with a conditional write should override it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }
}

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn new(value: Bytes, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

type Entries = DashMap<String, Entry>;

/// In-process [`CacheStore`] backed by a concurrent hash map.
///
/// Expired entries read as absent. They are dropped on access and by a
/// background sweep that starts with the first write and stops once the store
/// is dropped. `set_if_absent` is atomic per key.
pub struct MemoryStore {
    entries: Arc<Entries>,
    sweep_interval: Duration,
    sweeper: OnceLock<JoinHandle<()>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a store whose background sweep runs every `interval`.
    ///
    /// A zero interval is raised to one millisecond.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweep_interval: interval.max(Duration::from_millis(1)),
            sweeper: OnceLock::new(),
        }
    }

    /// Number of entries that have not expired yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry now and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        sweep(&self.entries, Instant::now())
    }

    /// Spawns the sweep task on first use. Only called from async store
    /// methods, so a runtime is always present.
    fn ensure_sweeper(&self) {
        self.sweeper.get_or_init(|| {
            let entries = Arc::downgrade(&self.entries);
            tokio::spawn(run_sweeper(entries, self.sweep_interval))
        });
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get() {
            sweeper.abort();
        }
    }
}

fn sweep(entries: &Entries, now: Instant) -> usize {
    let mut removed = 0;
    entries.retain(|_, entry| {
        let live = entry.is_live(now);
        if !live {
            removed += 1;
        }
        live
    });
    removed
}

async fn run_sweeper(entries: Weak<Entries>, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(map) = entries.upgrade() else {
            break;
        };
        let removed = sweep(&map, Instant::now());
        if removed > 0 {
            debug!(removed, remaining = map.len(), "swept expired cache entries");
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_sweeper();
        self.entries
            .insert(key.to_owned(), Entry::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.ensure_sweeper();
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(Entry::new(value, ttl, now));
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value, ttl, now));
            }
        }
        Ok(true)
    }
}
