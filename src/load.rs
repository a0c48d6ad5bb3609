//! Per-user load accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::UserId;
use crate::{Result, ShardError};

/// External key-value store holding per-user byte totals. `incr_by` must be
/// an atomic per-key read-modify-write (INCRBY semantics) so concurrent
/// writers for the same user never lose updates.
#[async_trait]
pub trait LoadStore: Send + Sync {
    async fn incr_by(&self, key: &str, delta: u64) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// All counter keys, used by the startup recovery scan.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory counter store. Entry-level locking in the map gives the atomic
/// increment.
pub struct MemoryLoadStore {
    counters: DashMap<String, u64>,
    unreachable: AtomicBool,
}

impl MemoryLoadStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ShardError::Connectivity("load store unreachable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryLoadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadStore for MemoryLoadStore {
    async fn incr_by(&self, key: &str, delta: u64) -> Result<u64> {
        self.check_reachable()?;
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>> {
        self.check_reachable()?;
        Ok(self.counters.get(key).map(|v| *v))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.check_reachable()?;
        Ok(self.counters.iter().map(|e| e.key().clone()).collect())
    }
}

/// Cumulative per-user load plus the promotion threshold test. Counters are
/// monotonically non-decreasing: delete is out of scope, so nothing ever
/// decrements.
pub struct LoadTracker {
    store: Arc<dyn LoadStore>,
    threshold_bytes: u64,
}

impl LoadTracker {
    pub fn new(store: Arc<dyn LoadStore>, threshold_bytes: u64) -> Self {
        Self {
            store,
            threshold_bytes,
        }
    }

    fn key(user: UserId) -> String {
        user.to_string()
    }

    /// Add `byte_len` to the user's counter, creating it if absent, and
    /// return the updated total.
    pub async fn record_write(&self, user: UserId, byte_len: u64) -> Result<u64> {
        self.store.incr_by(&Self::key(user), byte_len).await
    }

    pub async fn current_total(&self, user: UserId) -> Result<Option<u64>> {
        self.store.get(&Self::key(user)).await
    }

    /// Strictly over: a total equal to the threshold does not qualify.
    pub fn over_threshold(&self, total: u64) -> bool {
        total > self.threshold_bytes
    }

    /// Users whose persisted counters exceed the threshold. Recovery only:
    /// the registry stays authoritative for existing dedicated assignments,
    /// this scan merely decides whether new promotions are owed.
    pub async fn scan_over_threshold(&self) -> Result<Vec<UserId>> {
        let mut over = Vec::new();
        for key in self.store.keys().await? {
            let Ok(user) = key.parse::<UserId>() else {
                continue;
            };
            if let Some(total) = self.store.get(&key).await? {
                if self.over_threshold(total) {
                    over.push(user);
                }
            }
        }
        Ok(over)
    }
}
