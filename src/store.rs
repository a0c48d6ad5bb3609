//! Per-shard storage interfaces and their in-memory implementations.
//!
//! A `DialogueStore` wraps one physical shard's message table; the
//! `UserDirectory` wraps the user table on the directory shard. Real
//! deployments back these with a relational store per host; the in-memory
//! versions keep the same constraint semantics for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::types::{Message, User, UserId};
use crate::{Result, ShardError};

/// One physical shard's message table.
#[async_trait]
pub trait DialogueStore: Send + Sync {
    /// Create the message table if it does not exist yet.
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert a single message. A duplicate `(from, to, at)` key is rejected
    /// with [`ShardError::Constraint`].
    async fn insert(&self, msg: &Message) -> Result<()>;

    /// Bulk insert used by promotion backfill. Rows already present on the
    /// target shard are skipped, so a retried backfill over a partial
    /// previous copy succeeds. Returns the number of rows actually written.
    async fn insert_backfill(&self, msgs: &[Message]) -> Result<usize>;

    /// Messages sent by `from` to `to`, ordered by timestamp.
    async fn query(&self, from: UserId, to: UserId) -> Result<Vec<Message>>;

    /// Complete send history of one user across all recipients. This is the
    /// backfill read: a snapshot as of when it is issued.
    async fn history(&self, from: UserId) -> Result<Vec<Message>>;
}

/// The user table on the directory shard.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Insert a user and read back the assigned auto-increment id, as one
    /// transaction on the backing store.
    async fn create_user(&self, login: &str) -> Result<UserId>;
}

type MessageKey = (UserId, UserId, DateTime<Utc>);

/// In-memory shard. The B-tree key is the message table's primary key,
/// which gives per-shard `at` ordering and the uniqueness constraint in one
/// structure.
pub struct MemoryDialogueStore {
    name: String,
    rows: RwLock<BTreeMap<MessageKey, Message>>,
    schema_ready: AtomicBool,
    unreachable: AtomicBool,
}

impl MemoryDialogueStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            schema_ready: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate the host dropping off the network. Every operation fails
    /// with a connectivity error while set.
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ShardError::Connectivity(format!(
                "host {} unreachable",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DialogueStore for MemoryDialogueStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.check_reachable()?;
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, msg: &Message) -> Result<()> {
        self.check_reachable()?;
        let mut rows = self.rows.write();
        if rows.contains_key(&msg.key()) {
            return Err(ShardError::Constraint(format!(
                "duplicate message key ({}, {}, {})",
                msg.from, msg.to, msg.at
            )));
        }
        rows.insert(msg.key(), msg.clone());
        Ok(())
    }

    async fn insert_backfill(&self, msgs: &[Message]) -> Result<usize> {
        self.check_reachable()?;
        let mut rows = self.rows.write();
        let mut written = 0;
        for msg in msgs {
            if rows.contains_key(&msg.key()) {
                continue;
            }
            rows.insert(msg.key(), msg.clone());
            written += 1;
        }
        Ok(written)
    }

    async fn query(&self, from: UserId, to: UserId) -> Result<Vec<Message>> {
        self.check_reachable()?;
        let rows = self.rows.read();
        let lo = (from, to, DateTime::<Utc>::MIN_UTC);
        let hi = (from, to, DateTime::<Utc>::MAX_UTC);
        Ok(rows.range(lo..=hi).map(|(_, m)| m.clone()).collect())
    }

    async fn history(&self, from: UserId) -> Result<Vec<Message>> {
        self.check_reachable()?;
        let rows = self.rows.read();
        let lo = (from, UserId::MIN, DateTime::<Utc>::MIN_UTC);
        let hi = (from, UserId::MAX, DateTime::<Utc>::MAX_UTC);
        Ok(rows.range(lo..=hi).map(|(_, m)| m.clone()).collect())
    }
}

/// In-memory user directory: an auto-increment counter plus the user table.
pub struct MemoryDirectory {
    next_id: AtomicI64,
    users: Mutex<Vec<User>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            users: Mutex::new(Vec::new()),
        }
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.lock().iter().find(|u| u.id == id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn create_user(&self, login: &str) -> Result<UserId> {
        // id assignment and row insert share one critical section, standing
        // in for the INSERT + LAST_INSERT_ID transaction on a real shard
        let mut users = self.users.lock();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        users.push(User {
            id,
            login: login.to_string(),
        });
        Ok(id)
    }
}
