//! Administrative facade over the pool of shard hosts.
//!
//! The registry is consumed, not owned: it is authoritative for group
//! membership and for which dedicated assignments exist, and the engine
//! serializes its promotion attempts against it. Topology changes staged
//! with `add_host` take effect for new connections only after `commit`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::store::{DialogueStore, MemoryDialogueStore};
use crate::types::UserId;
use crate::{Result, ShardError};

/// Host group a shard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostGroup {
    /// Holds the user table.
    UserDirectory,
    /// Holds messages for ordinary users, partitioned by the mod rule.
    Default,
    /// Holds the complete message history of exactly one promoted user.
    Dedicated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    pub group: HostGroup,
    /// Live connection endpoint, resolvable once the entry is committed.
    pub endpoint: String,
}

#[async_trait]
pub trait ShardRegistry: Send + Sync {
    /// Committed topology. Staged additions are invisible here.
    async fn list_hosts(&self) -> Result<Vec<HostEntry>>;

    /// Stage a host under a group. Re-adding an existing mapping is a no-op.
    async fn add_host(&self, name: &str, group: HostGroup) -> Result<()>;

    /// Persist staged topology changes so they take effect for new
    /// connections.
    async fn commit(&self) -> Result<()>;
}

/// Maps a committed registry entry to a live store handle.
#[async_trait]
pub trait ShardConnector: Send + Sync {
    async fn connect(&self, entry: &HostEntry) -> Result<Arc<dyn DialogueStore>>;
}

/// Logical host name a promoted user's dedicated shard registers under.
pub fn dedicated_host_name(user: UserId) -> String {
    format!("user-{user}")
}

/// Inverse of [`dedicated_host_name`]. Used to rebuild assignments from the
/// registry at startup.
pub fn dedicated_host_user(name: &str) -> Option<UserId> {
    name.strip_prefix("user-")?.parse().ok()
}

#[derive(Default)]
struct RegistryState {
    committed: Vec<HostEntry>,
    pending: Vec<HostEntry>,
}

/// In-memory registry with commit semantics.
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    fail_admin: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            fail_admin: AtomicBool::new(false),
        }
    }

    /// Registry seeded with already-committed hosts.
    pub fn with_hosts(hosts: &[(&str, HostGroup)]) -> Self {
        let registry = Self::new();
        {
            let mut state = registry.state.lock();
            for (name, group) in hosts {
                state.committed.push(HostEntry {
                    name: (*name).to_string(),
                    group: *group,
                    endpoint: Self::endpoint_for(name),
                });
            }
        }
        registry
    }

    /// Simulate the admin endpoint being unreachable: `add_host` and
    /// `commit` fail while set.
    pub fn set_fail_admin(&self, fail: bool) {
        self.fail_admin.store(fail, Ordering::SeqCst);
    }

    pub fn committed_in_group(&self, group: HostGroup) -> Vec<HostEntry> {
        self.state
            .lock()
            .committed
            .iter()
            .filter(|h| h.group == group)
            .cloned()
            .collect()
    }

    fn endpoint_for(name: &str) -> String {
        format!("mem://{name}")
    }

    fn check_admin(&self) -> Result<()> {
        if self.fail_admin.load(Ordering::SeqCst) {
            return Err(ShardError::Registry("admin endpoint unreachable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardRegistry for MemoryRegistry {
    async fn list_hosts(&self) -> Result<Vec<HostEntry>> {
        Ok(self.state.lock().committed.clone())
    }

    async fn add_host(&self, name: &str, group: HostGroup) -> Result<()> {
        self.check_admin()?;
        let mut state = self.state.lock();
        let known = state
            .committed
            .iter()
            .chain(state.pending.iter())
            .any(|h| h.name == name && h.group == group);
        if known {
            return Ok(());
        }
        state.pending.push(HostEntry {
            name: name.to_string(),
            group,
            endpoint: Self::endpoint_for(name),
        });
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.check_admin()?;
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        Ok(())
    }
}

/// Hands out one shared in-memory store per host name, so reconnecting to
/// the same host observes the same rows.
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, Arc<MemoryDialogueStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Direct handle to a host's store, for test assertions.
    pub fn store(&self, name: &str) -> Option<Arc<MemoryDialogueStore>> {
        self.stores.lock().get(name).cloned()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardConnector for MemoryConnector {
    async fn connect(&self, entry: &HostEntry) -> Result<Arc<dyn DialogueStore>> {
        let mut stores = self.stores.lock();
        let store = stores
            .entry(entry.name.clone())
            .or_insert_with(|| Arc::new(MemoryDialogueStore::new(entry.name.clone())))
            .clone();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_host_invisible_until_commit() {
        let registry = MemoryRegistry::new();
        registry.add_host("default-0", HostGroup::Default).await.unwrap();

        assert!(registry.list_hosts().await.unwrap().is_empty());

        registry.commit().await.unwrap();
        let hosts = registry.list_hosts().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "default-0");
        assert_eq!(hosts[0].endpoint, "mem://default-0");
    }

    #[tokio::test]
    async fn test_add_host_is_idempotent() {
        let registry = MemoryRegistry::new();
        registry.add_host("user-7", HostGroup::Dedicated).await.unwrap();
        registry.add_host("user-7", HostGroup::Dedicated).await.unwrap();
        registry.commit().await.unwrap();
        registry.add_host("user-7", HostGroup::Dedicated).await.unwrap();
        registry.commit().await.unwrap();

        assert_eq!(registry.list_hosts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_admin_surfaces_errors() {
        let registry = MemoryRegistry::new();
        registry.set_fail_admin(true);

        assert!(registry.add_host("x", HostGroup::Default).await.is_err());
        assert!(registry.commit().await.is_err());
        // reads still work against the committed view
        assert!(registry.list_hosts().await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_reuses_store_per_host() {
        let connector = MemoryConnector::new();
        let entry = HostEntry {
            name: "default-0".to_string(),
            group: HostGroup::Default,
            endpoint: "mem://default-0".to_string(),
        };

        let a = connector.connect(&entry).await.unwrap();
        let b = connector.connect(&entry).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b), "reconnect must see the same host");
    }

    #[test]
    fn test_dedicated_host_naming_round_trip() {
        assert_eq!(dedicated_host_name(42), "user-42");
        assert_eq!(dedicated_host_user("user-42"), Some(42));
        assert_eq!(dedicated_host_user("default-0"), None);
    }
}
