//! Owner and read-set resolution.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::DialogueStore;
use crate::types::UserId;

/// Maps a user to the shard owning their write path. A dedicated assignment
/// overrides the deterministic mod rule over the default shard set.
///
/// The assignment table is the one piece of mutable shared state here:
/// readers observe either the pre- or post-flip value, never an
/// intermediate one.
pub struct ShardRouter {
    defaults: Vec<Arc<dyn DialogueStore>>,
    dedicated: DashMap<UserId, Arc<dyn DialogueStore>>,
}

impl ShardRouter {
    /// `defaults` must be non-empty and in a fixed order, so the mod rule
    /// stays stable across restarts.
    pub fn new(defaults: Vec<Arc<dyn DialogueStore>>) -> Self {
        debug_assert!(!defaults.is_empty());
        Self {
            defaults,
            dedicated: DashMap::new(),
        }
    }

    /// Index of the default-group shard the mod rule selects for this user.
    pub fn default_index(&self, user: UserId) -> usize {
        (user as u64 % self.defaults.len() as u64) as usize
    }

    /// Default-group shard for this user, ignoring any dedicated
    /// assignment. Promotion backfill reads from here.
    pub fn default_store(&self, user: UserId) -> Arc<dyn DialogueStore> {
        self.defaults[self.default_index(user)].clone()
    }

    /// Shard owning the user's write path right now.
    pub fn resolve_owner(&self, user: UserId) -> Arc<dyn DialogueStore> {
        if let Some(store) = self.dedicated.get(&user) {
            return store.clone();
        }
        self.default_store(user)
    }

    /// Every shard that may hold messages sent by this user. The default
    /// store is always consulted: history written before promotion may
    /// still live there, and writes racing a backfill land there until the
    /// flip. Callers merge results; correctness never depends on the
    /// migration having completed.
    pub fn resolve_read_set(&self, user: UserId) -> Vec<Arc<dyn DialogueStore>> {
        let mut stores = vec![self.default_store(user)];
        if let Some(store) = self.dedicated.get(&user) {
            stores.push(store.clone());
        }
        stores
    }

    /// The promotion flip: the single synchronized update making the
    /// dedicated store visible. First assignment wins; a dedicated shard is
    /// never reassigned or revoked. Returns false if an assignment already
    /// existed.
    pub fn assign_dedicated(&self, user: UserId, store: Arc<dyn DialogueStore>) -> bool {
        match self.dedicated.entry(user) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(store);
                true
            }
        }
    }

    pub fn is_dedicated(&self, user: UserId) -> bool {
        self.dedicated.contains_key(&user)
    }

    pub fn dedicated_users(&self) -> Vec<UserId> {
        self.dedicated.iter().map(|e| *e.key()).collect()
    }

    pub fn default_count(&self) -> usize {
        self.defaults.len()
    }
}
