//! The exposed surface: user creation, message writes, dialogue reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::Config;
use crate::load::{LoadStore, LoadTracker};
use crate::registry::{dedicated_host_user, HostGroup, ShardConnector, ShardRegistry};
use crate::resharding::ReshardingEngine;
use crate::router::ShardRouter;
use crate::store::UserDirectory;
use crate::types::{Message, UserId};
use crate::{Result, ShardError};

pub struct Coordinator {
    router: Arc<ShardRouter>,
    directory: Arc<dyn UserDirectory>,
    engine: Arc<ReshardingEngine>,
}

impl Coordinator {
    /// Connect the fleet described by the registry and start the resharding
    /// worker. Requires at least one Default-group host. Existing dedicated
    /// assignments are rebuilt from the registry, which is authoritative;
    /// the load-counter scan afterwards only queues promotions still owed.
    pub async fn new(
        registry: Arc<dyn ShardRegistry>,
        connector: Arc<dyn ShardConnector>,
        directory: Arc<dyn UserDirectory>,
        load_store: Arc<dyn LoadStore>,
        config: Config,
    ) -> Result<Self> {
        let mut hosts = registry.list_hosts().await?;
        // fixed order keeps the user -> default shard mod rule stable
        // across restarts
        hosts.sort_by(|a, b| a.name.cmp(&b.name));

        let mut defaults = Vec::new();
        let mut dedicated_entries = Vec::new();
        for entry in &hosts {
            match entry.group {
                HostGroup::Default => {
                    let store = connector.connect(entry).await?;
                    store.ensure_schema().await?;
                    defaults.push(store);
                }
                HostGroup::Dedicated => dedicated_entries.push(entry.clone()),
                HostGroup::UserDirectory => {}
            }
        }
        if defaults.is_empty() {
            return Err(ShardError::Config("no Default-group hosts registered".into()));
        }

        let router = Arc::new(ShardRouter::new(defaults));
        for entry in dedicated_entries {
            let Some(user) = dedicated_host_user(&entry.name) else {
                warn!(host = %entry.name, "dedicated host without an owner tag, skipping");
                continue;
            };
            let store = connector.connect(&entry).await?;
            router.assign_dedicated(user, store);
        }

        let tracker = Arc::new(LoadTracker::new(
            load_store,
            config.promotion_threshold_bytes,
        ));
        let engine = ReshardingEngine::start(
            router.clone(),
            registry,
            connector,
            tracker,
            config.promotion_queue_depth,
        );
        // an unavailable counter store reads as no accumulated load: the
        // registry-rebuilt assignments above stand, and owed promotions
        // retry once writes start flowing again
        if let Err(e) = engine.clone().recover().await {
            warn!(error = %e, "startup load scan failed, skipping owed promotions");
        }

        Ok(Self {
            router,
            directory,
            engine,
        })
    }

    /// Assign a new sequential identity on the user-directory shard.
    pub async fn create_user(&self, login: &str) -> Result<UserId> {
        self.directory.create_user(login).await
    }

    /// Route the message to its owning shard, persist it, then account the
    /// load asynchronously. The write response never waits on promotion
    /// machinery; insert failures surface to the caller.
    pub async fn post_message(
        &self,
        from: UserId,
        to: UserId,
        text: impl Into<String>,
    ) -> Result<()> {
        let msg = Message {
            from,
            to,
            text: text.into(),
            at: Utc::now(),
        };
        let owner = self.router.resolve_owner(from);
        owner.insert(&msg).await?;
        self.engine.observe_write(from, msg.text.len() as u64);
        Ok(())
    }

    /// Both directions of a dialogue, merged across every shard that may
    /// hold them. A migrated message can transiently exist on two shards,
    /// so results are deduplicated by primary key; the merged set is
    /// ordered by timestamp.
    pub async fn get_dialogue(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut merged: BTreeMap<(DateTime<Utc>, UserId, UserId), Message> = BTreeMap::new();
        for (from, to) in [(a, b), (b, a)] {
            for store in self.router.resolve_read_set(from) {
                for msg in store.query(from, to).await? {
                    merged.insert((msg.at, msg.from, msg.to), msg);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Users currently assigned a dedicated shard.
    pub fn dedicated_users(&self) -> Vec<UserId> {
        self.router.dedicated_users()
    }

    pub fn router(&self) -> &Arc<ShardRouter> {
        &self.router
    }
}
