//! Load-based promotion of hot users onto dedicated shards.
//!
//! Per-user state machine: Normal -> Promoting -> Dedicated. The engine is
//! the only writer of new dedicated assignments. Promotion runs detached
//! from the triggering write; its failures are logged and self-heal on the
//! next write that re-crosses the threshold.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::load::LoadTracker;
use crate::registry::{dedicated_host_name, HostGroup, ShardConnector, ShardRegistry};
use crate::router::ShardRouter;
use crate::types::UserId;
use crate::{Result, ShardError};

/// Load event emitted after every successful message write.
#[derive(Debug, Clone, Copy)]
struct WriteObserved {
    user: UserId,
    bytes: u64,
}

pub struct ReshardingEngine {
    router: Arc<ShardRouter>,
    registry: Arc<dyn ShardRegistry>,
    connector: Arc<dyn ShardConnector>,
    tracker: Arc<LoadTracker>,
    /// Single-flight guard: at most one in-flight promotion per user.
    in_flight: DashMap<UserId, ()>,
    tx: mpsc::Sender<WriteObserved>,
}

impl ReshardingEngine {
    /// Build the engine and start its load-accounting worker.
    pub fn start(
        router: Arc<ShardRouter>,
        registry: Arc<dyn ShardRegistry>,
        connector: Arc<dyn ShardConnector>,
        tracker: Arc<LoadTracker>,
        queue_depth: usize,
    ) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel(queue_depth);
        let engine = Arc::new(Self {
            router,
            registry,
            connector,
            tracker,
            in_flight: DashMap::new(),
            tx,
        });

        let worker = engine.clone();
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                worker.clone().handle_write(ev).await;
            }
        });

        engine
    }

    /// Fire-and-forget hook on the write path. Never blocks: a full queue
    /// drops the event, which only delays promotion for that user.
    pub fn observe_write(&self, user: UserId, bytes: u64) {
        if self.tx.try_send(WriteObserved { user, bytes }).is_err() {
            warn!(user, bytes, "load queue full, dropping load event");
        }
    }

    async fn handle_write(self: Arc<Self>, ev: WriteObserved) {
        let total = match self.tracker.record_write(ev.user, ev.bytes).await {
            Ok(total) => total,
            Err(e) => {
                // an unavailable counter reads as no accumulated load
                warn!(user = ev.user, error = %e, "load accounting failed");
                return;
            }
        };
        if self.tracker.over_threshold(total) {
            debug!(user = ev.user, total, "load over threshold");
            self.clone().maybe_promote(ev.user);
        }
    }

    /// Spawn a detached promotion for `user` unless one is already running
    /// or the user already has a dedicated assignment.
    pub fn maybe_promote(self: Arc<Self>, user: UserId) {
        if self.router.is_dedicated(user) {
            return;
        }
        if self.in_flight.insert(user, ()).is_some() {
            return;
        }
        tokio::spawn(async move {
            match self.promote(user).await {
                Ok(()) => info!(user, "user promoted to dedicated shard"),
                Err(e) => warn!(user, error = %e, "promotion aborted"),
            }
            self.in_flight.remove(&user);
        });
    }

    /// The promotion protocol. Each step is its own round trip; no per-user
    /// lock is held across any of them. The assignment flip at the end is
    /// the single commit point, so an abort anywhere earlier leaves the
    /// router untouched and the user on their default shard.
    async fn promote(&self, user: UserId) -> Result<()> {
        let name = dedicated_host_name(user);

        // provision; idempotent against a previous aborted attempt
        self.registry.add_host(&name, HostGroup::Dedicated).await?;
        self.registry.commit().await?;

        // reload topology to pick up the committed endpoint
        let hosts = self.registry.list_hosts().await?;
        let entry = hosts
            .into_iter()
            .find(|h| h.group == HostGroup::Dedicated && h.name == name)
            .ok_or_else(|| ShardError::Registry(format!("host {name} missing after commit")))?;
        let dedicated = self.connector.connect(&entry).await?;
        dedicated.ensure_schema().await?;

        // backfill a snapshot of the user's history; writes racing this
        // copy keep landing on the default shard and stay visible through
        // the read set
        let source = self.router.default_store(user);
        let history = source.history(user).await?;
        let copied = dedicated.insert_backfill(&history).await?;
        debug!(user, rows = history.len(), copied, "backfill complete");

        if !self.router.assign_dedicated(user, dedicated) {
            debug!(user, "dedicated assignment already present");
        }
        Ok(())
    }

    /// Queue promotions owed from persisted counters. Run once at startup,
    /// after dedicated assignments were rebuilt from the registry.
    pub async fn recover(self: Arc<Self>) -> Result<()> {
        for user in self.tracker.scan_over_threshold().await? {
            if !self.router.is_dedicated(user) {
                info!(user, "persisted load over threshold, promotion owed");
                self.clone().maybe_promote(user);
            }
        }
        Ok(())
    }
}
