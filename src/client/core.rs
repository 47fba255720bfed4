//! Engine front end: submission, runtime configuration and teardown.

use crate::backend::BackendClient;
use crate::batch::{abandon, Channel, PendingRequest, Ticket};
use crate::config::{CoalescerConfig, ConfigPatch, ConfigStore};
use crate::registry::RoutingTable;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Per-submission options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// If a channel already exists for the client's endpoint, make it use this
    /// client object for its future backend calls.
    pub replace_connection: bool,
}

impl SubmitOptions {
    pub fn replace_connection() -> Self {
        Self {
            replace_connection: true,
        }
    }
}

/// Request-coalescing engine.
///
/// Single-key lookups submitted for the same destination within one window
/// are merged into multi-key [`BackendClient::fetch_many`] calls; every caller
/// gets the record (or error) for its own key.
pub struct Coalescer<C: BackendClient> {
    routes: RoutingTable<C>,
    config: Arc<ConfigStore>,
    stats: Arc<EngineStats>,
}

impl<C: BackendClient> Coalescer<C> {
    /// Engine with the default configuration (500 ms debounce window, 100 keys per call).
    pub fn new() -> Self {
        Self::from_parts(Arc::new(ConfigStore::default()))
    }

    pub fn with_config(config: CoalescerConfig) -> Result<Self> {
        Ok(Self::from_parts(Arc::new(ConfigStore::new(config)?)))
    }

    pub fn builder() -> super::CoalescerBuilder<C> {
        super::CoalescerBuilder::new()
    }

    pub(crate) fn from_parts(config: Arc<ConfigStore>) -> Self {
        Self {
            routes: RoutingTable::new(),
            config,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Queue a lookup for `key` and return immediately.
    ///
    /// Fails only if the destination's channel cannot be created (no tokio
    /// runtime, poisoned routing table).
    pub fn enqueue(&self, client: &Arc<C>, key: impl Into<String>) -> Result<Ticket<C::Record>> {
        self.enqueue_with(client, key, SubmitOptions::default())
    }

    pub fn enqueue_with(
        &self,
        client: &Arc<C>,
        key: impl Into<String>,
        options: SubmitOptions,
    ) -> Result<Ticket<C::Record>> {
        let channel = self.routes.get_or_create(client, options.replace_connection, |c| {
            Channel::spawn(c, Arc::clone(&self.config), Arc::clone(&self.stats))
        })?;

        let (request, ticket) = PendingRequest::new(key);
        EngineStats::add(&self.stats.submitted, 1);
        if let Err(request) = channel.submit(request) {
            // The channel was torn down between lookup and submission.
            abandon(
                channel.destination(),
                vec![request],
                self.config.load().teardown_policy,
                &self.stats,
            );
        }
        Ok(ticket)
    }

    /// Look up `key` through the coalescing window and wait for the result.
    ///
    /// `Ok(None)` means the backend has no record for the key.
    pub async fn submit(&self, client: &Arc<C>, key: impl Into<String>) -> Result<Option<C::Record>> {
        self.enqueue(client, key)?.await
    }

    pub async fn submit_with(
        &self,
        client: &Arc<C>,
        key: impl Into<String>,
        options: SubmitOptions,
    ) -> Result<Option<C::Record>> {
        self.enqueue_with(client, key, options)?.await
    }

    /// Merge `patch` into the configuration. Windows that have not closed yet
    /// pick up the new values.
    pub fn set_config(&self, patch: ConfigPatch) -> Result<Arc<CoalescerConfig>> {
        self.config.update(&patch)
    }

    pub fn config(&self) -> Arc<CoalescerConfig> {
        self.config.load()
    }

    /// Close every channel and clear the routing table.
    ///
    /// Requests still accumulating are handled according to the configured
    /// [`TeardownPolicy`](crate::config::TeardownPolicy); backend calls that
    /// were already issued complete normally. Idempotent, and the engine stays
    /// usable: the next submission opens a fresh channel.
    pub fn teardown(&self) {
        let channels = self.routes.drain();
        if channels.is_empty() {
            return;
        }
        for channel in &channels {
            channel.close();
        }
        info!(channels = channels.len(), "coalescer torn down");
    }

    pub fn destinations(&self) -> Vec<String> {
        self.routes.destinations()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.to_snapshot()
    }
}

impl<C: BackendClient> Default for Coalescer<C> {
    fn default() -> Self {
        Self::new()
    }
}
