use crate::backend::BackendClient;
use crate::client::core::Coalescer;
use crate::config::{CoalescerConfig, ConfigPatch, ConfigStore};
use crate::Result;
use std::marker::PhantomData;
use std::sync::Arc;

/// Builder for creating engines with custom configuration.
pub struct CoalescerBuilder<C> {
    config: CoalescerConfig,
    shared: Option<Arc<ConfigStore>>,
    from_env: bool,
    _client: PhantomData<fn() -> C>,
}

impl<C: BackendClient> CoalescerBuilder<C> {
    pub fn new() -> Self {
        Self {
            config: CoalescerConfig::default(),
            shared: None,
            from_env: false,
            _client: PhantomData,
        }
    }

    pub fn config(mut self, config: CoalescerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share one configuration store between several engines, so a single
    /// `set_config` reaches all of them. Takes precedence over `config`.
    pub fn shared_config(mut self, store: Arc<ConfigStore>) -> Self {
        self.shared = Some(store);
        self
    }

    /// Overlay `BATCH_COALESCER_*` environment variables on the configuration.
    pub fn from_env(mut self, enable: bool) -> Self {
        self.from_env = enable;
        self
    }

    pub fn build(self) -> Result<Coalescer<C>> {
        if let Some(store) = self.shared {
            return Ok(Coalescer::from_parts(store));
        }
        let config = if self.from_env {
            self.config.merged(&ConfigPatch::from_env()?)
        } else {
            self.config
        };
        Ok(Coalescer::from_parts(Arc::new(ConfigStore::new(config)?)))
    }
}

impl<C: BackendClient> Default for CoalescerBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
