//! Engine configuration.
//!
//! A single [`CoalescerConfig`] value is shared by every channel of one
//! [`Coalescer`](crate::Coalescer). It lives in a [`ConfigStore`] backed by
//! `ArcSwap`: reads are lock-free and always observe the latest value, writes
//! replace the whole object. Nothing is snapshotted at submission time; channels
//! read the store when they evaluate or close a window and the dispatcher reads
//! it again when it issues backend calls.

use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default accumulation window in milliseconds.
pub const DEFAULT_TIME_WINDOW_MS: u64 = 500;
/// Default maximum number of unique keys per backend call.
pub const DEFAULT_MAXIMUM_BATCH_SIZE: usize = 100;

pub const ENV_TIME_WINDOW_MS: &str = "BATCH_COALESCER_TIME_WINDOW_MS";
pub const ENV_MAX_BATCH_SIZE: &str = "BATCH_COALESCER_MAX_BATCH_SIZE";
pub const ENV_WINDOW_MODE: &str = "BATCH_COALESCER_WINDOW_MODE";
pub const ENV_TEARDOWN_POLICY: &str = "BATCH_COALESCER_TEARDOWN_POLICY";

/// Opaque options forwarded verbatim to every backend call.
pub type CallOptions = serde_json::Value;

/// When an open window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Quiet period: every arrival pushes the deadline out by the time window.
    #[default]
    Debounce,
    /// Fixed window: closes one time window after it opened.
    Tumbling,
}

impl std::str::FromStr for WindowMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debounce" | "quiet" => Ok(WindowMode::Debounce),
            "tumbling" | "fixed" => Ok(WindowMode::Tumbling),
            other => Err(Error::configuration_with_context(
                format!("unknown window mode '{}'", other),
                ErrorContext::new()
                    .with_field_path("window_mode")
                    .with_details("expected 'debounce' or 'tumbling'"),
            )),
        }
    }
}

/// What happens to accumulated, undispatched requests at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Drop them unsettled; their tickets never resolve.
    #[default]
    Abandon,
    /// Settle each with [`Error::Abandoned`].
    Reject,
}

impl std::str::FromStr for TeardownPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abandon" => Ok(TeardownPolicy::Abandon),
            "reject" => Ok(TeardownPolicy::Reject),
            other => Err(Error::configuration_with_context(
                format!("unknown teardown policy '{}'", other),
                ErrorContext::new()
                    .with_field_path("teardown_policy")
                    .with_details("expected 'abandon' or 'reject'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    pub time_window_ms: u64,
    pub maximum_batch_size: usize,
    pub call_options: CallOptions,
    pub window_mode: WindowMode,
    pub teardown_policy: TeardownPolicy,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            time_window_ms: DEFAULT_TIME_WINDOW_MS,
            maximum_batch_size: DEFAULT_MAXIMUM_BATCH_SIZE,
            call_options: CallOptions::Null,
            window_mode: WindowMode::default(),
            teardown_policy: TeardownPolicy::default(),
        }
    }
}

impl CoalescerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Windows have whole-millisecond granularity; sub-millisecond parts are
    /// dropped, so anything shorter than 1 ms fails [`validate`](Self::validate).
    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window_ms = whole_millis(window);
        self
    }

    pub fn with_maximum_batch_size(mut self, size: usize) -> Self {
        self.maximum_batch_size = size;
        self
    }

    pub fn with_call_options(mut self, options: CallOptions) -> Self {
        self.call_options = options;
        self
    }

    pub fn with_window_mode(mut self, mode: WindowMode) -> Self {
        self.window_mode = mode;
        self
    }

    pub fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.time_window_ms == 0 {
            return Err(Error::configuration_with_context(
                "time window must be at least 1 ms",
                ErrorContext::new()
                    .with_field_path("time_window_ms")
                    .with_source("config"),
            ));
        }
        if self.maximum_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "maximum batch size must be positive",
                ErrorContext::new()
                    .with_field_path("maximum_batch_size")
                    .with_source("config"),
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CoalescerConfig = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid YAML configuration: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read configuration file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overlaid with the `BATCH_COALESCER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let patch = ConfigPatch::from_env()?;
        let config = Self::default().merged(&patch);
        config.validate()?;
        Ok(config)
    }

    /// Apply `patch` on top of `self`; omitted fields keep their current values.
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(ms) = patch.time_window_ms {
            next.time_window_ms = ms;
        }
        if let Some(size) = patch.maximum_batch_size {
            next.maximum_batch_size = size;
        }
        if let Some(ref options) = patch.call_options {
            next.call_options = options.clone();
        }
        if let Some(mode) = patch.window_mode {
            next.window_mode = mode;
        }
        if let Some(policy) = patch.teardown_policy {
            next.teardown_policy = policy;
        }
        next
    }
}

/// Partial update for [`ConfigStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub time_window_ms: Option<u64>,
    pub maximum_batch_size: Option<usize>,
    pub call_options: Option<CallOptions>,
    pub window_mode: Option<WindowMode>,
    pub teardown_policy: Option<TeardownPolicy>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_window(mut self, window: Duration) -> Self {
        self.time_window_ms = Some(whole_millis(window));
        self
    }

    pub fn maximum_batch_size(mut self, size: usize) -> Self {
        self.maximum_batch_size = Some(size);
        self
    }

    pub fn call_options(mut self, options: CallOptions) -> Self {
        self.call_options = Some(options);
        self
    }

    pub fn window_mode(mut self, mode: WindowMode) -> Self {
        self.window_mode = Some(mode);
        self
    }

    pub fn teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = Some(policy);
        self
    }

    /// Patch holding whichever `BATCH_COALESCER_*` variables are set.
    pub fn from_env() -> Result<Self> {
        let mut patch = Self::default();
        if let Ok(raw) = std::env::var(ENV_TIME_WINDOW_MS) {
            patch.time_window_ms = Some(parse_env_number(ENV_TIME_WINDOW_MS, &raw)?);
        }
        if let Ok(raw) = std::env::var(ENV_MAX_BATCH_SIZE) {
            patch.maximum_batch_size = Some(parse_env_number(ENV_MAX_BATCH_SIZE, &raw)?);
        }
        if let Ok(raw) = std::env::var(ENV_WINDOW_MODE) {
            patch.window_mode = Some(raw.parse()?);
        }
        if let Ok(raw) = std::env::var(ENV_TEARDOWN_POLICY) {
            patch.teardown_policy = Some(raw.parse()?);
        }
        Ok(patch)
    }
}

fn whole_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

fn parse_env_number<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        Error::configuration_with_context(
            format!("{} is not a valid number: '{}'", var, raw),
            ErrorContext::new()
                .with_field_path(var)
                .with_source("config_loader"),
        )
    })
}

/// Hot-swappable configuration shared by the channels of one engine.
///
/// Every successful update bumps a version on a `watch` channel so idle
/// channel tasks can re-arm their deadlines without waiting for traffic.
pub struct ConfigStore {
    current: ArcSwap<CoalescerConfig>,
    changes: watch::Sender<u64>,
}

impl ConfigStore {
    pub fn new(config: CoalescerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: CoalescerConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(config),
            changes,
        }
    }

    /// Latest configuration.
    pub fn load(&self) -> Arc<CoalescerConfig> {
        self.current.load_full()
    }

    /// Receiver that is marked changed after every successful update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Merge `patch` into the current value and publish the result.
    ///
    /// The merge is validated before anything is stored, so a rejected patch
    /// leaves the previous configuration in place.
    pub fn update(&self, patch: &ConfigPatch) -> Result<Arc<CoalescerConfig>> {
        let mut outcome = None;
        self.current.rcu(|current| {
            let next = current.merged(patch);
            match next.validate() {
                Ok(()) => {
                    let next = Arc::new(next);
                    outcome = Some(Ok(Arc::clone(&next)));
                    next
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    Arc::clone(current)
                }
            }
        });
        let result = match outcome {
            Some(result) => result,
            None => Ok(self.load()),
        };
        if result.is_ok() {
            self.changes.send_modify(|version| *version = version.wrapping_add(1));
        }
        result
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::from_valid(CoalescerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CoalescerConfig::default();
        assert_eq!(config.time_window(), Duration::from_millis(500));
        assert_eq!(config.maximum_batch_size, 100);
        assert_eq!(config.call_options, CallOptions::Null);
        assert_eq!(config.window_mode, WindowMode::Debounce);
        assert_eq!(config.teardown_policy, TeardownPolicy::Abandon);
    }

    #[test]
    fn test_config_builder() {
        let config = CoalescerConfig::new()
            .with_time_window(Duration::from_millis(100))
            .with_maximum_batch_size(3)
            .with_window_mode(WindowMode::Tumbling);
        assert_eq!(config.time_window_ms, 100);
        assert_eq!(config.maximum_batch_size, 3);
        assert_eq!(config.window_mode, WindowMode::Tumbling);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = CoalescerConfig::new()
            .with_maximum_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = CoalescerConfig::new()
            .with_time_window(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("time_window_ms")
        );
    }

    #[test]
    fn test_store_update_merges_omitted_fields() {
        let store = ConfigStore::default();
        store
            .update(&ConfigPatch::new().call_options(serde_json::json!({"commitment": "confirmed"})))
            .unwrap();
        let updated = store
            .update(&ConfigPatch::new().time_window(Duration::from_millis(100)))
            .unwrap();

        assert_eq!(updated.time_window_ms, 100);
        assert_eq!(updated.maximum_batch_size, DEFAULT_MAXIMUM_BATCH_SIZE);
        assert_eq!(
            store.load().call_options,
            serde_json::json!({"commitment": "confirmed"})
        );
    }

    #[test]
    fn test_store_update_rejects_invalid_patch() {
        let store = ConfigStore::default();
        store
            .update(&ConfigPatch::new().maximum_batch_size(7))
            .unwrap();
        assert!(store
            .update(&ConfigPatch::new().maximum_batch_size(0))
            .is_err());
        assert_eq!(store.load().maximum_batch_size, 7);
    }

    #[test]
    fn test_from_yaml_str() {
        let config = CoalescerConfig::from_yaml_str(
            "time_window_ms: 250\nwindow_mode: tumbling\ncall_options:\n  encoding: base64\n",
        )
        .unwrap();
        assert_eq!(config.time_window_ms, 250);
        assert_eq!(config.maximum_batch_size, DEFAULT_MAXIMUM_BATCH_SIZE);
        assert_eq!(config.window_mode, WindowMode::Tumbling);
        assert_eq!(config.call_options["encoding"], "base64");

        assert!(CoalescerConfig::from_yaml_str("maximum_batch_size: 0\n").is_err());
        assert!(CoalescerConfig::from_yaml_str("window_mode: sliding\n").is_err());
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("Tumbling".parse::<WindowMode>().unwrap(), WindowMode::Tumbling);
        assert_eq!("quiet".parse::<WindowMode>().unwrap(), WindowMode::Debounce);
        assert_eq!(
            "reject".parse::<TeardownPolicy>().unwrap(),
            TeardownPolicy::Reject
        );
        assert!("later".parse::<TeardownPolicy>().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(ENV_TIME_WINDOW_MS, "40");
        std::env::set_var(ENV_WINDOW_MODE, "tumbling");
        let config = CoalescerConfig::from_env().unwrap();
        std::env::remove_var(ENV_TIME_WINDOW_MS);
        std::env::remove_var(ENV_WINDOW_MODE);

        assert_eq!(config.time_window_ms, 40);
        assert_eq!(config.window_mode, WindowMode::Tumbling);
        assert_eq!(config.maximum_batch_size, DEFAULT_MAXIMUM_BATCH_SIZE);
    }

    #[test]
    fn test_time_window_keeps_whole_milliseconds() {
        let config = CoalescerConfig::new().with_time_window(Duration::from_micros(2_700));
        assert_eq!(config.time_window_ms, 2);

        let err = CoalescerConfig::new()
            .with_time_window(Duration::from_micros(400))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("at least 1 ms"));

        let patch = ConfigPatch::new().time_window(Duration::MAX);
        assert_eq!(patch.time_window_ms, Some(u64::MAX));
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let store = ConfigStore::default();
        let mut changes = store.subscribe();
        assert!(!changes.has_changed().unwrap());

        assert!(store
            .update(&ConfigPatch::new().maximum_batch_size(0))
            .is_err());
        assert!(!changes.has_changed().unwrap());

        store
            .update(&ConfigPatch::new().maximum_batch_size(5))
            .unwrap();
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();
        assert!(!changes.has_changed().unwrap());
    }
}
