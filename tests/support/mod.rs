//! Shared mock backend for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use batch_coalescer::{BackendClient, CallOptions, Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every call and answers `"{label}:{key}"` for each key.
///
/// - the key `"missing"` has no record
/// - any chunk containing `fail_on` fails as a whole
/// - `delay` holds each call open for that long (tokio time)
pub struct MockBackend {
    endpoint: String,
    label: String,
    fail_on: Option<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    options: Arc<Mutex<Vec<CallOptions>>>,
}

impl MockBackend {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            label: "rec".to_string(),
            fail_on: None,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            options: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_on = Some(key.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Share the call log of another mock (same destination, different object).
    pub fn sharing_log_with(mut self, other: &MockBackend) -> Self {
        self.calls = Arc::clone(&other.calls);
        self.options = Arc::clone(&other.options);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn options_seen(&self) -> Vec<CallOptions> {
        self.options.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    type Record = String;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch_many(&self, keys: &[String], options: &CallOptions) -> Result<Vec<Option<String>>> {
        self.calls.lock().unwrap().push(keys.to_vec());
        self.options.lock().unwrap().push(options.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref bad) = self.fail_on {
            if keys.contains(bad) {
                return Err(Error::backend(self.endpoint.clone(), format!("cannot load {}", bad)));
            }
        }
        Ok(keys
            .iter()
            .map(|k| (k != "missing").then(|| format!("{}:{}", self.label, k)))
            .collect())
    }
}

pub fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

pub fn record(key: &str) -> Option<String> {
    Some(format!("rec:{}", key))
}
