//! Batch dispatcher.
//!
//! A closed window is grouped by key (first-seen order), the groups are cut
//! into chunks of at most `maximum_batch_size` unique keys, and each chunk
//! becomes one independent backend call running on its own task. Results are
//! matched back to groups by position; a failed call rejects every request in
//! its chunk with the same error and nothing else.

use super::request::PendingRequest;
use crate::backend::BackendClient;
use crate::config::{CallOptions, ConfigStore};
use crate::stats::EngineStats;
use crate::{Error, ErrorContext};
use arc_swap::ArcSwap;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// All requests of one window that share a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup<T> {
    pub key: String,
    pub members: Vec<T>,
}

/// Group `items` by key, keeping the order in which each key was first seen.
pub fn group_by_key<T, F>(items: Vec<T>, key_of: F) -> Vec<KeyGroup<T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: Vec<KeyGroup<T>> = Vec::new();
    let mut key_to_index: HashMap<String, usize> = HashMap::new();

    for item in items {
        let key = key_of(&item);
        match key_to_index.get(key) {
            Some(&idx) => groups[idx].members.push(item),
            None => {
                let key = key.to_string();
                key_to_index.insert(key.clone(), groups.len());
                groups.push(KeyGroup {
                    key,
                    members: vec![item],
                });
            }
        }
    }

    groups
}

/// Group `items` by key and cut the groups into chunks of at most
/// `max_keys` unique keys. A `max_keys` of zero is treated as one.
pub fn plan_chunks<T, F>(items: Vec<T>, key_of: F, max_keys: usize) -> Vec<Vec<KeyGroup<T>>>
where
    F: Fn(&T) -> &str,
{
    let max_keys = max_keys.max(1);
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(max_keys);

    for group in group_by_key(items, key_of) {
        current.push(group);
        if current.len() == max_keys {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(max_keys)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Issues backend calls for the closed windows of one destination.
pub(crate) struct Dispatcher<C: BackendClient> {
    destination: Arc<str>,
    client: Arc<ArcSwap<C>>,
    config: Arc<ConfigStore>,
    stats: Arc<EngineStats>,
}

impl<C: BackendClient> Dispatcher<C> {
    pub(crate) fn new(
        destination: Arc<str>,
        client: Arc<ArcSwap<C>>,
        config: Arc<ConfigStore>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            destination,
            client,
            config,
            stats,
        }
    }

    /// Dispatch a closed window. Chunks are spawned in group order and run
    /// concurrently; the caller is never blocked on a backend call.
    pub(crate) fn dispatch(&self, requests: Vec<PendingRequest<C::Record>>) -> Vec<JoinHandle<()>> {
        if requests.is_empty() {
            return Vec::new();
        }

        // Read configuration now, not when the requests were submitted.
        let config = self.config.load();
        let submitted = requests.len();
        let chunks = plan_chunks(requests, |r| r.key(), config.maximum_batch_size);
        let unique_keys: usize = chunks.iter().map(Vec::len).sum();

        EngineStats::add(&self.stats.windows_closed, 1);
        EngineStats::add(&self.stats.deduplicated, (submitted - unique_keys) as u64);
        EngineStats::add(&self.stats.backend_calls, chunks.len() as u64);

        debug!(
            destination = &*self.destination,
            requests = submitted,
            unique_keys,
            chunks = chunks.len(),
            "closing window"
        );

        let client = self.client.load_full();
        chunks
            .into_iter()
            .map(|chunk| {
                tokio::spawn(run_chunk(
                    Arc::clone(&self.destination),
                    Arc::clone(&client),
                    config.call_options.clone(),
                    chunk,
                    Arc::clone(&self.stats),
                ))
            })
            .collect()
    }
}

async fn run_chunk<C: BackendClient>(
    destination: Arc<str>,
    client: Arc<C>,
    options: CallOptions,
    chunk: Vec<KeyGroup<PendingRequest<C::Record>>>,
    stats: Arc<EngineStats>,
) {
    let keys: Vec<String> = chunk.iter().map(|g| g.key.clone()).collect();

    let outcome = AssertUnwindSafe(client.fetch_many(&keys, &options))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(Error::runtime_with_context(
                "backend panicked during fetch_many",
                ErrorContext::new()
                    .with_details(destination.to_string())
                    .with_source("dispatcher"),
            ))
        });

    match outcome {
        Ok(records) => {
            if records.len() > keys.len() {
                warn!(
                    destination = &*destination,
                    keys = keys.len(),
                    records = records.len(),
                    "backend returned more records than keys; ignoring the surplus"
                );
            }
            debug!(
                destination = &*destination,
                keys = keys.len(),
                "backend call succeeded"
            );
            let mut records = records.into_iter();
            for group in chunk {
                let record = records.next().flatten();
                for request in group.members {
                    request.resolve(record.clone());
                }
            }
        }
        Err(err) => {
            EngineStats::add(&stats.backend_failures, 1);
            warn!(
                destination = &*destination,
                keys = keys.len(),
                error = %err,
                "backend call failed; rejecting chunk"
            );
            for group in chunk {
                for request in group.members {
                    request.reject(err.clone());
                }
            }
        }
    }
}
