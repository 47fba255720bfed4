//! Per-destination coalescing channel.
//!
//! Each destination owns one tokio task that is the only writer of its window
//! state. Callers push [`PendingRequest`]s into an unbounded queue; the task
//! moves between idle (no window), accumulating (window open, deadline armed)
//! and closing (window handed to the dispatcher) until it is cancelled or the
//! last sender goes away. Cancellation abandons the open window; losing the
//! last sender flushes it.

use super::collector::Window;
use super::executor::Dispatcher;
use super::request::PendingRequest;
use crate::backend::BackendClient;
use crate::config::{ConfigStore, TeardownPolicy};
use crate::stats::EngineStats;
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to the coalescing channel of one destination.
pub struct Channel<C: BackendClient> {
    destination: Arc<str>,
    client: Arc<ArcSwap<C>>,
    queue: mpsc::UnboundedSender<PendingRequest<C::Record>>,
    shutdown: CancellationToken,
}

impl<C: BackendClient> Channel<C> {
    /// Start the channel task for `client`'s destination on the current runtime.
    pub(crate) fn spawn(
        client: Arc<C>,
        config: Arc<ConfigStore>,
        stats: Arc<EngineStats>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::runtime_with_context(
                "coalescing channels require a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("channel"),
            )
        })?;

        let destination: Arc<str> = Arc::from(client.endpoint());
        let client = Arc::new(ArcSwap::new(client));
        let (queue, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let task = ChannelTask {
            destination: Arc::clone(&destination),
            dispatcher: Dispatcher::new(
                Arc::clone(&destination),
                Arc::clone(&client),
                Arc::clone(&config),
                Arc::clone(&stats),
            ),
            config,
            stats,
            receiver,
            shutdown: shutdown.clone(),
        };
        runtime.spawn(task.run());

        debug!(destination = &*destination, "coalescing channel created");

        Ok(Self {
            destination,
            client,
            queue,
            shutdown,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Queue a request. Hands it back if the channel has already shut down.
    pub(crate) fn submit(
        &self,
        request: PendingRequest<C::Record>,
    ) -> std::result::Result<(), PendingRequest<C::Record>> {
        if self.shutdown.is_cancelled() {
            return Err(request);
        }
        self.queue.send(request).map_err(|e| e.0)
    }

    /// Swap the backend client used for dispatches that have not started yet.
    pub(crate) fn replace_client(&self, client: Arc<C>) {
        self.client.store(client);
    }

    pub(crate) fn close(&self) {
        self.shutdown.cancel();
    }
}

impl<C: BackendClient> std::fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("destination", &self.destination)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct ChannelTask<C: BackendClient> {
    destination: Arc<str>,
    dispatcher: Dispatcher<C>,
    config: Arc<ConfigStore>,
    stats: Arc<EngineStats>,
    receiver: mpsc::UnboundedReceiver<PendingRequest<C::Record>>,
    shutdown: CancellationToken,
}

impl<C: BackendClient> ChannelTask<C> {
    async fn run(mut self) {
        let mut window: Option<Window<PendingRequest<C::Record>>> = None;
        let mut changes = self.config.subscribe();

        let cancelled = loop {
            // Re-read on every pass so configuration changes reach open windows.
            let config = self.config.load();
            let deadline = window
                .as_ref()
                .map(|w| w.deadline(config.window_mode, config.time_window()));

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break true,

                // Wake up to re-arm the deadline against the new values.
                Ok(()) = changes.changed() => {}

                _ = sleep_until_deadline(deadline) => {
                    let config = self.config.load();
                    let due = window.as_ref().is_some_and(|w| {
                        w.is_due(config.window_mode, config.time_window(), Instant::now())
                    });
                    if due {
                        if let Some(closed) = window.take() {
                            self.dispatcher.dispatch(closed.close());
                        }
                    }
                }

                received = self.receiver.recv() => match received {
                    Some(request) => {
                        let now = Instant::now();
                        match window.as_mut() {
                            Some(open) => open.push(request, now),
                            None => window = Some(Window::open(request, now)),
                        }
                    }
                    None => break false,
                },
            }
        };

        if cancelled {
            self.abandon_remaining(window);
            return;
        }

        // Every handle is gone without a teardown: nothing can be added to the
        // window any more, so send what was collected instead of dropping it.
        if let Some(open) = window {
            debug!(
                destination = &*self.destination,
                requests = open.len(),
                "engine dropped, flushing open window"
            );
            self.dispatcher.dispatch(open.close());
        }
    }

    fn abandon_remaining(&mut self, window: Option<Window<PendingRequest<C::Record>>>) {
        let mut abandoned = window.map(Window::close).unwrap_or_default();
        self.receiver.close();
        while let Ok(request) = self.receiver.try_recv() {
            abandoned.push(request);
        }
        abandon(
            &self.destination,
            abandoned,
            self.config.load().teardown_policy,
            &self.stats,
        );
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Settle (or drop) requests that will never be dispatched.
pub(crate) fn abandon<R>(
    destination: &str,
    requests: Vec<PendingRequest<R>>,
    policy: TeardownPolicy,
    stats: &EngineStats,
) {
    if requests.is_empty() {
        return;
    }
    EngineStats::add(&stats.abandoned, requests.len() as u64);
    info!(
        destination,
        requests = requests.len(),
        policy = ?policy,
        "abandoning undispatched requests"
    );
    match policy {
        TeardownPolicy::Abandon => drop(requests),
        TeardownPolicy::Reject => {
            for request in requests {
                let key = request.key().to_string();
                request.reject(Error::Abandoned {
                    destination: destination.to_string(),
                    key,
                });
            }
        }
    }
}
