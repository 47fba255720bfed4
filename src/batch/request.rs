//! Pending requests and the caller-side ticket.

use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Settlement<R> = Result<Option<R>>;

/// One caller's lookup waiting inside a window.
///
/// Settling consumes the request, so each one is resolved or rejected at most
/// once; the dispatcher is responsible for making that exactly once.
#[derive(Debug)]
pub struct PendingRequest<R> {
    key: String,
    responder: oneshot::Sender<Settlement<R>>,
}

impl<R> PendingRequest<R> {
    /// Create a request and the ticket its caller awaits.
    pub fn new(key: impl Into<String>) -> (Self, Ticket<R>) {
        let (responder, receiver) = oneshot::channel();
        let key = key.into();
        let ticket = Ticket {
            key: key.clone(),
            receiver: Some(receiver),
        };
        (Self { key, responder }, ticket)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn resolve(self, record: Option<R>) {
        // A dropped ticket means the caller stopped waiting.
        let _ = self.responder.send(Ok(record));
    }

    pub fn reject(self, error: crate::Error) {
        let _ = self.responder.send(Err(error));
    }
}

/// Handle returned by [`Coalescer::enqueue`](crate::Coalescer::enqueue).
///
/// Resolves to the record for the key (`None` if the backend had none) or to
/// the error of the backend call the key was part of. A request abandoned at
/// teardown under [`TeardownPolicy::Abandon`](crate::config::TeardownPolicy)
/// never resolves; race the ticket against a timer if that matters.
#[derive(Debug)]
#[must_use = "tickets do nothing unless awaited"]
pub struct Ticket<R> {
    key: String,
    /// `None` once the responder went away without settling.
    receiver: Option<oneshot::Receiver<Settlement<R>>>,
}

impl<R> Ticket<R> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<R> Future for Ticket<R> {
    type Output = Settlement<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            // Responder dropped without settling: the request was abandoned.
            // The receiver must not be polled again after it completed.
            Poll::Ready(Err(_)) => {
                self.receiver = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
