//! Window accumulator.

use crate::config::WindowMode;
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in deadline for windows too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// An open accumulation period for one destination.
///
/// The window only records arrivals; whether it is due is decided by
/// [`deadline`](Window::deadline) against the configuration in force at the
/// moment of the check.
#[derive(Debug)]
pub struct Window<T> {
    items: Vec<T>,
    opened_at: Instant,
    last_arrival: Instant,
}

impl<T> Window<T> {
    /// Open a window with its first item.
    pub fn open(first: T, now: Instant) -> Self {
        Self {
            items: vec![first],
            opened_at: now,
            last_arrival: now,
        }
    }

    pub fn push(&mut self, item: T, now: Instant) {
        self.items.push(item);
        self.last_arrival = now;
    }

    pub fn deadline(&self, mode: WindowMode, time_window: Duration) -> Instant {
        let base = match mode {
            WindowMode::Debounce => self.last_arrival,
            WindowMode::Tumbling => self.opened_at,
        };
        base.checked_add(time_window)
            .unwrap_or_else(|| base + FAR_FUTURE)
    }

    pub fn is_due(&self, mode: WindowMode, time_window: Duration, now: Instant) -> bool {
        now >= self.deadline(mode, time_window)
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Close the window, yielding its items in arrival order.
    pub fn close(self) -> Vec<T> {
        self.items
    }
}
