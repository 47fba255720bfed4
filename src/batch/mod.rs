//! # Coalescing Module
//!
//! Window accumulation and batch dispatch for one destination.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Channel`] | Per-destination task that owns the open window |
//! | [`Window`] | Accumulated requests plus the instants that drive its deadline |
//! | [`PendingRequest`] / [`Ticket`] | The two halves of one caller's lookup |
//! | [`plan_chunks`] | Key deduplication and chunking of a closed window |
//!
//! ## Window lifecycle
//!
//! - **Idle**: no open window; the task waits for the next request
//! - **Accumulating**: a window is open and its deadline is armed
//! - **Closing**: the deadline fired; the window is handed to the dispatcher
//!   and the task returns to idle
//!
//! ```rust
//! use batch_coalescer::batch::plan_chunks;
//!
//! let chunks = plan_chunks(vec!["a", "b", "a", "c", "d"], |k| *k, 3);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0][0].members, vec!["a", "a"]);
//! ```

mod channel;
mod collector;
mod executor;
mod request;

pub(crate) use channel::abandon;
pub use channel::Channel;
pub use collector::Window;
pub use executor::{group_by_key, plan_chunks, KeyGroup};
pub use request::{PendingRequest, Ticket};
