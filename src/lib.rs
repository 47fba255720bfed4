//! # batch-coalescer
//!
//! Request-coalescing engine: merges concurrent single-key lookups against a
//! multi-key backend into as few backend round trips as possible, within a
//! bounded wait, and hands every caller exactly the result or error for its
//! own key.
//!
//! ## Overview
//!
//! Callers submit `(client, key)` pairs. Requests are routed by the client's
//! endpoint to a per-destination channel, which keeps them in an open window
//! until the windowing policy closes it. A closed window is deduplicated by
//! key, cut into chunks of at most `maximum_batch_size` unique keys, and each
//! chunk becomes one [`BackendClient::fetch_many`] call. Results are fanned
//! back out by position.
//!
//! ## Key Features
//!
//! - **Two window modes**: quiet-period debounce (default) or fixed tumbling windows
//! - **Key deduplication**: duplicate keys in one window share one backend entry
//! - **Independent chunks**: a failing chunk rejects only its own requests
//! - **Hot configuration**: [`Coalescer::set_config`] reaches windows that are still open
//! - **Explicit lifecycle**: [`Coalescer::teardown`] with a configurable abandonment policy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use batch_coalescer::{BackendClient, CallOptions, Coalescer};
//! use std::sync::Arc;
//!
//! struct Accounts;
//!
//! #[async_trait]
//! impl BackendClient for Accounts {
//!     type Record = String;
//!
//!     fn endpoint(&self) -> &str {
//!         "https://rpc.example.com"
//!     }
//!
//!     async fn fetch_many(
//!         &self,
//!         keys: &[String],
//!         _options: &CallOptions,
//!     ) -> batch_coalescer::Result<Vec<Option<String>>> {
//!         Ok(keys.iter().map(|k| Some(format!("account {}", k))).collect())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> batch_coalescer::Result<()> {
//!     let engine = Coalescer::new();
//!     let client = Arc::new(Accounts);
//!
//!     // Both lookups land in one window and one backend call.
//!     let (a, b) = tokio::join!(engine.submit(&client, "a"), engine.submit(&client, "b"));
//!     println!("{:?} {:?}", a?, b?);
//!
//!     engine.teardown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | The [`Coalescer`] engine and its builder |
//! | [`batch`] | Windows, channels, chunk planning and dispatch |
//! | [`registry`] | Destination → channel routing table |
//! | [`config`] | Hot-swappable configuration |
//! | [`stats`] | Engine counters |

pub mod backend;
pub mod batch;
pub mod client;
pub mod config;
pub mod registry;
pub mod stats;

pub use backend::BackendClient;
pub use batch::Ticket;
pub use client::{Coalescer, CoalescerBuilder, SubmitOptions};
pub use config::{CallOptions, CoalescerConfig, ConfigPatch, ConfigStore, TeardownPolicy, WindowMode};
pub use stats::StatsSnapshot;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{BoxError, Error, ErrorContext};
