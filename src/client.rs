//! Engine front end.
//!
//! Keep the public surface small: submit a key, tune the configuration, tear
//! down. Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;

pub use builder::CoalescerBuilder;
pub use self::core::{Coalescer, SubmitOptions};
