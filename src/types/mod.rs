//! Core types for the Coopsync runtime.
//!
//! - [`id`]: identifier types (`TaskId`, `CancelToken`)
//! - [`cancel`]: cancellation reason and kind
//! - [`outcome`]: three-valued terminal outcome

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{CancelToken, TaskId};
pub use outcome::Outcome;
