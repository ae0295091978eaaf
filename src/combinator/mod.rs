//! Combinators that bind external callbacks to a block of a task.
//!
//! - [`CallbackScope`] / [`with_callbacks`]: inject a source's errors into the task
//! - [`timeout`]: fail a block when a deadline source fires

pub mod callback_scope;
pub mod timeout;

pub use callback_scope::{with_callbacks, CallbackScope};
pub use timeout::timeout;
