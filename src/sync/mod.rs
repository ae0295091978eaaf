//! Synchronization primitives.
//!
//! [`Completion`] is the building block every suspension point rests on: a
//! task awaiting anything ends up subscribed to a completion cell.

mod completion;

pub use completion::{CallbackKey, Completion, CompletionWait};
