//! Capability context handed to every task.

#[allow(clippy::module_inception)]
mod cx;

pub use cx::{Cx, WeakCx};
