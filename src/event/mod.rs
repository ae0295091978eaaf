//! Bridges from push-style external callbacks to awaits.
//!
//! External collaborators expose [`EventSource`]s: objects that call a
//! value callback zero, one or many times per external turn and an error
//! callback when something goes wrong. [`wait`] turns one into a single
//! await, [`Tracer`] into a restartable sequence.

mod subscription;
mod tracer;
mod wait;

pub(crate) use subscription::{SubscriptionGuard, SubscriptionSlot, WeakSubscriptionSlot};
pub use tracer::{Tracer, TracerNext};
pub use wait::wait;

use crate::error::Error;

/// Value callback handed to an [`EventSource`].
pub type ValueCallback<T> = Box<dyn FnMut(T)>;

/// Error callback handed to an [`EventSource`].
pub type ErrorCallback = Box<dyn FnMut(Error)>;

/// Handle returned by [`EventSource::add_callback`].
pub trait Subscription {
    /// Stops delivery. Must be idempotent.
    fn cancel(&self);
}

/// A producer of external events.
///
/// Implementations may call the callbacks from inside `add_callback`, from
/// their own turn of the external loop, or not at all. They must stop
/// calling them once the subscription is cancelled.
pub trait EventSource {
    /// The value delivered to subscribers.
    type Item: 'static;

    /// Registers callbacks and returns the subscription controlling them.
    fn add_callback(
        &self,
        on_value: ValueCallback<Self::Item>,
        on_error: ErrorCallback,
    ) -> Box<dyn Subscription>;
}
