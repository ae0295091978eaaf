//! Coopsync: structured concurrency inside a host-driven event loop.
//!
//! Coopsync runs cooperative tasks on a single thread without ever owning the
//! main loop. The host (a simulator core, a GUI toolkit, any synchronous
//! driver) keeps control and re-enters the scheduler only through two
//! sanctioned points:
//!
//! - [`Scheduler::quiesce`]: called whenever the wake trigger fired, drains all
//!   runnable work and returns.
//! - [`Scheduler::run_until_complete`]: hands control to the driver until a
//!   target task or cell settles.
//!
//! # Building blocks
//!
//! - [`Completion`]: single-assignment cancellable cell with ordered callbacks
//! - [`Scheduler`] / [`Cx`] / [`TaskHandle`]: spawning, cancellation, joining
//! - [`event::wait`] / [`event::Tracer`]: bridges from push-style event sources
//! - [`combinator::CallbackScope`] / [`combinator::timeout`]: injected cancellation
//! - [`Nursery`]: structured groups with aggregated failures
//! - [`lab`]: deterministic drivers and event sources for tests
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use coopsync::{InlineDriver, Scheduler, SchedulerConfig};
//!
//! let driver = Rc::new(InlineDriver::new());
//! let scheduler = Scheduler::new(SchedulerConfig::default(), driver);
//! let answer = scheduler
//!     .block_on(Some("main"), |cx| async move {
//!         let child = cx.spawn(None, |_cx| async { Ok(21) })?;
//!         Ok(child.join(&cx).await? * 2)
//!     })
//!     .unwrap();
//! assert_eq!(answer, 42);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod combinator;
pub mod cx;
pub mod error;
pub mod event;
pub mod lab;
pub mod nursery;
pub mod runtime;
pub mod sync;
pub mod types;
pub mod util;

pub(crate) mod tracing_compat;

#[cfg(test)]
pub(crate) mod test_utils;

pub use combinator::{timeout, with_callbacks, CallbackScope};
pub use cx::{Cx, WeakCx};
pub use error::{ConfigError, Error, ErrorKind, Result};
pub use event::{wait, ErrorCallback, EventSource, Subscription, Tracer, ValueCallback};
pub use nursery::{nursery, Nursery, NurseryPhase};
pub use runtime::{
    yield_now, Driver, InlineDriver, Scheduler, SchedulerConfig, SchedulerStats, TaskHandle,
    WakeTrigger,
};
pub use sync::Completion;
pub use types::{CancelKind, CancelReason, CancelToken, Outcome, TaskId};
