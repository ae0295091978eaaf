//! Scheduler runtime.
//!
//! - [`ReadyQueue`]: runnable steps plus the edge-triggered wake callback
//! - [`Scheduler`]: spawning, draining, and the blocking bridge
//! - [`Driver`]: the re-entry contract with the external loop
//! - [`TaskHandle`]: observing and cancelling a spawned task

pub mod config;
pub mod driver;
pub(crate) mod local;
pub mod ready_queue;
pub mod scheduler;
pub mod task_handle;
pub(crate) mod waker;
pub mod yield_now;

pub use config::SchedulerConfig;
pub use driver::{Driver, InlineDriver};
pub use ready_queue::{ReadyQueue, Runnable, WakeTrigger};
pub use scheduler::{Scheduler, SchedulerStats};
pub use task_handle::TaskHandle;
pub use yield_now::{yield_now, YieldNow};
