//! Driver re-entry contract.
//!
//! The external driver owns the thread. The scheduler only runs when the
//! driver calls [`Scheduler::quiesce`], which it must do after the wake
//! trigger fired, or while [`Driver::advance`] is running inside
//! [`Scheduler::run_until_complete`].

use crate::error::Result;
use crate::runtime::ready_queue::WakeTrigger;
use crate::runtime::Scheduler;
use crate::tracing_compat::trace;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The external world the scheduler is embedded in.
pub trait Driver {
    /// Returns the callback the ready queue calls when work arrives while the
    /// scheduler is idle. It must only record the request; the driver calls
    /// `quiesce` later from one of its own re-entry points.
    fn wake_trigger(&self) -> WakeTrigger;

    /// Advances the external world until [`Driver::request_stop`] is called
    /// or the driver halts on its own.
    ///
    /// # Errors
    ///
    /// Propagates errors raised by `quiesce` and driver-specific failures.
    fn advance(&self, scheduler: &Scheduler) -> Result<()>;

    /// Asks a running [`Driver::advance`] to return at the next opportunity.
    fn request_stop(&self);
}

/// Driver with no external world.
///
/// `advance` quiesces the scheduler whenever the wake trigger fired and
/// returns once a stop was requested or nothing is runnable.
#[derive(Debug, Default)]
pub struct InlineDriver {
    wake_pending: Arc<AtomicBool>,
    stop_requested: Cell<bool>,
}

impl InlineDriver {
    /// Creates an idle driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the wake trigger fired since the last drain.
    #[must_use]
    pub fn wake_pending(&self) -> bool {
        self.wake_pending.load(Ordering::Acquire)
    }

    /// Drains the scheduler if the wake trigger fired. Returns true if it did.
    ///
    /// # Errors
    ///
    /// Propagates uncaught failures raised by `quiesce`.
    pub fn poll_once(&self, scheduler: &Scheduler) -> Result<bool> {
        if self.wake_pending.swap(false, Ordering::AcqRel) {
            scheduler.quiesce()?;
            return Ok(true);
        }
        Ok(false)
    }
}

impl Driver for InlineDriver {
    fn wake_trigger(&self) -> WakeTrigger {
        let flag = Arc::clone(&self.wake_pending);
        Arc::new(move || flag.store(true, Ordering::Release))
    }

    fn advance(&self, scheduler: &Scheduler) -> Result<()> {
        self.stop_requested.set(false);
        loop {
            if self.stop_requested.replace(false) {
                return Ok(());
            }
            if !self.poll_once(scheduler)? {
                trace!("inline driver idle, halting");
                return Ok(());
            }
        }
    }

    fn request_stop(&self) {
        self.stop_requested.set(true);
    }
}
