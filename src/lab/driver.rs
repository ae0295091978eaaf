//! Deterministic driver over a virtual clock.
//!
//! `LabDriver` stands in for a simulator core: `advance` alternates between
//! draining the scheduler (whenever the wake trigger fired) and firing the
//! next timer, so time only moves when no task is runnable.

use crate::error::Result;
use crate::lab::clock::LabClock;
use crate::lab::config::LabConfig;
use crate::runtime::{Driver, Scheduler, WakeTrigger};
use crate::tracing_compat::{debug, info, trace, warn};
use serde::Serialize;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Why the last `advance` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    /// `request_stop` was called.
    Requested,
    /// No task runnable and no timer pending.
    Idle,
    /// The configured halt time was reached.
    HaltTime,
    /// The configured event budget ran out.
    EventBudget,
    /// The target time of `run_until` was reached.
    Deadline,
}

/// Summary of driver activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LabReport {
    /// Virtual time in nanoseconds.
    pub now_nanos: u64,
    /// Timers fired since creation.
    pub events_fired: u64,
    /// Drains performed by the driver.
    pub quiesces: u64,
    /// Timers still pending.
    pub pending_timers: usize,
    /// Why the last advance returned.
    pub last_stop: Option<StopCause>,
}

impl LabReport {
    /// Renders the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "now_nanos": self.now_nanos,
            "events_fired": self.events_fired,
            "quiesces": self.quiesces,
            "pending_timers": self.pending_timers,
            "last_stop": self.last_stop,
        })
    }
}

/// Driver with a virtual clock and timers.
#[derive(Debug)]
pub struct LabDriver {
    config: LabConfig,
    clock: LabClock,
    wake_pending: Arc<AtomicBool>,
    stop_requested: Cell<bool>,
    events_fired: Cell<u64>,
    quiesces: Cell<u64>,
    last_stop: Cell<Option<StopCause>>,
}

impl Default for LabDriver {
    fn default() -> Self {
        Self::new(LabConfig::default())
    }
}

impl LabDriver {
    /// Creates a driver at virtual time zero.
    #[must_use]
    pub fn new(config: LabConfig) -> Self {
        info!(halt_at = ?config.halt_at, max_events = config.max_events, "lab driver initialized");
        Self {
            config,
            clock: LabClock::new(),
            wake_pending: Arc::new(AtomicBool::new(false)),
            stop_requested: Cell::new(false),
            events_fired: Cell::new(0),
            quiesces: Cell::new(0),
            last_stop: Cell::new(None),
        }
    }

    /// Returns the driver's clock.
    #[must_use]
    pub fn clock(&self) -> &LabClock {
        &self.clock
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Returns why the last advance returned.
    #[must_use]
    pub fn last_stop(&self) -> Option<StopCause> {
        self.last_stop.get()
    }

    /// Returns an activity summary.
    #[must_use]
    pub fn report(&self) -> LabReport {
        LabReport {
            now_nanos: u64::try_from(self.clock.now().as_nanos()).unwrap_or(u64::MAX),
            events_fired: self.events_fired.get(),
            quiesces: self.quiesces.get(),
            pending_timers: self.clock.pending_timers(),
            last_stop: self.last_stop.get(),
        }
    }

    /// Drives the scheduler until virtual time `deadline`, firing every
    /// timer due by then. Usable when no `run_until_complete` is active.
    ///
    /// # Errors
    ///
    /// Propagates uncaught failures raised by `quiesce`.
    pub fn run_until(&self, scheduler: &Scheduler, deadline: Duration) -> Result<StopCause> {
        self.run(scheduler, Some(deadline))
    }

    /// Drives the scheduler for `duration` of virtual time.
    ///
    /// # Errors
    ///
    /// Propagates uncaught failures raised by `quiesce`.
    pub fn run_for(&self, scheduler: &Scheduler, duration: Duration) -> Result<StopCause> {
        self.run_until(scheduler, self.now() + duration)
    }

    fn drain_if_woken(&self, scheduler: &Scheduler) -> Result<bool> {
        if self.wake_pending.swap(false, Ordering::AcqRel) {
            self.quiesces.set(self.quiesces.get() + 1);
            scheduler.quiesce()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn run(&self, scheduler: &Scheduler, deadline: Option<Duration>) -> Result<StopCause> {
        self.stop_requested.set(false);
        let mut fired_this_run = 0usize;
        let cause = loop {
            if self.stop_requested.replace(false) {
                break StopCause::Requested;
            }
            if self.drain_if_woken(scheduler)? {
                continue;
            }
            let next = self.clock.next_deadline();
            if let Some(limit) = deadline {
                if next.map_or(true, |at| at > limit) {
                    self.clock.set_now(limit);
                    break StopCause::Deadline;
                }
            }
            let Some(at) = next else {
                break StopCause::Idle;
            };
            if let Some(halt) = self.config.halt_at {
                if at > halt {
                    self.clock.set_now(halt);
                    break StopCause::HaltTime;
                }
            }
            if self.config.max_events != 0 && fired_this_run >= self.config.max_events {
                warn!(max_events = self.config.max_events, "lab event budget exhausted");
                break StopCause::EventBudget;
            }
            self.clock.fire_next();
            fired_this_run += 1;
            self.events_fired.set(self.events_fired.get() + 1);
        };
        debug!(cause = ?cause, now = ?self.clock.now(), fired = fired_this_run, "lab driver stopped");
        self.last_stop.set(Some(cause));
        Ok(cause)
    }
}

impl Driver for LabDriver {
    fn wake_trigger(&self) -> WakeTrigger {
        let flag = Arc::clone(&self.wake_pending);
        Arc::new(move || flag.store(true, Ordering::Release))
    }

    fn advance(&self, scheduler: &Scheduler) -> Result<()> {
        let cause = self.run(scheduler, None)?;
        trace!(cause = ?cause, "lab advance returned");
        Ok(())
    }

    fn request_stop(&self) {
        self.stop_requested.set(true);
    }
}
