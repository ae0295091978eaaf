//! The cooperative scheduler.
//!
//! One `Scheduler` owns every task and deferred callback of an embedding. It
//! never runs on its own: the driver re-enters it through
//! [`Scheduler::quiesce`] after the wake trigger fired, or lends it the
//! thread through [`Scheduler::run_until_complete`].
//!
//! # Lifecycle
//!
//! Construct once at startup, hand clones of the handle to whatever spawns
//! or awaits, and call [`Scheduler::shutdown`] when the embedding goes away.
//! Shutdown cancels every live task and breaks reference cycles between
//! tasks that captured the handle.
//!
//! # Failure reporting
//!
//! A task failure nobody observed (the handle was dropped, or the cell was
//! dropped without reading the error) is collected during the drain and
//! raised from `quiesce` afterwards as one aggregated error.

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::config::SchedulerConfig;
use crate::runtime::driver::Driver;
use crate::runtime::local::{TaskRecord, TaskStore};
use crate::runtime::ready_queue::{ReadyQueue, Runnable};
use crate::runtime::task_handle::TaskHandle;
use crate::runtime::waker::task_waker;
use crate::sync::Completion;
use crate::tracing_compat::{debug, error, info, trace, warn};
use crate::types::{CancelKind, CancelReason, Outcome, TaskId};
use crate::util::{Arena, ArenaIndex};
use serde::Serialize;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};

type Deferred = Box<dyn FnOnce()>;

/// Failures no awaiter observed, waiting to be raised after the drain.
#[derive(Debug, Default)]
pub(crate) struct UncaughtFailures {
    failures: RefCell<Vec<Error>>,
}

impl UncaughtFailures {
    pub(crate) fn record(&self, error: Error, origin: Option<String>) {
        warn!(
            origin = origin.as_deref().unwrap_or("<unnamed>"),
            error = %error,
            "unobserved task failure"
        );
        self.failures.borrow_mut().push(error);
    }

    fn take(&self) -> Vec<Error> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Completed drains.
    pub drains: u64,
    /// Steps run across all drains.
    pub steps: u64,
    /// Tasks spawned.
    pub tasks_spawned: u64,
    /// Tasks currently alive.
    pub tasks_live: usize,
    /// Times the wake trigger fired.
    pub wakes_fired: u64,
    /// Uncaught failures raised or logged.
    pub uncaught_reported: u64,
}

impl SchedulerStats {
    /// Renders the counters as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "drains": self.drains,
            "steps": self.steps,
            "tasks_spawned": self.tasks_spawned,
            "tasks_live": self.tasks_live,
            "wakes_fired": self.wakes_fired,
            "uncaught_reported": self.uncaught_reported,
        })
    }
}

pub(crate) struct SchedulerInner {
    config: SchedulerConfig,
    driver: Rc<dyn Driver>,
    queue: Arc<ReadyQueue>,
    tasks: RefCell<TaskStore>,
    deferred: RefCell<Arena<Deferred>>,
    uncaught: Rc<UncaughtFailures>,
    draining: Cell<bool>,
    advancing: Cell<bool>,
    shut_down: Cell<bool>,
    stats: Cell<SchedulerStats>,
}

/// Handle to the scheduler. Clones share the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.config.name)
            .field("draining", &self.inner.draining.get())
            .field("advancing", &self.inner.advancing.get())
            .field("shut_down", &self.inner.shut_down.get())
            .field("live_tasks", &self.live_tasks())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler bound to `driver`.
    ///
    /// The configuration is normalized first.
    pub fn new<D>(mut config: SchedulerConfig, driver: Rc<D>) -> Self
    where
        D: Driver + 'static,
    {
        config.normalize();
        let queue = Arc::new(ReadyQueue::new(driver.wake_trigger()));
        debug!(name = %config.name, drain_budget = config.drain_budget, "scheduler created");
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                driver,
                queue,
                tasks: RefCell::new(TaskStore::new()),
                deferred: RefCell::new(Arena::new()),
                uncaught: Rc::new(UncaughtFailures::default()),
                draining: Cell::new(false),
                advancing: Cell::new(false),
                shut_down: Cell::new(false),
                stats: Cell::new(SchedulerStats::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<SchedulerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SchedulerInner> {
        Rc::downgrade(&self.inner)
    }

    /// Returns the configuration in effect.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Returns the shared ready queue.
    #[must_use]
    pub fn ready_queue(&self) -> &Arc<ReadyQueue> {
        &self.inner.queue
    }

    /// Returns true while a drain is in progress.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.get()
    }

    /// Returns true after [`Scheduler::shutdown`].
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.get()
    }

    /// Returns the number of tasks that have not finished.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.inner.stats.get();
        stats.tasks_live = self.live_tasks();
        stats.wakes_fired = self.inner.queue.wakes_fired();
        stats
    }

    fn update_stats(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.inner.stats.get();
        f(&mut stats);
        self.inner.stats.set(stats);
    }

    /// Spawns a task running the future built by `f`.
    ///
    /// The first step is queued; the task does not run before the next drain.
    /// After shutdown the task is cancelled immediately without running.
    pub fn spawn<T, F, Fut>(&self, name: Option<&str>, f: F) -> TaskHandle<T>
    where
        T: 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let inner = &self.inner;
        let label: Option<Rc<str>> = name.map(Rc::from);
        let completion =
            Completion::with_failure_sink(Rc::downgrade(&inner.uncaught), name.map(str::to_owned));

        let mut spawned_cx = None;
        let id = inner.tasks.borrow_mut().insert_with(|id| {
            let cx = Cx::new(
                id,
                name.map(str::to_owned),
                Rc::downgrade(inner),
                task_waker(&inner.queue, id),
            );
            spawned_cx = Some(cx.clone());
            TaskRecord::new(cx)
        });
        let Some(cx) = spawned_cx else {
            unreachable!("task record constructed without a context")
        };

        let body = f(cx.clone());
        let cell = completion.clone();
        let body_cx = cx.clone();
        let future = Box::pin(async move {
            let result = body.await;
            finish_task(&body_cx, &cell, result);
        });
        let abort_cell = completion.clone();
        let abort_sink = Rc::downgrade(&inner.uncaught);
        let abort_origin = name.map(str::to_owned);
        let abort = Box::new(move |err: Error| {
            // A panic after the body settled its cell still has to surface.
            let fatal = err.is_fatal().then(|| err.clone());
            if abort_cell.settle(Outcome::from_result(Err(err))).is_err() {
                if let (Some(err), Some(sink)) = (fatal, abort_sink.upgrade()) {
                    sink.record(err, abort_origin);
                }
            }
        });
        inner.tasks.borrow_mut().install(id, future, abort);
        self.update_stats(|s| s.tasks_spawned += 1);
        debug!(task_id = ?id, name = name.unwrap_or(""), "task spawned");

        if inner.shut_down.get() {
            self.abort_task(
                id,
                Error::cancelled(
                    CancelReason::new(CancelKind::Shutdown).with_message("scheduler is shut down"),
                ),
            );
        } else {
            inner.queue.push(Runnable::Task(id));
        }
        TaskHandle::new(id, label, completion, cx.downgrade())
    }

    /// Queues `f` to run as its own step of the next drain.
    ///
    /// Returns false after shutdown.
    pub fn call_soon<F>(&self, f: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        if self.inner.shut_down.get() {
            return false;
        }
        let idx = self.inner.deferred.borrow_mut().insert(Box::new(f));
        self.inner.queue.push(Runnable::Deferred(idx));
        true
    }

    /// Runs ready steps until nothing is runnable.
    ///
    /// Re-entrant calls while draining and calls after shutdown do nothing.
    /// With a drain budget, stops after that many steps and re-fires the
    /// wake trigger for the rest.
    ///
    /// # Errors
    ///
    /// Returns an aggregated error carrying every task failure nobody
    /// observed, unless `raise_uncaught` is off. Failures are held back until
    /// a drain empties the queue, so a budget-limited pass reports them on
    /// the pass that finishes the work.
    pub fn quiesce(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.draining.get() {
            trace!("quiesce re-entered while draining, ignoring");
            return Ok(());
        }
        if inner.shut_down.get() {
            return Ok(());
        }
        inner.draining.set(true);
        inner.queue.begin_drain();
        trace!(queued = inner.queue.len(), "drain started");

        let budget = inner.config.drain_budget;
        let mut steps = 0usize;
        while let Some(item) = inner.queue.pop() {
            match item {
                Runnable::Task(id) => self.run_task(id),
                Runnable::Deferred(idx) => self.run_deferred(idx),
            }
            steps += 1;
            if inner.shut_down.get() || (budget != 0 && steps >= budget) {
                break;
            }
        }

        inner.draining.set(false);
        let remaining = inner.queue.end_drain();
        self.update_stats(|s| {
            s.drains += 1;
            s.steps += steps as u64;
        });
        debug!(steps, remaining, "drain finished");
        if remaining > 0 && !inner.shut_down.get() {
            debug!(remaining, budget, "drain budget exhausted, requesting another pass");
            inner.queue.refire();
            return Ok(());
        }
        self.raise_uncaught()
    }

    fn raise_uncaught(&self) -> Result<()> {
        let failures = self.inner.uncaught.take();
        if failures.is_empty() {
            return Ok(());
        }
        let count = failures.len();
        self.update_stats(|s| s.uncaught_reported += count as u64);
        if !self.inner.config.raise_uncaught {
            for failure in &failures {
                error!(error = %failure, "uncaught task failure");
            }
            return Ok(());
        }
        warn!(count, "raising uncaught task failures");
        Err(Error::aggregated("uncaught failures in background tasks", failures))
    }

    /// Removes and returns the failures collected so far without raising them.
    pub fn take_uncaught_failures(&self) -> Vec<Error> {
        self.inner.uncaught.take()
    }

    pub(crate) fn report_uncaught(&self, error: Error, origin: Option<String>) {
        self.inner.uncaught.record(error, origin);
    }

    fn run_task(&self, id: TaskId) {
        let checkout = self.inner.tasks.borrow_mut().checkout(id);
        let Some(mut checkout) = checkout else {
            trace!(task_id = ?id, "stale wake ignored");
            return;
        };
        if checkout.first_poll {
            if let Some(reason) = checkout.cx.take_cancel() {
                debug!(task_id = ?id, "task cancelled before first step");
                drop(checkout.future);
                self.abort_task(id, Error::cancelled(reason));
                return;
            }
        }

        let waker = checkout.cx.waker().clone();
        let mut task_cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| {
            checkout.future.as_mut().poll(&mut task_cx)
        }));
        match polled {
            Ok(Poll::Pending) => {
                self.inner.tasks.borrow_mut().checkin(id, checkout.future);
            }
            Ok(Poll::Ready(())) => {
                let record = self.inner.tasks.borrow_mut().remove(id);
                drop(checkout);
                drop(record);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(task_id = ?id, panic = %message, "task panicked");
                drop(checkout.future);
                self.abort_task(id, Error::panicked(message));
            }
        }
    }

    fn run_deferred(&self, idx: ArenaIndex) {
        let callback = self.inner.deferred.borrow_mut().remove(idx);
        let Some(callback) = callback else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            let message = panic_message(payload.as_ref());
            self.report_uncaught(Error::panicked(message), Some("deferred callback".to_owned()));
        }
    }

    fn abort_task(&self, id: TaskId, err: Error) {
        let record = self.inner.tasks.borrow_mut().remove(id);
        if let Some(record) = record {
            self.abort_record(record, err);
        }
    }

    fn abort_record(&self, record: TaskRecord, err: Error) {
        let task_id = record.cx.task_id();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| record.abort(err))) {
            let message = panic_message(payload.as_ref());
            error!(task_id = ?task_id, panic = %message, "done callback panicked while aborting task");
            self.report_uncaught(Error::panicked(message), Some("done callback".to_owned()));
        }
    }

    /// Lends the thread to the driver until `target` settles.
    ///
    /// Schedules nothing by itself; use [`Scheduler::block_on`] to start a
    /// fresh task and wait for it.
    ///
    /// # Errors
    ///
    /// - `Usage` if called while draining or while another
    ///   `run_until_complete` is advancing the driver. Nothing is changed.
    /// - `Usage` after shutdown.
    /// - Errors from the driver, including uncaught failures from `quiesce`.
    /// - The target's error or cancellation.
    /// - `Interrupted` if the driver stopped before the target settled.
    pub fn run_until_complete<T>(&self, target: &Completion<T>) -> Result<T>
    where
        T: Clone + 'static,
    {
        let inner = &self.inner;
        if inner.draining.get() || inner.advancing.get() {
            return Err(Error::usage("already running"));
        }
        if inner.shut_down.get() {
            return Err(Error::usage("scheduler is shut down"));
        }
        if let Some(result) = target.try_result() {
            return result;
        }

        inner.advancing.set(true);
        let driver = Rc::clone(&inner.driver);
        let key = target.add_done_callback(move |_| driver.request_stop());
        let advanced = inner.driver.advance(self);
        target.remove_done_callback(key);
        inner.advancing.set(false);

        advanced?;
        target.try_result().unwrap_or_else(|| {
            warn!("driver stopped before the target settled");
            Err(Error::interrupted("driver stopped before the target settled"))
        })
    }

    /// Spawns a task and runs the driver until it finishes.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::run_until_complete`]. If the driver stops early the
    /// task keeps running detached.
    pub fn block_on<T, F, Fut>(&self, name: Option<&str>, f: F) -> Result<T>
    where
        T: Clone + 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + 'static,
    {
        if self.inner.draining.get() || self.inner.advancing.get() {
            return Err(Error::usage("already running"));
        }
        let handle = self.spawn(name, f);
        self.run_until_complete(handle.completion())
    }

    /// Cancels every live task and stops accepting work.
    ///
    /// Afterwards `quiesce` does nothing, `spawn` returns handles that are
    /// already cancelled and `run_until_complete` reports a usage error.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.replace(true) {
            return;
        }
        inner.queue.clear();
        let records = inner.tasks.borrow_mut().drain();
        let deferred = inner.deferred.borrow_mut().drain();
        info!(name = %inner.config.name, tasks = records.len(), deferred = deferred.len(), "scheduler shutting down");
        drop(deferred);
        for record in records {
            self.abort_record(record, Error::cancelled(CancelReason::new(CancelKind::Shutdown)));
        }
        let leftover = inner.uncaught.take();
        for failure in &leftover {
            error!(error = %failure, "uncaught task failure at shutdown");
        }
    }
}

fn finish_task<T>(cx: &Cx, cell: &Completion<T>, result: Result<T>) {
    let outcome = match result {
        Ok(value) => match cx.take_cancel() {
            Some(reason) => Outcome::Cancelled(reason),
            None => Outcome::Ok(value),
        },
        Err(err) => Outcome::from_result(Err(err)),
    };
    cx.mark_finished();
    match &outcome {
        Outcome::Ok(_) => debug!(task_id = ?cx.task_id(), "task completed"),
        Outcome::Err(err) => debug!(task_id = ?cx.task_id(), error = %err, "task failed"),
        Outcome::Cancelled(reason) => debug!(task_id = ?cx.task_id(), reason = %reason, "task cancelled"),
    }
    let _ = cell.settle(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
