//! The capability context type.
//!
//! `Cx` is the token a task uses to reach its runtime:
//! - identity (task id, name)
//! - cancellation (observe, request, checkpoint)
//! - scheduling (spawn siblings, defer callbacks)
//!
//! # Capability Model
//!
//! There is no ambient scheduler. A task only reaches the scheduler that runs
//! it through the `Cx` it received at spawn time, and cancellation is only
//! delivered at awaits that take a `&Cx`.
//!
//! # Cancellation
//!
//! A cancellation request is stored on the context and wakes the task. The
//! first request wins; later requests are dropped until the pending one is
//! delivered. Delivery happens at the next `Cx`-aware await
//! ([`Completion::wait`](crate::Completion::wait), [`wait`](crate::wait),
//! [`Tracer::next`](crate::Tracer::next), [`yield_now`](crate::yield_now)) or
//! at an explicit [`Cx::checkpoint`].
//!
//! # Thread Safety
//!
//! `Cx` is `!Send`. It shares the scheduler's thread.

use crate::error::{Error, Result};
use crate::runtime::scheduler::SchedulerInner;
use crate::runtime::{Scheduler, TaskHandle};
use crate::tracing_compat::debug;
use crate::types::{CancelReason, CancelToken, TaskId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::Waker;

struct CxInner {
    task: TaskId,
    name: Option<String>,
    scheduler: Weak<SchedulerInner>,
    waker: Waker,
    cancel: RefCell<Option<CancelReason>>,
    finished: Cell<bool>,
}

/// The capability context for a task.
///
/// Cheap to clone; clones share the cancellation state.
#[derive(Clone)]
pub struct Cx {
    inner: Rc<CxInner>,
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.inner.task)
            .field("name", &self.inner.name)
            .field("cancel_requested", &self.is_cancel_requested())
            .field("finished", &self.inner.finished.get())
            .finish()
    }
}

impl Cx {
    pub(crate) fn new(
        task: TaskId,
        name: Option<String>,
        scheduler: Weak<SchedulerInner>,
        waker: Waker,
    ) -> Self {
        Self {
            inner: Rc::new(CxInner {
                task,
                name,
                scheduler,
                waker,
                cancel: RefCell::new(None),
                finished: Cell::new(false),
            }),
        }
    }

    /// Returns the id of the task this context belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner.task
    }

    /// Returns the task's name, if it was given one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns the scheduler running this task, if it still exists.
    #[must_use]
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.inner.scheduler.upgrade().map(Scheduler::from_inner)
    }

    /// Returns true if a cancellation is waiting to be delivered.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel.borrow().is_some()
    }

    /// Delivers a pending cancellation as an error.
    ///
    /// Long computations between awaits call this to stay responsive.
    ///
    /// # Errors
    ///
    /// Returns a cancelled error if a cancellation was pending. The request
    /// is consumed.
    pub fn checkpoint(&self) -> Result<()> {
        match self.take_cancel() {
            Some(reason) => Err(Error::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Requests cancellation of this task with a user reason.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::user("cancel requested"))
    }

    /// Requests cancellation with an explicit reason and wakes the task.
    ///
    /// Returns false if the task already finished or another cancellation
    /// is still pending.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        if self.inner.finished.get() {
            return false;
        }
        {
            let mut slot = self.inner.cancel.borrow_mut();
            if slot.is_some() {
                return false;
            }
            debug!(
                task_id = ?self.inner.task,
                kind = reason.kind().as_str(),
                token = reason.token().as_u64(),
                "cancel requested"
            );
            *slot = Some(reason);
        }
        self.inner.waker.wake_by_ref();
        true
    }

    /// Returns the token of the pending cancellation, if any.
    #[must_use]
    pub fn pending_cancel_token(&self) -> Option<CancelToken> {
        self.inner.cancel.borrow().as_ref().map(CancelReason::token)
    }

    pub(crate) fn take_cancel(&self) -> Option<CancelReason> {
        self.inner.cancel.borrow_mut().take()
    }

    /// Drops the pending cancellation if it carries `token`.
    pub(crate) fn clear_cancel_if(&self, token: CancelToken) -> bool {
        let mut slot = self.inner.cancel.borrow_mut();
        if slot.as_ref().is_some_and(|r| r.token() == token) {
            *slot = None;
            return true;
        }
        false
    }

    /// Returns true once the task's body has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.get()
    }

    pub(crate) fn mark_finished(&self) {
        self.inner.finished.set(true);
    }

    pub(crate) fn waker(&self) -> &Waker {
        &self.inner.waker
    }

    /// Schedules `f` to run on the scheduler's next drain step.
    ///
    /// Returns false if the scheduler is gone or shut down.
    pub fn call_soon<F>(&self, f: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        self.scheduler().is_some_and(|s| s.call_soon(f))
    }

    /// Spawns a task on the same scheduler.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the scheduler no longer exists.
    pub fn spawn<T, F, Fut>(&self, name: Option<&str>, f: F) -> Result<TaskHandle<T>>
    where
        T: 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let scheduler = self
            .scheduler()
            .ok_or_else(|| Error::usage("scheduler dropped"))?;
        Ok(scheduler.spawn(name, f))
    }

    /// Returns a weak reference that does not keep the context alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakCx {
        WeakCx(Rc::downgrade(&self.inner))
    }
}

/// Weak reference to a [`Cx`].
#[derive(Clone, Default)]
pub struct WeakCx(Weak<CxInner>);

impl WeakCx {
    /// Upgrades to a strong context while the task is alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Cx> {
        self.0.upgrade().map(|inner| Cx { inner })
    }
}

impl fmt::Debug for WeakCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakCx")
    }
}
