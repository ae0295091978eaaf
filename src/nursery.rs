//! Structured groups of child tasks.
//!
//! A [`Nursery`] binds child tasks to a block of the task that opened it.
//! The block does not return until every child finished. When a child
//! fails, the nursery starts unwinding: it cancels the remaining children
//! and the owner's current await, and once everything settled the block
//! fails with one aggregated error listing every failure in the order it
//! was collected.
//!
//! A child that is cancelled is not a failure. A cancellation of the owner
//! coming from outside is passed to the children and re-raised once they
//! are done.
//!
//! ```
//! use coopsync::{nursery, InlineDriver, Scheduler, SchedulerConfig};
//! use std::rc::Rc;
//!
//! let sched = Scheduler::new(SchedulerConfig::default(), Rc::new(InlineDriver::new()));
//! let total = sched
//!     .block_on(None, |cx| async move {
//!         let (a, b) = nursery(&cx, |n| async move {
//!             let a = n.spawn(None, |_cx| async { Ok(2) })?;
//!             let b = n.spawn(None, |_cx| async { Ok(3) })?;
//!             Ok((a, b))
//!         })
//!         .await?;
//!         Ok(a.try_join().unwrap_or(Ok(0))? + b.try_join().unwrap_or(Ok(0))?)
//!     })
//!     .unwrap();
//! assert_eq!(total, 5);
//! ```

use crate::cx::{Cx, WeakCx};
use crate::error::{Error, Result};
use crate::runtime::scheduler::SchedulerInner;
use crate::runtime::{Scheduler, TaskHandle};
use crate::sync::Completion;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelKind, CancelReason, CancelToken, TaskId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

/// Lifecycle of a nursery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NurseryPhase {
    /// Constructed, block not entered yet.
    Created,
    /// Block running.
    Open,
    /// Block returned, waiting for children.
    Exiting,
    /// Every child finished.
    Closed,
}

struct Child {
    id: TaskId,
    cx: WeakCx,
}

struct NurseryInner {
    phase: Cell<NurseryPhase>,
    aborting: Cell<bool>,
    owner: RefCell<WeakCx>,
    scheduler: RefCell<Weak<SchedulerInner>>,
    owner_cancelled: Cell<bool>,
    children: RefCell<Vec<Child>>,
    errors: RefCell<Vec<Error>>,
    token: CancelToken,
    on_completed: RefCell<Completion<()>>,
}

impl NurseryInner {
    fn owner(&self) -> Option<Cx> {
        self.owner.borrow().upgrade()
    }

    fn scheduler(&self) -> Option<Scheduler> {
        self.scheduler.borrow().upgrade().map(Scheduler::from_inner)
    }

    fn abort(&self) {
        if self.aborting.replace(true) {
            return;
        }
        let targets: Vec<WeakCx> = self.children.borrow().iter().map(|c| c.cx.clone()).collect();
        debug!(children = targets.len(), "nursery unwinding");
        for target in targets {
            if let Some(cx) = target.upgrade() {
                cx.cancel_with(CancelReason::new(CancelKind::Sibling));
            }
        }
    }

    fn child_done(&self, id: TaskId, failure: Option<Error>) {
        self.children.borrow_mut().retain(|c| c.id != id);
        if let Some(error) = failure {
            debug!(task_id = ?id, error = %error, "nursery child failed");
            let owner = self.owner();
            let owner_gone = owner.as_ref().map_or(true, Cx::is_finished);
            if owner_gone {
                if let Some(scheduler) = self.scheduler() {
                    scheduler.report_uncaught(error, Some("nursery child".to_owned()));
                }
            } else {
                self.errors.borrow_mut().push(error);
            }
            self.abort();
            if self.phase.get() == NurseryPhase::Open && !self.owner_cancelled.replace(true) {
                if let Some(owner) = owner {
                    owner.cancel_with(CancelReason::with_token(self.token, CancelKind::ChildFailed));
                }
            }
        } else {
            trace!(task_id = ?id, "nursery child finished");
        }
        let signal = std::mem::take(&mut *self.on_completed.borrow_mut());
        let _ = signal.set_result(());
    }
}

/// A structured group of child tasks.
///
/// Cheap to clone; clones refer to the same group.
#[derive(Clone)]
pub struct Nursery {
    inner: Rc<NurseryInner>,
}

impl fmt::Debug for Nursery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nursery")
            .field("phase", &self.inner.phase.get())
            .field("aborting", &self.inner.aborting.get())
            .field("children", &self.inner.children.borrow().len())
            .field("errors", &self.inner.errors.borrow().len())
            .finish()
    }
}

impl Default for Nursery {
    fn default() -> Self {
        Self::new()
    }
}

impl Nursery {
    /// Creates a nursery that has not been entered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(NurseryInner {
                phase: Cell::new(NurseryPhase::Created),
                aborting: Cell::new(false),
                owner: RefCell::new(WeakCx::default()),
                scheduler: RefCell::new(Weak::new()),
                owner_cancelled: Cell::new(false),
                children: RefCell::new(Vec::new()),
                errors: RefCell::new(Vec::new()),
                token: CancelToken::fresh(),
                on_completed: RefCell::new(Completion::new()),
            }),
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> NurseryPhase {
        self.inner.phase.get()
    }

    /// Returns true once a failure or outside cancellation started unwinding.
    #[must_use]
    pub fn is_unwinding(&self) -> bool {
        self.inner.aborting.get()
    }

    /// Returns the number of children that have not finished.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Spawns a child bound to this nursery.
    ///
    /// # Errors
    ///
    /// Returns a usage error before the block is entered, after the nursery
    /// closed, or while it is unwinding.
    pub fn spawn<T, F, Fut>(&self, name: Option<&str>, f: F) -> Result<TaskHandle<T>>
    where
        T: 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let inner = &self.inner;
        match inner.phase.get() {
            NurseryPhase::Created => return Err(Error::usage("nursery not entered")),
            NurseryPhase::Closed => return Err(Error::usage("nursery closed")),
            NurseryPhase::Exiting if inner.children.borrow().is_empty() => {
                return Err(Error::usage("nursery closed"));
            }
            NurseryPhase::Open | NurseryPhase::Exiting => {}
        }
        if inner.aborting.get() {
            return Err(Error::usage("nursery is unwinding"));
        }
        let scheduler = inner
            .scheduler()
            .ok_or_else(|| Error::usage("scheduler dropped"))?;

        let handle = scheduler.spawn(name, f);
        let id = handle.task_id();
        inner.children.borrow_mut().push(Child {
            id,
            cx: handle.context().map(|cx| cx.downgrade()).unwrap_or_default(),
        });
        let weak = Rc::downgrade(inner);
        handle.completion().add_done_callback(move |cell| {
            let failure = cell.error();
            if let Some(inner) = weak.upgrade() {
                inner.child_done(id, failure);
            } else if failure.is_some() {
                cell.mark_retrieved();
            }
        });
        Ok(handle)
    }

    /// Runs `body` as the nursery's block in the task owning `cx`.
    ///
    /// # Errors
    ///
    /// - `Usage` if the nursery was already entered.
    /// - An outside cancellation of the owner, re-raised after the children
    ///   finished. Child failures collected meanwhile go to the scheduler's
    ///   uncaught list.
    /// - `Aggregated` with every child failure and the body's own error.
    pub async fn scope<F, Fut, T>(self, cx: &Cx, body: F) -> Result<T>
    where
        F: FnOnce(Nursery) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let inner = Rc::clone(&self.inner);
        if inner.phase.get() != NurseryPhase::Created {
            return Err(Error::usage("nursery already entered"));
        }
        *inner.owner.borrow_mut() = cx.downgrade();
        *inner.scheduler.borrow_mut() = cx.scheduler().map_or_else(Weak::new, |s| s.downgrade());
        inner.phase.set(NurseryPhase::Open);
        debug!(task_id = ?cx.task_id(), "nursery opened");

        let result = body(self).await;
        inner.phase.set(NurseryPhase::Exiting);
        cx.clear_cancel_if(inner.token);

        let mut propagate: Option<Error> = None;
        let value = match result {
            Ok(value) => Some(value),
            Err(err) if err.cancel_token() == Some(inner.token) => None,
            Err(err) if err.is_cancelled() => {
                propagate = Some(err);
                inner.abort();
                None
            }
            Err(err) => {
                inner.errors.borrow_mut().push(err);
                inner.abort();
                None
            }
        };

        while !inner.children.borrow().is_empty() {
            let signal = inner.on_completed.borrow().clone();
            match signal.wait(cx).await {
                Ok(()) => {}
                Err(err) if err.cancel_token() == Some(inner.token) => {}
                Err(err) => {
                    trace!(error = %err, "nursery owner cancelled while waiting for children");
                    if propagate.is_none() {
                        propagate = Some(err);
                    }
                    inner.abort();
                }
            }
        }
        inner.phase.set(NurseryPhase::Closed);
        let errors = std::mem::take(&mut *inner.errors.borrow_mut());
        debug!(errors = errors.len(), "nursery closed");

        if let Some(cancel) = propagate {
            if let Some(scheduler) = inner.scheduler() {
                for error in errors {
                    scheduler.report_uncaught(error, Some("nursery child".to_owned()));
                }
            }
            return Err(cancel);
        }
        if !errors.is_empty() {
            return Err(Error::aggregated("nursery child failures", errors));
        }
        value.ok_or_else(|| Error::internal("nursery block cancelled without a recorded failure"))
    }
}

/// Opens a nursery in the task owning `cx` and runs `body` in it.
///
/// # Errors
///
/// See [`Nursery::scope`].
pub async fn nursery<F, Fut, T>(cx: &Cx, body: F) -> Result<T>
where
    F: FnOnce(Nursery) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Nursery::new().scope(cx, body).await
}
