//! Single-assignment cancellable completion cell.
//!
//! A [`Completion`] starts pending and settles exactly once: to a value, to
//! an error, or to a cancellation. Settling fires every registered callback
//! synchronously, in registration order, before the settling call returns.
//! If a callback panics the remaining callbacks still run, then the first
//! panic resumes in the settling caller.
//! Awaiters subscribe through [`Completion::wait`]; their callback only
//! wakes the awaiting task, so resumption is always queued on the
//! scheduler rather than run inline.
//!
//! # Unobserved failures
//!
//! Cells owned by tasks carry a link to the scheduler's uncaught-failure
//! list. If such a cell is dropped while holding an error nobody looked at,
//! the error is reported there and surfaces after the current drain.

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::scheduler::UncaughtFailures;
use crate::tracing_compat::trace;
use crate::types::{CancelKind, CancelReason, Outcome};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// Key returned by [`Completion::add_done_callback`], used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackKey(u64);

type DoneCallback<T> = Box<dyn FnOnce(&Completion<T>)>;

enum State<T> {
    Pending,
    Done(T),
    Failed(Error),
    Cancelled(CancelReason),
}

struct Inner<T> {
    state: State<T>,
    callbacks: SmallVec<[(CallbackKey, DoneCallback<T>); 2]>,
    next_key: u64,
    retrieved: bool,
    failure_sink: Option<Weak<UncaughtFailures>>,
    label: Option<String>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if self.retrieved {
            return;
        }
        if let State::Failed(err) = &self.state {
            if let Some(sink) = self.failure_sink.as_ref().and_then(Weak::upgrade) {
                sink.record(err.clone(), self.label.take());
            }
        }
    }
}

/// A settable-once, cancellable result shared by reference with its awaiters.
pub struct Completion<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let state = match &inner.state {
            State::Pending => "pending",
            State::Done(_) => "done",
            State::Failed(_) => "failed",
            State::Cancelled(_) => "cancelled",
        };
        f.debug_struct("Completion")
            .field("state", &state)
            .field("callbacks", &inner.callbacks.len())
            .field("label", &inner.label)
            .finish()
    }
}

impl<T> Completion<T> {
    /// Creates a pending cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                callbacks: SmallVec::new(),
                next_key: 0,
                retrieved: false,
                failure_sink: None,
                label: None,
            })),
        }
    }

    /// Creates a pending cell whose unobserved failure is reported to `sink`.
    pub(crate) fn with_failure_sink(sink: Weak<UncaughtFailures>, label: Option<String>) -> Self {
        let cell = Self::new();
        {
            let mut inner = cell.inner.borrow_mut();
            inner.failure_sink = Some(sink);
            inner.label = label;
        }
        cell
    }

    /// Returns true while the cell has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    /// Returns true once the cell settled in any way.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// Returns true if the cell settled with a value.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.inner.borrow().state, State::Done(_))
    }

    /// Returns true if the cell settled with an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.borrow().state, State::Failed(_))
    }

    /// Returns true if the cell was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Cancelled(_))
    }

    /// Settles the cell with a value.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadySettled`](crate::ErrorKind::AlreadySettled)
    /// if the cell is not pending; the existing result is left untouched.
    pub fn set_result(&self, value: T) -> Result<()> {
        self.settle(Outcome::Ok(value))
    }

    /// Settles the cell with an error. A cancelled error settles the cell as
    /// cancelled with the error's reason.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySettled` if the cell is not pending.
    pub fn set_error(&self, error: Error) -> Result<()> {
        self.settle(Outcome::from_result(Err(error)))
    }

    /// Cancels a pending cell with a fresh user reason.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySettled` if the cell already settled. The cell is not
    /// modified in that case, so callers wanting a silent no-op can ignore
    /// the result.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_with(CancelReason::new(CancelKind::User))
    }

    /// Cancels a pending cell with an explicit reason.
    ///
    /// # Errors
    ///
    /// Returns `AlreadySettled` if the cell already settled.
    pub fn cancel_with(&self, reason: CancelReason) -> Result<()> {
        self.settle(Outcome::Cancelled(reason))
    }

    pub(crate) fn settle(&self, outcome: Outcome<T>) -> Result<()> {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::already_settled());
            }
            inner.state = match outcome {
                Outcome::Ok(v) => State::Done(v),
                Outcome::Err(e) => State::Failed(e),
                Outcome::Cancelled(r) => State::Cancelled(r),
            };
            std::mem::take(&mut inner.callbacks)
        };
        trace!(callbacks = callbacks.len(), "completion settled");
        // A panicking callback must not strand the ones behind it.
        let mut first_panic = None;
        for (_, callback) in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Registers a callback fired once when the cell settles.
    ///
    /// Callbacks run in registration order. If the cell already settled the
    /// callback runs immediately, before this call returns.
    pub fn add_done_callback<F>(&self, callback: F) -> CallbackKey
    where
        F: FnOnce(&Self) + 'static,
    {
        let key = {
            let mut inner = self.inner.borrow_mut();
            let key = CallbackKey(inner.next_key);
            inner.next_key += 1;
            if matches!(inner.state, State::Pending) {
                inner.callbacks.push((key, Box::new(callback)));
                return key;
            }
            key
        };
        callback(self);
        key
    }

    /// Removes a callback that has not fired yet. Returns true if it was
    /// still registered.
    pub fn remove_done_callback(&self, key: CallbackKey) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(k, _)| *k != key);
        inner.callbacks.len() != before
    }

    /// Returns the number of callbacks waiting for settlement.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.inner.borrow().callbacks.len()
    }

    /// Returns the cancellation reason if the cell was cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match &self.inner.borrow().state {
            State::Cancelled(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Returns the error of a failed cell and marks it observed.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        let mut inner = self.inner.borrow_mut();
        match &inner.state {
            State::Failed(err) => {
                let err = err.clone();
                inner.retrieved = true;
                Some(err)
            }
            _ => None,
        }
    }

    /// Marks a failure as observed without reading it.
    pub(crate) fn mark_retrieved(&self) {
        self.inner.borrow_mut().retrieved = true;
    }
}

impl<T: Clone> Completion<T> {
    /// Returns the settled result without waiting, or `None` while pending.
    /// Reading a failure marks it observed.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T>> {
        self.outcome().map(Outcome::into_result)
    }

    /// Returns the settled outcome without waiting, or `None` while pending.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>> {
        let mut inner = self.inner.borrow_mut();
        let outcome = match &inner.state {
            State::Pending => return None,
            State::Done(v) => Outcome::Ok(v.clone()),
            State::Failed(e) => Outcome::Err(e.clone()),
            State::Cancelled(r) => Outcome::Cancelled(r.clone()),
        };
        inner.retrieved = true;
        Some(outcome)
    }

    /// Waits for the cell to settle.
    ///
    /// Resolves to the value, re-raises the error, or raises a cancelled
    /// error carrying the cell's reason. The wait itself is a cancellation
    /// point: a cancellation requested on `cx` is delivered here first.
    #[must_use]
    pub fn wait<'a>(&'a self, cx: &'a Cx) -> CompletionWait<'a, T> {
        CompletionWait {
            cell: self,
            cx,
            key: None,
            waker: Rc::new(RefCell::new(None)),
        }
    }
}

/// Future returned by [`Completion::wait`].
pub struct CompletionWait<'a, T> {
    cell: &'a Completion<T>,
    cx: &'a Cx,
    key: Option<CallbackKey>,
    waker: Rc<RefCell<Option<Waker>>>,
}

impl<T> CompletionWait<'_, T> {
    fn deregister(&mut self) {
        if let Some(key) = self.key.take() {
            self.cell.remove_done_callback(key);
        }
    }
}

impl<T: Clone> Future for CompletionWait<'_, T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(reason) = this.cx.take_cancel() {
            this.deregister();
            return Poll::Ready(Err(Error::cancelled(reason)));
        }
        if let Some(result) = this.cell.try_result() {
            this.key = None;
            return Poll::Ready(result);
        }
        *this.waker.borrow_mut() = Some(task_cx.waker().clone());
        if this.key.is_none() {
            let slot = Rc::clone(&this.waker);
            this.key = Some(this.cell.add_done_callback(move |_| {
                let waker = slot.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            }));
        }
        Poll::Pending
    }
}

impl<T> Drop for CompletionWait<'_, T> {
    fn drop(&mut self) {
        self.deregister();
    }
}
