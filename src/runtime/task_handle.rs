//! TaskHandle for awaiting spawned task results.
//!
//! `TaskHandle<T>` is returned by spawn operations and lets the spawner
//! observe, await or cancel the task.

use crate::cx::{Cx, WeakCx};
use crate::error::Result;
use crate::sync::{Completion, CompletionWait};
use crate::types::{CancelReason, Outcome, TaskId};
use std::fmt;
use std::rc::Rc;

/// A handle to a spawned task.
///
/// # Ownership
///
/// The handle does not own the task; the scheduler does. Dropping the handle
/// detaches the task, which keeps running. A detached task that fails is
/// reported as an uncaught failure after the drain that observed it.
///
/// # Cancel Safety
///
/// If a [`join`](Self::join) is dropped or cancelled, the handle can join
/// again later. The task is not affected.
pub struct TaskHandle<T> {
    task_id: TaskId,
    name: Option<Rc<str>>,
    completion: Completion<T>,
    cx: WeakCx,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            task_id: self.task_id,
            name: self.name.clone(),
            completion: self.completion.clone(),
            cx: self.cx.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("name", &self.name)
            .field("completion", &self.completion)
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        task_id: TaskId,
        name: Option<Rc<str>>,
        completion: Completion<T>,
        cx: WeakCx,
    ) -> Self {
        Self {
            task_id,
            name,
            completion,
            cx,
        }
    }

    /// Returns the task ID of the spawned task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the task's name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true once the task's outcome is recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completion.is_settled()
    }

    /// Returns the cell recording the task's outcome.
    #[must_use]
    pub fn completion(&self) -> &Completion<T> {
        &self.completion
    }

    /// Returns the task's context while the task is alive.
    #[must_use]
    pub fn context(&self) -> Option<Cx> {
        self.cx.upgrade()
    }

    /// Requests cancellation of the task.
    ///
    /// Returns false if the task finished or a cancellation is already
    /// pending.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::user("task handle cancelled"))
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.cx.upgrade().is_some_and(|cx| cx.cancel_with(reason))
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Waits for the task to finish and returns its result.
    ///
    /// # Errors
    ///
    /// Re-raises the task's error, a cancelled error if the task was
    /// cancelled, or a cancelled error if the joining task itself is
    /// cancelled while waiting.
    #[must_use]
    pub fn join<'a>(&'a self, cx: &'a Cx) -> CompletionWait<'a, T> {
        self.completion.wait(cx)
    }

    /// Returns the task's result without waiting, or `None` while it runs.
    #[must_use]
    pub fn try_join(&self) -> Option<Result<T>> {
        self.completion.try_result()
    }

    /// Returns the task's outcome without waiting.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.completion.outcome()
    }
}
