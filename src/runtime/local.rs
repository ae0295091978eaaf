//! Scheduler-owned storage for `!Send` tasks.
//!
//! Each record holds the task's boxed future, its context, and the abort
//! hook that settles its completion cell when the task is torn down without
//! finishing. A future is checked out while it is polled so no borrow of
//! the store is held across user code.

use crate::cx::Cx;
use crate::error::Error;
use crate::types::TaskId;
use crate::util::Arena;
use std::future::Future;
use std::pin::Pin;

pub(crate) type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;
pub(crate) type AbortHook = Box<dyn FnOnce(Error)>;

pub(crate) struct TaskRecord {
    pub(crate) cx: Cx,
    future: Option<LocalFuture>,
    started: bool,
    abort: Option<AbortHook>,
}

impl TaskRecord {
    pub(crate) fn new(cx: Cx) -> Self {
        Self {
            cx,
            future: None,
            started: false,
            abort: None,
        }
    }

    /// Settles the task's cell with `error` if the task never finished.
    pub(crate) fn abort(mut self, error: Error) {
        self.cx.mark_finished();
        if let Some(hook) = self.abort.take() {
            hook(error);
        }
    }
}

/// A future checked out for polling.
pub(crate) struct Checkout {
    pub(crate) future: LocalFuture,
    pub(crate) first_poll: bool,
    pub(crate) cx: Cx,
}

#[derive(Default)]
pub(crate) struct TaskStore {
    records: Arena<TaskRecord>,
}

impl TaskStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a record built from its task id.
    pub(crate) fn insert_with<F>(&mut self, f: F) -> TaskId
    where
        F: FnOnce(TaskId) -> TaskRecord,
    {
        TaskId::from_arena(self.records.insert_with(|idx| f(TaskId::from_arena(idx))))
    }

    /// Installs the future and abort hook for a reserved record.
    pub(crate) fn install(&mut self, id: TaskId, future: LocalFuture, abort: AbortHook) -> bool {
        match self.records.get_mut(id.arena_index()) {
            Some(record) => {
                record.future = Some(future);
                record.abort = Some(abort);
                true
            }
            None => false,
        }
    }

    /// Takes the future out for a poll. `None` for dead tasks and for a
    /// future that is already checked out.
    pub(crate) fn checkout(&mut self, id: TaskId) -> Option<Checkout> {
        let record = self.records.get_mut(id.arena_index())?;
        let future = record.future.take()?;
        let first_poll = !record.started;
        record.started = true;
        Some(Checkout {
            future,
            first_poll,
            cx: record.cx.clone(),
        })
    }

    /// Puts a pending future back.
    pub(crate) fn checkin(&mut self, id: TaskId, future: LocalFuture) {
        if let Some(record) = self.records.get_mut(id.arena_index()) {
            record.future = Some(future);
        }
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<TaskRecord> {
        self.records.remove(id.arena_index())
    }

    pub(crate) fn drain(&mut self) -> Vec<TaskRecord> {
        self.records.drain()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
