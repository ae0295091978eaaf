//! Task wakers.
//!
//! A task's waker pushes the task back onto the scheduler's ready queue. The
//! queue deduplicates, so waking a task that is already queued is free.
//! Wakers hold the queue through an `Arc` so they remain valid after the
//! scheduler is gone; a wake for a dead task is dropped when popped.
//!
//! Note: This implementation uses safe Rust only (no unsafe).

use crate::runtime::ready_queue::{ReadyQueue, Runnable};
use crate::tracing_compat::trace;
use crate::types::TaskId;
use std::sync::Arc;
use std::task::{Wake, Waker};

struct TaskWaker {
    queue: Arc<ReadyQueue>,
    task: TaskId,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        trace!(task_id = ?self.task, "task woken");
        self.queue.push(Runnable::Task(self.task));
    }
}

/// Creates the waker for `task`.
pub(crate) fn task_waker(queue: &Arc<ReadyQueue>, task: TaskId) -> Waker {
    Waker::from(Arc::new(TaskWaker {
        queue: Arc::clone(queue),
        task,
    }))
}
