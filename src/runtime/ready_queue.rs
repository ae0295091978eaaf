//! Ready queue with an edge-triggered wake callback.
//!
//! The queue is either `Sleeping` (empty, scheduler idle) or `Awake` with a
//! FIFO of runnable steps. The wake trigger fires exactly once per
//! `Sleeping` to `Awake` transition. The scheduler calls
//! [`ReadyQueue::begin_drain`] before it pops, and `Sleeping` is only
//! reinstalled by [`ReadyQueue::end_drain`], so pushes made while a drain is
//! in progress never fire the trigger.
//!
//! Wakers may be invoked from any thread, so the state sits behind a
//! `parking_lot` mutex even though steps only ever run on the scheduler's
//! thread.

use crate::tracing_compat::trace;
use crate::types::TaskId;
use crate::util::ArenaIndex;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback asking the external driver to re-enter the scheduler.
pub type WakeTrigger = Arc<dyn Fn() + Send + Sync>;

/// One unit of work in the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runnable {
    /// Poll a task.
    Task(TaskId),
    /// Run a deferred callback.
    Deferred(ArenaIndex),
}

#[derive(Debug, Default)]
struct AwakeQueue {
    items: VecDeque<Runnable>,
    queued: HashSet<TaskId>,
}

#[derive(Debug)]
enum QueueState {
    Sleeping,
    Awake(AwakeQueue),
}

/// FIFO of runnable steps guarded by the sleeping/awake state machine.
pub struct ReadyQueue {
    state: Mutex<QueueState>,
    wake: WakeTrigger,
    wakes_fired: AtomicU64,
}

impl fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyQueue")
            .field("state", &*self.state.lock())
            .field("wakes_fired", &self.wakes_fired())
            .finish_non_exhaustive()
    }
}

impl ReadyQueue {
    /// Creates a sleeping queue that calls `wake` on its first push.
    #[must_use]
    pub fn new(wake: WakeTrigger) -> Self {
        Self {
            state: Mutex::new(QueueState::Sleeping),
            wake,
            wakes_fired: AtomicU64::new(0),
        }
    }

    /// Enqueues a step. A task already queued is not queued twice.
    ///
    /// Returns true if this push fired the wake trigger.
    pub fn push(&self, item: Runnable) -> bool {
        let fire = {
            let mut state = self.state.lock();
            match &mut *state {
                QueueState::Sleeping => {
                    let mut queue = AwakeQueue::default();
                    if let Runnable::Task(id) = item {
                        queue.queued.insert(id);
                    }
                    queue.items.push_back(item);
                    *state = QueueState::Awake(queue);
                    true
                }
                QueueState::Awake(queue) => {
                    if let Runnable::Task(id) = item {
                        if !queue.queued.insert(id) {
                            return false;
                        }
                    }
                    queue.items.push_back(item);
                    false
                }
            }
        };
        if fire {
            self.fire();
        }
        fire
    }

    /// Pops the oldest step.
    pub fn pop(&self) -> Option<Runnable> {
        let mut state = self.state.lock();
        match &mut *state {
            QueueState::Sleeping => None,
            QueueState::Awake(queue) => {
                let item = queue.items.pop_front()?;
                if let Runnable::Task(id) = item {
                    queue.queued.remove(&id);
                }
                Some(item)
            }
        }
    }

    /// Marks the queue awake for the duration of a drain.
    pub fn begin_drain(&self) {
        let mut state = self.state.lock();
        if matches!(*state, QueueState::Sleeping) {
            *state = QueueState::Awake(AwakeQueue::default());
        }
    }

    /// Ends a drain. Returns to `Sleeping` if nothing is left and returns
    /// the number of steps still queued.
    pub fn end_drain(&self) -> usize {
        let mut state = self.state.lock();
        let remaining = match &*state {
            QueueState::Sleeping => 0,
            QueueState::Awake(queue) => queue.items.len(),
        };
        if remaining == 0 {
            *state = QueueState::Sleeping;
        }
        remaining
    }

    /// Fires the wake trigger for work left behind by a budgeted drain.
    pub fn refire(&self) {
        self.fire();
    }

    /// Drops every queued step and goes back to sleep without firing.
    pub fn clear(&self) {
        *self.state.lock() = QueueState::Sleeping;
    }

    /// Returns true while the queue is sleeping.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        matches!(*self.state.lock(), QueueState::Sleeping)
    }

    /// Returns the number of queued steps.
    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.state.lock() {
            QueueState::Sleeping => 0,
            QueueState::Awake(queue) => queue.items.len(),
        }
    }

    /// Returns true if no step is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many times the wake trigger fired.
    #[must_use]
    pub fn wakes_fired(&self) -> u64 {
        self.wakes_fired.load(Ordering::Relaxed)
    }

    fn fire(&self) {
        self.wakes_fired.fetch_add(1, Ordering::Relaxed);
        trace!("wake trigger fired");
        (self.wake)();
    }
}
