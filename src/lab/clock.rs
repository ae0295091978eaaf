//! Virtual clock with a deterministic timer queue.

use crate::tracing_compat::trace;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

type TimerCallback = Box<dyn FnOnce(&LabClock)>;

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId {
    deadline: Duration,
    seq: u64,
}

impl TimerId {
    /// Returns the virtual time the timer fires at.
    #[must_use]
    pub const fn deadline(self) -> Duration {
        self.deadline
    }
}

struct ClockState {
    now: Duration,
    next_seq: u64,
    timers: BTreeMap<TimerId, TimerCallback>,
}

/// Shared handle to the virtual clock. Timers with equal deadlines fire in
/// the order they were scheduled.
#[derive(Clone)]
pub struct LabClock {
    state: Rc<RefCell<ClockState>>,
}

impl fmt::Debug for LabClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LabClock")
            .field("now", &state.now)
            .field("pending_timers", &state.timers.len())
            .finish()
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LabClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ClockState {
                now: Duration::ZERO,
                next_seq: 0,
                timers: BTreeMap::new(),
            })),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Schedules `f` at `deadline`. A deadline in the past fires on the next
    /// step without moving the clock backwards.
    pub fn schedule_at<F>(&self, deadline: Duration, f: F) -> TimerId
    where
        F: FnOnce(&LabClock) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let deadline = deadline.max(state.now);
        let id = TimerId {
            deadline,
            seq: state.next_seq,
        };
        state.next_seq += 1;
        state.timers.insert(id, Box::new(f));
        id
    }

    /// Schedules `f` after `delay`.
    pub fn schedule_after<F>(&self, delay: Duration, f: F) -> TimerId
    where
        F: FnOnce(&LabClock) + 'static,
    {
        let deadline = self.now().saturating_add(delay);
        self.schedule_at(deadline, f)
    }

    /// Cancels a timer. Returns true if it had not fired.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.state.borrow_mut().timers.remove(&id);
        removed.is_some()
    }

    /// Returns the deadline of the earliest timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.state.borrow().timers.keys().next().map(|id| id.deadline)
    }

    /// Returns the number of timers that have not fired.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Moves the clock forward to `to` without firing anything.
    pub(crate) fn set_now(&self, to: Duration) {
        let mut state = self.state.borrow_mut();
        if to > state.now {
            state.now = to;
        }
    }

    /// Fires the earliest timer, moving the clock to its deadline.
    pub fn fire_next(&self) -> Option<TimerId> {
        let (id, callback) = {
            let mut state = self.state.borrow_mut();
            let (id, callback) = state.timers.pop_first()?;
            state.now = state.now.max(id.deadline);
            (id, callback)
        };
        trace!(
            deadline_ns = u64::try_from(id.deadline.as_nanos()).unwrap_or(u64::MAX),
            seq = id.seq,
            "timer fired"
        );
        callback(self);
        Some(id)
    }
}
