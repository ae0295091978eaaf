//! Identifier types.

use crate::util::ArenaIndex;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a task spawned on a [`Scheduler`](crate::Scheduler).
///
/// Backed by the scheduler's task arena; the generation makes ids of
/// finished tasks unique even after their slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(ArenaIndex);

impl TaskId {
    /// Creates a task id from an arena index.
    #[must_use]
    pub const fn from_arena(idx: ArenaIndex) -> Self {
        Self(idx)
    }

    /// Returns the underlying arena index.
    #[must_use]
    pub const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a task id from raw parts (primarily for testing).
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:?})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.index())
    }
}

static NEXT_CANCEL_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Unique identity of one cancellation request.
///
/// Scopes that inject cancellation remember the token they used and only
/// convert a cancellation back into their own error when the tokens match.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CancelToken(u64);

impl CancelToken {
    /// Allocates a token never handed out before in this process.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_CANCEL_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelToken({})", self.0)
    }
}
