//! Shared subscription slot that is cancelled exactly once.

use crate::event::Subscription;
use crate::tracing_compat::trace;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

enum SlotState {
    Empty,
    Active(Box<dyn Subscription>),
    Cancelled,
}

/// Holds a subscription that several parties may try to cancel.
#[derive(Clone)]
pub(crate) struct SubscriptionSlot(Rc<RefCell<SlotState>>);

/// Weak form held by callbacks, so a source keeping its callbacks alive
/// does not keep the slot alive.
#[derive(Clone)]
pub(crate) struct WeakSubscriptionSlot(Weak<RefCell<SlotState>>);

impl SubscriptionSlot {
    pub(crate) fn new() -> Self {
        Self(Rc::new(RefCell::new(SlotState::Empty)))
    }

    /// Stores the subscription. If cancellation was requested before the
    /// source returned it, it is cancelled right away.
    pub(crate) fn set(&self, subscription: Box<dyn Subscription>) {
        let mut state = self.0.borrow_mut();
        match &*state {
            SlotState::Empty => *state = SlotState::Active(subscription),
            SlotState::Active(_) | SlotState::Cancelled => {
                drop(state);
                trace!("subscription arrived after cancel, cancelling it");
                subscription.cancel();
            }
        }
    }

    /// Cancels the subscription. Returns true on the call that actually
    /// cancelled it.
    pub(crate) fn cancel(&self) -> bool {
        let previous = std::mem::replace(&mut *self.0.borrow_mut(), SlotState::Cancelled);
        match previous {
            SlotState::Active(subscription) => {
                subscription.cancel();
                true
            }
            SlotState::Empty | SlotState::Cancelled => false,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.0.borrow(), SlotState::Cancelled)
    }

    pub(crate) fn downgrade(&self) -> WeakSubscriptionSlot {
        WeakSubscriptionSlot(Rc::downgrade(&self.0))
    }
}

impl WeakSubscriptionSlot {
    pub(crate) fn cancel(&self) -> bool {
        self.0
            .upgrade()
            .is_some_and(|state| SubscriptionSlot(state).cancel())
    }
}

/// Cancels the slot when dropped.
pub(crate) struct SubscriptionGuard(SubscriptionSlot);

impl SubscriptionGuard {
    pub(crate) fn new(slot: SubscriptionSlot) -> Self {
        Self(slot)
    }

    pub(crate) fn slot(&self) -> &SubscriptionSlot {
        &self.0
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
