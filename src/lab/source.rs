//! Scriptable event sources.

use crate::error::Error;
use crate::event::{ErrorCallback, EventSource, Subscription, ValueCallback};
use crate::lab::clock::{LabClock, TimerId};
use crate::tracing_compat::trace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

type Callbacks<T> = (ValueCallback<T>, ErrorCallback);

struct Subscriber<T> {
    id: u64,
    callbacks: Option<Callbacks<T>>,
}

struct ManualInner<T> {
    subscribers: Vec<Subscriber<T>>,
    next_id: u64,
    subscribe_calls: u64,
    cancel_calls: u64,
    on_subscribe: Vec<T>,
}

/// Event source fired by hand.
///
/// Delivery happens synchronously inside [`emit`](Self::emit),
/// [`burst`](Self::burst) and [`fail`](Self::fail), like a snooper invoked
/// from the external loop's own turn. Counters expose how the bridges
/// subscribed and unsubscribed.
pub struct ManualSource<T> {
    inner: Rc<RefCell<ManualInner<T>>>,
}

impl<T> Clone for ManualSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for ManualSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ManualSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ManualSource")
            .field("active", &inner.subscribers.len())
            .field("subscribe_calls", &inner.subscribe_calls)
            .field("cancel_calls", &inner.cancel_calls)
            .finish()
    }
}

impl<T> ManualSource<T> {
    /// Creates a source with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ManualInner {
                subscribers: Vec::new(),
                next_id: 0,
                subscribe_calls: 0,
                cancel_calls: 0,
                on_subscribe: Vec::new(),
            })),
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Returns how many times `add_callback` was called.
    #[must_use]
    pub fn subscribe_calls(&self) -> u64 {
        self.inner.borrow().subscribe_calls
    }

    /// Returns how many times a subscription's `cancel` was called.
    #[must_use]
    pub fn cancel_calls(&self) -> u64 {
        self.inner.borrow().cancel_calls
    }

    fn for_each_subscriber(&self, mut call: impl FnMut(&mut Callbacks<T>)) {
        let ids: Vec<u64> = self.inner.borrow().subscribers.iter().map(|s| s.id).collect();
        for id in ids {
            let taken = {
                let mut inner = self.inner.borrow_mut();
                inner
                    .subscribers
                    .iter_mut()
                    .find(|s| s.id == id)
                    .and_then(|s| s.callbacks.take())
            };
            let Some(mut callbacks) = taken else {
                continue;
            };
            call(&mut callbacks);
            let mut inner = self.inner.borrow_mut();
            match inner.subscribers.iter_mut().find(|s| s.id == id) {
                Some(subscriber) => subscriber.callbacks = Some(callbacks),
                None => {
                    drop(inner);
                    drop(callbacks);
                }
            }
        }
    }

    /// Delivers `error` to every subscriber.
    pub fn fail(&self, error: Error) {
        self.for_each_subscriber(|(_, on_error)| on_error(error.clone()));
    }
}

impl<T: Clone> ManualSource<T> {
    /// Delivers `value` to every subscriber.
    pub fn emit(&self, value: T) {
        self.for_each_subscriber(|(on_value, _)| on_value(value.clone()));
    }

    /// Delivers several values back to back in the same turn.
    pub fn burst<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        for value in values {
            self.emit(value);
        }
    }

    /// Delivers `value` to each future subscriber from inside
    /// `add_callback`, before the subscription is returned.
    pub fn emit_on_subscribe(&self, value: T) {
        self.inner.borrow_mut().on_subscribe.push(value);
    }
}

struct ManualSubscription<T> {
    source: Weak<RefCell<ManualInner<T>>>,
    id: u64,
}

impl<T> Subscription for ManualSubscription<T> {
    fn cancel(&self) {
        let Some(inner) = self.source.upgrade() else {
            return;
        };
        let removed = {
            let mut inner = inner.borrow_mut();
            inner.cancel_calls += 1;
            let pos = inner.subscribers.iter().position(|s| s.id == self.id);
            pos.map(|pos| inner.subscribers.remove(pos))
        };
        drop(removed);
    }
}

impl<T: Clone + 'static> EventSource for ManualSource<T> {
    type Item = T;

    fn add_callback(
        &self,
        mut on_value: ValueCallback<T>,
        on_error: ErrorCallback,
    ) -> Box<dyn Subscription> {
        let (id, replay) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribe_calls += 1;
            let id = inner.next_id;
            inner.next_id += 1;
            (id, inner.on_subscribe.clone())
        };
        for value in replay {
            on_value(value);
        }
        self.inner.borrow_mut().subscribers.push(Subscriber {
            id,
            callbacks: Some((on_value, on_error)),
        });
        Box::new(ManualSubscription {
            source: Rc::downgrade(&self.inner),
            id,
        })
    }
}

/// Virtual-time timer usable as an event source.
///
/// Each subscription arms its own timer relative to the time it subscribed
/// and receives the virtual time at which the timer fired.
#[derive(Debug, Clone)]
pub struct TimerSource {
    clock: LabClock,
    delay: Duration,
    period: Option<Duration>,
}

impl TimerSource {
    /// Fires once, `delay` after subscription.
    #[must_use]
    pub fn one_shot(clock: &LabClock, delay: Duration) -> Self {
        Self {
            clock: clock.clone(),
            delay,
            period: None,
        }
    }

    /// Fires every `period` after subscription until cancelled.
    ///
    /// A zero period is treated as one nanosecond so virtual time advances.
    #[must_use]
    pub fn periodic(clock: &LabClock, period: Duration) -> Self {
        let period = period.max(Duration::from_nanos(1));
        Self {
            clock: clock.clone(),
            delay: period,
            period: Some(period),
        }
    }
}

struct TimerEntry {
    on_value: RefCell<ValueCallback<Duration>>,
    active: Cell<bool>,
    armed: Cell<Option<TimerId>>,
    period: Option<Duration>,
}

fn arm(clock: &LabClock, entry: &Rc<TimerEntry>, delay: Duration) {
    let weak = Rc::downgrade(entry);
    let id = clock.schedule_after(delay, move |clock| {
        let Some(entry) = weak.upgrade() else {
            return;
        };
        entry.armed.set(None);
        if !entry.active.get() {
            return;
        }
        (entry.on_value.borrow_mut())(clock.now());
        if let Some(period) = entry.period {
            if entry.active.get() {
                arm(clock, &entry, period);
            }
        }
    });
    entry.armed.set(Some(id));
}

struct TimerSubscription {
    clock: LabClock,
    entry: Rc<TimerEntry>,
}

impl Subscription for TimerSubscription {
    fn cancel(&self) {
        if !self.entry.active.replace(false) {
            return;
        }
        if let Some(id) = self.entry.armed.take() {
            self.clock.cancel(id);
        }
        trace!("timer subscription cancelled");
    }
}

impl Drop for TimerSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl EventSource for TimerSource {
    type Item = Duration;

    fn add_callback(
        &self,
        on_value: ValueCallback<Duration>,
        _on_error: ErrorCallback,
    ) -> Box<dyn Subscription> {
        let entry = Rc::new(TimerEntry {
            on_value: RefCell::new(on_value),
            active: Cell::new(true),
            armed: Cell::new(None),
            period: self.period,
        });
        arm(&self.clock, &entry, self.delay);
        Box::new(TimerSubscription {
            clock: self.clock.clone(),
            entry,
        })
    }
}
