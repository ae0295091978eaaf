//! Restartable asynchronous sequence over a repeating [`EventSource`].

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::event::{EventSource, SubscriptionGuard, SubscriptionSlot};
use crate::tracing_compat::trace;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

enum Arrival<T> {
    Value(T),
    Stop,
    Failed(Error),
}

impl<T> Arrival<T> {
    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Value(_))
    }
}

struct TracerState<T> {
    pending: Option<Arrival<T>>,
    waker: Option<Waker>,
}

impl<T> TracerState<T> {
    fn push(&mut self, arrival: Arrival<T>) -> Option<Waker> {
        match &self.pending {
            None => self.pending = Some(arrival),
            Some(current) if !current.is_terminal() && arrival.is_terminal() => {
                trace!("terminal event replaces buffered value");
                self.pending = Some(arrival);
            }
            Some(_) => {
                trace!("tracer buffer full, event dropped");
                return None;
            }
        }
        self.waker.take()
    }
}

/// Asynchronous sequence of the values a source delivers.
///
/// Each [`next`](Self::next) waits for the next value. Arrivals while
/// nobody is waiting are buffered one deep. With a stop source, `next`
/// returns `Ok(None)` when the stop source fires first; the tracer can be
/// awaited again afterwards. Dropping or [closing](Self::close) the tracer
/// cancels both subscriptions.
pub struct Tracer<T> {
    state: Rc<RefCell<TracerState<T>>>,
    source: Option<SubscriptionGuard>,
    stop: Option<SubscriptionGuard>,
}

impl<T> fmt::Debug for Tracer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("buffered", &self.state.borrow().pending.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: 'static> Tracer<T> {
    /// Subscribes to `source`.
    pub fn new<S>(source: &S) -> Self
    where
        S: EventSource<Item = T> + ?Sized,
    {
        let state = Rc::new(RefCell::new(TracerState {
            pending: None,
            waker: None,
        }));
        let guard = subscribe(&state, source, Arrival::Value);
        Self {
            state,
            source: Some(guard),
            stop: None,
        }
    }

    /// Subscribes to `source`, ending each wait early when `stop` fires.
    pub fn with_stop<S, P>(source: &S, stop: &P) -> Self
    where
        S: EventSource<Item = T> + ?Sized,
        P: EventSource + ?Sized,
    {
        let mut tracer = Self::new(source);
        tracer.stop = Some(subscribe(&tracer.state, stop, |_| Arrival::Stop));
        tracer
    }

    /// Waits for the next value.
    ///
    /// Resolves to `Some(value)`, to `None` if the stop source fired or the
    /// tracer is closed, or to the error either source delivered.
    #[must_use]
    pub fn next<'a>(&'a mut self, cx: &'a Cx) -> TracerNext<'a, T> {
        TracerNext { tracer: self, cx }
    }
}

impl<T> Tracer<T> {
    /// Cancels both subscriptions. Later calls to `next` return `None`.
    pub fn close(&mut self) {
        self.source.take();
        self.stop.take();
        self.state.borrow_mut().pending = None;
    }

    /// Returns true once the tracer is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.source
            .as_ref()
            .map_or(true, |guard| guard.slot().is_cancelled())
    }
}

fn subscribe<T, S, M>(
    state: &Rc<RefCell<TracerState<T>>>,
    source: &S,
    map: M,
) -> SubscriptionGuard
where
    T: 'static,
    S: EventSource + ?Sized,
    M: Fn(S::Item) -> Arrival<T> + 'static,
{
    let on_value = {
        let state = Rc::downgrade(state);
        Box::new(move |item: S::Item| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let waker = state.borrow_mut().push(map(item));
            if let Some(waker) = waker {
                waker.wake();
            }
        })
    };
    let on_error = {
        let state = Rc::downgrade(state);
        Box::new(move |error: Error| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let waker = state.borrow_mut().push(Arrival::Failed(error));
            if let Some(waker) = waker {
                waker.wake();
            }
        })
    };
    let slot = SubscriptionSlot::new();
    slot.set(source.add_callback(on_value, on_error));
    SubscriptionGuard::new(slot)
}

/// Future returned by [`Tracer::next`].
pub struct TracerNext<'a, T> {
    tracer: &'a mut Tracer<T>,
    cx: &'a Cx,
}

impl<T> Future for TracerNext<'_, T> {
    type Output = Result<Option<T>>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Err(err) = this.cx.checkpoint() {
            this.tracer.state.borrow_mut().waker = None;
            return Poll::Ready(Err(err));
        }
        if this.tracer.is_closed() {
            return Poll::Ready(Ok(None));
        }
        let mut state = this.tracer.state.borrow_mut();
        match state.pending.take() {
            Some(Arrival::Value(value)) => Poll::Ready(Ok(Some(value))),
            Some(Arrival::Stop) => Poll::Ready(Ok(None)),
            Some(Arrival::Failed(err)) => Poll::Ready(Err(err)),
            None => {
                state.waker = Some(task_cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::ManualSource;
    use crate::runtime::{InlineDriver, Scheduler, SchedulerConfig};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default(), Rc::new(InlineDriver::new()))
    }

    #[test]
    fn yields_values_then_none_on_stop() {
        init_test("yields_values_then_none_on_stop");
        let sched = scheduler();
        let values = ManualSource::new();
        let stop: ManualSource<()> = ManualSource::new();
        let handle = {
            let (values, stop) = (values.clone(), stop.clone());
            sched.spawn(None, move |cx| async move {
                let mut tracer = Tracer::with_stop(&values, &stop);
                let mut seen = Vec::new();
                while let Some(v) = tracer.next(&cx).await? {
                    seen.push(v);
                }
                let restarted = tracer.next(&cx).await?;
                Ok((seen, restarted))
            })
        };
        sched.quiesce().unwrap();
        for v in [1, 2, 3] {
            values.emit(v);
            sched.quiesce().unwrap();
        }
        stop.emit(());
        sched.quiesce().unwrap();
        values.emit(4);
        sched.quiesce().unwrap();

        let (seen, restarted) = handle.try_join().unwrap().unwrap();
        crate::assert_with_log!(seen == vec![1, 2, 3], "values", vec![1, 2, 3], seen);
        assert_eq!(restarted, Some(4));
        assert_eq!(values.active_subscriptions(), 0);
        assert_eq!(stop.active_subscriptions(), 0);
        crate::test_complete!("yields_values_then_none_on_stop");
    }

    #[test]
    fn buffer_keeps_first_value_and_stop_overrides() {
        init_test("buffer_keeps_first_value_and_stop_overrides");
        let mut state = TracerState::<u8> {
            pending: None,
            waker: None,
        };
        state.push(Arrival::Value(1));
        state.push(Arrival::Value(2));
        assert!(matches!(state.pending, Some(Arrival::Value(1))));
        state.push(Arrival::Stop);
        assert!(matches!(state.pending, Some(Arrival::Stop)));
        state.push(Arrival::Failed(Error::user("late")));
        assert!(matches!(state.pending, Some(Arrival::Stop)));
        crate::test_complete!("buffer_keeps_first_value_and_stop_overrides");
    }

    #[test]
    fn source_error_propagates_and_close_unsubscribes() {
        init_test("source_error_propagates_and_close_unsubscribes");
        let sched = scheduler();
        let values: ManualSource<u8> = ManualSource::new();
        let handle = {
            let values = values.clone();
            sched.spawn(None, move |cx| async move {
                let mut tracer = Tracer::new(&values);
                let first = tracer.next(&cx).await;
                tracer.close();
                let after_close = tracer.next(&cx).await?;
                Ok((first.is_err(), after_close))
            })
        };
        sched.quiesce().unwrap();
        values.fail(Error::user("broken"));
        sched.quiesce().unwrap();
        assert_eq!(handle.try_join().unwrap().unwrap(), (true, None));
        assert_eq!(values.active_subscriptions(), 0);
        crate::test_complete!("source_error_propagates_and_close_unsubscribes");
    }
}
