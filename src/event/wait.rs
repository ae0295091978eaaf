//! Single-event await over an [`EventSource`].

use crate::cx::{Cx, WeakCx};
use crate::error::{Error, Result};
use crate::event::{EventSource, SubscriptionGuard, SubscriptionSlot, WeakSubscriptionSlot};
use crate::sync::Completion;
use crate::tracing_compat::trace;

/// Waits for the first event of `source`.
///
/// The first value or error wins. Events arriving after it in the same turn
/// are dropped. The subscription is cancelled exactly once: from a deferred
/// step scheduled by the winning callback, or before this function returns,
/// whichever comes first. Dropping the future also cancels it.
///
/// # Errors
///
/// Returns the error delivered by the source, or a cancelled error if the
/// task is cancelled while waiting.
pub async fn wait<S>(cx: &Cx, source: &S) -> Result<S::Item>
where
    S: EventSource + ?Sized,
    S::Item: Clone,
{
    cx.checkpoint()?;
    let cell: Completion<S::Item> = Completion::new();
    let slot = SubscriptionSlot::new();

    let on_value = {
        let cell = cell.clone();
        let slot = slot.downgrade();
        let cx = cx.downgrade();
        Box::new(move |value: S::Item| {
            if cell.is_settled() {
                trace!("late event suppressed");
                return;
            }
            let _ = cell.set_result(value);
            defer_unsubscribe(&cx, &slot);
        })
    };
    let on_error = {
        let cell = cell.clone();
        let slot = slot.downgrade();
        let cx = cx.downgrade();
        Box::new(move |error: Error| {
            if cell.is_settled() {
                trace!(error = %error, "late error suppressed");
                return;
            }
            let _ = cell.set_error(error);
            defer_unsubscribe(&cx, &slot);
        })
    };

    slot.set(source.add_callback(on_value, on_error));
    let guard = SubscriptionGuard::new(slot);
    let result = cell.wait(cx).await;
    drop(guard);
    result
}

fn defer_unsubscribe(cx: &WeakCx, slot: &WeakSubscriptionSlot) {
    let slot = slot.clone();
    let scheduled = cx
        .upgrade()
        .is_some_and(|cx| cx.call_soon(move || {
            slot.cancel();
        }));
    if !scheduled {
        trace!("scheduler unavailable, unsubscription left to the waiter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lab::ManualSource;
    use crate::runtime::{InlineDriver, Scheduler, SchedulerConfig};
    use std::rc::Rc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default(), Rc::new(InlineDriver::new()))
    }

    #[test]
    fn burst_resolves_to_first_and_unsubscribes_once() {
        init_test("burst_resolves_to_first_and_unsubscribes_once");
        let sched = scheduler();
        let source = ManualSource::new();
        let handle = {
            let source = source.clone();
            sched.spawn(None, move |cx| async move { wait(&cx, &source).await })
        };
        sched.quiesce().unwrap();
        assert_eq!(source.active_subscriptions(), 1);

        source.burst([1, 2]);
        crate::assert_with_log!(
            source.cancel_calls() == 0,
            "unsubscribe waits for the next drain",
            0,
            source.cancel_calls()
        );
        assert_eq!(source.active_subscriptions(), 1);
        sched.quiesce().unwrap();
        let value = handle.try_join().unwrap().unwrap();
        crate::assert_with_log!(value == 1, "first event wins", 1, value);
        assert_eq!(source.cancel_calls(), 1);
        assert_eq!(source.active_subscriptions(), 0);
        crate::test_complete!("burst_resolves_to_first_and_unsubscribes_once");
    }

    #[test]
    fn error_is_reraised() {
        init_test("error_is_reraised");
        let sched = scheduler();
        let source: ManualSource<u8> = ManualSource::new();
        let handle = {
            let source = source.clone();
            sched.spawn(None, move |cx| async move { wait(&cx, &source).await })
        };
        sched.quiesce().unwrap();
        source.fail(Error::user("sensor offline"));
        source.emit(3);
        sched.quiesce().unwrap();
        let err = handle.try_join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(source.cancel_calls(), 1);
        crate::test_complete!("error_is_reraised");
    }

    #[test]
    fn cancelling_the_waiter_unsubscribes() {
        init_test("cancelling_the_waiter_unsubscribes");
        let sched = scheduler();
        let source: ManualSource<u8> = ManualSource::new();
        let handle = {
            let source = source.clone();
            sched.spawn(None, move |cx| async move { wait(&cx, &source).await })
        };
        sched.quiesce().unwrap();
        handle.cancel();
        sched.quiesce().unwrap();
        assert!(handle.completion().is_cancelled());
        assert_eq!(source.active_subscriptions(), 0);
        assert_eq!(source.cancel_calls(), 1);
        crate::test_complete!("cancelling_the_waiter_unsubscribes");
    }

    #[test]
    fn immediate_delivery_inside_add_callback() {
        init_test("immediate_delivery_inside_add_callback");
        let sched = scheduler();
        let source = ManualSource::new();
        source.emit_on_subscribe(9);
        let handle = {
            let source = source.clone();
            sched.spawn(None, move |cx| async move { wait(&cx, &source).await })
        };
        sched.quiesce().unwrap();
        assert_eq!(handle.try_join().unwrap().unwrap(), 9);
        assert_eq!(source.cancel_calls(), 1);
        crate::test_complete!("immediate_delivery_inside_add_callback");
    }
}
