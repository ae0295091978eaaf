//! Timeout combinator: bound a block by an external deadline source.
//!
//! The deadline is whatever [`EventSource`] the embedding provides (a
//! simulator timer, a lab [`TimerSource`](crate::lab::TimerSource)). When it
//! fires while the block runs, the enclosing task is cancelled and the block
//! fails with [`ErrorKind::DeadlineExceeded`](crate::ErrorKind::DeadlineExceeded).
//!
//! # Composition
//!
//! ```text
//! timeout(a, timeout(b, f))
//! ```
//!
//! Whichever source fires first wins, and only the scope whose source fired
//! reports the deadline: the other one sees a foreign cancellation and lets
//! it through.

use crate::combinator::callback_scope::with_callbacks;
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::event::EventSource;
use std::future::Future;

/// Runs `body`, failing with deadline-exceeded if `source` fires first.
///
/// # Errors
///
/// `DeadlineExceeded` if the source fired, the source's own error, or the
/// body's error.
pub async fn timeout<S, Fut, T>(cx: &Cx, source: &S, body: Fut) -> Result<T>
where
    S: EventSource + ?Sized,
    Fut: Future<Output = Result<T>>,
{
    with_callbacks(cx, source, |_| Err(Error::deadline_exceeded()), body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lab::{LabConfig, LabDriver, ManualSource, TimerSource};
    use crate::runtime::{InlineDriver, Scheduler, SchedulerConfig};
    use crate::sync::Completion;
    use std::rc::Rc;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn deadline_fires_around_infinite_wait() {
        init_test("deadline_fires_around_infinite_wait");
        let sched = Scheduler::new(SchedulerConfig::default(), Rc::new(InlineDriver::new()));
        let deadline: ManualSource<()> = ManualSource::new();
        let handle = {
            let deadline = deadline.clone();
            sched.spawn(None, move |cx| async move {
                let forever: Completion<()> = Completion::new();
                timeout(&cx, &deadline, forever.wait(&cx)).await
            })
        };
        sched.quiesce().unwrap();
        deadline.emit(());
        sched.quiesce().unwrap();
        let err = handle.try_join().unwrap().unwrap_err();
        crate::assert_with_log!(err.is_timeout(), "deadline exceeded", ErrorKind::DeadlineExceeded, err.kind());
        assert_eq!(deadline.active_subscriptions(), 0);
        crate::test_complete!("deadline_fires_around_infinite_wait");
    }

    #[test]
    fn body_first_cancels_deadline_subscription() {
        init_test("body_first_cancels_deadline_subscription");
        let driver = Rc::new(LabDriver::new(LabConfig::new()));
        let sched = Scheduler::new(SchedulerConfig::default(), Rc::clone(&driver));
        let deadline = TimerSource::one_shot(driver.clock(), Duration::from_secs(10));
        let work = TimerSource::one_shot(driver.clock(), Duration::from_secs(1));
        let value = sched
            .block_on(None, move |cx| async move {
                timeout(&cx, &deadline, async { crate::wait(&cx, &work).await }).await
            })
            .unwrap();
        assert_eq!(value, Duration::from_secs(1));
        assert_eq!(driver.clock().pending_timers(), 0);
        crate::test_complete!("body_first_cancels_deadline_subscription");
    }
}
