//! Cooperative yield.

use crate::cx::Cx;
use crate::error::Result;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that yields execution back to the scheduler once.
pub struct YieldNow<'a> {
    cx: &'a Cx,
    yielded: bool,
}

impl Future for YieldNow<'_> {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Err(err) = self.cx.checkpoint() {
            return Poll::Ready(Err(err));
        }
        if self.yielded {
            Poll::Ready(Ok(()))
        } else {
            self.yielded = true;
            task_cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Yields to the scheduler, letting every other ready step run first.
///
/// Also a cancellation point: a pending cancellation is delivered as an
/// error instead of yielding.
#[must_use]
pub fn yield_now(cx: &Cx) -> YieldNow<'_> {
    YieldNow { cx, yielded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{InlineDriver, Scheduler, SchedulerConfig};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn yielding_tasks_interleave() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("yielding_tasks_interleave");
        let sched = Scheduler::new(SchedulerConfig::default(), Rc::new(InlineDriver::new()));
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            let log = Rc::clone(&log);
            sched.spawn(Some(name), move |cx| async move {
                for step in 0..2 {
                    log.borrow_mut().push(format!("{name}{step}"));
                    yield_now(&cx).await?;
                }
                Ok(())
            });
        }
        sched.quiesce().unwrap();
        let seen = log.borrow().clone();
        crate::assert_with_log!(
            seen == ["a0", "b0", "a1", "b1"],
            "round robin",
            ["a0", "b0", "a1", "b1"],
            seen
        );
        crate::test_complete!("yielding_tasks_interleave");
    }

    #[test]
    fn yield_delivers_pending_cancel() {
        crate::test_utils::init_test_logging();
        let sched = Scheduler::new(SchedulerConfig::default(), Rc::new(InlineDriver::new()));
        let handle = sched.spawn(None, |cx| async move {
            cx.cancel();
            Ok(yield_now(&cx).await.is_err())
        });
        sched.quiesce().unwrap();
        assert_eq!(handle.try_join().unwrap().unwrap(), true);
    }
}
