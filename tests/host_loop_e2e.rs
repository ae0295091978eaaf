//! End-to-end runs of the scheduler embedded in a simulated host loop.
//!
//! The lab driver plays the host: it drains the scheduler whenever the wake
//! trigger fired and otherwise advances a virtual clock.

#[macro_use]
mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use coopsync::lab::{LabClock, LabConfig, LabDriver, StopCause, TimerSource};
use coopsync::runtime::config::{ENV_DRAIN_BUDGET, ENV_RAISE_UNCAUGHT, ENV_SCHEDULER_NAME};
use coopsync::{
    wait, Completion, ConfigError, Cx, Error, ErrorKind, Result, Scheduler, SchedulerConfig, Tracer,
};

fn init_test(name: &str) {
    common::init_test_logging();
    test_phase!(name);
}

fn lab(config: LabConfig) -> (Scheduler, Rc<LabDriver>) {
    let driver = Rc::new(LabDriver::new(config));
    let scheduler = Scheduler::new(SchedulerConfig::new("host-loop"), Rc::clone(&driver));
    (scheduler, driver)
}

async fn sleep(cx: &Cx, clock: &LabClock, delay: Duration) -> Result<Duration> {
    wait(cx, &TimerSource::one_shot(clock, delay)).await
}

#[test]
fn timers_resume_tasks_in_virtual_time_order() {
    init_test("timers_resume_tasks_in_virtual_time_order");
    let (sched, driver) = lab(LabConfig::new());
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let clock = driver.clock().clone();
    let sink = Rc::clone(&log);
    sched
        .block_on(Some("main"), move |cx| async move {
            let mut children = Vec::new();
            for (label, millis) in [("slow", 30), ("fast", 10), ("middle", 20)] {
                let clock = clock.clone();
                let sink = Rc::clone(&sink);
                children.push(cx.spawn(Some(label), move |cx| async move {
                    sleep(&cx, &clock, Duration::from_millis(millis)).await?;
                    sink.borrow_mut().push(label);
                    Ok(())
                })?);
            }
            for child in &children {
                child.join(&cx).await?;
            }
            Ok(())
        })
        .unwrap();

    let order = log.borrow().clone();
    assert_with_log!(
        order == ["fast", "middle", "slow"],
        "wake order follows deadlines",
        ["fast", "middle", "slow"],
        order
    );
    assert_eq!(driver.now(), Duration::from_millis(30));
    assert_eq!(driver.clock().pending_timers(), 0);
    assert_eq!(sched.live_tasks(), 0);
    test_complete!("timers_resume_tasks_in_virtual_time_order", now = driver.now());
}

#[test]
fn leaked_background_failure_reaches_the_host() {
    init_test("leaked_background_failure_reaches_the_host");
    let (sched, driver) = lab(LabConfig::new());

    let clock = driver.clock().clone();
    drop(sched.spawn(Some("background"), move |cx| async move {
        sleep(&cx, &clock, Duration::from_millis(5)).await?;
        Err::<(), _>(Error::user("background exploded"))
    }));

    let clock = driver.clock().clone();
    let main = sched.spawn(Some("main"), move |cx| async move {
        sleep(&cx, &clock, Duration::from_millis(10)).await?;
        Ok("done")
    });

    test_section!("first run stops at the leaked failure");
    let err = sched.run_until_complete(main.completion()).unwrap_err();
    assert_with_log!(
        err.kind() == ErrorKind::Aggregated,
        "uncaught failures arrive aggregated",
        ErrorKind::Aggregated,
        err.kind()
    );
    assert_eq!(err.failures().len(), 1);
    assert_eq!(err.failures()[0].message(), Some("background exploded"));
    assert_eq!(driver.now(), Duration::from_millis(5));

    test_section!("host resumes and the main task finishes");
    let value = sched.run_until_complete(main.completion()).unwrap();
    assert_eq!(value, "done");
    assert_eq!(sched.stats().uncaught_reported, 1);
    test_complete!("leaked_background_failure_reaches_the_host");
}

#[test]
fn tracer_streams_periodic_ticks_until_stop() {
    init_test("tracer_streams_periodic_ticks_until_stop");
    let (sched, driver) = lab(LabConfig::new());
    let ticks = TimerSource::periodic(driver.clock(), Duration::from_millis(10));
    let stop = TimerSource::one_shot(driver.clock(), Duration::from_millis(35));

    let seen = sched
        .block_on(Some("consumer"), move |cx| async move {
            let mut tracer = Tracer::with_stop(&ticks, &stop);
            let mut seen = Vec::new();
            while let Some(at) = tracer.next(&cx).await? {
                seen.push(at);
            }
            Ok(seen)
        })
        .unwrap();

    let expected: Vec<Duration> = [10, 20, 30].into_iter().map(Duration::from_millis).collect();
    assert_with_log!(seen == expected, "ticks before stop", expected, seen);
    assert_eq!(driver.clock().pending_timers(), 0);
    test_complete!("tracer_streams_periodic_ticks_until_stop", ticks = seen.len());
}

#[test]
fn halted_host_leaves_the_task_cancellable() {
    init_test("halted_host_leaves_the_task_cancellable");
    let (sched, driver) = lab(LabConfig::new().halt_at(Duration::from_secs(1)));
    let clock = driver.clock().clone();
    let task = sched.spawn(None, move |cx| async move {
        sleep(&cx, &clock, Duration::from_secs(2)).await
    });

    let err = sched.run_until_complete(task.completion()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(driver.last_stop(), Some(StopCause::HaltTime));
    assert!(!task.is_finished());
    assert_eq!(driver.clock().pending_timers(), 1);

    test_section!("cancel and drain without advancing time");
    assert!(task.cancel());
    let cause = driver.run_for(&sched, Duration::ZERO).unwrap();
    assert_eq!(cause, StopCause::Deadline);
    assert!(task.completion().is_cancelled());
    assert_eq!(driver.clock().pending_timers(), 0);
    assert_eq!(driver.now(), Duration::from_secs(1));
    test_complete!("halted_host_leaves_the_task_cancellable");
}

#[test]
fn run_until_complete_from_a_deferred_callback_is_rejected() {
    init_test("run_until_complete_from_a_deferred_callback_is_rejected");
    let (sched, _driver) = common::inline_scheduler("reentry");
    let target: Completion<u32> = Completion::new();
    let observed: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));

    {
        let sched2 = sched.clone();
        let target = target.clone();
        let observed = Rc::clone(&observed);
        sched.call_soon(move || {
            let result = sched2.run_until_complete(&target);
            *observed.borrow_mut() = result.err();
        });
    }
    let before = sched.stats();
    sched.quiesce().unwrap();

    let kind = observed.borrow().as_ref().map(Error::kind);
    assert_with_log!(kind == Some(ErrorKind::Usage), "usage error", Some(ErrorKind::Usage), kind);
    assert!(target.is_pending());
    assert_eq!(target.callback_count(), 0);
    assert_eq!(sched.stats().tasks_spawned, before.tasks_spawned);
    assert!(!sched.is_draining());
    test_complete!("run_until_complete_from_a_deferred_callback_is_rejected");
}

#[test]
fn config_overrides_come_from_the_environment_lookup() {
    init_test("config_overrides_come_from_the_environment_lookup");
    let config = SchedulerConfig::default()
        .apply_env(|key| match key {
            k if k == ENV_SCHEDULER_NAME => Some("  sim-core  ".to_owned()),
            k if k == ENV_DRAIN_BUDGET => Some("64".to_owned()),
            k if k == ENV_RAISE_UNCAUGHT => Some("off".to_owned()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.name, "sim-core");
    assert_eq!(config.drain_budget, 64);
    assert!(!config.raise_uncaught);

    let err = SchedulerConfig::default()
        .apply_env(|key| (key == ENV_DRAIN_BUDGET).then(|| "many".to_owned()))
        .unwrap_err();
    assert!(matches!(&err, ConfigError::InvalidEnv { key, .. } if *key == ENV_DRAIN_BUDGET));
    let as_error: Error = err.into();
    assert_eq!(as_error.kind(), ErrorKind::Config);
    test_complete!("config_overrides_come_from_the_environment_lookup");
}
