//! Callback scopes and timeouts, including nesting.

#[macro_use]
mod common;

use std::cell::Cell;
use std::rc::Rc;

use coopsync::lab::ManualSource;
use coopsync::{timeout, with_callbacks, wait, CallbackScope, Completion, Error, ErrorKind};

fn init_test(name: &str) {
    common::init_test_logging();
    test_phase!(name);
}

#[test]
fn timeout_source_firing_first_raises_deadline() {
    init_test("timeout_source_firing_first_raises_deadline");
    let (sched, _driver) = common::inline_scheduler("timeouts");
    let deadline: ManualSource<()> = ManualSource::new();
    let handle = {
        let deadline = deadline.clone();
        sched.spawn(Some("bounded"), move |cx| async move {
            let forever: Completion<u8> = Completion::new();
            timeout(&cx, &deadline, forever.wait(&cx)).await
        })
    };
    sched.quiesce().unwrap();
    assert_eq!(deadline.active_subscriptions(), 1);

    deadline.emit(());
    sched.quiesce().unwrap();
    let err = handle.try_join().unwrap().unwrap_err();
    assert_with_log!(err.is_timeout(), "deadline", ErrorKind::DeadlineExceeded, err.kind());
    assert_eq!(deadline.active_subscriptions(), 0);
    assert_eq!(deadline.cancel_calls(), 1);
    test_complete!("timeout_source_firing_first_raises_deadline");
}

#[test]
fn operation_finishing_first_cancels_the_deadline() {
    init_test("operation_finishing_first_cancels_the_deadline");
    let (sched, _driver) = common::inline_scheduler("timeouts");
    let deadline: ManualSource<()> = ManualSource::new();
    let work: ManualSource<u32> = ManualSource::new();
    let handle = {
        let deadline = deadline.clone();
        let work = work.clone();
        sched.spawn(None, move |cx| async move {
            timeout(&cx, &deadline, async { wait(&cx, &work).await }).await
        })
    };
    sched.quiesce().unwrap();
    work.emit(7);
    sched.quiesce().unwrap();
    assert_eq!(handle.try_join().unwrap().unwrap(), 7);
    assert_eq!(deadline.active_subscriptions(), 0);

    test_section!("a late deadline after the scope closed changes nothing");
    deadline.emit(());
    sched.quiesce().unwrap();
    assert_eq!(handle.try_join().unwrap().unwrap(), 7);
    test_complete!("operation_finishing_first_cancels_the_deadline");
}

#[test]
fn outer_injection_is_not_swallowed_by_an_active_inner_scope() {
    init_test("outer_injection_is_not_swallowed_by_an_active_inner_scope");
    let (sched, _driver) = common::inline_scheduler("nested");
    let outer: ManualSource<()> = ManualSource::new();
    let inner: ManualSource<()> = ManualSource::new();
    let inner_closed_first = Rc::new(Cell::new(false));

    let handle = {
        let outer = outer.clone();
        let inner = inner.clone();
        let flag = Rc::clone(&inner_closed_first);
        sched.spawn(Some("nested"), move |cx| async move {
            timeout(&cx, &outer, async {
                let forever: Completion<()> = Completion::new();
                let inner_result = timeout(&cx, &inner, forever.wait(&cx)).await;
                flag.set(inner.active_subscriptions() == 0);
                inner_result
            })
            .await
        })
    };
    sched.quiesce().unwrap();
    assert_eq!(outer.active_subscriptions(), 1);
    assert_eq!(inner.active_subscriptions(), 1);

    outer.emit(());
    sched.quiesce().unwrap();
    let err = handle.try_join().unwrap().unwrap_err();
    assert_with_log!(
        err.is_timeout(),
        "outer scope turns its own injection into a deadline",
        ErrorKind::DeadlineExceeded,
        err.kind()
    );
    assert!(inner_closed_first.get());
    assert_eq!(outer.active_subscriptions(), 0);
    assert_eq!(inner.active_subscriptions(), 0);
    test_complete!("outer_injection_is_not_swallowed_by_an_active_inner_scope");
}

#[test]
fn both_scopes_firing_in_one_turn_resolve_to_the_first_injection() {
    init_test("both_scopes_firing_in_one_turn_resolve_to_the_first_injection");
    let (sched, _driver) = common::inline_scheduler("nested");
    let outer: ManualSource<()> = ManualSource::new();
    let inner: ManualSource<()> = ManualSource::new();
    let inner_error_kind: Rc<Cell<Option<ErrorKind>>> = Rc::new(Cell::new(None));

    let handle = {
        let outer = outer.clone();
        let inner = inner.clone();
        let seen = Rc::clone(&inner_error_kind);
        sched.spawn(None, move |cx| async move {
            with_callbacks(
                &cx,
                &outer,
                |()| Err(Error::user("outer tripped")),
                async {
                    let forever: Completion<()> = Completion::new();
                    let inner_result = timeout(&cx, &inner, forever.wait(&cx)).await;
                    seen.set(inner_result.as_ref().err().map(Error::kind));
                    inner_result
                },
            )
            .await
        })
    };
    sched.quiesce().unwrap();

    outer.emit(());
    inner.emit(());
    sched.quiesce().unwrap();

    assert_eq!(inner_error_kind.get(), Some(ErrorKind::Cancelled));
    let err = handle.try_join().unwrap().unwrap_err();
    assert_with_log!(
        err.kind() == ErrorKind::User,
        "outer payload surfaces",
        ErrorKind::User,
        err.kind()
    );
    assert_eq!(err.message(), Some("outer tripped"));
    test_complete!("both_scopes_firing_in_one_turn_resolve_to_the_first_injection");
}

#[test]
fn explicit_scope_reports_its_injection_token() {
    init_test("explicit_scope_reports_its_injection_token");
    let (sched, _driver) = common::inline_scheduler("explicit");
    let source: ManualSource<i32> = ManualSource::new();
    let handle = {
        let source = source.clone();
        sched.spawn(None, move |cx| async move {
            let scope = CallbackScope::enter(&cx, &source, |value| {
                if value < 0 {
                    return Err(Error::user("negative reading"));
                }
                Ok(())
            });
            let forever: Completion<()> = Completion::new();
            let result = forever.wait(&cx).await;
            let token = scope.injected_token();
            let matched = result.as_ref().err().and_then(Error::cancel_token) == token;
            Ok((matched, scope.exit(result).unwrap_err().message().map(str::to_owned)))
        })
    };
    sched.quiesce().unwrap();
    source.burst([3, 4]);
    sched.quiesce().unwrap();
    assert!(!handle.is_finished());

    source.burst([-1, -2]);
    sched.quiesce().unwrap();
    let (matched, message) = handle.try_join().unwrap().unwrap();
    assert!(matched);
    assert_eq!(message.as_deref(), Some("negative reading"));
    assert_eq!(source.active_subscriptions(), 0);
    test_complete!("explicit_scope_reports_its_injection_token");
}
