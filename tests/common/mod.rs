//! Shared helpers for the integration tests.

#![allow(dead_code, unused_macros)]

use std::rc::Rc;
use std::sync::Once;

use coopsync::{InlineDriver, Scheduler, SchedulerConfig};

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary.
///
/// The filter comes from `RUST_LOG`, then `TEST_LOG_LEVEL`, then defaults to
/// `coopsync=debug`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("TEST_LOG_LEVEL"))
            .unwrap_or_else(|_| "coopsync=debug".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// A scheduler over an [`InlineDriver`], plus the driver.
pub fn inline_scheduler(name: &str) -> (Scheduler, Rc<InlineDriver>) {
    let driver = Rc::new(InlineDriver::new());
    let scheduler = Scheduler::new(SchedulerConfig::new(name), Rc::clone(&driver));
    (scheduler, driver)
}

macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(phase = %$name, "==== test phase ====")
    };
}

macro_rules! test_section {
    ($name:expr) => {
        ::tracing::debug!(section = %$name, "---- section ----")
    };
}

macro_rules! test_complete {
    ($name:expr $(,)?) => {
        ::tracing::info!(test = %$name, "test complete")
    };
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        ::tracing::info!(test = %$name, $($key = ?$value),+, "test complete")
    };
}

macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr $(,)?) => {{
        let ok: bool = $cond;
        let expected = &$expected;
        let actual = &$actual;
        if !ok {
            ::tracing::error!(
                expected = ?expected,
                actual = ?actual,
                "assertion failed: {}",
                $msg
            );
        }
        assert!(ok, "{}: expected {:?}, actual {:?}", $msg, expected, actual);
    }};
}
