//! Test logging helpers shared by the unit tests.
//!
//! `init_test_logging` installs a `tracing` subscriber once per process. The
//! level comes from `RUST_LOG`, falling back to `TEST_LOG_LEVEL`, then to
//! `coopsync=debug`.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the test subscriber. Safe to call from every test.
pub(crate) fn init_test_logging() {
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

/// Marks the start of a test.
#[macro_export]
#[doc(hidden)]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(phase = %$name, "==== test phase ====")
    };
}

/// Marks a section inside a test.
#[macro_export]
#[doc(hidden)]
macro_rules! test_section {
    ($name:expr) => {
        ::tracing::debug!(section = %$name, "---- section ----")
    };
}

/// Marks the successful end of a test, with optional key/value summary fields.
#[macro_export]
#[doc(hidden)]
macro_rules! test_complete {
    ($name:expr $(,)?) => {
        ::tracing::info!(test = %$name, "test complete")
    };
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        ::tracing::info!(test = %$name, $($key = ?$value),+, "test complete")
    };
}

/// Asserts a condition, logging expected and actual values before failing.
#[macro_export]
#[doc(hidden)]
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
