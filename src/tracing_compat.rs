//! Logging shim.
//!
//! Internal code logs through these macros only. With the
//! `tracing-integration` feature they forward to [`tracing`]; without it they
//! expand to nothing, so the crate has no hard dependency on a subscriber.

#[cfg(feature = "tracing-integration")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    macro_rules! noop_event {
        ($($arg:tt)*) => {};
    }

    pub(crate) use noop_event as debug;
    pub(crate) use noop_event as error;
    pub(crate) use noop_event as info;
    pub(crate) use noop_event as trace;
    pub(crate) use noop_event as warn;
}

#[cfg(not(feature = "tracing-integration"))]
#[allow(unused_imports)]
pub(crate) use noop::{debug, error, info, trace, warn};
