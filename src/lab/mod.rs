//! Deterministic lab harness.
//!
//! The lab stands in for the external world during tests:
//!
//! - [`LabDriver`]: virtual clock and timers behind the [`Driver`](crate::Driver) contract
//! - [`ManualSource`]: an event source fired by hand
//! - [`TimerSource`]: a one-shot or periodic virtual-time timer

mod clock;
pub mod config;
mod driver;
mod source;

pub use clock::{LabClock, TimerId};
pub use config::LabConfig;
pub use driver::{LabDriver, LabReport, StopCause};
pub use source::{ManualSource, TimerSource};
