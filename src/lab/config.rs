//! Configuration for the lab driver.
//!
//! ```
//! use coopsync::lab::LabConfig;
//! use std::time::Duration;
//!
//! let config = LabConfig::new()
//!     .halt_at(Duration::from_secs(5))
//!     .max_events(1_000);
//! assert_eq!(config.halt_at, Some(Duration::from_secs(5)));
//! ```
//!
//! `LabConfig` uses a fluent, move-based builder style. Each method consumes
//! the config and returns the updated value.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lab driver configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabConfig {
    /// Virtual time at which the driver halts on its own, modelling the
    /// host stopping for an unrelated reason.
    pub halt_at: Option<Duration>,
    /// Maximum timer events per `advance` (0 = unbounded).
    pub max_events: usize,
}

impl LabConfig {
    /// Creates a configuration with no halt time and no event budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            halt_at: None,
            max_events: 0,
        }
    }

    /// Sets the halt time.
    #[must_use]
    pub const fn halt_at(mut self, at: Duration) -> Self {
        self.halt_at = Some(at);
        self
    }

    /// Sets the event budget.
    #[must_use]
    pub const fn max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }
}
