//! Scheduler configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `name` | `"coopsync"` |
//! | `drain_budget` | 0 (unbounded) |
//! | `raise_uncaught` | `true` |
//!
//! # Environment
//!
//! [`SchedulerConfig::from_env`] starts from the defaults and applies:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `COOPSYNC_SCHEDULER_NAME` | `name` |
//! | `COOPSYNC_DRAIN_BUDGET` | `drain_budget` |
//! | `COOPSYNC_RAISE_UNCAUGHT` | `raise_uncaught` (`1/0`, `true/false`, `yes/no`, `on/off`) |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`SchedulerConfig::name`].
pub const ENV_SCHEDULER_NAME: &str = "COOPSYNC_SCHEDULER_NAME";
/// Environment variable overriding [`SchedulerConfig::drain_budget`].
pub const ENV_DRAIN_BUDGET: &str = "COOPSYNC_DRAIN_BUDGET";
/// Environment variable overriding [`SchedulerConfig::raise_uncaught`].
pub const ENV_RAISE_UNCAUGHT: &str = "COOPSYNC_RAISE_UNCAUGHT";

const DEFAULT_NAME: &str = "coopsync";

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name used in log events.
    pub name: String,
    /// Maximum steps per drain (0 = unbounded). A drain that hits the budget
    /// re-fires the wake trigger so the driver comes back for the rest.
    pub drain_budget: usize,
    /// Raise uncaught task failures from `quiesce` (otherwise only log them).
    pub raise_uncaught: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            drain_budget: 0,
            raise_uncaught: true,
        }
    }
}

impl SchedulerConfig {
    /// Creates a default configuration with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the drain budget.
    #[must_use]
    pub fn with_drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = budget;
        self
    }

    /// Sets whether uncaught failures are raised.
    #[must_use]
    pub fn with_raise_uncaught(mut self, raise: bool) -> Self {
        self.raise_uncaught = raise;
        self
    }

    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            self.name = DEFAULT_NAME.to_owned();
        } else if trimmed.len() != self.name.len() {
            self.name = trimmed.to_owned();
        }
    }

    /// Checks the configuration without changing it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyName`] for a blank name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(())
    }

    /// Builds a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if a variable is set but cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable values.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_SCHEDULER_NAME) {
            self.name = name;
        }
        if let Some(raw) = lookup(ENV_DRAIN_BUDGET) {
            self.drain_budget = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_DRAIN_BUDGET,
                value: raw.clone(),
                reason: "expected a non-negative integer",
            })?;
        }
        if let Some(raw) = lookup(ENV_RAISE_UNCAUGHT) {
            self.raise_uncaught = parse_bool(&raw).ok_or_else(|| ConfigError::InvalidEnv {
                key: ENV_RAISE_UNCAUGHT,
                value: raw.clone(),
                reason: "expected a boolean",
            })?;
        }
        self.normalize();
        Ok(self)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
