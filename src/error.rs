//! Error types and error handling strategy for Coopsync.
//!
//! Every fallible operation in the crate returns [`Error`]. Errors are
//! cheap to clone so that a settled [`Completion`](crate::Completion) can hand
//! the same failure to any number of awaiters.
//!
//! - Errors are explicit and typed (an [`ErrorKind`] on every value)
//! - Cancellation is an error kind that carries a [`CancelReason`], so scopes
//!   can recognise their own injections by token
//! - Panics inside tasks are caught at the step boundary and become
//!   [`ErrorKind::Panicked`], which is always fatal
//! - Structured groups report many failures at once through
//!   [`ErrorKind::Aggregated`]
//!
//! # Fatal failures
//!
//! An aggregated failure may mix ordinary failures with fatal ones. Callers
//! that catch an aggregate must check [`Error::has_fatal`] and propagate
//! rather than swallow when it returns true.

use core::fmt;
use std::sync::Arc;

use crate::types::{CancelReason, CancelToken};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Misuse ===
    /// A completion cell was settled twice.
    AlreadySettled,
    /// Scheduler re-entrancy or structured-group misuse.
    Usage,

    // === Cancellation ===
    /// Cooperative interruption. Carries a [`CancelReason`].
    Cancelled,
    /// A timeout scope's deadline source fired first.
    DeadlineExceeded,

    // === Groups ===
    /// One or more child failures collected by a structured group, or the
    /// uncaught failures of one scheduler drain.
    Aggregated,

    // === Host ===
    /// The external driver stopped advancing before the awaited target settled.
    Interrupted,

    // === Faults ===
    /// A task step or deferred callback panicked.
    Panicked,
    /// Internal invariant violation (bug).
    Internal,

    // === Configuration ===
    /// Invalid configuration value.
    Config,

    // === User ===
    /// Error raised by task code.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadySettled | Self::Usage | Self::Config => ErrorCategory::Misuse,
            Self::Cancelled | Self::DeadlineExceeded => ErrorCategory::Cancellation,
            Self::Aggregated => ErrorCategory::Group,
            Self::Interrupted => ErrorCategory::Host,
            Self::Panicked | Self::Internal => ErrorCategory::Fault,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if errors of this kind are fatal regardless of how they
    /// were constructed.
    #[must_use]
    pub const fn is_always_fatal(&self) -> bool {
        matches!(self, Self::Panicked)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Programmer misuse of a primitive.
    Misuse,
    /// Cancellation and deadlines.
    Cancellation,
    /// Aggregated group failures.
    Group,
    /// External driver conditions.
    Host,
    /// Panics and internal bugs.
    Fault,
    /// Errors produced by task code.
    User,
}

/// The main error type for Coopsync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    cancel: Option<CancelReason>,
    failures: Vec<Error>,
    fatal: bool,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            cancel: None,
            failures: Vec::new(),
            fatal: kind.is_always_fatal(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Marks the error as fatal: it should terminate the host rather than be
    /// handled locally.
    #[must_use]
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this is a deadline condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::DeadlineExceeded)
    }

    /// Returns true if this error itself is fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Returns true if this error or any nested sub-failure is fatal.
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.fatal || self.failures.iter().any(Self::has_fatal)
    }

    /// Returns the cancellation reason for [`ErrorKind::Cancelled`] errors.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&CancelReason> {
        self.cancel.as_ref()
    }

    /// Returns the token of the cancellation this error carries, if any.
    #[must_use]
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.cancel.as_ref().map(CancelReason::token)
    }

    /// Returns the sub-failures of an aggregated error, in the order they
    /// were collected. Empty for every other kind.
    #[must_use]
    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    /// Consumes the error and returns its sub-failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<Error> {
        self.failures
    }

    /// Creates the error reported by a second settlement of a cell.
    #[must_use]
    pub fn already_settled() -> Self {
        Self::new(ErrorKind::AlreadySettled).with_message("completion is already settled")
    }

    /// Creates a usage error.
    #[must_use]
    pub fn usage(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage).with_message(detail)
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        let mut err = Self::new(ErrorKind::Cancelled).with_message(reason.to_string());
        err.cancel = Some(reason);
        err
    }

    /// Creates a deadline-exceeded error.
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded).with_message("deadline source fired")
    }

    /// Creates an aggregated error over `failures`.
    #[must_use]
    pub fn aggregated(detail: impl Into<String>, failures: Vec<Error>) -> Self {
        let mut err = Self::new(ErrorKind::Aggregated).with_message(detail);
        err.failures = failures;
        err
    }

    /// Creates the error reported when the driver stopped before the target
    /// settled.
    #[must_use]
    pub fn interrupted(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interrupted).with_message(detail)
    }

    /// Creates a panic error. Always fatal.
    #[must_use]
    pub fn panicked(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked).with_message(detail)
    }

    /// Creates an error originating from task code.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if !self.failures.is_empty() {
            write!(f, " ({} sub-failures", self.failures.len())?;
            for (i, failure) in self.failures.iter().enumerate() {
                let sep = if i == 0 { ": " } else { "; " };
                write!(f, "{sep}{failure}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparsable value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        /// Variable name.
        key: &'static str,
        /// Raw value found in the environment.
        value: String,
        /// What was expected.
        reason: &'static str,
    },
    /// The scheduler name was empty.
    #[error("scheduler name must not be empty")]
    EmptyName,
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CancelKind, CancelReason};
    use std::error::Error as _;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn display_formats_kind_and_message() {
        init_test("display_formats_kind_and_message");
        let err = Error::usage("already running");
        crate::assert_with_log!(
            err.to_string() == "Usage: already running",
            "display",
            "Usage: already running",
            err.to_string()
        );
        crate::test_complete!("display_formats_kind_and_message");
    }

    #[test]
    fn cancelled_error_carries_token() {
        init_test("cancelled_error_carries_token");
        let reason = CancelReason::new(CancelKind::User);
        let token = reason.token();
        let err = Error::cancelled(reason);
        assert!(err.is_cancelled());
        assert_eq!(err.cancel_token(), Some(token));
        assert_eq!(err.category(), ErrorCategory::Cancellation);
        crate::test_complete!("cancelled_error_carries_token");
    }

    #[test]
    fn panics_are_fatal_and_fatality_nests() {
        init_test("panics_are_fatal_and_fatality_nests");
        let panic = Error::panicked("boom");
        assert!(panic.is_fatal());

        let group = Error::aggregated("group", vec![Error::user("a"), panic]);
        assert!(!group.is_fatal());
        assert!(group.has_fatal());

        let benign = Error::aggregated("group", vec![Error::user("a")]);
        assert!(!benign.has_fatal());
        assert!(Error::user("explicit").into_fatal().has_fatal());
        crate::test_complete!("panics_are_fatal_and_fatality_nests");
    }

    #[test]
    fn aggregated_display_lists_failures_in_order() {
        init_test("aggregated_display_lists_failures_in_order");
        let err = Error::aggregated("group", vec![Error::user("a"), Error::user("b")]);
        let text = err.to_string();
        crate::assert_with_log!(
            text == "Aggregated: group (2 sub-failures: User: a; User: b)",
            "aggregate display",
            "Aggregated: group (2 sub-failures: User: a; User: b)",
            text
        );
        assert_eq!(err.into_failures().len(), 2);
        crate::test_complete!("aggregated_display_lists_failures_in_order");
    }

    #[test]
    fn config_error_converts_with_source() {
        init_test("config_error_converts_with_source");
        let err: Error = ConfigError::EmptyName.into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.source().is_some());
        crate::test_complete!("config_error_converts_with_source");
    }
}
