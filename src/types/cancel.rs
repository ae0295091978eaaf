//! Cancellation reasons.
//!
//! Every cancellation request carries a [`CancelReason`]: a unique
//! [`CancelToken`], a [`CancelKind`] saying who asked, and optionally a
//! payload error. The payload is how a callback scope smuggles a typed
//! failure (for example a deadline) through the cancellation channel and
//! turns it back into that failure when the task unwinds to the scope.

use crate::error::Error;
use crate::types::CancelToken;
use core::fmt;

/// Who requested a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit request through a handle or [`Completion::cancel`](crate::Completion::cancel).
    User,
    /// Injected by a callback scope (timeouts included).
    Injected,
    /// A structured group cancelled its owner after a child failed.
    ChildFailed,
    /// A structured group cancelled a sibling after another child failed or
    /// the group body exited with an error.
    Sibling,
    /// The scheduler shut down.
    Shutdown,
}

impl CancelKind {
    /// Short lowercase label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Injected => "injected",
            Self::ChildFailed => "child-failed",
            Self::Sibling => "sibling",
            Self::Shutdown => "shutdown",
        }
    }
}

/// The reason attached to a cancellation.
#[derive(Debug, Clone)]
pub struct CancelReason {
    token: CancelToken,
    kind: CancelKind,
    message: Option<String>,
    payload: Option<Box<Error>>,
}

impl CancelReason {
    /// Creates a reason with a fresh token.
    #[must_use]
    pub fn new(kind: CancelKind) -> Self {
        Self::with_token(CancelToken::fresh(), kind)
    }

    /// Creates a reason with a caller-chosen token.
    #[must_use]
    pub fn with_token(token: CancelToken, kind: CancelKind) -> Self {
        Self {
            token,
            kind,
            message: None,
            payload: None,
        }
    }

    /// Creates a user cancellation with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(CancelKind::User).with_message(message)
    }

    /// Adds a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches the error that caused this cancellation.
    #[must_use]
    pub fn with_payload(mut self, payload: Error) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Returns the unique token of this request.
    #[must_use]
    pub const fn token(&self) -> CancelToken {
        self.token
    }

    /// Returns who requested the cancellation.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the payload error, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&Error> {
        self.payload.as_deref()
    }

    /// Consumes the reason and returns its payload error.
    #[must_use]
    pub fn into_payload(self) -> Option<Error> {
        self.payload.map(|p| *p)
    }
}

impl PartialEq for CancelReason {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for CancelReason {}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.kind.as_str(), self.token)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " caused by {payload}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_token_identity() {
        let a = CancelReason::user("stop");
        let same = a.clone().with_message("different text");
        let other = CancelReason::user("stop");
        assert_eq!(a, same);
        assert_ne!(a, other);
    }

    #[test]
    fn payload_round_trips() {
        let reason = CancelReason::new(CancelKind::Injected).with_payload(Error::deadline_exceeded());
        assert!(reason.payload().is_some_and(Error::is_timeout));
        assert!(reason.to_string().starts_with("injected"));
        assert!(reason.into_payload().is_some_and(|e| e.is_timeout()));
    }
}
