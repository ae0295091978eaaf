//! Terminal result of a task or completion cell.

use crate::error::Error;
use crate::types::CancelReason;

/// Three-valued outcome: success, failure, or cancellation.
///
/// Cancellation is kept apart from failure so that structured groups can let
/// a child's own cancellation pass through without counting it as a failure.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Completed with a value.
    Ok(T),
    /// Completed with an error.
    Err(Error),
    /// Cancelled before completing.
    Cancelled(CancelReason),
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true for [`Outcome::Err`].
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true for [`Outcome::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Converts into a `Result`, mapping cancellation to a cancelled error.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
            Self::Cancelled(reason) => Err(Error::cancelled(reason)),
        }
    }

    /// Splits a task body's result into an outcome. Cancelled errors become
    /// [`Outcome::Cancelled`].
    pub fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => match e.cancel_reason() {
                Some(reason) if e.is_cancelled() => Self::Cancelled(reason.clone()),
                _ => Self::Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;

    #[test]
    fn cancelled_errors_become_cancelled_outcomes() {
        let reason = CancelReason::new(CancelKind::User);
        let outcome: Outcome<()> = Outcome::from_result(Err(Error::cancelled(reason.clone())));
        assert!(outcome.is_cancelled());
        let back = outcome.into_result().unwrap_err();
        assert_eq!(back.cancel_token(), Some(reason.token()));
    }

    #[test]
    fn failures_stay_failures() {
        let outcome: Outcome<u8> = Outcome::from_result(Err(Error::user("bad")));
        assert!(outcome.is_err());
        assert!(Outcome::from_result(Ok(1u8)).is_ok());
    }
}
