//! Dial request errors.

use std::time::Duration;

/// Why a single attempt did not produce a connection.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("dial failed: {0}")]
    Dial(E),

    #[error("dial timed out after {0:?}")]
    TimedOut(Duration),

    #[error("dial cancelled before it started")]
    Cancelled,
}

impl<E> AttemptError<E> {
    pub fn as_dial(&self) -> Option<&E> {
        match self {
            Self::Dial(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A failed attempt, tagged with the position of its address in the input.
#[derive(Debug, thiserror::Error)]
#[error("address #{index}: {error}")]
pub struct AttemptFailure<E> {
    pub index: usize,
    pub error: AttemptError<E>,
}

#[derive(Debug, thiserror::Error)]
pub enum DialError<E> {
    /// The address list was empty. Reported before the allocator is asked.
    #[error("No candidate addresses to dial")]
    NoAddresses,

    #[error("No dial permits available")]
    NoPermitsAvailable,

    /// Every attempt failed. Causes are in the order the attempts finished.
    #[error("All {} dial attempts failed", .causes.len())]
    AllDialsFailed { causes: Vec<AttemptFailure<E>> },

    #[error("Dial request was cancelled")]
    Cancelled,
}

impl<E> DialError<E> {
    /// Per-address causes, empty unless every attempt failed.
    pub fn causes(&self) -> &[AttemptFailure<E>] {
        match self {
            Self::AllDialsFailed { causes } => causes,
            _ => &[],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Invalid value in a `DIALRACE_*` environment variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}
