//! Fiber outcome type.
//!
//! The outcome of a fiber is a three-valued tag:
//!
//! - `Success(value)`: the computation finished with a value
//! - `Failure(cause)`: the computation raised a domain error (or panicked)
//! - `Interrupted(cause)`: the fiber was cancelled before natural completion
//!
//! Outcomes form a severity order `Success < Failure < Interrupted`; when
//! several outcomes are summarized (diagnostics, aggregation), the worst one
//! wins.

use super::interrupt::InterruptCause;
use crate::error::Error;
use core::fmt;

/// Payload from a caught panic, transported across fiber boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from a raw panic payload.
    ///
    /// `&str` and `String` payloads keep their text; anything else becomes a
    /// generic marker.
    #[must_use]
    pub fn from_any(payload: &Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The result of a fiber once it reaches `Done`.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The computation finished with a value.
    Success(T),
    /// The computation raised an error.
    Failure(Error),
    /// The fiber was interrupted before natural completion.
    Interrupted(InterruptCause),
}

/// The type-erased outcome stored on fiber records.
pub type FiberOutcome = Outcome<()>;

impl<T> Outcome<T> {
    /// Returns the severity of this outcome (0 = Success, 2 = Interrupted).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Success(_) => 0,
            Self::Failure(_) => 1,
            Self::Interrupted(_) => 2,
        }
    }

    /// Returns true if this is `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this is `Failure`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if this is `Interrupted`.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Success(v) => Outcome::Success(f(v)),
            Self::Failure(e) => Outcome::Failure(e),
            Self::Interrupted(c) => Outcome::Interrupted(c),
        }
    }

    /// Discards the success value, keeping the tag.
    #[must_use]
    pub fn erased(&self) -> FiberOutcome {
        match self {
            Self::Success(_) => Outcome::Success(()),
            Self::Failure(e) => Outcome::Failure(e.clone()),
            Self::Interrupted(c) => Outcome::Interrupted(c.clone()),
        }
    }

    /// Converts to a `Result`, folding interruption into the error channel.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(e) => Err(e),
            Self::Interrupted(c) => Err(Error::Interrupted(c)),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is not `Success`.
    #[track_caller]
    pub fn unwrap(self) -> T {
        match self {
            Self::Success(v) => v,
            Self::Failure(e) => panic!("called `Outcome::unwrap()` on a `Failure`: {e}"),
            Self::Interrupted(c) => panic!("called `Outcome::unwrap()` on an `Interrupted`: {c}"),
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Success(v) => v,
            _ => default,
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(Error::Interrupted(cause)) => Self::Interrupted(cause),
            Err(e) => Self::Failure(e),
        }
    }
}

/// Returns the worse of two outcomes by severity; the first wins ties.
pub fn worst_outcome<T>(a: Outcome<T>, b: Outcome<T>) -> Outcome<T> {
    if a.severity() >= b.severity() {
        a
    } else {
        b
    }
}
