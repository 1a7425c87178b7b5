//! Shared helpers for unit and integration tests.
//!
//! - Consistent tracing-based logging initialization
//! - Executor constructors
//! - Small assertion helpers for outcomes

use crate::error::Error;
use crate::runtime::Executor;
use crate::types::Outcome;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initializes test logging with trace-level output.
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initializes test logging with a custom level. First call wins.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Creates a deterministic executor with logging initialized.
#[must_use]
pub fn test_executor() -> Executor {
    init_test_logging();
    Executor::new()
}

/// Unwraps a `Success` outcome or panics with a readable message.
#[track_caller]
pub fn expect_success<T>(outcome: Outcome<T>) -> T {
    match outcome {
        Outcome::Success(value) => value,
        Outcome::Failure(e) => panic!("expected Success, got Failure: {e}"),
        Outcome::Interrupted(c) => panic!("expected Success, got Interrupted: {c}"),
    }
}

/// Asserts that an outcome is `Interrupted` and returns its cause.
#[track_caller]
pub fn expect_interrupted<T>(outcome: Outcome<T>) -> crate::types::InterruptCause {
    match outcome {
        Outcome::Interrupted(cause) => cause,
        Outcome::Success(_) => panic!("expected Interrupted, got Success"),
        Outcome::Failure(e) => panic!("expected Interrupted, got Failure: {e}"),
    }
}

/// Convenience `Ok` with the crate error type, for fiber bodies in tests.
pub fn ok<T>(value: T) -> Result<T, Error> {
    Ok(value)
}
