//! Interrupt cause types.
//!
//! Interruption is a first-class protocol: every interrupt request carries a
//! cause describing who asked and why, so a fiber's `Interrupted` outcome can
//! be attributed. Repeated requests merge by severity rather than racing.

use core::fmt;

/// The kind of interrupt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterruptKind {
    /// Explicit interruption requested through a fiber handle.
    Explicit,
    /// The supervising parent fiber reached `Done`.
    ParentDone,
    /// The scope the fiber was attached to closed.
    ScopeClosed,
    /// Runtime shutdown (global scope closing).
    Shutdown,
}

impl InterruptKind {
    /// Returns the severity of this kind; higher severities win when
    /// requests merge.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Explicit => 0,
            Self::ParentDone => 1,
            Self::ScopeClosed => 2,
            Self::Shutdown => 3,
        }
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::ParentDone => write!(f, "parent done"),
            Self::ScopeClosed => write!(f, "scope closed"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Why a fiber was (or is being) interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptCause {
    /// The kind of interruption.
    pub kind: InterruptKind,
    /// Optional static message for diagnostics.
    pub message: Option<&'static str>,
}

impl InterruptCause {
    /// Creates a cause with the given kind and no message.
    #[must_use]
    pub const fn new(kind: InterruptKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates an explicit cause with a message.
    #[must_use]
    pub const fn explicit(message: &'static str) -> Self {
        Self {
            kind: InterruptKind::Explicit,
            message: Some(message),
        }
    }

    /// Creates a parent-done cause.
    #[must_use]
    pub const fn parent_done() -> Self {
        Self::new(InterruptKind::ParentDone)
    }

    /// Creates a scope-closed cause.
    #[must_use]
    pub const fn scope_closed() -> Self {
        Self::new(InterruptKind::ScopeClosed)
    }

    /// Creates a shutdown cause.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(InterruptKind::Shutdown)
    }

    /// Merges another cause into this one, keeping the more severe kind.
    ///
    /// For equal kinds a present message beats an absent one, and the
    /// lexicographically smaller message wins so merges stay deterministic
    /// regardless of request order. Returns true if anything changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind > self.kind {
            self.kind = other.kind;
            self.message = other.message;
            return true;
        }
        if other.kind < self.kind {
            return false;
        }
        match (self.message, other.message) {
            (None, Some(msg)) => {
                self.message = Some(msg);
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.message = Some(candidate);
                true
            }
            _ => false,
        }
    }

    /// Returns true if this cause came from runtime shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, InterruptKind::Shutdown)
    }
}

impl Default for InterruptCause {
    fn default() -> Self {
        Self::new(InterruptKind::Explicit)
    }
}

impl fmt::Display for InterruptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_strictly_ordered() {
        assert!(InterruptKind::Explicit.severity() < InterruptKind::ParentDone.severity());
        assert!(InterruptKind::ParentDone.severity() < InterruptKind::ScopeClosed.severity());
        assert!(InterruptKind::ScopeClosed.severity() < InterruptKind::Shutdown.severity());
    }

    #[test]
    fn strengthen_keeps_more_severe_kind() {
        let mut cause = InterruptCause::explicit("stop");
        assert!(cause.strengthen(&InterruptCause::scope_closed()));
        assert_eq!(cause.kind, InterruptKind::ScopeClosed);
        assert_eq!(cause.message, None);

        assert!(!cause.strengthen(&InterruptCause::parent_done()));
        assert_eq!(cause.kind, InterruptKind::ScopeClosed);
    }

    #[test]
    fn strengthen_is_idempotent() {
        let mut cause = InterruptCause::shutdown();
        assert!(!cause.strengthen(&InterruptCause::shutdown()));
        assert_eq!(cause.kind, InterruptKind::Shutdown);
    }

    #[test]
    fn equal_kind_picks_deterministic_message() {
        let mut cause = InterruptCause::explicit("b");
        assert!(cause.strengthen(&InterruptCause::explicit("a")));
        assert_eq!(cause.message, Some("a"));
        assert!(!cause.strengthen(&InterruptCause::explicit("c")));
        assert_eq!(cause.message, Some("a"));
    }

    #[test]
    fn display_includes_message() {
        let cause = InterruptCause::explicit("handle dropped");
        assert_eq!(cause.to_string(), "explicit: handle dropped");
        assert_eq!(InterruptCause::shutdown().to_string(), "shutdown");
    }
}
