//! Per-record processing states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a record is in its single pass through the reconciler.
///
/// ```text
/// Fetched -> Skipped
/// Fetched -> Enriching -> Enriched -> Writing -> Succeeded
///                                     Writing -> WriteFailedRetried -> Succeeded | Failed
///                                     Writing -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Fetched from the store, not yet classified.
    #[default]
    Fetched,
    /// Already complete; never enriched or written.
    Skipped,
    /// Stages are running.
    Enriching,
    /// All stages have produced values (possibly fallbacks).
    Enriched,
    /// Write-back in flight.
    Writing,
    /// First write hit an auth failure; credential refreshed, retrying once.
    WriteFailedRetried,
    /// Written back successfully.
    Succeeded,
    /// Enrichment or write-back failed.
    Failed,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetched => write!(f, "fetched"),
            Self::Skipped => write!(f, "skipped"),
            Self::Enriching => write!(f, "enriching"),
            Self::Enriched => write!(f, "enriched"),
            Self::Writing => write!(f, "writing"),
            Self::WriteFailedRetried => write!(f, "write_failed_retried"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RecordState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use RecordState::{
            Enriched, Enriching, Failed, Fetched, Skipped, Succeeded, WriteFailedRetried, Writing,
        };
        matches!(
            (self, next),
            (Fetched, Skipped | Enriching)
                | (Enriching, Enriched | Failed)
                | (Enriched, Writing)
                | (Writing, Succeeded | WriteFailedRetried | Failed)
                | (WriteFailedRetried, Succeeded | Failed)
        )
    }

    /// Moves to `next`, returning the new state, or `None` for an illegal edge.
    #[must_use]
    pub fn advance(self, next: Self) -> Option<Self> {
        self.can_transition_to(next).then_some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(RecordState::Skipped.to_string(), "skipped");
        assert_eq!(RecordState::WriteFailedRetried.to_string(), "write_failed_retried");
    }

    #[test]
    fn test_terminal_states() {
        assert!(RecordState::Skipped.is_terminal());
        assert!(RecordState::Succeeded.is_terminal());
        assert!(RecordState::Failed.is_terminal());
        assert!(!RecordState::Writing.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        let state = RecordState::Fetched
            .advance(RecordState::Enriching)
            .and_then(|s| s.advance(RecordState::Enriched))
            .and_then(|s| s.advance(RecordState::Writing))
            .and_then(|s| s.advance(RecordState::WriteFailedRetried))
            .and_then(|s| s.advance(RecordState::Succeeded));
        assert_eq!(state, Some(RecordState::Succeeded));
    }

    #[test]
    fn test_no_state_is_revisited() {
        assert!(!RecordState::Succeeded.can_transition_to(RecordState::Writing));
        assert!(!RecordState::Skipped.can_transition_to(RecordState::Enriching));
        assert!(!RecordState::WriteFailedRetried.can_transition_to(RecordState::WriteFailedRetried));
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&RecordState::Succeeded).unwrap();
        assert_eq!(json, r#""succeeded""#);
    }
}
