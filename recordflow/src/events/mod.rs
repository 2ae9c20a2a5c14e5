//! Pass lifecycle events.
//!
//! The reconciler reports what it does through an [`EventSink`] in addition
//! to its `tracing` output, so embedding applications and tests can observe a
//! pass without parsing logs.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};

/// An event emitted during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PassEvent {
    /// The pass acquired its credential and is about to fetch.
    #[serde(rename = "pass.started")]
    PassStarted {
        /// Unique id of the pass.
        pass_id: String,
        /// Effective limit on incomplete records.
        limit: Option<usize>,
        /// Concurrent record workers.
        workers: usize,
    },
    /// The snapshot was fetched and partitioned.
    #[serde(rename = "pass.fetched")]
    PassFetched {
        /// Unique id of the pass.
        pass_id: String,
        /// Records in the snapshot.
        total: usize,
        /// Records needing enrichment.
        incomplete: usize,
        /// Incomplete records this pass will process.
        selected: usize,
    },
    /// A complete record was left untouched.
    #[serde(rename = "record.skipped")]
    RecordSkipped {
        /// Skipped record.
        record_id: String,
    },
    /// A stage contributed its fallback values.
    #[serde(rename = "stage.fallback")]
    StageFallback {
        /// Record being enriched.
        record_id: String,
        /// Stage that fell back.
        stage: String,
        /// Completion error or parse failure.
        reason: String,
    },
    /// A record was written back.
    #[serde(rename = "record.succeeded")]
    RecordSucceeded {
        /// Written record.
        record_id: String,
        /// The write needed a credential refresh.
        auth_retried: bool,
        /// Number of fields written.
        fields: usize,
    },
    /// A record failed enrichment or write-back.
    #[serde(rename = "record.failed")]
    RecordFailed {
        /// Failed record.
        record_id: String,
        /// Rendered error.
        error: String,
    },
    /// The pass produced its report.
    #[serde(rename = "pass.completed")]
    PassCompleted {
        /// Unique id of the pass.
        pass_id: String,
        /// Records written.
        succeeded: usize,
        /// Records that failed.
        failed: usize,
        /// Records already complete.
        skipped: usize,
        /// Incomplete records left for a later pass.
        deferred: usize,
        /// The pass stopped early.
        cancelled: bool,
    },
}

impl PassEvent {
    /// Dotted event type, e.g. `"record.failed"`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PassStarted { .. } => "pass.started",
            Self::PassFetched { .. } => "pass.fetched",
            Self::RecordSkipped { .. } => "record.skipped",
            Self::StageFallback { .. } => "stage.fallback",
            Self::RecordSucceeded { .. } => "record.succeeded",
            Self::RecordFailed { .. } => "record.failed",
            Self::PassCompleted { .. } => "pass.completed",
        }
    }

    /// The record this event concerns, if any.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::RecordSkipped { record_id }
            | Self::StageFallback { record_id, .. }
            | Self::RecordSucceeded { record_id, .. }
            | Self::RecordFailed { record_id, .. } => Some(record_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PassEvent::RecordSkipped {
            record_id: "rec1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "record.skipped");
        assert_eq!(json["record_id"], "rec1");
        assert_eq!(event.event_type(), "record.skipped");
    }

    #[test]
    fn test_record_id_accessor() {
        let event = PassEvent::PassCompleted {
            pass_id: "p".into(),
            succeeded: 1,
            failed: 0,
            skipped: 2,
            deferred: 0,
            cancelled: false,
        };
        assert!(event.record_id().is_none());
        let event = PassEvent::RecordFailed {
            record_id: "r".into(),
            error: "boom".into(),
        };
        assert_eq!(event.record_id(), Some("r"));
    }
}
