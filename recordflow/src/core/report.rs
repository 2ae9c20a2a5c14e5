//! Per-pass processing report.

use super::status::RecordState;
use crate::errors::ErrorInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Outcome of one record that the reconciler attempted to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Record identifier.
    pub record_id: String,
    /// Human-readable label (usually the record's display name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Terminal state reached in this pass.
    pub state: RecordState,
    /// Error details for failed records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Stages that contributed fallback values instead of parsed output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_stages: Vec<String>,
    /// Fields written back to the store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub written_fields: Vec<String>,
    /// Whether the write needed a credential refresh and a second attempt.
    #[serde(default)]
    pub auth_retried: bool,
    /// Wall time spent on this record.
    pub duration_ms: f64,
}

impl RecordOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            label: None,
            state: RecordState::Succeeded,
            error: None,
            fallback_stages: Vec::new(),
            written_fields: Vec::new(),
            auth_retried: false,
            duration_ms: 0.0,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(record_id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            record_id: record_id.into(),
            label: None,
            state: RecordState::Failed,
            error: Some(error),
            fallback_stages: Vec::new(),
            written_fields: Vec::new(),
            auth_retried: false,
            duration_ms: 0.0,
        }
    }

    /// Sets the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.is_empty() {
            self.label = Some(label);
        }
        self
    }

    /// Sets the stages that fell back.
    #[must_use]
    pub fn with_fallback_stages(mut self, stages: Vec<String>) -> Self {
        self.fallback_stages = stages;
        self
    }

    /// Sets the fields written back.
    #[must_use]
    pub fn with_written_fields(mut self, fields: Vec<String>) -> Self {
        self.written_fields = fields;
        self
    }

    /// Marks the outcome as having needed an auth retry.
    #[must_use]
    pub fn with_auth_retried(mut self, retried: bool) -> Self {
        self.auth_retried = retried;
        self
    }

    /// Sets the elapsed time.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if the record was written successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == RecordState::Succeeded
    }

    /// Label if known, else the record id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.record_id)
    }
}

/// The sole observable output of a pass besides the store mutations.
///
/// Produced by [`ReportBuilder::finish`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// Unique id of the pass.
    pub pass_id: String,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: DateTime<Utc>,
    /// Records fetched from the store.
    pub total: usize,
    /// Records written successfully.
    pub succeeded: usize,
    /// Records that failed enrichment or write-back.
    pub failed: usize,
    /// Records already complete.
    pub skipped: usize,
    /// Incomplete records left for a later pass (limit or cancellation).
    pub deferred: usize,
    /// Cancellation reason, if the pass stopped early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<String>,
    outcomes: Vec<RecordOutcome>,
}

impl ProcessingReport {
    /// Per-record outcomes in processing order.
    #[must_use]
    pub fn outcomes(&self) -> &[RecordOutcome] {
        &self.outcomes
    }

    /// Failed outcomes in processing order.
    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Number of records processed (succeeded + failed).
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Returns true if no processed record failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled.is_none()
    }

    /// Wall time of the pass in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Renders a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Pass {} finished in {} ms", self.pass_id, self.duration_ms());
        let _ = writeln!(out, "- total records: {}", self.total);
        let _ = writeln!(out, "- succeeded: {}", self.succeeded);
        let _ = writeln!(out, "- failed: {}", self.failed);
        let _ = writeln!(out, "- skipped (already complete): {}", self.skipped);
        if self.deferred > 0 {
            let _ = writeln!(out, "- deferred to next pass: {}", self.deferred);
        }
        if let Some(ref reason) = self.cancelled {
            let _ = writeln!(out, "- cancelled: {reason}");
        }
        if self.failed > 0 {
            let _ = writeln!(out, "\nFailed records:");
            for outcome in self.failures() {
                let message = outcome
                    .error
                    .as_ref()
                    .map_or("unknown error", |e| e.message.as_str());
                let _ = writeln!(out, "- {}: {}", outcome.display_name(), message);
            }
        }
        out
    }
}

/// Accumulates outcomes while a pass runs.
#[derive(Debug)]
pub struct ReportBuilder {
    pass_id: String,
    started_at: DateTime<Utc>,
    total: usize,
    skipped: usize,
    deferred: usize,
    cancelled: Option<String>,
    outcomes: Vec<RecordOutcome>,
}

impl ReportBuilder {
    /// Starts a report for a new pass.
    #[must_use]
    pub fn new(pass_id: impl Into<String>) -> Self {
        Self {
            pass_id: pass_id.into(),
            started_at: Utc::now(),
            total: 0,
            skipped: 0,
            deferred: 0,
            cancelled: None,
            outcomes: Vec::new(),
        }
    }

    /// Records the fetch size and how many records were already complete.
    pub fn set_partition(&mut self, total: usize, skipped: usize) {
        self.total = total;
        self.skipped = skipped;
    }

    /// Adds records left for a later pass.
    pub fn add_deferred(&mut self, count: usize) {
        self.deferred += count;
    }

    /// Appends one processed record.
    pub fn push(&mut self, outcome: RecordOutcome) {
        self.outcomes.push(outcome);
    }

    /// Notes that the pass stopped early.
    pub fn mark_cancelled(&mut self, reason: impl Into<String>) {
        if self.cancelled.is_none() {
            self.cancelled = Some(reason.into());
        }
    }

    /// Number of outcomes recorded so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    /// Finalizes the report.
    #[must_use]
    pub fn finish(self) -> ProcessingReport {
        let succeeded = self.outcomes.iter().filter(|o| o.is_success()).count();
        let failed = self.outcomes.len() - succeeded;
        ProcessingReport {
            pass_id: self.pass_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            total: self.total,
            succeeded,
            failed,
            skipped: self.skipped,
            deferred: self.deferred,
            cancelled: self.cancelled,
            outcomes: self.outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_counts() {
        let mut builder = ReportBuilder::new("pass-1");
        builder.set_partition(5, 2);
        builder.push(RecordOutcome::succeeded("a").with_label("Alpha"));
        builder.push(RecordOutcome::failed(
            "b",
            ErrorInfo::new("WriteError", "permission denied"),
        ));
        builder.add_deferred(1);
        let report = builder.finish();

        assert_eq!(report.total, 5);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.processed(), 2);
        assert!(!report.is_clean());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_summary_lists_failures() {
        let mut builder = ReportBuilder::new("pass-2");
        builder.set_partition(1, 0);
        builder.push(
            RecordOutcome::failed("b", ErrorInfo::new("WriteError", "field type mismatch"))
                .with_label("Beta"),
        );
        let summary = builder.finish().summary();
        assert!(summary.contains("- failed: 1"));
        assert!(summary.contains("Beta: field type mismatch"));
    }

    #[test]
    fn test_first_cancel_reason_wins() {
        let mut builder = ReportBuilder::new("pass-3");
        builder.mark_cancelled("ctrl-c");
        builder.mark_cancelled("second");
        assert_eq!(builder.finish().cancelled.as_deref(), Some("ctrl-c"));
    }

    #[test]
    fn test_report_serializes() {
        let mut builder = ReportBuilder::new("pass-4");
        builder.push(RecordOutcome::succeeded("a").with_written_fields(vec!["标题".into()]));
        let report = builder.finish();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["outcomes"][0]["written_fields"][0], "标题");
        assert!(json.get("cancelled").is_none());
    }
}
