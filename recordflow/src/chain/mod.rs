//! Per-record enrichment.
//!
//! [`EnrichmentStageChain`] runs the configured stages strictly in order.
//! Each stage sees the fetched record overlaid with everything earlier
//! stages produced, so later prompts can build on earlier answers. A stage
//! whose completion fails contributes its fallback values and the chain
//! moves on; only cancellation stops a record part way.

mod chain_tests;

use crate::cancellation::CancellationToken;
use crate::completion::CompletionClient;
use crate::core::{CompletenessPolicy, FieldMap, Record};
use crate::errors::RecordflowError;
use crate::observability::SpanTimer;
use crate::stages::{Stage, StageInput};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a stage's fields were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Every output was parsed from the answer.
    Parsed,
    /// Some outputs were parsed, the rest are fallbacks.
    Partial,
    /// Every output is a fallback.
    Fallback,
    /// Derived from existing fields without a completion.
    Local,
    /// Not run because none of its outputs were missing.
    Skipped,
}

impl StageStatus {
    /// Returns true if any output of the stage is a fallback value.
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        matches!(self, Self::Partial | Self::Fallback)
    }
}

/// What one stage did for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage: String,
    /// How the fields were obtained.
    pub status: StageStatus,
    /// Why fallbacks were used, if they were.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Fields the stage contributed.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Wall time of the stage.
    pub duration_ms: f64,
}

impl StageOutcome {
    fn new(stage: &str, status: StageStatus) -> Self {
        Self {
            stage: stage.to_string(),
            status,
            reason: None,
            fields: Vec::new(),
            duration_ms: 0.0,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Fields produced for one record, plus a per-stage account of how.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentResult {
    /// Final values of every field the chain produced.
    pub fields: FieldMap,
    /// One entry per configured stage, in execution order.
    pub stage_outcomes: Vec<StageOutcome>,
}

impl EnrichmentResult {
    /// Names of stages that used at least one fallback value.
    #[must_use]
    pub fn fallback_stages(&self) -> Vec<String> {
        self.stage_outcomes
            .iter()
            .filter(|o| o.status.used_fallback())
            .map(|o| o.stage.clone())
            .collect()
    }

    /// Names of the produced fields.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Returns true if nothing was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ordered stages sharing one completion client.
#[derive(Debug, Clone)]
pub struct EnrichmentStageChain {
    stages: Vec<Arc<dyn Stage>>,
    client: Arc<CompletionClient>,
    missing_only: Option<CompletenessPolicy>,
}

impl EnrichmentStageChain {
    /// Creates a chain that runs every stage and keeps every output.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Stage>>, client: Arc<CompletionClient>) -> Self {
        Self {
            stages,
            client,
            missing_only: None,
        }
    }

    /// Restricts the chain to fields `policy` reports as missing.
    ///
    /// Stages with no missing output are skipped, and outputs that are
    /// already present on the record are not replaced.
    #[must_use]
    pub fn with_missing_only(mut self, policy: CompletenessPolicy) -> Self {
        self.missing_only = Some(policy);
        self
    }

    /// The configured stages.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Runs every stage for `record`.
    ///
    /// # Errors
    ///
    /// `RecordflowError::Cancelled` if `cancel` fires while a completion is
    /// pending. Completion failures are not errors; they yield fallbacks.
    pub async fn run(
        &self,
        record: &Record,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentResult, RecordflowError> {
        let wanted = self
            .missing_only
            .as_ref()
            .map(|policy| policy.missing_fields(&record.fields));
        let mut produced = FieldMap::new();
        let mut outcomes = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let timer = SpanTimer::start(stage.name());
            let outputs: Vec<String> = match &wanted {
                Some(missing) => stage
                    .outputs()
                    .into_iter()
                    .filter(|o| missing.contains(o))
                    .collect(),
                None => stage.outputs(),
            };

            if outputs.is_empty() {
                debug!(record_id = %record.id(), stage = stage.name(), "Stage skipped; outputs present");
                outcomes.push(StageOutcome::new(stage.name(), StageStatus::Skipped));
                continue;
            }

            let (additions, mut outcome) = self
                .run_stage(stage.as_ref(), record, &produced, &outputs, cancel)
                .await?;
            outcome.fields = additions.keys().cloned().collect();
            outcome.duration_ms = timer.finish();
            produced.extend(additions);
            outcomes.push(outcome);
        }

        info!(
            record_id = %record.id(),
            fields = produced.len(),
            fallbacks = outcomes.iter().filter(|o| o.status.used_fallback()).count(),
            "Enrichment finished"
        );

        Ok(EnrichmentResult {
            fields: produced,
            stage_outcomes: outcomes,
        })
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        record: &Record,
        produced: &FieldMap,
        outputs: &[String],
        cancel: &CancellationToken,
    ) -> Result<(FieldMap, StageOutcome), RecordflowError> {
        let input = StageInput::new(record, produced);
        let keep = |map: FieldMap| -> FieldMap {
            map.into_iter()
                .filter(|(name, value)| outputs.contains(name) && value.is_filled())
                .collect()
        };

        if let Some(local) = stage.resolve_locally(&input) {
            debug!(record_id = %record.id(), stage = stage.name(), "Resolved without completion");
            return Ok((keep(local), StageOutcome::new(stage.name(), StageStatus::Local)));
        }

        let prompt = stage.build_prompt(&input);
        let raw = match self.client.complete(&prompt, stage.sampling(), cancel).await {
            Ok(raw) => raw,
            Err(e) if e.cancelled => {
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                return Err(RecordflowError::Cancelled(reason));
            }
            Err(e) => {
                warn!(
                    record_id = %record.id(),
                    stage = stage.name(),
                    attempts = e.attempts,
                    error = %e.message,
                    "Completion failed; using fallback values"
                );
                let outcome = StageOutcome::new(stage.name(), StageStatus::Fallback).with_reason(e.to_string());
                return Ok((keep(stage.fallback(&input)), outcome));
            }
        };

        let mut fields = keep(stage.parse(&raw, &input));
        let unparsed: Vec<&String> = outputs.iter().filter(|o| !fields.contains_key(*o)).collect();
        if unparsed.is_empty() {
            return Ok((fields, StageOutcome::new(stage.name(), StageStatus::Parsed)));
        }

        let status = if fields.is_empty() {
            StageStatus::Fallback
        } else {
            StageStatus::Partial
        };
        let reason = format!(
            "could not parse {}",
            unparsed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
        warn!(record_id = %record.id(), stage = stage.name(), %reason, "Using fallback values");
        for (name, value) in keep(stage.fallback(&input)) {
            fields.entry(name).or_insert(value);
        }
        Ok((fields, StageOutcome::new(stage.name(), status).with_reason(reason)))
    }
}
