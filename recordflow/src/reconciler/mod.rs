//! The reconciliation pass.
//!
//! One call to [`Reconciler::run_pass`] acquires a credential, snapshots the
//! table, partitions records by the completeness policy, enriches up to
//! `limit` incomplete records and writes each result back. Configuration
//! and listing failures end the pass with an error; everything after the
//! snapshot is isolated per record and lands in the report.

mod pacing;
mod writer;

pub use pacing::Pacer;
pub use writer::{RecordWriter, WriteReceipt};

use crate::auth::CredentialBroker;
use crate::cancellation::CancellationToken;
use crate::chain::EnrichmentStageChain;
use crate::config::PassConfig;
use crate::core::{CompletenessPolicy, ProcessingReport, Record, RecordOutcome, RecordState, ReportBuilder};
use crate::errors::{ErrorInfo, RecordflowError};
use crate::events::{EventSink, NoOpEventSink, PassEvent};
use crate::observability::SpanTimer;
use crate::store::{PagedReader, ReaderConfig, TableRef, TableStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

fn advance(record_id: &str, from: RecordState, to: RecordState) -> RecordState {
    match from.advance(to) {
        Some(next) => {
            trace!(record_id, from = %from, to = %to, "Record state");
            next
        }
        None => {
            warn!(record_id, from = %from, to = %to, "Unexpected record state transition");
            to
        }
    }
}

/// Orchestrates one pass over a table.
pub struct Reconciler {
    broker: Arc<CredentialBroker>,
    reader: PagedReader,
    writer: RecordWriter,
    table: TableRef,
    chain: EnrichmentStageChain,
    policy: CompletenessPolicy,
    config: PassConfig,
    label_field: Option<String>,
    pacer: Pacer,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl Reconciler {
    /// Creates a reconciler with default pass settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn TableStore>,
        broker: Arc<CredentialBroker>,
        reader_config: ReaderConfig,
        table: TableRef,
        chain: EnrichmentStageChain,
        policy: CompletenessPolicy,
    ) -> Self {
        let config = PassConfig::default();
        let label_field = reader_config.identity_field.clone();
        Self {
            reader: PagedReader::new(store.clone(), broker.clone(), reader_config),
            writer: RecordWriter::new(store, broker.clone(), table.clone()),
            broker,
            table,
            chain,
            policy,
            pacer: Pacer::new(config.record_delay()),
            config,
            label_field,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Applies pass settings.
    ///
    /// `missing_only` switches the chain to missing-field mode unless
    /// `force_all` is also set.
    #[must_use]
    pub fn with_config(mut self, config: PassConfig) -> Self {
        if config.missing_only && !config.force_all {
            self.chain = self.chain.with_missing_only(self.policy.clone());
        }
        self.pacer = Pacer::new(config.record_delay());
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares a cancellation token with the caller.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that stops the pass between records.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// The active pass settings.
    #[must_use]
    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    /// Runs one pass.
    ///
    /// `limit` caps how many incomplete records are processed, in fetch
    /// order; `None` falls back to the configured limit. The remainder is
    /// reported as deferred and picked up by a later pass.
    ///
    /// # Errors
    ///
    /// `Configuration` if no credential can be configured and `Upstream` if
    /// listing fails. Per-record failures are reported, not returned.
    pub async fn run_pass(&self, limit: Option<usize>) -> Result<ProcessingReport, RecordflowError> {
        let pass_id = Uuid::new_v4().to_string();
        let limit = limit.or(self.config.limit);
        let workers = self.config.workers.max(1);
        let timer = SpanTimer::start("pass");
        let mut report = ReportBuilder::new(pass_id.clone());

        info!(pass_id = %pass_id, table = %self.table, ?limit, workers, "Pass started");
        self.events
            .emit(PassEvent::PassStarted {
                pass_id: pass_id.clone(),
                limit,
                workers,
            })
            .await;

        self.broker.acquire().await?;
        let records = self.reader.fetch_all(&self.table).await?;

        let mut incomplete = Vec::new();
        let mut skipped = 0usize;
        for record in &records {
            if self.config.force_all || !self.policy.is_complete(&record.fields) {
                incomplete.push(record);
            } else {
                skipped += 1;
                let state = advance(record.id(), RecordState::Fetched, RecordState::Skipped);
                debug!(record_id = %record.id(), %state, "Record already complete");
                self.events
                    .emit(PassEvent::RecordSkipped {
                        record_id: record.id().to_string(),
                    })
                    .await;
            }
        }

        let selected = limit.map_or(incomplete.len(), |n| n.min(incomplete.len()));
        report.set_partition(records.len(), skipped);
        report.add_deferred(incomplete.len() - selected);
        info!(
            total = records.len(),
            complete = skipped,
            incomplete = incomplete.len(),
            selected,
            "Records partitioned"
        );
        self.events
            .emit(PassEvent::PassFetched {
                pass_id: pass_id.clone(),
                total: records.len(),
                incomplete: incomplete.len(),
                selected,
            })
            .await;

        let outcomes: Vec<Option<RecordOutcome>> = stream::iter(incomplete.into_iter().take(selected).enumerate())
            .map(|(index, record)| self.process_record(record, index + 1, selected))
            .buffered(workers)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Some(outcome) => report.push(outcome),
                None => report.add_deferred(1),
            }
        }
        if let Some(reason) = self.cancel.reason() {
            warn!(pass_id = %pass_id, %reason, processed = report.processed(), "Pass cancelled");
            report.mark_cancelled(reason);
        }

        let report = report.finish();
        info!(
            pass_id = %pass_id,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            deferred = report.deferred,
            duration_ms = timer.finish(),
            "Pass completed"
        );
        self.events
            .emit(PassEvent::PassCompleted {
                pass_id,
                succeeded: report.succeeded,
                failed: report.failed,
                skipped: report.skipped,
                deferred: report.deferred,
                cancelled: report.cancelled.is_some(),
            })
            .await;
        Ok(report)
    }

    /// Enriches and writes one record. `None` means the record was not
    /// started, or was abandoned before its write, because of cancellation.
    async fn process_record(&self, record: &Record, position: usize, selected: usize) -> Option<RecordOutcome> {
        if !self.pacer.wait(&self.cancel).await {
            debug!(record_id = %record.id(), "Cancelled before start");
            return None;
        }

        let record_id = record.id();
        let label = self
            .label_field
            .as_deref()
            .map(|field| record.text(field))
            .unwrap_or_default();
        let timer = SpanTimer::start(record_id);
        info!(record_id, %label, position, selected, "Processing record");

        let mut state = advance(record_id, RecordState::Fetched, RecordState::Enriching);
        let result = match self.chain.run(record, &self.cancel).await {
            Ok(result) => result,
            Err(RecordflowError::Cancelled(reason)) => {
                debug!(record_id, %reason, "Cancelled during enrichment");
                return None;
            }
            Err(e) => {
                advance(record_id, state, RecordState::Failed);
                return Some(self.fail(record_id, &label, ErrorInfo::from(&e), timer.finish()).await);
            }
        };

        for outcome in result.stage_outcomes.iter().filter(|o| o.status.used_fallback()) {
            self.events
                .emit(PassEvent::StageFallback {
                    record_id: record_id.to_string(),
                    stage: outcome.stage.clone(),
                    reason: outcome.reason.clone().unwrap_or_default(),
                })
                .await;
        }

        if result.is_empty() {
            advance(record_id, state, RecordState::Failed);
            let error = ErrorInfo::new("EnrichmentError", "enrichment produced no fields");
            return Some(self.fail(record_id, &label, error, timer.finish()).await);
        }

        state = advance(record_id, state, RecordState::Enriched);
        state = advance(record_id, state, RecordState::Writing);
        match self.writer.write(record_id, &result.fields).await {
            Ok(receipt) => {
                if receipt.auth_retried {
                    state = advance(record_id, state, RecordState::WriteFailedRetried);
                }
                advance(record_id, state, RecordState::Succeeded);
                info!(record_id, %label, fields = result.fields.len(), "Record written");
                self.events
                    .emit(PassEvent::RecordSucceeded {
                        record_id: record_id.to_string(),
                        auth_retried: receipt.auth_retried,
                        fields: result.fields.len(),
                    })
                    .await;
                Some(
                    RecordOutcome::succeeded(record_id)
                        .with_label(label)
                        .with_fallback_stages(result.fallback_stages())
                        .with_written_fields(result.field_names())
                        .with_auth_retried(receipt.auth_retried)
                        .with_duration_ms(timer.finish()),
                )
            }
            Err(e) => {
                if e.auth_retried {
                    state = advance(record_id, state, RecordState::WriteFailedRetried);
                }
                advance(record_id, state, RecordState::Failed);
                let auth_retried = e.auth_retried;
                let error = ErrorInfo::from(&RecordflowError::Write(e));
                let outcome = self.fail(record_id, &label, error, timer.finish()).await;
                Some(
                    outcome
                        .with_fallback_stages(result.fallback_stages())
                        .with_auth_retried(auth_retried),
                )
            }
        }
    }

    async fn fail(&self, record_id: &str, label: &str, error: ErrorInfo, duration_ms: f64) -> RecordOutcome {
        warn!(record_id, %label, kind = %error.kind, error = %error.message, "Record failed");
        self.events
            .emit(PassEvent::RecordFailed {
                record_id: record_id.to_string(),
                error: error.message.clone(),
            })
            .await;
        RecordOutcome::failed(record_id, error)
            .with_label(label)
            .with_duration_ms(duration_ms)
    }
}
