//! # Recordflow
//!
//! Fills in missing fields of rows in a remote table by running each
//! incomplete row through a fixed chain of model-backed enrichment stages
//! and writing the results back.
//!
//! A pass is built from a handful of pieces:
//!
//! - **Credentials**: [`auth::CredentialBroker`] caches one store token and
//!   refreshes it shortly before expiry or after an auth failure
//! - **Reading**: [`store::PagedReader`] snapshots the whole table page by page
//! - **Completions**: [`completion::CompletionClient`] with fixed-delay retry and timeouts
//! - **Parsing**: [`parser`] pulls JSON, lists, scores and labels out of free-form replies
//! - **Enrichment**: [`chain::EnrichmentStageChain`] runs the stages in order, falling back per stage
//! - **Reconciliation**: [`reconciler::Reconciler`] partitions, enriches, writes and reports
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use recordflow::prelude::*;
//!
//! let chain = EnrichmentStageChain::new(demo_analysis_stages(&builtin_prompts()), client);
//! let reconciler = Reconciler::new(store, broker, reader_config, table, chain, demo_completeness_policy());
//! let report = reconciler.run_pass(Some(10)).await?;
//! println!("{}", report.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod auth;
pub mod cancellation;
pub mod chain;
pub mod completion;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod parser;
pub mod reconciler;
pub mod retry;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{BrokerSettings, Credential, CredentialBroker};
    pub use crate::cancellation::CancellationToken;
    pub use crate::chain::{EnrichmentResult, EnrichmentStageChain, StageOutcome, StageStatus};
    pub use crate::completion::{CompletionClient, CompletionTransport, Sampling, SamplingOverride};
    pub use crate::config::{AppConfig, CompletionConfig, PassConfig, StoreConfig};
    pub use crate::core::{
        CompletenessPolicy, FieldMap, FieldValue, ProcessingReport, Record, RecordOutcome,
        RecordState,
    };
    pub use crate::errors::{
        CompletionError, ErrorInfo, RecordflowError, StoreError, TransportError, WriteError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PassEvent};
    pub use crate::reconciler::Reconciler;
    pub use crate::retry::RetryConfig;
    pub use crate::stages::presets::{builtin_prompts, demo_analysis_stages, demo_completeness_policy};
    pub use crate::stages::{PromptLibrary, Stage, StageInput};
    pub use crate::store::{PagedReader, ReaderConfig, TableRef, TableStore, TokenIssuer};
}
