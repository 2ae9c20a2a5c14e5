//! Core domain model types for recordflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Records and field values
//! - The completeness predicate
//! - Per-record states and the pass report

mod completeness;
mod record;
mod report;
mod status;

pub use completeness::CompletenessPolicy;
pub use record::{FieldMap, FieldValue, Record};
pub use report::{ProcessingReport, RecordOutcome, ReportBuilder};
pub use status::RecordState;
