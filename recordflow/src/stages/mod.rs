//! Enrichment stages.
//!
//! A stage is a pure description of one transformation step: how to build a
//! prompt from the fields seen so far, how to read output fields back out of
//! the model's answer, and what to write when that answer is unusable. The
//! chain owns all I/O.

mod kinds;
pub mod presets;
mod prompt;

pub use kinds::{ChoiceStage, ListStage, ObjectField, ObjectStage, ScorePairStage, TextStage, ValueShape};
pub use prompt::{render_placeholders, PromptLibrary, PromptTemplate};

use crate::completion::SamplingOverride;
use crate::core::{FieldMap, FieldValue, Record};
use std::fmt::Debug;

/// Fields visible to a stage: the fetched record overlaid with everything
/// earlier stages produced for it in this pass.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    record: &'a Record,
    produced: &'a FieldMap,
}

impl<'a> StageInput<'a> {
    /// Creates an input view.
    #[must_use]
    pub fn new(record: &'a Record, produced: &'a FieldMap) -> Self {
        Self { record, produced }
    }

    /// The record being enriched.
    #[must_use]
    pub fn record(&self) -> &'a Record {
        self.record
    }

    /// Fields produced by earlier stages.
    #[must_use]
    pub fn produced(&self) -> &'a FieldMap {
        self.produced
    }

    /// Looks a field up, preferring values produced in this pass.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&'a FieldValue> {
        self.produced
            .get(field)
            .filter(|v| v.is_filled())
            .or_else(|| self.record.get(field))
    }

    /// A field rendered as text, or an empty string.
    #[must_use]
    pub fn text(&self, field: &str) -> String {
        self.get(field).map(FieldValue::as_text).unwrap_or_default()
    }
}

/// One named transformation step.
pub trait Stage: Send + Sync + Debug {
    /// Stage name, used in logs, events and prompt file names.
    fn name(&self) -> &str;

    /// Fields this stage writes.
    fn outputs(&self) -> Vec<String>;

    /// Builds the prompt. Must be deterministic for a given input.
    fn build_prompt(&self, input: &StageInput<'_>) -> String;

    /// Reads output fields from the raw answer.
    ///
    /// Returns only the fields it could populate; the chain fills the rest
    /// from [`Stage::fallback`].
    fn parse(&self, raw: &str, input: &StageInput<'_>) -> FieldMap;

    /// Values written when the answer is missing or unusable.
    fn fallback(&self, input: &StageInput<'_>) -> FieldMap;

    /// Values that can be derived without calling the model, if any.
    fn resolve_locally(&self, _input: &StageInput<'_>) -> Option<FieldMap> {
        None
    }

    /// Sampling adjustments for this stage.
    fn sampling(&self) -> SamplingOverride {
        SamplingOverride::default()
    }
}
