//! Stage kinds, one per output shape.

use super::prompt::{render_placeholders, PromptTemplate};
use super::{Stage, StageInput};
use crate::completion::SamplingOverride;
use crate::core::{FieldMap, FieldValue};
use crate::parser::{
    clamp_score, try_parse_array, try_parse_choice, try_parse_object, try_parse_score_pair,
    try_parse_text, ScorePairSpec,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

fn single(field: &str, value: FieldValue) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert(field.to_string(), value);
    map
}

fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Renders items as `1. first\n2. second`, replacing any numbering the model added.
#[must_use]
pub(crate) fn numbered_lines(items: &[String]) -> String {
    items
        .iter()
        .map(|item| {
            item.trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', '、', ')', '）'])
                .trim()
        })
        .filter(|item| !item.is_empty())
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_tags(text: &str) -> Vec<String> {
    text.split([',', '，', '、', ';', '；', '\n'])
        .map(|t| t.trim().trim_start_matches('#').trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Writes one free-text field.
#[derive(Debug, Clone)]
pub struct TextStage {
    name: String,
    field: String,
    template: PromptTemplate,
    fallback: String,
    first_line_only: bool,
    sampling: SamplingOverride,
}

impl TextStage {
    /// Creates a text stage. `fallback` may contain `{{field}}` placeholders.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        template: PromptTemplate,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            template,
            fallback: fallback.into(),
            first_line_only: false,
            sampling: SamplingOverride::default(),
        }
    }

    /// Keeps only the first non-empty line of the answer.
    #[must_use]
    pub fn first_line_only(mut self) -> Self {
        self.first_line_only = true;
        self
    }

    /// Sets the sampling override.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOverride) -> Self {
        self.sampling = sampling;
        self
    }
}

impl Stage for TextStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn build_prompt(&self, input: &StageInput<'_>) -> String {
        self.template.render(input)
    }

    fn parse(&self, raw: &str, _input: &StageInput<'_>) -> FieldMap {
        try_parse_text(raw, self.first_line_only)
            .map(|text| single(&self.field, FieldValue::Text(text)))
            .unwrap_or_default()
    }

    fn fallback(&self, input: &StageInput<'_>) -> FieldMap {
        let text = render_placeholders(&self.fallback, input);
        if text.trim().is_empty() {
            return FieldMap::new();
        }
        single(&self.field, FieldValue::Text(text))
    }

    fn sampling(&self) -> SamplingOverride {
        self.sampling
    }
}

/// Picks one tag from a fixed set.
#[derive(Debug, Clone)]
pub struct ChoiceStage {
    name: String,
    field: String,
    template: PromptTemplate,
    allowed: Vec<String>,
    aliases: BTreeMap<String, String>,
    default: String,
    sampling: SamplingOverride,
}

impl ChoiceStage {
    /// Creates a choice stage.
    #[must_use]
    pub fn new<I, S>(
        name: impl Into<String>,
        field: impl Into<String>,
        template: PromptTemplate,
        allowed: I,
        default: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            field: field.into(),
            template,
            allowed: allowed.into_iter().map(Into::into).collect(),
            aliases: BTreeMap::new(),
            default: default.into(),
            sampling: SamplingOverride::default(),
        }
    }

    /// Maps legacy or near-miss names onto allowed values.
    #[must_use]
    pub fn with_aliases<I, K, V>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.aliases
            .extend(aliases.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the sampling override.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOverride) -> Self {
        self.sampling = sampling;
        self
    }

    /// The allowed values.
    #[must_use]
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }
}

impl Stage for ChoiceStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn build_prompt(&self, input: &StageInput<'_>) -> String {
        self.template.render(input)
    }

    fn parse(&self, raw: &str, _input: &StageInput<'_>) -> FieldMap {
        try_parse_choice(raw, &self.allowed, &self.aliases)
            .map(|choice| single(&self.field, FieldValue::Tag(choice)))
            .unwrap_or_default()
    }

    fn fallback(&self, _input: &StageInput<'_>) -> FieldMap {
        single(&self.field, FieldValue::Tag(self.default.clone()))
    }

    /// A legacy value with a known alias is remapped without asking the model.
    fn resolve_locally(&self, input: &StageInput<'_>) -> Option<FieldMap> {
        let current = input.record().get(&self.field)?.as_text();
        let target = self.aliases.get(current.trim())?;
        self.allowed
            .contains(target)
            .then(|| single(&self.field, FieldValue::Tag(target.clone())))
    }

    fn sampling(&self) -> SamplingOverride {
        self.sampling
    }
}

/// Writes a list of tags.
#[derive(Debug, Clone)]
pub struct ListStage {
    name: String,
    field: String,
    template: PromptTemplate,
    allowed: Option<BTreeSet<String>>,
    default: Vec<String>,
    sampling: SamplingOverride,
}

impl ListStage {
    /// Creates a list stage.
    #[must_use]
    pub fn new<I, S>(
        name: impl Into<String>,
        field: impl Into<String>,
        template: PromptTemplate,
        default: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            field: field.into(),
            template,
            allowed: None,
            default: default.into_iter().map(Into::into).collect(),
            sampling: SamplingOverride::default(),
        }
    }

    /// Drops items outside this set.
    #[must_use]
    pub fn with_allowed<I, S>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(allowed.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the sampling override.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOverride) -> Self {
        self.sampling = sampling;
        self
    }
}

impl Stage for ListStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn build_prompt(&self, input: &StageInput<'_>) -> String {
        self.template.render(input)
    }

    fn parse(&self, raw: &str, _input: &StageInput<'_>) -> FieldMap {
        let Some(items) = try_parse_array(raw) else {
            return FieldMap::new();
        };
        let mut tags: Vec<String> = Vec::with_capacity(items.len());
        for tag in items.iter().filter_map(value_to_text) {
            let allowed = self.allowed.as_ref().map_or(true, |set| set.contains(&tag));
            if allowed && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.is_empty() {
            return FieldMap::new();
        }
        single(&self.field, FieldValue::Tags(tags))
    }

    fn fallback(&self, _input: &StageInput<'_>) -> FieldMap {
        single(&self.field, FieldValue::Tags(self.default.clone()))
    }

    fn sampling(&self) -> SamplingOverride {
        self.sampling
    }
}

/// How an object member becomes a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueShape {
    /// Plain text; lists are joined with newlines.
    #[default]
    Text,
    /// A numbered list, one item per line.
    Lines,
    /// A tag list; text is split on common separators.
    Tags,
    /// A number.
    Number,
}

/// Maps one member of the model's JSON object to a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectField {
    /// JSON key in the answer.
    pub key: String,
    /// Alternative keys accepted for the same member.
    pub alt_keys: Vec<String>,
    /// Record field written.
    pub field: String,
    /// Conversion applied.
    pub shape: ValueShape,
    /// Fallback template (`{{field}}` placeholders allowed).
    pub fallback: Option<String>,
}

impl ObjectField {
    /// Creates a text mapping with no fallback.
    #[must_use]
    pub fn new(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            alt_keys: Vec::new(),
            field: field.into(),
            shape: ValueShape::Text,
            fallback: None,
        }
    }

    /// Sets the conversion.
    #[must_use]
    pub fn shape(mut self, shape: ValueShape) -> Self {
        self.shape = shape;
        self
    }

    /// Accepts another key for the same member.
    #[must_use]
    pub fn alt_key(mut self, key: impl Into<String>) -> Self {
        self.alt_keys.push(key.into());
        self
    }

    /// Sets the fallback template.
    #[must_use]
    pub fn fallback(mut self, template: impl Into<String>) -> Self {
        self.fallback = Some(template.into());
        self
    }

    fn convert(&self, value: &Value) -> Option<FieldValue> {
        match (self.shape, value) {
            (ValueShape::Number, v) => {
                let n = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }?;
                n.is_finite().then_some(FieldValue::Number(n))
            }
            (ValueShape::Tags, Value::Array(items)) => {
                let tags: Vec<String> = items.iter().filter_map(value_to_text).collect();
                (!tags.is_empty()).then_some(FieldValue::Tags(tags))
            }
            (ValueShape::Tags, v) => {
                let tags = split_tags(&value_to_text(v)?);
                (!tags.is_empty()).then_some(FieldValue::Tags(tags))
            }
            (ValueShape::Lines, Value::Array(items)) => {
                let lines: Vec<String> = items.iter().filter_map(value_to_text).collect();
                let text = numbered_lines(&lines);
                (!text.is_empty()).then_some(FieldValue::Text(text))
            }
            (ValueShape::Text, Value::Array(items)) => {
                let lines: Vec<String> = items.iter().filter_map(value_to_text).collect();
                (!lines.is_empty()).then(|| FieldValue::Text(lines.join("\n")))
            }
            (ValueShape::Text | ValueShape::Lines, v) => value_to_text(v).map(FieldValue::Text),
        }
    }
}

/// Writes several fields from one JSON object answer.
#[derive(Debug, Clone)]
pub struct ObjectStage {
    name: String,
    template: PromptTemplate,
    fields: Vec<ObjectField>,
    sampling: SamplingOverride,
}

impl ObjectStage {
    /// Creates an object stage.
    #[must_use]
    pub fn new(name: impl Into<String>, template: PromptTemplate, fields: Vec<ObjectField>) -> Self {
        Self {
            name: name.into(),
            template,
            fields,
            sampling: SamplingOverride::default(),
        }
    }

    /// Sets the sampling override.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOverride) -> Self {
        self.sampling = sampling;
        self
    }
}

impl Stage for ObjectStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.field.clone()).collect()
    }

    fn build_prompt(&self, input: &StageInput<'_>) -> String {
        self.template.render(input)
    }

    fn parse(&self, raw: &str, _input: &StageInput<'_>) -> FieldMap {
        let Some(object) = try_parse_object(raw) else {
            return FieldMap::new();
        };
        self.fields
            .iter()
            .filter_map(|mapping| {
                std::iter::once(&mapping.key)
                    .chain(&mapping.alt_keys)
                    .filter_map(|key| object.get(key))
                    .find_map(|value| mapping.convert(value))
                    .map(|value| (mapping.field.clone(), value))
            })
            .collect()
    }

    fn fallback(&self, input: &StageInput<'_>) -> FieldMap {
        self.fields
            .iter()
            .filter_map(|mapping| {
                let text = render_placeholders(mapping.fallback.as_deref()?, input);
                if text.trim().is_empty() {
                    return None;
                }
                let value = match mapping.shape {
                    ValueShape::Tags => FieldValue::Tags(split_tags(&text)),
                    ValueShape::Number => FieldValue::Number(text.trim().parse().ok()?),
                    ValueShape::Text | ValueShape::Lines => FieldValue::Text(text),
                };
                Some((mapping.field.clone(), value))
            })
            .collect()
    }

    fn sampling(&self) -> SamplingOverride {
        self.sampling
    }
}

/// Writes two numeric scores from one answer.
#[derive(Debug, Clone)]
pub struct ScorePairStage {
    name: String,
    template: PromptTemplate,
    fields: [String; 2],
    spec: ScorePairSpec,
    sampling: SamplingOverride,
}

impl ScorePairStage {
    /// Creates a score pair stage writing `fields` from `spec.keys`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        template: PromptTemplate,
        fields: [&str; 2],
        spec: ScorePairSpec,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            fields: fields.map(str::to_string),
            spec,
            sampling: SamplingOverride::default(),
        }
    }

    /// Sets the sampling override.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOverride) -> Self {
        self.sampling = sampling;
        self
    }
}

impl Stage for ScorePairStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        self.fields.to_vec()
    }

    fn build_prompt(&self, input: &StageInput<'_>) -> String {
        self.template.render(input)
    }

    fn parse(&self, raw: &str, _input: &StageInput<'_>) -> FieldMap {
        self.fields
            .iter()
            .zip(try_parse_score_pair(raw, &self.spec))
            .filter_map(|(field, score)| Some((field.clone(), FieldValue::Number(score? as f64))))
            .collect()
    }

    fn fallback(&self, _input: &StageInput<'_>) -> FieldMap {
        let score = clamp_score(
            self.spec.default as f64,
            self.spec.min,
            self.spec.max,
            self.spec.default,
        );
        self.fields
            .iter()
            .map(|field| (field.clone(), FieldValue::Number(score as f64)))
            .collect()
    }

    fn sampling(&self) -> SamplingOverride {
        self.sampling
    }
}
