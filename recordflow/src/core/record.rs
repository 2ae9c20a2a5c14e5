//! Record and field value types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name to value mapping for one record.
///
/// A `BTreeMap` keeps iteration (and therefore prompt rendering and
/// serialization) deterministic.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single cell value in the remote table.
///
/// Values arriving from the store are decoded untagged, so a single-select
/// cell reads back as [`FieldValue::Text`]. [`FieldValue::Tag`] is only
/// produced locally by stages that pick from a fixed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent or null.
    #[default]
    Empty,
    /// Numeric cell.
    Number(f64),
    /// Free text.
    Text(String),
    /// A value chosen from an enumerated set.
    Tag(String),
    /// Multi-select cell.
    Tags(Vec<String>),
    /// Anything else the store returns (rich text segments, attachments).
    Other(serde_json::Value),
}

impl FieldValue {
    /// Creates a text value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Creates a tag value.
    #[must_use]
    pub fn tag(value: impl Into<String>) -> Self {
        Self::Tag(value.into())
    }

    /// Creates a tag list value.
    #[must_use]
    pub fn tags<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tags(values.into_iter().map(Into::into).collect())
    }

    /// Returns true if the value counts as "present" for completeness purposes.
    ///
    /// Empty strings, zero, non-finite numbers and empty lists are not filled.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Number(n) => n.is_finite() && *n != 0.0,
            Self::Text(s) | Self::Tag(s) => !s.trim().is_empty(),
            Self::Tags(items) => items.iter().any(|t| !t.trim().is_empty()),
            Self::Other(value) => match value {
                serde_json::Value::Null => false,
                serde_json::Value::String(s) => !s.trim().is_empty(),
                serde_json::Value::Array(items) => !items.is_empty(),
                serde_json::Value::Object(map) => !map.is_empty(),
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => true,
            },
        }
    }

    /// Renders the value as plain text.
    ///
    /// Rich text segments (`[{"text": "..", "type": "text"}]`) are flattened;
    /// tag lists are joined with `、`.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::Text(s) | Self::Tag(s) => s.clone(),
            Self::Tags(items) => items.join("、"),
            Self::Other(value) => flatten_rich_text(value),
        }
    }

    /// Returns the numeric value, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts a JSON value produced by a parser into a field value.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Empty,
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Empty, Self::Number),
            serde_json::Value::Array(items)
                if items.iter().all(serde_json::Value::is_string) =>
            {
                Self::Tags(
                    items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                )
            }
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::Tags(value)
    }
}

fn flatten_rich_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(flatten_rich_text)
            .collect::<Vec<_>>()
            .join(""),
        serde_json::Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("name"))
            .map(flatten_rich_text)
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

/// One row of the remote table, as fetched at the start of a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier. Never changes after fetch.
    #[serde(rename = "record_id")]
    id: String,
    /// Field values at fetch time.
    #[serde(default)]
    pub fields: FieldMap,
}

impl Record {
    /// Creates a new record.
    #[must_use]
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Returns the record identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Returns a field rendered as text, or an empty string.
    #[must_use]
    pub fn text(&self, field: &str) -> String {
        self.fields.get(field).map(FieldValue::as_text).unwrap_or_default()
    }

    /// Sets a field (builder style, used by fixtures).
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_filled() {
        assert!(!FieldValue::Empty.is_filled());
        assert!(!FieldValue::text("   ").is_filled());
        assert!(FieldValue::text("hello").is_filled());
        assert!(!FieldValue::Number(0.0).is_filled());
        assert!(!FieldValue::Number(f64::NAN).is_filled());
        assert!(FieldValue::Number(25.0).is_filled());
        assert!(!FieldValue::Tags(vec![]).is_filled());
        assert!(FieldValue::tags(["代码狂魔"]).is_filled());
        assert!(!FieldValue::Other(serde_json::json!([])).is_filled());
    }

    #[test]
    fn test_decode_wire_fields() {
        let raw = serde_json::json!({
            "record_id": "recA",
            "fields": {
                "Demo名称": "贪吃蛇",
                "趣味分": 30,
                "模型能力": ["代码狂魔", "视觉理解"],
                "描述": [{"text": "富文本", "type": "text"}],
                "空": null
            }
        });
        let record: Record = serde_json::from_value(raw).unwrap();
        assert_eq!(record.id(), "recA");
        assert_eq!(record.get("Demo名称"), Some(&FieldValue::text("贪吃蛇")));
        assert_eq!(record.get("趣味分"), Some(&FieldValue::Number(30.0)));
        assert_eq!(
            record.get("模型能力"),
            Some(&FieldValue::tags(["代码狂魔", "视觉理解"]))
        );
        assert_eq!(record.text("描述"), "富文本");
        assert_eq!(record.get("空"), Some(&FieldValue::Empty));
    }

    #[test]
    fn test_number_as_text() {
        assert_eq!(FieldValue::Number(42.0).as_text(), "42");
        assert_eq!(FieldValue::Number(4.5).as_text(), "4.5");
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            FieldValue::from_json(serde_json::json!(["a", "b"])),
            FieldValue::tags(["a", "b"])
        );
        assert_eq!(FieldValue::from_json(serde_json::json!(7)), FieldValue::Number(7.0));
        assert_eq!(FieldValue::from_json(serde_json::Value::Null), FieldValue::Empty);
    }

    #[test]
    fn test_serialize_tag_as_string() {
        let json = serde_json::to_string(&FieldValue::tag("图生万物")).unwrap();
        assert_eq!(json, r#""图生万物""#);
    }
}
