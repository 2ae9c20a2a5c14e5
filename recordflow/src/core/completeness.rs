//! Completeness predicate over a record's field mapping.

use super::record::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Decides whether a record still needs enrichment.
///
/// The predicate is a pure function of the field mapping it is given: it
/// holds no cache and is re-evaluated on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessPolicy {
    /// Fields that must be present and non-empty.
    #[serde(default)]
    pub required: Vec<String>,
    /// Fields whose present value must additionally belong to a fixed set.
    #[serde(default)]
    pub allowed_values: BTreeMap<String, BTreeSet<String>>,
}

impl CompletenessPolicy {
    /// Creates a policy requiring the given fields.
    #[must_use]
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            allowed_values: BTreeMap::new(),
        }
    }

    /// Restricts a field to a set of allowed values.
    #[must_use]
    pub fn with_allowed_values<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values
            .insert(field.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the required fields that are missing or invalid, in declaration order.
    #[must_use]
    pub fn missing_fields(&self, fields: &FieldMap) -> Vec<String> {
        let mut missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| !self.field_satisfied(name, fields.get(name.as_str())))
            .cloned()
            .collect();

        // Allowed-value rules may name fields outside the required set.
        for name in self.allowed_values.keys() {
            if missing.contains(name) || self.required.contains(name) {
                continue;
            }
            if let Some(value) = fields.get(name) {
                if value.is_filled() && !self.value_allowed(name, value) {
                    missing.push(name.clone());
                }
            }
        }

        missing
    }

    /// Returns true if every required field is present, non-empty and allowed.
    #[must_use]
    pub fn is_complete(&self, fields: &FieldMap) -> bool {
        self.missing_fields(fields).is_empty()
    }

    fn field_satisfied(&self, name: &str, value: Option<&FieldValue>) -> bool {
        match value {
            Some(v) if v.is_filled() => self.value_allowed(name, v),
            _ => false,
        }
    }

    fn value_allowed(&self, name: &str, value: &FieldValue) -> bool {
        self.allowed_values
            .get(name)
            .map_or(true, |allowed| allowed.contains(value.as_text().trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;

    fn policy() -> CompletenessPolicy {
        CompletenessPolicy::new(["标题", "评分", "能力"])
            .with_allowed_values("场景", ["图生万物", "视频秒懂"])
    }

    #[test]
    fn test_complete_record() {
        let record = Record::new("r1", FieldMap::new())
            .with_field("标题", "x")
            .with_field("评分", 10_i64)
            .with_field("能力", vec!["a".to_string()]);
        assert!(policy().is_complete(&record.fields));
    }

    #[test]
    fn test_missing_and_zero_fields() {
        let record = Record::new("r1", FieldMap::new())
            .with_field("标题", "")
            .with_field("评分", 0_i64);
        assert_eq!(
            policy().missing_fields(&record.fields),
            vec!["标题".to_string(), "评分".to_string(), "能力".to_string()]
        );
    }

    #[test]
    fn test_disallowed_value_is_incomplete() {
        let record = Record::new("r1", FieldMap::new())
            .with_field("标题", "x")
            .with_field("评分", 10_i64)
            .with_field("能力", vec!["a".to_string()])
            .with_field("场景", "看图知一切");
        assert_eq!(policy().missing_fields(&record.fields), vec!["场景".to_string()]);
    }

    #[test]
    fn test_predicate_is_pure() {
        let record = Record::new("r1", FieldMap::new()).with_field("标题", "x");
        let p = policy();
        let first = p.is_complete(&record.fields);
        let second = p.is_complete(&record.fields);
        assert_eq!(first, second);
        assert_eq!(p.missing_fields(&record.fields), p.missing_fields(&record.fields));
    }

    #[test]
    fn test_empty_policy_accepts_everything() {
        assert!(CompletenessPolicy::default().is_complete(&FieldMap::new()));
    }
}
