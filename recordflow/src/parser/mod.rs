//! Structured value extraction from free-form model output.
//!
//! Every public `parse_*` function is total: it never panics and never
//! errors, returning the caller's default when nothing usable is found. The
//! `try_*` variants return `None` instead so callers can tell a parsed value
//! from a fallback.
//!
//! Extraction is layered, first hit wins:
//! 1. the first well-formed bracket or brace span of the target shape
//! 2. the whole text after stripping code fences and reasoning tags
//! 3. permissive regex extraction for the shape
//! 4. the caller's default

mod extract;

pub use extract::{balanced_spans, clean_scalar, strip_reasoning, strip_wrappers};

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"["']?([A-Za-z_][A-Za-z0-9_]*)["']?\s*[:：]\s*(-?\d+(?:\.\d+)?|"[^"\n]*")"#)
            .expect("regex for key/value pairs")
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("regex for numbers"))
}

fn integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("regex for integers"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["“']([^"“”'\n]+)["”']"#).expect("regex for quoted items"))
}

/// Extracts a JSON object, or returns `default`.
#[must_use]
pub fn parse_object(text: &str, default: JsonObject) -> JsonObject {
    try_parse_object(text).unwrap_or(default)
}

/// Extracts a JSON object.
#[must_use]
pub fn try_parse_object(text: &str) -> Option<JsonObject> {
    let body = strip_reasoning(text);

    for span in balanced_spans(body, '{', '}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            return Some(map);
        }
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&strip_wrappers(text)) {
        return Some(map);
    }

    let mut map = JsonObject::new();
    for caps in pair_re().captures_iter(body) {
        let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let raw = raw.as_str();
        let value = if let Some(inner) = raw.strip_prefix('"') {
            Value::String(inner.trim_end_matches('"').to_string())
        } else {
            match serde_json::from_str::<Value>(raw) {
                Ok(number) => number,
                Err(_) => continue,
            }
        };
        map.entry(key.as_str().to_string()).or_insert(value);
    }
    (!map.is_empty()).then_some(map)
}

/// Extracts a JSON array, or returns `default`.
#[must_use]
pub fn parse_array(text: &str, default: Vec<Value>) -> Vec<Value> {
    try_parse_array(text).unwrap_or(default)
}

/// Extracts a JSON array.
#[must_use]
pub fn try_parse_array(text: &str) -> Option<Vec<Value>> {
    let body = strip_reasoning(text);

    for span in balanced_spans(body, '[', ']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(span) {
            return Some(items);
        }
    }

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&strip_wrappers(text)) {
        return Some(items);
    }

    // Malformed list such as `['a', 'b',` or a truncated answer.
    let start = body.find('[')?;
    let region = &body[start + 1..];
    let region = region.find(']').map_or(region, |end| &region[..end]);
    let items: Vec<Value> = quoted_re()
        .captures_iter(region)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .collect();
    (!items.is_empty()).then_some(items)
}

fn ordered_bounds(min: i64, max: i64) -> (i64, i64) {
    if min <= max {
        (min, max)
    } else {
        (max, min)
    }
}

/// Clamps `value` into `[min, max]`, rounding to the nearest integer.
///
/// Non-finite input yields the clamped `default`.
#[must_use]
pub fn clamp_score(value: f64, min: i64, max: i64, default: i64) -> i64 {
    let (lo, hi) = ordered_bounds(min, max);
    if !value.is_finite() {
        return default.clamp(lo, hi);
    }
    // The f64 clamp keeps the cast in range.
    value.round().clamp(lo as f64, hi as f64) as i64
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn first_score_in(map: &JsonObject) -> Option<f64> {
    map.iter()
        .find(|(k, _)| k.contains("score"))
        .and_then(|(_, v)| value_as_f64(v))
        .or_else(|| map.values().find_map(value_as_f64))
}

/// Extracts a single score in `[min, max]`, or returns the clamped `default`.
#[must_use]
pub fn parse_score(text: &str, min: i64, max: i64, default: i64) -> i64 {
    let (lo, hi) = ordered_bounds(min, max);
    try_parse_score(text, lo, hi).unwrap_or_else(|| default.clamp(lo, hi))
}

/// Extracts a single score clamped to `[min, max]`.
#[must_use]
pub fn try_parse_score(text: &str, min: i64, max: i64) -> Option<i64> {
    let body = strip_reasoning(text);
    let clamp = |v: f64| v.is_finite().then(|| clamp_score(v, min, max, min));

    for span in balanced_spans(body, '{', '}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            if let Some(v) = first_score_in(&map) {
                return clamp(v);
            }
        }
    }

    match serde_json::from_str::<Value>(&strip_wrappers(text)) {
        Ok(Value::Object(map)) => {
            if let Some(v) = first_score_in(&map) {
                return clamp(v);
            }
        }
        Ok(other) => {
            if let Some(v) = value_as_f64(&other) {
                return clamp(v);
            }
        }
        Err(_) => {}
    }

    number_re()
        .find(body)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .and_then(clamp)
}

/// Describes a stage that yields two scores from one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScorePairSpec {
    /// JSON keys of the two scores.
    pub keys: [String; 2],
    /// Labelled markers for the two scores in prose (e.g. `趣味`, `实用`).
    pub markers: [String; 2],
    /// Lower bound, inclusive.
    pub min: i64,
    /// Upper bound, inclusive.
    pub max: i64,
    /// Value used for a score that cannot be found.
    pub default: i64,
}

impl ScorePairSpec {
    /// Creates a spec.
    #[must_use]
    pub fn new(keys: [&str; 2], markers: [&str; 2], min: i64, max: i64, default: i64) -> Self {
        Self {
            keys: keys.map(str::to_string),
            markers: markers.map(str::to_string),
            min,
            max,
            default,
        }
    }

    fn clamp(&self, value: f64) -> Option<i64> {
        value
            .is_finite()
            .then(|| clamp_score(value, self.min, self.max, self.default))
    }

    fn from_object(&self, map: &JsonObject) -> Option<[Option<i64>; 2]> {
        let pair = [0usize, 1].map(|i| {
            map.get(&self.keys[i])
                .and_then(value_as_f64)
                .and_then(|v| self.clamp(v))
        });
        (pair[0].is_some() || pair[1].is_some()).then_some(pair)
    }

    fn labelled(&self, body: &str, labels: &[String; 2], pattern: &str) -> Option<[i64; 2]> {
        let mut found = [0i64; 2];
        for (slot, label) in found.iter_mut().zip(labels) {
            let re = Regex::new(&pattern.replace("{label}", &regex::escape(label))).ok()?;
            let raw = re.captures(body)?.get(1)?.as_str().parse::<f64>().ok()?;
            *slot = self.clamp(raw)?;
        }
        Some(found)
    }
}

/// Extracts two scores, substituting the clamped default for either that is missing.
#[must_use]
pub fn parse_score_pair(text: &str, spec: &ScorePairSpec) -> (i64, i64) {
    let fallback = clamp_score(spec.default as f64, spec.min, spec.max, spec.default);
    let [a, b] = try_parse_score_pair(text, spec);
    (a.unwrap_or(fallback), b.unwrap_or(fallback))
}

/// Extracts two scores; each is `None` when that score cannot be found.
#[must_use]
pub fn try_parse_score_pair(text: &str, spec: &ScorePairSpec) -> [Option<i64>; 2] {
    let body = strip_reasoning(text);

    for span in balanced_spans(body, '{', '}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            if let Some(pair) = spec.from_object(&map) {
                return pair;
            }
        }
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&strip_wrappers(text)) {
        if let Some(pair) = spec.from_object(&map) {
            return pair;
        }
    }

    let key_pattern = r#"["']?{label}["']?\s*[:：=]\s*["']?(-?\d+(?:\.\d+)?)"#;
    if let Some([a, b]) = spec.labelled(body, &spec.keys, key_pattern) {
        return [Some(a), Some(b)];
    }

    let marker_pattern = r"{label}性?(?:分数|分|得分)?\s*[:：]?\s*(\d+(?:\.\d+)?)";
    if let Some([a, b]) = spec.labelled(body, &spec.markers, marker_pattern) {
        return [Some(a), Some(b)];
    }

    let (lo, hi) = ordered_bounds(spec.min, spec.max);
    let mut in_range = integer_re()
        .find_iter(body)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .filter(|n| (lo..=hi).contains(n));
    match (in_range.next(), in_range.next()) {
        (Some(a), Some(b)) => [Some(a), Some(b)],
        _ => [None, None],
    }
}

/// Extracts free text: wrappers stripped, quotes trimmed.
///
/// With `first_line_only`, only the first non-empty line is kept.
#[must_use]
pub fn try_parse_text(text: &str, first_line_only: bool) -> Option<String> {
    let cleaned = clean_scalar(text);
    let cleaned = if first_line_only {
        cleaned
            .lines()
            .map(clean_scalar)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
    } else {
        cleaned
    };
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Picks one value from a fixed set.
///
/// The answer is cleaned, then matched exactly against `allowed`, then
/// through `aliases`, then by substring containment in either direction.
#[must_use]
pub fn try_parse_choice(
    text: &str,
    allowed: &[String],
    aliases: &BTreeMap<String, String>,
) -> Option<String> {
    let answer = try_parse_text(text, true)?;
    let resolve = |candidate: &str| -> Option<String> {
        if allowed.iter().any(|a| a == candidate) {
            return Some(candidate.to_string());
        }
        aliases
            .get(candidate)
            .filter(|target| allowed.contains(target))
            .cloned()
    };

    if let Some(hit) = resolve(&answer) {
        return Some(hit);
    }

    // Longest names first so a short name never shadows a longer one containing it.
    let mut by_length: Vec<&String> = allowed.iter().chain(aliases.keys()).collect();
    by_length.sort_by_key(|name| std::cmp::Reverse(name.chars().count()));
    by_length
        .iter()
        .find(|name| answer.contains(name.as_str()))
        .or_else(|| by_length.iter().find(|name| name.contains(answer.as_str())))
        .and_then(|name| resolve(name.as_str()))
}
