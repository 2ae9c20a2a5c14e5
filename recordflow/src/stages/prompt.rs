//! Prompt templates.

use super::StageInput;
use crate::core::FieldValue;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}|]+?)\s*(?:\|\s*([a-z]+)\s*)?\}\}").expect("regex for placeholders")
    })
}

/// Replaces `{{field}}` and `{{field|json}}` with values from `input`.
///
/// Unknown fields render as an empty string. `json` renders tag lists as a
/// JSON array and text as a JSON string.
#[must_use]
pub fn render_placeholders(template: &str, input: &StageInput<'_>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures<'_>| {
            let field = caps.get(1).map_or("", |m| m.as_str());
            let value = input.get(field);
            match caps.get(2).map(|m| m.as_str()) {
                Some("json") => render_json(value),
                _ => value.map(FieldValue::as_text).unwrap_or_default(),
            }
        })
        .into_owned()
}

fn render_json(value: Option<&FieldValue>) -> String {
    let json = match value {
        Some(FieldValue::Tags(items)) => serde_json::json!(items),
        Some(FieldValue::Number(n)) => serde_json::json!(n),
        Some(FieldValue::Other(v)) => v.clone(),
        Some(other) => serde_json::json!(other.as_text()),
        None => serde_json::Value::Null,
    };
    json.to_string()
}

/// Instructions plus an input block, rendered as
/// `"{instructions}\n\n{input}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    instructions: String,
    input: String,
}

impl PromptTemplate {
    /// Creates a template. `input` may contain `{{field}}` placeholders.
    #[must_use]
    pub fn new(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
        }
    }

    /// The instruction text.
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Renders the prompt for `input`.
    #[must_use]
    pub fn render(&self, input: &StageInput<'_>) -> String {
        let instructions = render_placeholders(self.instructions.trim_end(), input);
        let block = render_placeholders(&self.input, input);
        if instructions.is_empty() {
            block
        } else {
            format!("{instructions}\n\n{block}")
        }
    }
}

/// Instruction texts keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptLibrary {
    prompts: BTreeMap<String, String>,
}

impl PromptLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the instructions for a stage.
    #[must_use]
    pub fn with(mut self, stage: impl Into<String>, instructions: impl Into<String>) -> Self {
        self.prompts.insert(stage.into(), instructions.into());
        self
    }

    /// Reads `<stage>.md` from `dir` for every stage in `stages`.
    ///
    /// Missing files keep the instructions already in the library.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a file exists but cannot be read.
    pub fn load_dir(mut self, dir: &Path, stages: &[&str]) -> std::io::Result<Self> {
        for stage in stages {
            let path = dir.join(format!("{stage}.md"));
            if !path.is_file() {
                debug!(stage = %stage, path = %path.display(), "No prompt file; keeping built-in");
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            debug!(stage = %stage, path = %path.display(), "Loaded prompt file");
            self.prompts.insert((*stage).to_string(), text);
        }
        Ok(self)
    }

    /// Instructions for `stage`, or an empty string.
    #[must_use]
    pub fn get(&self, stage: &str) -> &str {
        self.prompts.get(stage).map_or("", String::as_str)
    }

    /// Number of stages with instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Returns true if the library is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldMap, Record};
    use pretty_assertions::assert_eq;

    fn record() -> Record {
        Record::new("r1", FieldMap::new())
            .with_field("Prompt描述", "做一个贪吃蛇")
            .with_field("模型能力", vec!["代码狂魔".to_string(), "视觉理解".to_string()])
    }

    #[test]
    fn test_render_is_deterministic() {
        let record = record();
        let produced = FieldMap::new();
        let input = StageInput::new(&record, &produced);
        let template = PromptTemplate::new("请分类。\n", "输入: {{Prompt描述}}");

        let first = template.render(&input);
        assert_eq!(first, "请分类。\n\n输入: 做一个贪吃蛇");
        assert_eq!(first, template.render(&input));
    }

    #[test]
    fn test_json_filter_and_unknown_field() {
        let record = record();
        let produced = FieldMap::new();
        let input = StageInput::new(&record, &produced);
        let rendered = render_placeholders("能力：{{ 模型能力 | json }} 其他：{{不存在}}", &input);
        assert_eq!(rendered, r#"能力：["代码狂魔","视觉理解"] 其他："#);
    }

    #[test]
    fn test_load_dir_overrides_known_stages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("场景分类.md"), "自定义场景提示").unwrap();

        let library = PromptLibrary::new()
            .with("场景分类", "内置")
            .with("能力识别", "内置能力")
            .load_dir(dir.path(), &["场景分类", "能力识别"])
            .unwrap();

        assert_eq!(library.get("场景分类"), "自定义场景提示");
        assert_eq!(library.get("能力识别"), "内置能力");
        assert_eq!(library.get("未知"), "");
        assert_eq!(library.len(), 2);
    }
}
