//! Demo records and scripted answers.

use super::ScriptedCompletions;
use crate::core::{FieldMap, FieldValue, Record};
use crate::stages::presets::{
    ABILITY_FIELD, ABILITY_LEAP_FIELD, ABILITY_LEAP_STAGE, ABILITY_STAGE, CREATIVE_STAGE,
    DESCRIPTION_FIELD, EXAMPLE_FIELD, FUN_SCORE_FIELD, IDENTITY_FIELD, INPUT_FIELD,
    PAIN_POINT_FIELD, PAIN_POINT_STAGE, SCENE_FIELD, SCENE_STAGE, SCORE_STAGE, STAGE_NAMES,
    STEPS_FIELD, TITLE_FIELD, USEFUL_SCORE_FIELD,
};
use crate::stages::PromptLibrary;

/// A record with only its name and description.
#[must_use]
pub fn incomplete_demo(id: &str, name: &str) -> Record {
    Record::new(id, FieldMap::new())
        .with_field(IDENTITY_FIELD, name)
        .with_field(INPUT_FIELD, format!("帮我做一个{name}"))
}

/// A record with every required field filled.
#[must_use]
pub fn complete_demo(id: &str, name: &str) -> Record {
    incomplete_demo(id, name)
        .with_field(SCENE_FIELD, "一句话造游戏")
        .with_field(ABILITY_FIELD, vec!["代码狂魔".to_string()])
        .with_field(TITLE_FIELD, format!("AI {name}"))
        .with_field(DESCRIPTION_FIELD, format!("一句话生成{name}"))
        .with_field(EXAMPLE_FIELD, format!("帮我做{name}"))
        .with_field(STEPS_FIELD, "1. 输入需求\n2. 生成代码")
        .with_field(FUN_SCORE_FIELD, 30_i64)
        .with_field(USEFUL_SCORE_FIELD, 35_i64)
        .with_field(PAIN_POINT_FIELD, "手写代码耗时")
        .with_field(ABILITY_LEAP_FIELD, "一次生成可运行代码")
}

/// Marker placed in each stage's instructions by [`demo_prompts`].
#[must_use]
pub fn stage_marker(stage: &str) -> String {
    format!("[{stage}]")
}

/// Instructions consisting of a `[stage]` marker, so scripted replies can
/// key on the stage.
#[must_use]
pub fn demo_prompts() -> PromptLibrary {
    STAGE_NAMES
        .iter()
        .fold(PromptLibrary::new(), |lib, stage| lib.with(*stage, stage_marker(stage)))
}

/// Well-formed answers for every demo stage, keyed by [`demo_prompts`] markers.
#[must_use]
pub fn demo_replies() -> ScriptedCompletions {
    ScriptedCompletions::new()
        .reply_when(stage_marker(SCENE_STAGE), "一句话造游戏")
        .reply_when(stage_marker(ABILITY_STAGE), r#"["代码狂魔", "视觉理解"]"#)
        .reply_when(
            stage_marker(CREATIVE_STAGE),
            r#"```json
{"title": "AI 游戏工坊", "description": "一句话生成可玩的小游戏", "tags": "游戏,编程", "example_prompt": "帮我做一个贪吃蛇", "steps": ["输入需求", "生成代码", "在线试玩"]}
```"#,
        )
        .reply_when(stage_marker(SCORE_STAGE), r#"{"interesting_score": 42, "useful_score": 31}"#)
        .reply_when(stage_marker(PAIN_POINT_STAGE), "手写游戏代码门槛高")
        .reply_when(stage_marker(ABILITY_LEAP_STAGE), "一次生成完整可运行的游戏")
}

/// The values [`demo_replies`] leads to for a demo record.
#[must_use]
pub fn expected_demo_fields() -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert(SCENE_FIELD.into(), FieldValue::tag("一句话造游戏"));
    fields.insert(ABILITY_FIELD.into(), FieldValue::tags(["代码狂魔", "视觉理解"]));
    fields.insert(TITLE_FIELD.into(), FieldValue::text("AI 游戏工坊"));
    fields.insert(DESCRIPTION_FIELD.into(), FieldValue::text("一句话生成可玩的小游戏"));
    fields.insert("豆包标签".into(), FieldValue::text("游戏,编程"));
    fields.insert(EXAMPLE_FIELD.into(), FieldValue::text("帮我做一个贪吃蛇"));
    fields.insert(STEPS_FIELD.into(), FieldValue::text("1. 输入需求\n2. 生成代码\n3. 在线试玩"));
    fields.insert(FUN_SCORE_FIELD.into(), FieldValue::Number(42.0));
    fields.insert(USEFUL_SCORE_FIELD.into(), FieldValue::Number(31.0));
    fields.insert(PAIN_POINT_FIELD.into(), FieldValue::text("手写游戏代码门槛高"));
    fields.insert(ABILITY_LEAP_FIELD.into(), FieldValue::text("一次生成完整可运行的游戏"));
    fields
}
