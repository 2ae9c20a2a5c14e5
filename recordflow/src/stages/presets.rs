//! The demo-analysis stage set.
//!
//! Six stages enrich a demo record from its name and prompt description:
//! scene, abilities, creative copy, scores, pain point and ability leap.
//! Instructions come from a [`PromptLibrary`]; [`builtin_prompts`] carries
//! short defaults that prompt files in a directory can replace.

use super::{
    ChoiceStage, ListStage, ObjectField, ObjectStage, PromptLibrary, PromptTemplate, ScorePairStage,
    Stage, TextStage, ValueShape,
};
use crate::completion::SamplingOverride;
use crate::core::CompletenessPolicy;
use crate::parser::ScorePairSpec;
use std::sync::Arc;

/// Field identifying a demo row; rows without it are dropped on fetch.
pub const IDENTITY_FIELD: &str = "Demo名称";
/// Free-text description every stage reads.
pub const INPUT_FIELD: &str = "Prompt描述";

/// Picks the record's scene.
pub const SCENE_STAGE: &str = "场景分类";
/// Lists the model abilities a demo shows off.
pub const ABILITY_STAGE: &str = "能力识别";
/// Writes title, description, tags, example prompt and steps.
pub const CREATIVE_STAGE: &str = "创意生成";
/// Rates fun and usefulness.
pub const SCORE_STAGE: &str = "评分标准";
/// Names the user pain point.
pub const PAIN_POINT_STAGE: &str = "痛点分析";
/// Describes what the new model does better.
pub const ABILITY_LEAP_STAGE: &str = "能力跃迁";

/// Stage names in execution order.
pub const STAGE_NAMES: [&str; 6] = [
    SCENE_STAGE,
    ABILITY_STAGE,
    CREATIVE_STAGE,
    SCORE_STAGE,
    PAIN_POINT_STAGE,
    ABILITY_LEAP_STAGE,
];

/// Scene, one of [`VALID_SCENES`].
pub const SCENE_FIELD: &str = "所属场景";
/// Model abilities, a multi-select.
pub const ABILITY_FIELD: &str = "模型能力";
/// Creative title.
pub const TITLE_FIELD: &str = "豆包创意标题";
/// Creative description.
pub const DESCRIPTION_FIELD: &str = "豆包创意描述";
/// Free-form tags. Not required and never filled from a fallback.
pub const TAGS_FIELD: &str = "豆包标签";
/// Example prompt a user could type.
pub const EXAMPLE_FIELD: &str = "示例Prompt";
/// Numbered implementation steps.
pub const STEPS_FIELD: &str = "实现步骤";
/// Fun score.
pub const FUN_SCORE_FIELD: &str = "趣味分";
/// Usefulness score.
pub const USEFUL_SCORE_FIELD: &str = "实用分";
/// User pain point.
pub const PAIN_POINT_FIELD: &str = "用户痛点";
/// Ability leap.
pub const ABILITY_LEAP_FIELD: &str = "能力跃迁";

/// Fields a complete demo record carries.
pub const REQUIRED_FIELDS: [&str; 10] = [
    SCENE_FIELD,
    ABILITY_FIELD,
    TITLE_FIELD,
    DESCRIPTION_FIELD,
    EXAMPLE_FIELD,
    STEPS_FIELD,
    FUN_SCORE_FIELD,
    USEFUL_SCORE_FIELD,
    PAIN_POINT_FIELD,
    ABILITY_LEAP_FIELD,
];

/// Scenes a record may be filed under.
pub const VALID_SCENES: [&str; 18] = [
    "一句话生成App",
    "一句话做网站",
    "一句话造游戏",
    "一句话出3D",
    "一句话写系统",
    "一句话搞特效",
    "图生万物",
    "视频秒懂",
    "文档秒读",
    "AI替你干活",
    "一句话出图",
    "一句话做PPT",
    "一句话做表格",
    "写作助手",
    "AI当老师",
    "AI陪聊",
    "视觉考AI",
    "奇葩挑战",
];

/// Legacy scene names and their replacements.
pub const SCENE_ALIASES: [(&str, &str); 6] = [
    ("看图知一切", "图生万物"),
    ("图片理解", "图生万物"),
    ("视频理解", "视频秒懂"),
    ("文档处理", "文档秒读"),
    ("Agent", "AI替你干活"),
    ("代码生成", "一句话生成App"),
];

/// Scene used when classification fails.
pub const DEFAULT_SCENE: &str = "一句话生成App";
/// Ability list used when identification fails.
pub const DEFAULT_ABILITY: &str = "代码狂魔";
/// Steps used when the creative stage gives none.
pub const DEFAULT_STEPS: &str = "1. 用户输入需求\n2. AI分析并执行\n3. 生成结果";
/// Pain point used when the stage fails.
pub const DEFAULT_PAIN_POINT: &str = "传统方式需要大量时间和专业技能，效率低且容易出错。";
/// Ability leap used when the stage fails.
pub const DEFAULT_ABILITY_LEAP: &str =
    "1.8凭借原生多模态和增强的Agent能力，可以更高效地完成此类任务。";

/// Lowest score.
pub const SCORE_MIN: i64 = 1;
/// Highest score.
pub const SCORE_MAX: i64 = 50;
/// Score used when none can be read.
pub const SCORE_DEFAULT: i64 = 25;

/// Built-in instructions for every stage.
#[must_use]
pub fn builtin_prompts() -> PromptLibrary {
    let scenes = VALID_SCENES.join("、");
    PromptLibrary::new()
        .with(
            SCENE_STAGE,
            format!(
                "你是 Demo 分类助手。根据输入的 Prompt 描述，从以下场景中选择最贴切的一个：{scenes}。\n只输出场景名称，不要输出任何解释。"
            ),
        )
        .with(
            ABILITY_STAGE,
            "你是模型能力分析助手。判断完成输入描述的任务需要哪些模型能力，例如：代码狂魔、视觉理解、长文本、多模态生成、Agent 执行。\n只输出 JSON 数组，例如 [\"代码狂魔\", \"视觉理解\"]。",
        )
        .with(
            CREATIVE_STAGE,
            "你是创意文案助手。根据输入描述为 Demo 撰写展示文案，输出一个 JSON 对象，包含：\n- title：不超过 15 字的创意标题\n- description：不超过 50 字的创意描述\n- tags：2 到 4 个标签，用逗号分隔\n- example_prompt：用户可直接发送的一句示例 Prompt\n- steps：3 到 6 条实现步骤组成的数组\n只输出 JSON。",
        )
        .with(
            SCORE_STAGE,
            "你是 Demo 评审。根据创意标题和描述为 Demo 打分，两项分数范围均为 1 到 50：\n- interesting_score：趣味性\n- useful_score：实用性\n只输出 JSON，例如 {\"interesting_score\": 30, \"useful_score\": 40}。",
        )
        .with(
            PAIN_POINT_STAGE,
            "你是产品分析师。结合场景和描述，用一句话说明用户在没有 AI 时完成这件事的痛点。只输出这句话。",
        )
        .with(
            ABILITY_LEAP_STAGE,
            "你是模型能力分析师。结合所需能力和描述，用一句话说明新模型相比上一代在此任务上的能力跃迁。只输出这句话。",
        )
}

/// Builds the six demo-analysis stages in execution order.
///
/// Stages whose instructions are missing from `prompts` still run with an
/// empty instruction block.
#[must_use]
pub fn demo_analysis_stages(prompts: &PromptLibrary) -> Vec<Arc<dyn Stage>> {
    let described = |stage: &str| PromptTemplate::new(prompts.get(stage), "输入: {{Prompt描述}}");

    let scene = ChoiceStage::new(
        SCENE_STAGE,
        SCENE_FIELD,
        described(SCENE_STAGE),
        VALID_SCENES,
        DEFAULT_SCENE,
    )
    .with_aliases(SCENE_ALIASES)
    .with_sampling(SamplingOverride::new(0.3, 2048));

    let abilities = ListStage::new(
        ABILITY_STAGE,
        ABILITY_FIELD,
        described(ABILITY_STAGE),
        [DEFAULT_ABILITY],
    )
    .with_sampling(SamplingOverride::new(0.3, 2048));

    let creative = ObjectStage::new(
        CREATIVE_STAGE,
        described(CREATIVE_STAGE),
        vec![
            ObjectField::new("title", TITLE_FIELD).fallback("{{Demo名称}}"),
            ObjectField::new("description", DESCRIPTION_FIELD).fallback("{{Prompt描述}}"),
            ObjectField::new("tags", TAGS_FIELD).alt_key("doubao_tags"),
            ObjectField::new("example_prompt", EXAMPLE_FIELD).fallback("帮我{{Demo名称}}"),
            ObjectField::new("steps", STEPS_FIELD)
                .shape(ValueShape::Lines)
                .fallback(DEFAULT_STEPS),
        ],
    )
    .with_sampling(SamplingOverride::new(0.5, 3000));

    let scores = ScorePairStage::new(
        SCORE_STAGE,
        PromptTemplate::new(
            prompts.get(SCORE_STAGE),
            "输入:\n- 豆包创意标题：{{豆包创意标题}}\n- 豆包创意描述：{{豆包创意描述}}",
        ),
        [FUN_SCORE_FIELD, USEFUL_SCORE_FIELD],
        ScorePairSpec::new(
            ["interesting_score", "useful_score"],
            ["趣味", "实用"],
            SCORE_MIN,
            SCORE_MAX,
            SCORE_DEFAULT,
        ),
    )
    .with_sampling(SamplingOverride::new(0.3, 2048));

    let pain_point = TextStage::new(
        PAIN_POINT_STAGE,
        PAIN_POINT_FIELD,
        PromptTemplate::new(
            prompts.get(PAIN_POINT_STAGE),
            "输入场景：{{所属场景}}\n输入描述：{{Prompt描述}}",
        ),
        DEFAULT_PAIN_POINT,
    );

    let ability_leap = TextStage::new(
        ABILITY_LEAP_STAGE,
        ABILITY_LEAP_FIELD,
        PromptTemplate::new(
            prompts.get(ABILITY_LEAP_STAGE),
            "输入能力：{{模型能力|json}}\n输入描述：{{Prompt描述}}",
        ),
        DEFAULT_ABILITY_LEAP,
    );

    vec![
        Arc::new(scene),
        Arc::new(abilities),
        Arc::new(creative),
        Arc::new(scores),
        Arc::new(pain_point),
        Arc::new(ability_leap),
    ]
}

/// Completeness rule for demo records: every required field filled and the
/// scene one of [`VALID_SCENES`].
#[must_use]
pub fn demo_completeness_policy() -> CompletenessPolicy {
    CompletenessPolicy::new(REQUIRED_FIELDS).with_allowed_values(SCENE_FIELD, VALID_SCENES)
}
