//! Stage chain scenarios against scripted completions.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::chain::{EnrichmentStageChain, StageStatus};
    use crate::completion::CompletionClient;
    use crate::core::{FieldValue, Record};
    use crate::errors::{RecordflowError, TransportError};
    use crate::retry::RetryConfig;
    use crate::stages::presets::{
        demo_analysis_stages, demo_completeness_policy, FUN_SCORE_FIELD, PAIN_POINT_STAGE,
        SCENE_FIELD, SCORE_STAGE, TITLE_FIELD, USEFUL_SCORE_FIELD,
    };
    use crate::testing::{
        complete_demo, demo_prompts, demo_replies, expected_demo_fields, incomplete_demo,
        stage_marker, ScriptedCompletions,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn chain(script: &Arc<ScriptedCompletions>) -> EnrichmentStageChain {
        let client = CompletionClient::new(script.clone(), "test-model")
            .with_retry(RetryConfig::immediate(3));
        EnrichmentStageChain::new(demo_analysis_stages(&demo_prompts()), Arc::new(client))
    }

    fn record() -> Record {
        incomplete_demo("rec1", "贪吃蛇")
    }

    #[tokio::test]
    async fn test_all_stages_parse() {
        let script = Arc::new(demo_replies());
        let result = chain(&script).run(&record(), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.fields, expected_demo_fields());
        assert!(result.fallback_stages().is_empty());
        assert_eq!(result.stage_outcomes.len(), 6);
        assert_eq!(script.call_count(), 6);
    }

    #[tokio::test]
    async fn test_exhausted_stage_falls_back_others_normal() {
        let script = Arc::new(
            demo_replies().fail_when(stage_marker(SCORE_STAGE), TransportError::Timeout(120_000)),
        );
        let result = chain(&script).run(&record(), &CancellationToken::new()).await.unwrap();

        let mut expected = expected_demo_fields();
        expected.insert(FUN_SCORE_FIELD.into(), FieldValue::Number(25.0));
        expected.insert(USEFUL_SCORE_FIELD.into(), FieldValue::Number(25.0));
        assert_eq!(result.fields, expected);
        assert_eq!(result.fallback_stages(), vec![SCORE_STAGE.to_string()]);
        assert_eq!(script.calls_matching(&stage_marker(SCORE_STAGE)), 3);

        let outcome = &result.stage_outcomes[3];
        assert_eq!(outcome.status, StageStatus::Fallback);
        assert!(outcome.reason.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn test_malformed_scores_fall_back_without_retry() {
        let script = Arc::new(
            demo_replies().reply_when(stage_marker(SCORE_STAGE), "这个 demo 很有意思，但我无法打分。"),
        );
        let result = chain(&script).run(&record(), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.fields[FUN_SCORE_FIELD], FieldValue::Number(25.0));
        assert_eq!(result.fields[USEFUL_SCORE_FIELD], FieldValue::Number(25.0));
        assert_eq!(result.fields[TITLE_FIELD], FieldValue::text("AI 游戏工坊"));
        assert_eq!(script.calls_matching(&stage_marker(SCORE_STAGE)), 1);
    }

    #[tokio::test]
    async fn test_partial_object_fills_missing_members() {
        let script = Arc::new(
            demo_replies().reply_when(stage_marker("创意生成"), r#"{"title": "只有标题"}"#),
        );
        let result = chain(&script).run(&record(), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.fields[TITLE_FIELD], FieldValue::text("只有标题"));
        assert_eq!(result.fields["豆包创意描述"], FieldValue::text("帮我做一个贪吃蛇"));
        assert_eq!(result.fields["示例Prompt"], FieldValue::text("帮我贪吃蛇"));
        assert!(!result.fields.contains_key("豆包标签"));
        assert_eq!(result.stage_outcomes[2].status, StageStatus::Partial);
    }

    #[tokio::test]
    async fn test_later_stages_see_earlier_outputs() {
        let script = Arc::new(demo_replies());
        chain(&script).run(&record(), &CancellationToken::new()).await.unwrap();

        let prompts = script.prompts();
        let pain = prompts
            .iter()
            .find(|p| p.contains(&stage_marker(PAIN_POINT_STAGE)))
            .unwrap();
        assert!(pain.contains("输入场景：一句话造游戏"));
        let score = prompts.iter().find(|p| p.contains(&stage_marker(SCORE_STAGE))).unwrap();
        assert!(score.contains("豆包创意标题：AI 游戏工坊"));
    }

    #[tokio::test]
    async fn test_missing_only_runs_needed_stages() {
        let script = Arc::new(demo_replies());
        let mut record = complete_demo("rec2", "拼图");
        record.fields.remove(FUN_SCORE_FIELD);

        let result = chain(&script)
            .with_missing_only(demo_completeness_policy())
            .run(&record, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.field_names(), vec![FUN_SCORE_FIELD.to_string()]);
        assert_eq!(result.fields[FUN_SCORE_FIELD], FieldValue::Number(42.0));
        assert_eq!(script.call_count(), 1);
        let skipped = result
            .stage_outcomes
            .iter()
            .filter(|o| o.status == StageStatus::Skipped)
            .count();
        assert_eq!(skipped, 5);
    }

    #[tokio::test]
    async fn test_legacy_scene_is_remapped_locally() {
        let script = Arc::new(demo_replies());
        let record = complete_demo("rec3", "识图").with_field(SCENE_FIELD, "看图知一切");

        let result = chain(&script)
            .with_missing_only(demo_completeness_policy())
            .run(&record, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.fields[SCENE_FIELD], FieldValue::tag("图生万物"));
        assert_eq!(result.stage_outcomes[0].status, StageStatus::Local);
        assert_eq!(script.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_chain_returns_error() {
        let script = Arc::new(demo_replies());
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let err = chain(&script).run(&record(), &token).await.unwrap_err();
        assert!(matches!(err, RecordflowError::Cancelled(ref reason) if reason == "shutdown"));
        assert_eq!(script.call_count(), 0);
    }
}
