//! Judge evaluators: model-backed and heuristic.

use async_trait::async_trait;
use skillmem_ai::{SynthesisError, Synthesizer};
use skillmem_core::{Dimension, DimensionScores, InsightType};
use std::sync::Arc;

use crate::rubric::{parse_evaluation, scoring_prompt, Evaluation, JudgeContext};

/// Scores a decision on the rubric.
#[async_trait]
pub trait JudgeEvaluator: Send + Sync {
    /// Name recorded on the insights it produces.
    fn name(&self) -> &str;

    /// Evaluate one decision.
    async fn evaluate(&self, ctx: &JudgeContext) -> Result<Evaluation, SynthesisError>;
}

/// Evaluator that asks a language model.
pub struct LlmJudgeEvaluator {
    synthesizer: Arc<dyn Synthesizer>,
    name: String,
}

impl LlmJudgeEvaluator {
    /// Create an evaluator over a synthesizer.
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        let name = format!("llm:{}", synthesizer.name());
        Self { synthesizer, name }
    }
}

#[async_trait]
impl JudgeEvaluator for LlmJudgeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, ctx: &JudgeContext) -> Result<Evaluation, SynthesisError> {
        let text = self.synthesizer.synthesize(&scoring_prompt(ctx)).await?;
        parse_evaluation(&text)
    }
}

/// Cheap deterministic evaluator.
///
/// Scores from what the reasoning mentions and how the position is sized.
/// Used inline when no model is configured, and as the post-hoc judge in
/// model-less deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

const TIMING_CUES: &[&str] = &["wait", "confirm", "breakout", "entry", "pullback", "retest"];
const RISK_CUES: &[&str] = &["stop", "hedge", "risk", "size down", "invalidat", "max loss"];
const MARKET_CUES: &[&str] = &["trend", "volume", "funding", "liquidity", "sentiment", "volatility"];

fn mentions(text: &str, cues: &[&str]) -> bool {
    cues.iter().any(|c| text.contains(c))
}

#[async_trait]
impl JudgeEvaluator for HeuristicEvaluator {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn evaluate(&self, ctx: &JudgeContext) -> Result<Evaluation, SynthesisError> {
        let text = ctx.reasoning.to_lowercase();
        let words = text.split_whitespace().count();

        let mut scores = DimensionScores::default();
        scores.set(Dimension::Timing, if mentions(&text, TIMING_CUES) { 0.7 } else { 0.5 });
        scores.set(
            Dimension::Sizing,
            match ctx.position_fraction {
                Some(f) if f <= 0.05 => 0.8,
                Some(f) if f <= 0.10 => 0.7,
                Some(f) if f <= 0.20 => 0.5,
                Some(_) => 0.2,
                None => 0.5,
            },
        );
        scores.set(Dimension::Selection, if words >= 20 { 0.6 } else { 0.4 });
        scores.set(Dimension::RiskManagement, if mentions(&text, RISK_CUES) { 0.75 } else { 0.4 });
        scores.set(Dimension::MarketRead, if mentions(&text, MARKET_CUES) { 0.65 } else { 0.45 });
        scores.set(
            Dimension::Execution,
            if (0.4..=0.85).contains(&ctx.confidence) { 0.6 } else { 0.45 },
        );

        let quality = scores.quality_score();
        let (weakest, weakest_score) = scores.weakest();
        let insight_type = if quality < 0.45 {
            InsightType::Warning
        } else if quality > 0.65 {
            InsightType::Pattern
        } else {
            InsightType::Neutral
        };
        let key_insight = match insight_type {
            InsightType::Pattern => format!(
                "Well-grounded {} decision; weakest on {} ({:.2}).",
                ctx.domain,
                weakest.label(),
                weakest_score
            ),
            _ => format!(
                "Reasoning is thin on {} ({:.2}); address it before sizing up.",
                weakest.label(),
                weakest_score
            ),
        };

        Ok(Evaluation {
            scores,
            key_insight,
            insight_type,
            adjusted_confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmem_core::Domain;

    struct Scripted(&'static str);

    #[async_trait]
    impl Synthesizer for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn synthesize(&self, _prompt: &str) -> Result<String, SynthesisError> {
            Ok(self.0.to_string())
        }
    }

    fn ctx(reasoning: &str, fraction: Option<f64>) -> JudgeContext {
        JudgeContext {
            decision_id: "d".into(),
            domain: Domain::Perps,
            reasoning: reasoning.to_string(),
            amount_usd: 100.0,
            confidence: 0.6,
            position_fraction: fraction,
        }
    }

    #[tokio::test]
    async fn heuristic_rewards_grounded_reasoning() {
        let grounded = HeuristicEvaluator
            .evaluate(&ctx(
                "Waited for the breakout retest with volume confirming the trend; stop below the range, \
                 risk one percent, funding neutral so no crowding, invalidation is a close back inside",
                Some(0.04),
            ))
            .await
            .unwrap();
        let thin = HeuristicEvaluator.evaluate(&ctx("ape", Some(0.5))).await.unwrap();

        assert!(grounded.scores.quality_score() > 0.65);
        assert_eq!(grounded.insight_type, InsightType::Pattern);
        assert!(thin.scores.quality_score() < 0.45);
        assert_eq!(thin.insight_type, InsightType::Warning);
        assert!(thin.key_insight.contains("sizing"));
    }

    #[tokio::test]
    async fn llm_evaluator_parses_model_output() {
        let model = Scripted(
            r#"{"scores": {"timing": 0.5, "sizing": 0.5, "selection": 0.5, "risk_management": 0.5,
                "market_read": 0.5, "execution": 0.5}, "key_insight": "ok", "insight_type": "neutral"}"#,
        );
        let evaluator = LlmJudgeEvaluator::new(Arc::new(model));
        assert_eq!(evaluator.name(), "llm:scripted");
        let eval = evaluator.evaluate(&ctx("x", None)).await.unwrap();
        assert_eq!(eval.scores.quality_score(), 0.5);
    }

    #[tokio::test]
    async fn llm_evaluator_surfaces_garbage_as_malformed() {
        let evaluator = LlmJudgeEvaluator::new(Arc::new(Scripted("I think it was fine")));
        let err = evaluator.evaluate(&ctx("x", None)).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Malformed(_)));
    }
}
