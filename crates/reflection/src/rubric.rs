//! The six-dimension judging rubric: prompt and response parsing.

use serde::Deserialize;
use skillmem_ai::SynthesisError;
use skillmem_core::{
    ClosedDecision, DecisionId, Dimension, DimensionScores, Domain, InsightType, ProposedDecision,
};

/// What the judge sees of a decision. Never includes the realized outcome,
/// so post-hoc scores are not biased by hindsight.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeContext {
    /// Decision id
    pub decision_id: DecisionId,
    /// Domain
    pub domain: Domain,
    /// Stated reasoning
    pub reasoning: String,
    /// Position size in USD
    pub amount_usd: f64,
    /// Stated confidence in [0, 1]
    pub confidence: f64,
    /// Position size over available balance, when known
    pub position_fraction: Option<f64>,
}

impl From<&ClosedDecision> for JudgeContext {
    fn from(d: &ClosedDecision) -> Self {
        Self {
            decision_id: d.id.clone(),
            domain: d.domain,
            reasoning: d.reasoning.clone(),
            amount_usd: d.amount_usd,
            confidence: d.confidence,
            position_fraction: None,
        }
    }
}

impl From<&ProposedDecision> for JudgeContext {
    fn from(d: &ProposedDecision) -> Self {
        let fraction = d.position_fraction();
        Self {
            decision_id: d.id.clone(),
            domain: d.domain,
            reasoning: d.reasoning.clone(),
            amount_usd: d.amount_usd,
            confidence: d.confidence,
            position_fraction: fraction.is_finite().then_some(fraction),
        }
    }
}

/// An evaluator's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Per-dimension scores
    pub scores: DimensionScores,
    /// One-sentence lesson
    pub key_insight: String,
    /// Kind of lesson
    pub insight_type: InsightType,
    /// Confidence the judge would have stated instead, if it suggests one
    pub adjusted_confidence: Option<f64>,
}

/// Build the scoring prompt.
pub fn scoring_prompt(ctx: &JudgeContext) -> String {
    let mut prompt = format!(
        "You are reviewing a trading decision in the {} domain. Score the decision process, \
         not the result.\n\n\
         Reasoning:\n{}\n\n\
         Position: ${:.2} at stated confidence {:.2}",
        ctx.domain,
        ctx.reasoning.trim(),
        ctx.amount_usd,
        ctx.confidence
    );
    if let Some(fraction) = ctx.position_fraction {
        prompt.push_str(&format!(" ({:.1}% of available balance)", fraction * 100.0));
    }
    prompt.push_str("\n\nScore each dimension from 0.0 to 1.0:\n");
    for dimension in Dimension::ALL {
        prompt.push_str(&format!("- {}\n", dimension.key()));
    }
    prompt.push_str(
        "\nRespond with JSON only:\n\
         {\"scores\": {\"timing\": 0.0, \"sizing\": 0.0, \"selection\": 0.0, \"risk_management\": 0.0, \
         \"market_read\": 0.0, \"execution\": 0.0}, \"key_insight\": \"one sentence\", \
         \"insight_type\": \"warning|pattern|neutral\", \"adjusted_confidence\": 0.0}",
    );
    prompt
}

#[derive(Deserialize)]
struct RawEvaluation {
    scores: std::collections::HashMap<String, f64>,
    #[serde(default)]
    key_insight: String,
    #[serde(default)]
    insight_type: String,
    #[serde(default)]
    adjusted_confidence: Option<f64>,
}

/// Parse an evaluator response.
///
/// The JSON object may be wrapped in prose or a code fence; every rubric
/// dimension must be present.
pub fn parse_evaluation(text: &str) -> Result<Evaluation, SynthesisError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(SynthesisError::Malformed("no JSON object in response".to_string())),
    };

    let raw: RawEvaluation =
        serde_json::from_str(json).map_err(|e| SynthesisError::Malformed(e.to_string()))?;

    let mut scores = DimensionScores::default();
    for dimension in Dimension::ALL {
        let value = raw
            .scores
            .get(dimension.key())
            .copied()
            .ok_or_else(|| SynthesisError::Malformed(format!("missing score for {}", dimension.key())))?;
        scores.set(dimension, value);
    }

    let insight_type = raw.insight_type.parse().unwrap_or(InsightType::Neutral);
    Ok(Evaluation {
        scores,
        key_insight: raw.key_insight.trim().to_string(),
        insight_type,
        adjusted_confidence: raw.adjusted_confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0)),
    })
}
