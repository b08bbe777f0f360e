//! Judge insights - scored evaluations of trading decisions.

use serde::{Deserialize, Serialize};
use crate::domain::Domain;
use crate::id::DecisionId;
use crate::recommendation::TradeOutcome;
use crate::Time;

/// The six fixed rubric dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Entry/exit timing
    Timing,
    /// Position sizing
    Sizing,
    /// Asset/market selection
    Selection,
    /// Stops, exposure, downside control
    RiskManagement,
    /// Reading of market conditions
    MarketRead,
    /// Execution quality
    Execution,
}

impl Dimension {
    /// Rubric order.
    pub const ALL: [Dimension; 6] = [
        Dimension::Timing,
        Dimension::Sizing,
        Dimension::Selection,
        Dimension::RiskManagement,
        Dimension::MarketRead,
        Dimension::Execution,
    ];

    /// snake_case key, as used in evaluator responses.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Timing => "timing",
            Dimension::Sizing => "sizing",
            Dimension::Selection => "selection",
            Dimension::RiskManagement => "risk_management",
            Dimension::MarketRead => "market_read",
            Dimension::Execution => "execution",
        }
    }

    /// Human label.
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Timing => "timing",
            Dimension::Sizing => "sizing",
            Dimension::Selection => "selection",
            Dimension::RiskManagement => "risk management",
            Dimension::MarketRead => "market read",
            Dimension::Execution => "execution",
        }
    }
}

/// Scores in [0, 1] for each rubric dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionScores {
    /// Timing
    pub timing: f64,
    /// Sizing
    pub sizing: f64,
    /// Selection
    pub selection: f64,
    /// Risk management
    pub risk_management: f64,
    /// Market read
    pub market_read: f64,
    /// Execution
    pub execution: f64,
}

impl DimensionScores {
    /// Same score on every dimension.
    pub fn uniform(score: f64) -> Self {
        let s = score.clamp(0.0, 1.0);
        Self {
            timing: s,
            sizing: s,
            selection: s,
            risk_management: s,
            market_read: s,
            execution: s,
        }
    }

    /// Score of one dimension.
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Timing => self.timing,
            Dimension::Sizing => self.sizing,
            Dimension::Selection => self.selection,
            Dimension::RiskManagement => self.risk_management,
            Dimension::MarketRead => self.market_read,
            Dimension::Execution => self.execution,
        }
    }

    /// Set one dimension, clamped to [0, 1].
    pub fn set(&mut self, dimension: Dimension, score: f64) {
        let s = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        match dimension {
            Dimension::Timing => self.timing = s,
            Dimension::Sizing => self.sizing = s,
            Dimension::Selection => self.selection = s,
            Dimension::RiskManagement => self.risk_management = s,
            Dimension::MarketRead => self.market_read = s,
            Dimension::Execution => self.execution = s,
        }
    }

    /// Unweighted mean of the six dimensions.
    pub fn quality_score(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum::<f64>() / Dimension::ALL.len() as f64
    }

    /// The lowest-scoring dimension.
    pub fn weakest(&self) -> (Dimension, f64) {
        Dimension::ALL
            .iter()
            .map(|d| (*d, self.get(*d)))
            .fold((Dimension::Timing, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc })
    }
}

/// Kind of lesson a judge insight carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    /// Something to avoid
    Warning,
    /// Something worth repeating
    Pattern,
    /// Nothing actionable
    Neutral,
}

impl std::str::FromStr for InsightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warning" => Ok(InsightType::Warning),
            "pattern" => Ok(InsightType::Pattern),
            "neutral" | "" => Ok(InsightType::Neutral),
            other => Err(format!("unknown insight type: {}", other)),
        }
    }
}

/// When the judge ran relative to execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    /// After the outcome is known (learning)
    PostHoc,
    /// Before execution (gating)
    Inline,
}

/// Evaluation of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeInsight {
    /// Evaluated decision
    pub decision_id: DecisionId,

    /// Domain of the decision
    pub domain: Domain,

    /// Per-dimension scores
    pub scores: DimensionScores,

    /// Aggregate score
    pub quality_score: f64,

    /// The judge's prediction
    pub was_good_decision: bool,

    /// One-sentence lesson
    pub key_insight: String,

    /// Kind of lesson
    pub insight_type: InsightType,

    /// Mode that produced this insight
    pub mode: JudgeMode,

    /// Evaluator that produced the scores
    pub evaluator: String,

    /// Realized outcome, once known
    #[serde(default)]
    pub actual_outcome: Option<TradeOutcome>,

    /// Whether the prediction sign matched the outcome sign
    #[serde(default)]
    pub judge_was_right: Option<bool>,

    /// Created at
    pub created_at: Time,
}

impl JudgeInsight {
    /// Attach the realized outcome and derive judge_was_right.
    pub fn attach_outcome(&mut self, outcome: TradeOutcome) {
        if !outcome.is_resolved() {
            return;
        }
        self.actual_outcome = Some(outcome);
        self.judge_was_right = Some(self.was_good_decision == (outcome == TradeOutcome::Profit));
    }
}
