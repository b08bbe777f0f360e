//! Links between decisions and the skills offered to them.

use serde::{Deserialize, Serialize};
use crate::id::{DecisionId, SkillId};
use crate::Time;

/// One skill offered to one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecommendation {
    /// Decision the skill was offered to
    pub decision_id: DecisionId,

    /// Offered skill
    pub skill_id: SkillId,

    /// Retrieval relevance at offer time
    pub relevance_score: f64,

    /// Always true: the row exists because the skill was offered
    pub was_presented: bool,

    /// Whether the decision's reasoning actually used the skill
    pub was_applied: bool,

    /// How usage was detected
    pub match_type: MatchType,

    /// Confidence of the detection
    pub detection_confidence: f64,

    /// Outcome of the decision, once known
    pub trade_outcome: TradeOutcome,

    /// Applied and the trade was profitable
    pub contributed_to_success: bool,

    /// Created at
    pub created_at: Time,

    /// When the outcome was recorded
    #[serde(default)]
    pub resolved_at: Option<Time>,
}

impl SkillRecommendation {
    /// New row at decision time.
    pub fn new(decision_id: DecisionId, skill_id: SkillId, relevance_score: f64) -> Self {
        Self {
            decision_id,
            skill_id,
            relevance_score,
            was_presented: true,
            was_applied: false,
            match_type: MatchType::None,
            detection_confidence: 0.0,
            trade_outcome: TradeOutcome::Pending,
            contributed_to_success: false,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        }
    }

    /// Whether the outcome has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Record the outcome. Returns false if it was already recorded.
    pub fn resolve(&mut self, outcome: TradeOutcome, at: Time) -> bool {
        if self.is_resolved() || outcome == TradeOutcome::Pending {
            return false;
        }
        self.trade_outcome = outcome;
        self.contributed_to_success = self.was_applied && outcome == TradeOutcome::Profit;
        self.resolved_at = Some(at);
        true
    }
}

/// How a skill's usage was detected in decision reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Reasoning names the skill
    Explicit,
    /// Reasoning repeats enough key phrases of the skill body
    Implicit,
    /// No usage detected
    None,
}

impl MatchType {
    /// Detection confidence attached to this match type.
    pub fn confidence(&self) -> f64 {
        match self {
            MatchType::Explicit => 0.95,
            MatchType::Implicit => 0.6,
            MatchType::None => 0.0,
        }
    }
}

/// Realized outcome of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    /// Closed in profit
    Profit,
    /// Closed at a loss
    Loss,
    /// Not closed yet
    Pending,
}

impl TradeOutcome {
    /// Classify a realized pnl; zero counts as a loss.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            TradeOutcome::Profit
        } else {
            TradeOutcome::Loss
        }
    }

    /// Whether this is a realized (non-pending) outcome.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, TradeOutcome::Pending)
    }
}

impl std::str::FromStr for TradeOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "profit" | "win" => Ok(TradeOutcome::Profit),
            "loss" | "lose" => Ok(TradeOutcome::Loss),
            "pending" => Ok(TradeOutcome::Pending),
            other => Err(format!("unknown trade outcome: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exactly_once() {
        let mut rec = SkillRecommendation::new("d1".into(), SkillId::new(), 0.8);
        rec.was_applied = true;
        let now = chrono::Utc::now();
        assert!(rec.resolve(TradeOutcome::Profit, now));
        assert!(rec.contributed_to_success);
        assert!(!rec.resolve(TradeOutcome::Loss, now));
        assert_eq!(rec.trade_outcome, TradeOutcome::Profit);
    }

    #[test]
    fn unapplied_skill_never_contributes() {
        let mut rec = SkillRecommendation::new("d2".into(), SkillId::new(), 0.5);
        rec.resolve(TradeOutcome::Profit, chrono::Utc::now());
        assert!(!rec.contributed_to_success);
    }
}
