//! Views of trading decisions owned by the decision loop.

use serde::{Deserialize, Serialize};
use crate::domain::Domain;
use crate::id::DecisionId;
use crate::recommendation::TradeOutcome;
use crate::Time;

/// A decision whose position has closed. Read-only to this subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedDecision {
    /// Decision id
    pub id: DecisionId,

    /// Domain the decision was made in
    pub domain: Domain,

    /// Free-text reasoning stated by the decision step
    pub reasoning: String,

    /// Position size in USD
    pub amount_usd: f64,

    /// Stated confidence in [0, 1]
    pub confidence: f64,

    /// Realized outcome
    pub outcome: TradeOutcome,

    /// Realized pnl in USD
    pub realized_pnl: f64,

    /// Realized pnl as a percentage of the position
    pub pnl_percent: f64,

    /// When the position closed
    pub closed_at: Time,
}

/// A decision about to be executed, as seen by the inline judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedDecision {
    /// Decision id
    pub id: DecisionId,

    /// Domain
    pub domain: Domain,

    /// Reasoning
    pub reasoning: String,

    /// Intended position size in USD
    pub amount_usd: f64,

    /// Stated confidence in [0, 1]
    pub confidence: f64,

    /// Balance available to the domain, in USD
    pub available_balance_usd: f64,
}

impl ProposedDecision {
    /// Position size as a fraction of the available balance.
    ///
    /// A non-positive balance yields infinity so any size trips the limit.
    pub fn position_fraction(&self) -> f64 {
        if self.available_balance_usd <= 0.0 {
            return f64::INFINITY;
        }
        self.amount_usd / self.available_balance_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_fraction_against_balance() {
        let mut d = ProposedDecision {
            id: "p".into(),
            domain: Domain::Perps,
            reasoning: String::new(),
            amount_usd: 250.0,
            confidence: 0.7,
            available_balance_usd: 1000.0,
        };
        assert!((d.position_fraction() - 0.25).abs() < 1e-9);
        d.available_balance_usd = 0.0;
        assert!(d.position_fraction().is_infinite());
    }
}
