//! Read-only access to decisions owned by the trading loop.

use async_trait::async_trait;
use skillmem_core::{ClosedDecision, DecisionId, Domain, Time};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::trait_::Result;

/// Source of closed (resolved) decisions.
///
/// The lifecycle engine never writes decisions; it only reads them to judge
/// them and to mine cross-domain patterns.
#[async_trait]
pub trait DecisionFeed: Send + Sync {
    /// Decisions of a domain closed at or after `since`, newest first.
    async fn closed_decisions(&self, domain: Domain, since: Time) -> Result<Vec<ClosedDecision>>;

    /// Look up one closed decision.
    async fn find_decision(&self, id: &DecisionId) -> Result<Option<ClosedDecision>>;
}

/// A feed backed by an in-process list.
///
/// Used by tests, by the CLI when reading exported decisions from a file, and
/// by hosts that push decisions as they close.
#[derive(Clone, Default)]
pub struct StaticDecisionFeed {
    decisions: Arc<RwLock<Vec<ClosedDecision>>>,
}

impl StaticDecisionFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feed from a list of decisions.
    pub fn from_decisions(decisions: Vec<ClosedDecision>) -> Self {
        Self {
            decisions: Arc::new(RwLock::new(decisions)),
        }
    }

    /// Load decisions from a JSON array file.
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let decisions: Vec<ClosedDecision> = serde_json::from_str(&content)?;
        Ok(Self::from_decisions(decisions))
    }

    /// Add a closed decision, replacing any previous one with the same id.
    pub async fn push(&self, decision: ClosedDecision) {
        let mut decisions = self.decisions.write().await;
        decisions.retain(|d| d.id != decision.id);
        decisions.push(decision);
    }

    /// Number of decisions held.
    pub async fn len(&self) -> usize {
        self.decisions.read().await.len()
    }

    /// Whether the feed is empty.
    pub async fn is_empty(&self) -> bool {
        self.decisions.read().await.is_empty()
    }
}

#[async_trait]
impl DecisionFeed for StaticDecisionFeed {
    async fn closed_decisions(&self, domain: Domain, since: Time) -> Result<Vec<ClosedDecision>> {
        let decisions = self.decisions.read().await;
        let mut matching: Vec<_> = decisions
            .iter()
            .filter(|d| d.domain == domain && d.closed_at >= since && d.outcome.is_resolved())
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        Ok(matching)
    }

    async fn find_decision(&self, id: &DecisionId) -> Result<Option<ClosedDecision>> {
        let decisions = self.decisions.read().await;
        Ok(decisions.iter().find(|d| &d.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmem_core::TradeOutcome;

    fn decision(id: &str, domain: Domain, days_ago: i64) -> ClosedDecision {
        ClosedDecision {
            id: id.into(),
            domain,
            reasoning: "entry on breakout".to_string(),
            amount_usd: 100.0,
            confidence: 0.7,
            outcome: TradeOutcome::Profit,
            realized_pnl: 5.0,
            pnl_percent: 5.0,
            closed_at: chrono::Utc::now() - chrono::Duration::days(days_ago),
        }
    }

    #[tokio::test]
    async fn closed_decisions_are_newest_first_and_scoped() {
        let feed = StaticDecisionFeed::from_decisions(vec![
            decision("old", Domain::Perps, 30),
            decision("new", Domain::Perps, 1),
            decision("other", Domain::Spot, 1),
            decision("ancient", Domain::Perps, 400),
        ]);

        let since = chrono::Utc::now() - chrono::Duration::days(90);
        let got = feed.closed_decisions(Domain::Perps, since).await.unwrap();
        let ids: Vec<_> = got.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn push_replaces_same_id() {
        let feed = StaticDecisionFeed::new();
        feed.push(decision("d1", Domain::Dlmm, 1)).await;
        let mut updated = decision("d1", Domain::Dlmm, 0);
        updated.pnl_percent = -15.0;
        feed.push(updated).await;

        assert_eq!(feed.len().await, 1);
        let found = feed.find_decision(&"d1".into()).await.unwrap().unwrap();
        assert_eq!(found.pnl_percent, -15.0);
    }
}
