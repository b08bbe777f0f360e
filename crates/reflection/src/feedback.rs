//! Judge feedback loop: post-hoc scoring, the inline gate, and synthesis.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use skillmem_core::{
    ClosedDecision, DecisionId, Dimension, Domain, InsightType, JudgeConfig, JudgeInsight,
    JudgeMode, ProposedDecision, TradeOutcome,
};
use skillmem_storage::{DecisionFeed, Storage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::evaluator::JudgeEvaluator;
use crate::rubric::{Evaluation, JudgeContext};

/// Why the inline gate blocked a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "value", rename_all = "snake_case")]
pub enum BlockReason {
    /// Judge quality below the block threshold
    LowQuality(f64),
    /// Judge suggested a confidence below the minimum
    LowAdjustedConfidence(f64),
    /// Position larger than the allowed fraction of balance
    OversizedPosition(f64),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::LowQuality(q) => write!(f, "quality {:.2} below threshold", q),
            BlockReason::LowAdjustedConfidence(c) => {
                write!(f, "adjusted confidence {:.2} below minimum", c)
            }
            BlockReason::OversizedPosition(p) => {
                write!(f, "position is {:.1}% of available balance", p * 100.0)
            }
        }
    }
}

/// Verdict of the inline gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether execution may go ahead
    pub should_proceed: bool,
    /// Judge quality, absent when the evaluator failed
    pub quality_score: Option<f64>,
    /// Hard blocks that fired
    pub reasons: Vec<BlockReason>,
}

/// Outcome of a `judge_pending` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeRunReport {
    /// Decisions newly judged
    pub evaluated: usize,
    /// Decisions that already had a post-hoc insight
    pub already_judged: usize,
    /// Decisions skipped because the evaluator failed; retried next run
    pub skipped: usize,
}

/// Judge accuracy in one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Insights with a known outcome
    pub resolved: usize,
    /// Of those, where the prediction matched the outcome
    pub right: usize,
}

impl Calibration {
    /// Fraction of resolved insights the judge got right.
    pub fn accuracy(&self) -> Option<f64> {
        (self.resolved > 0).then(|| self.right as f64 / self.resolved as f64)
    }
}

/// Aggregated judge context for the decision step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeSynthesis {
    /// Recurring weak dimensions
    pub key_themes: Vec<String>,
    /// Warnings from recent insights
    pub warnings_to_heed: Vec<String>,
    /// Patterns from recent insights
    pub patterns_to_follow: Vec<String>,
    /// Per-domain accuracy notes
    pub calibration_notes: Vec<String>,
    /// Raw per-domain accuracy
    pub calibration: BTreeMap<Domain, Calibration>,
}

impl JudgeSynthesis {
    /// Whether there is nothing to say.
    pub fn is_empty(&self) -> bool {
        self.key_themes.is_empty()
            && self.warnings_to_heed.is_empty()
            && self.patterns_to_follow.is_empty()
            && self.calibration_notes.is_empty()
    }

    /// Render as a prompt section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (heading, items) in [
            ("Key themes", &self.key_themes),
            ("Warnings to heed", &self.warnings_to_heed),
            ("Patterns to follow", &self.patterns_to_follow),
            ("Judge calibration", &self.calibration_notes),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n", heading));
            for item in items {
                out.push_str(&format!("- {}\n", item));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

const MAX_LISTED: usize = 5;
const WEAK_DIMENSION: f64 = 0.5;

/// Scores decisions and feeds the results back as context.
pub struct JudgeFeedbackLoop {
    storage: Arc<dyn Storage>,
    feed: Arc<dyn DecisionFeed>,
    post_hoc: Arc<dyn JudgeEvaluator>,
    inline: Arc<dyn JudgeEvaluator>,
    config: JudgeConfig,
}

impl JudgeFeedbackLoop {
    /// Create a loop. `inline` may be a cheaper evaluator than `post_hoc`.
    pub fn new(
        storage: Arc<dyn Storage>,
        feed: Arc<dyn DecisionFeed>,
        post_hoc: Arc<dyn JudgeEvaluator>,
        inline: Arc<dyn JudgeEvaluator>,
        config: JudgeConfig,
    ) -> Self {
        Self {
            storage,
            feed,
            post_hoc,
            inline,
            config,
        }
    }

    /// Judge configuration.
    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    async fn run_evaluator(
        &self,
        evaluator: &dyn JudgeEvaluator,
        ctx: &JudgeContext,
        budget: Duration,
    ) -> Option<Evaluation> {
        match tokio::time::timeout(budget, evaluator.evaluate(ctx)).await {
            Ok(Ok(evaluation)) => Some(evaluation),
            Ok(Err(e)) => {
                warn!(
                    "Judge {} failed on decision {}: {}",
                    evaluator.name(),
                    ctx.decision_id,
                    e
                );
                None
            }
            Err(_) => {
                warn!(
                    "Judge {} timed out after {:?} on decision {}",
                    evaluator.name(),
                    budget,
                    ctx.decision_id
                );
                None
            }
        }
    }

    fn build_insight(
        &self,
        ctx: &JudgeContext,
        evaluation: Evaluation,
        mode: JudgeMode,
        evaluator: &str,
    ) -> JudgeInsight {
        let quality = evaluation.scores.quality_score();
        JudgeInsight {
            decision_id: ctx.decision_id.clone(),
            domain: ctx.domain,
            scores: evaluation.scores,
            quality_score: quality,
            was_good_decision: quality >= self.config.good_decision_threshold,
            key_insight: evaluation.key_insight,
            insight_type: evaluation.insight_type,
            mode,
            evaluator: evaluator.to_string(),
            actual_outcome: None,
            judge_was_right: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Post-hoc judge one closed decision.
    ///
    /// Returns the existing insight if the decision was already judged, and
    /// `None` if the evaluator failed or timed out.
    pub async fn judge_post_hoc(&self, decision: &ClosedDecision) -> Result<Option<JudgeInsight>> {
        if let Some(existing) = self
            .storage
            .load_insight(&decision.id, JudgeMode::PostHoc)
            .await?
        {
            debug!("Decision {} already judged", decision.id);
            return Ok(Some(existing));
        }

        let ctx = JudgeContext::from(decision);
        let budget = Duration::from_secs(self.config.post_hoc_timeout_secs);
        let Some(evaluation) = self.run_evaluator(self.post_hoc.as_ref(), &ctx, budget).await else {
            return Ok(None);
        };

        let mut insight = self.build_insight(&ctx, evaluation, JudgeMode::PostHoc, self.post_hoc.name());
        insight.attach_outcome(decision.outcome);

        if !self.storage.insert_insight(&insight).await? {
            // Lost a race with another judge run; keep the stored one.
            return Ok(self
                .storage
                .load_insight(&decision.id, JudgeMode::PostHoc)
                .await?);
        }

        info!(
            "Judged decision {} ({}): quality {:.2}, right={:?}",
            decision.id, decision.domain, insight.quality_score, insight.judge_was_right
        );
        Ok(Some(insight))
    }

    /// Judge every closed decision in the lookback window that has no
    /// post-hoc insight yet.
    pub async fn judge_pending(&self, domain: Domain) -> Result<JudgeRunReport> {
        let since = chrono::Utc::now() - chrono::Duration::days(self.config.lookback_days);
        let decisions = self.feed.closed_decisions(domain, since).await?;
        let mut report = JudgeRunReport::default();

        for decision in &decisions {
            if self
                .storage
                .load_insight(&decision.id, JudgeMode::PostHoc)
                .await?
                .is_some()
            {
                report.already_judged += 1;
                continue;
            }
            match self.judge_post_hoc(decision).await? {
                Some(_) => report.evaluated += 1,
                None => report.skipped += 1,
            }
        }

        if report.evaluated > 0 || report.skipped > 0 {
            info!(
                "Judge pass for {}: {} evaluated, {} skipped",
                domain, report.evaluated, report.skipped
            );
        }
        Ok(report)
    }

    /// Record a realized outcome on the decision's insights.
    pub async fn attach_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
    ) -> Result<Vec<JudgeInsight>> {
        Ok(self.storage.attach_insight_outcome(decision_id, outcome).await?)
    }

    /// Inline gate run before execution.
    ///
    /// The position-size limit applies regardless of the judge. Evaluator
    /// failure or timeout lets the decision through.
    pub async fn gate(&self, proposal: &ProposedDecision) -> GateDecision {
        let mut reasons = Vec::new();
        let fraction = proposal.position_fraction();
        if fraction > self.config.max_position_fraction {
            reasons.push(BlockReason::OversizedPosition(fraction));
        }

        let ctx = JudgeContext::from(proposal);
        let budget = Duration::from_secs(self.config.inline_timeout_secs);
        let quality_score = match self.run_evaluator(self.inline.as_ref(), &ctx, budget).await {
            Some(evaluation) => {
                let adjusted = evaluation.adjusted_confidence;
                let insight = self.build_insight(&ctx, evaluation, JudgeMode::Inline, self.inline.name());
                let quality = insight.quality_score;

                if quality < self.config.block_quality_below {
                    reasons.push(BlockReason::LowQuality(quality));
                }
                if let Some(c) = adjusted {
                    if c < self.config.min_adjusted_confidence {
                        reasons.push(BlockReason::LowAdjustedConfidence(c));
                    }
                }

                if let Err(e) = self.storage.insert_insight(&insight).await {
                    warn!("Failed to store inline insight for {}: {}", proposal.id, e);
                }
                Some(quality)
            }
            None => {
                warn!("Inline judge unavailable for {}, failing open", proposal.id);
                None
            }
        };

        let should_proceed = reasons.is_empty();
        if !should_proceed {
            let listed: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
            info!("Blocked decision {}: {}", proposal.id, listed.join("; "));
        }
        GateDecision {
            should_proceed,
            quality_score,
            reasons,
        }
    }

    /// Aggregate recent post-hoc insights into context for the decision step.
    pub async fn synthesis(&self, domain: Option<Domain>, limit: usize) -> Result<JudgeSynthesis> {
        let limit = if limit == 0 { self.config.synthesis_window } else { limit };
        let insights = self
            .storage
            .list_insights(domain, Some(JudgeMode::PostHoc), limit)
            .await?;
        let mut synthesis = JudgeSynthesis::default();
        if insights.is_empty() {
            return Ok(synthesis);
        }

        let mut means: Vec<(Dimension, f64)> = Dimension::ALL
            .iter()
            .map(|d| {
                let total: f64 = insights.iter().map(|i| i.scores.get(*d)).sum();
                (*d, total / insights.len() as f64)
            })
            .collect();
        means.sort_by(|a, b| a.1.total_cmp(&b.1));
        synthesis.key_themes = means
            .iter()
            .filter(|(_, mean)| *mean < WEAK_DIMENSION)
            .take(3)
            .map(|(d, mean)| format!("Weak {} (avg {:.2})", d.label(), mean))
            .collect();

        for insight in &insights {
            let text = insight.key_insight.trim();
            if text.is_empty() {
                continue;
            }
            let list = match insight.insight_type {
                InsightType::Warning => &mut synthesis.warnings_to_heed,
                InsightType::Pattern => &mut synthesis.patterns_to_follow,
                InsightType::Neutral => continue,
            };
            if list.len() < MAX_LISTED && !list.iter().any(|t| t.eq_ignore_ascii_case(text)) {
                list.push(text.to_string());
            }
        }

        for insight in &insights {
            if let Some(right) = insight.judge_was_right {
                let entry = synthesis.calibration.entry(insight.domain).or_default();
                entry.resolved += 1;
                if right {
                    entry.right += 1;
                }
            }
        }
        for (domain, cal) in &synthesis.calibration {
            let Some(accuracy) = cal.accuracy() else {
                continue;
            };
            let mut note = format!(
                "{}: judge right {}/{} ({:.0}%)",
                domain,
                cal.right,
                cal.resolved,
                accuracy * 100.0
            );
            if accuracy < 0.5 {
                note.push_str("; worse than chance, weigh its warnings lightly");
            }
            synthesis.calibration_notes.push(note);
        }

        Ok(synthesis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::HeuristicEvaluator;
    use async_trait::async_trait;
    use skillmem_ai::SynthesisError;
    use skillmem_core::DimensionScores;
    use skillmem_storage::{MemoryStorage, StaticDecisionFeed};

    struct Fixed {
        quality: f64,
        adjusted: Option<f64>,
        insight_type: InsightType,
    }

    #[async_trait]
    impl JudgeEvaluator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn evaluate(&self, _ctx: &JudgeContext) -> Result<Evaluation, SynthesisError> {
            Ok(Evaluation {
                scores: DimensionScores::uniform(self.quality),
                key_insight: format!("quality was {:.1}", self.quality),
                insight_type: self.insight_type,
                adjusted_confidence: self.adjusted,
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl JudgeEvaluator for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn evaluate(&self, _ctx: &JudgeContext) -> Result<Evaluation, SynthesisError> {
            Err(SynthesisError::Transient("overloaded".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl JudgeEvaluator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn evaluate(&self, ctx: &JudgeContext) -> Result<Evaluation, SynthesisError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            HeuristicEvaluator.evaluate(ctx).await
        }
    }

    fn fixed(quality: f64) -> Arc<dyn JudgeEvaluator> {
        Arc::new(Fixed {
            quality,
            adjusted: None,
            insight_type: InsightType::Neutral,
        })
    }

    fn closed(id: &str, domain: Domain, outcome: TradeOutcome) -> ClosedDecision {
        ClosedDecision {
            id: id.into(),
            domain,
            reasoning: "entered on breakout".to_string(),
            amount_usd: 100.0,
            confidence: 0.7,
            outcome,
            realized_pnl: 0.0,
            pnl_percent: 0.0,
            closed_at: chrono::Utc::now(),
        }
    }

    fn proposal(amount: f64) -> ProposedDecision {
        ProposedDecision {
            id: "p".into(),
            domain: Domain::Perps,
            reasoning: "long".to_string(),
            amount_usd: amount,
            confidence: 0.7,
            available_balance_usd: 1000.0,
        }
    }

    fn judge_loop(
        storage: Arc<MemoryStorage>,
        feed: StaticDecisionFeed,
        post_hoc: Arc<dyn JudgeEvaluator>,
        inline: Arc<dyn JudgeEvaluator>,
    ) -> JudgeFeedbackLoop {
        let config = JudgeConfig {
            inline_timeout_secs: 1,
            ..JudgeConfig::default()
        };
        JudgeFeedbackLoop::new(storage, Arc::new(feed), post_hoc, inline, config)
    }

    #[tokio::test]
    async fn post_hoc_attaches_outcome_and_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let judge = judge_loop(storage.clone(), StaticDecisionFeed::new(), fixed(0.8), fixed(0.8));

        let decision = closed("d1", Domain::Spot, TradeOutcome::Loss);
        let insight = judge.judge_post_hoc(&decision).await.unwrap().unwrap();
        assert!(insight.was_good_decision);
        assert_eq!(insight.actual_outcome, Some(TradeOutcome::Loss));
        assert_eq!(insight.judge_was_right, Some(false));

        let again = judge.judge_post_hoc(&decision).await.unwrap().unwrap();
        assert_eq!(again.created_at, insight.created_at);
        assert_eq!(storage.list_insights(None, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn judge_pending_skips_judged_and_failed() {
        let storage = Arc::new(MemoryStorage::new());
        let feed = StaticDecisionFeed::from_decisions(vec![
            closed("a", Domain::Perps, TradeOutcome::Profit),
            closed("b", Domain::Perps, TradeOutcome::Loss),
        ]);

        let failing = judge_loop(storage.clone(), feed.clone(), Arc::new(Failing), fixed(0.5));
        let report = failing.judge_pending(Domain::Perps).await.unwrap();
        assert_eq!(report.skipped, 2);
        assert!(storage.list_insights(None, None, 10).await.unwrap().is_empty());

        let working = judge_loop(storage.clone(), feed, fixed(0.3), fixed(0.5));
        let report = working.judge_pending(Domain::Perps).await.unwrap();
        assert_eq!(report.evaluated, 2);
        let report = working.judge_pending(Domain::Perps).await.unwrap();
        assert_eq!((report.evaluated, report.already_judged), (0, 2));
    }

    #[tokio::test]
    async fn gate_blocks_on_each_hard_limit() {
        let storage = Arc::new(MemoryStorage::new());
        let feed = StaticDecisionFeed::new();

        let low = judge_loop(storage.clone(), feed.clone(), fixed(0.5), fixed(0.3));
        let verdict = low.gate(&proposal(100.0)).await;
        assert!(!verdict.should_proceed);
        assert!(matches!(verdict.reasons[..], [BlockReason::LowQuality(_)]));

        let timid = Arc::new(Fixed {
            quality: 0.8,
            adjusted: Some(0.4),
            insight_type: InsightType::Neutral,
        });
        let verdict = judge_loop(storage.clone(), feed.clone(), fixed(0.5), timid)
            .gate(&proposal(100.0))
            .await;
        assert!(matches!(verdict.reasons[..], [BlockReason::LowAdjustedConfidence(_)]));

        let ok = judge_loop(storage.clone(), feed.clone(), fixed(0.5), fixed(0.8));
        let verdict = ok.gate(&proposal(250.0)).await;
        assert!(!verdict.should_proceed);
        assert!(matches!(verdict.reasons[..], [BlockReason::OversizedPosition(_)]));

        let verdict = ok.gate(&proposal(200.0)).await;
        assert!(verdict.should_proceed);
        assert!(verdict.quality_score.is_some_and(|q| (q - 0.8).abs() < 1e-9));
        assert!(storage
            .load_insight(&"p".into(), JudgeMode::Inline)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn gate_fails_open_on_error_and_timeout() {
        let storage = Arc::new(MemoryStorage::new());
        let feed = StaticDecisionFeed::new();

        let verdict = judge_loop(storage.clone(), feed.clone(), fixed(0.5), Arc::new(Failing))
            .gate(&proposal(100.0))
            .await;
        assert!(verdict.should_proceed);
        assert_eq!(verdict.quality_score, None);

        let verdict = judge_loop(storage.clone(), feed.clone(), fixed(0.5), Arc::new(Slow))
            .gate(&proposal(100.0))
            .await;
        assert!(verdict.should_proceed);

        // The size limit does not depend on the judge.
        let verdict = judge_loop(storage, feed, fixed(0.5), Arc::new(Failing))
            .gate(&proposal(500.0))
            .await;
        assert!(!verdict.should_proceed);
    }

    #[tokio::test]
    async fn synthesis_collects_lessons_and_calibration() {
        let storage = Arc::new(MemoryStorage::new());
        let warning: Arc<dyn JudgeEvaluator> = Arc::new(Fixed {
            quality: 0.3,
            adjusted: None,
            insight_type: InsightType::Warning,
        });
        let judge = judge_loop(storage.clone(), StaticDecisionFeed::new(), warning, fixed(0.5));

        // Predicted bad each time: right on losses, wrong on the profit.
        for (id, outcome) in [
            ("a", TradeOutcome::Loss),
            ("b", TradeOutcome::Loss),
            ("c", TradeOutcome::Profit),
        ] {
            judge
                .judge_post_hoc(&closed(id, Domain::Dlmm, outcome))
                .await
                .unwrap();
        }

        let synthesis = judge.synthesis(Some(Domain::Dlmm), 0).await.unwrap();
        assert_eq!(synthesis.key_themes.len(), 3);
        assert_eq!(synthesis.warnings_to_heed, vec!["quality was 0.3".to_string()]);
        assert!(synthesis.patterns_to_follow.is_empty());
        let cal = synthesis.calibration[&Domain::Dlmm];
        assert_eq!((cal.right, cal.resolved), (2, 3));
        assert!(synthesis.calibration_notes[0].contains("2/3"));
        assert!(synthesis.render().contains("## Warnings to heed"));

        let empty = judge.synthesis(Some(Domain::Spot), 5).await.unwrap();
        assert!(empty.is_empty());
    }
}
