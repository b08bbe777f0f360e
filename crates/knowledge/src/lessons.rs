//! Turning large wins and losses into skill candidates.

use skillmem_core::{
    ClosedDecision, InsightType, JudgeInsight, LessonConfig, SkillPolicy, SkillRecord, SkillType,
};

use skillmem_ai::truncate_chars as truncate;

/// Longest title derived from decision reasoning.
const MAX_TITLE_CHARS: usize = 72;

/// Derives skill candidates from closed decisions.
#[derive(Debug, Clone)]
pub struct LessonExtractor {
    config: LessonConfig,
    policy: SkillPolicy,
}

/// First sentence of the reasoning, without markup.
fn headline(reasoning: &str) -> String {
    let first = reasoning
        .split(|c: char| c == '.' || c == '\n' || c == '!' || c == '?')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("");
    truncate(&first.replace("**", "").replace("__", ""), MAX_TITLE_CHARS)
}

impl LessonExtractor {
    /// Create an extractor.
    pub fn new(config: LessonConfig, policy: SkillPolicy) -> Self {
        Self { config, policy }
    }

    /// Skill type a realized pnl calls for, if any.
    pub fn lesson_type(&self, pnl_percent: f64) -> Option<SkillType> {
        if pnl_percent <= self.config.loss_threshold_pct {
            Some(SkillType::Warning)
        } else if pnl_percent >= self.config.win_threshold_pct {
            Some(SkillType::Pattern)
        } else {
            None
        }
    }

    /// Build a candidate from a decision and, if available, its judge insight.
    ///
    /// Returns None for outcomes inside the thresholds.
    pub fn extract(
        &self,
        decision: &ClosedDecision,
        pnl_percent: f64,
        insight: Option<&JudgeInsight>,
    ) -> Option<SkillRecord> {
        let skill_type = self.lesson_type(pnl_percent)?;
        let headline = headline(&decision.reasoning);
        let subject = if headline.is_empty() {
            format!("{} trade", decision.domain)
        } else {
            headline
        };

        let (title, lead) = match skill_type {
            SkillType::Warning => (
                format!("Avoid: {}", subject),
                format!("- **{}** lost {:.1}% in {}", subject.to_lowercase(), pnl_percent.abs(), decision.domain),
            ),
            _ => (
                format!("Repeat: {}", subject),
                format!("- **{}** gained {:.1}% in {}", subject.to_lowercase(), pnl_percent, decision.domain),
            ),
        };

        let mut body = lead;
        body.push_str(&format!(
            "\n- Stated confidence {:.0}% on a ${:.0} position",
            decision.confidence * 100.0,
            decision.amount_usd
        ));
        if let Some(insight) = insight.filter(|i| !i.key_insight.trim().is_empty()) {
            let (dimension, score) = insight.scores.weakest();
            body.push_str(&format!("\n- Judge: {}", insight.key_insight.trim()));
            if insight.insight_type != InsightType::Neutral {
                body.push_str(&format!("\n- Weakest dimension: {} ({:.2})", dimension.label(), score));
            }
        }

        Some(
            SkillRecord::new(decision.domain, skill_type, title, body, &self.policy)
                .with_sources([decision.id.clone()]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmem_core::{DecisionId, DimensionScores, Domain, JudgeMode, TradeOutcome};

    fn decision(pnl: f64) -> ClosedDecision {
        ClosedDecision {
            id: "dlmm-1".into(),
            domain: Domain::Dlmm,
            reasoning: "Wide range on a **volatile pair**. Fees looked rich.".to_string(),
            amount_usd: 500.0,
            confidence: 0.8,
            outcome: TradeOutcome::from_pnl(pnl),
            realized_pnl: pnl * 5.0,
            pnl_percent: pnl,
            closed_at: chrono::Utc::now(),
        }
    }

    fn extractor() -> LessonExtractor {
        LessonExtractor::new(LessonConfig::default(), SkillPolicy::default())
    }

    #[test]
    fn big_loss_yields_warning() {
        let skill = extractor().extract(&decision(-15.0), -15.0, None).unwrap();
        assert_eq!(skill.skill_type, SkillType::Warning);
        assert_eq!(skill.ttl_days, 60);
        assert_eq!(skill.domain, Domain::Dlmm);
        assert_eq!(skill.title, "Avoid: Wide range on a volatile pair");
        assert!(skill.body.starts_with("- **wide range on a volatile pair** lost 15.0% in dlmm"));
        assert_eq!(skill.source_decision_ids, vec![DecisionId::from("dlmm-1")]);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let e = extractor();
        assert_eq!(e.lesson_type(-10.0), Some(SkillType::Warning));
        assert_eq!(e.lesson_type(10.0), Some(SkillType::Pattern));
        assert_eq!(e.lesson_type(-9.9), None);
        assert!(e.extract(&decision(3.0), 3.0, None).is_none());
    }

    #[test]
    fn judge_insight_is_folded_in() {
        let mut scores = DimensionScores::uniform(0.7);
        scores.sizing = 0.2;
        let insight = JudgeInsight {
            decision_id: "dlmm-1".into(),
            domain: Domain::Dlmm,
            scores,
            quality_score: scores.quality_score(),
            was_good_decision: false,
            key_insight: "Position was oversized for the volatility.".to_string(),
            insight_type: InsightType::Warning,
            mode: JudgeMode::PostHoc,
            evaluator: "heuristic".to_string(),
            actual_outcome: None,
            judge_was_right: None,
            created_at: chrono::Utc::now(),
        };
        let skill = extractor().extract(&decision(20.0), 20.0, Some(&insight)).unwrap();
        assert_eq!(skill.skill_type, SkillType::Pattern);
        assert!(skill.body.contains("- Judge: Position was oversized"));
        assert!(skill.body.contains("Weakest dimension: sizing (0.20)"));
    }
}
