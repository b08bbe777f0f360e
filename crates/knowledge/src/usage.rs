//! Usage tracking: which offered skills a decision actually applied.

use anyhow::Result;
use regex::Regex;
use skillmem_core::{
    DecisionId, MatchType, SkillId, SkillPolicy, SkillRecommendation, SkillRecord, Time, TradeOutcome,
};
use skillmem_storage::Storage;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::phrases::{count_phrase_hits, extract_key_phrases};

/// Key-phrase hits needed for an implicit match.
pub const IMPLICIT_MIN_HITS: usize = 3;

/// Verbs and prepositions that refer to a named lesson.
const REFERENTIAL: &str = r"applying|apply|applied|based on|following|follow|followed|per|using|used|according to|heeding|respecting";

/// Result of usage detection for one skill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// How usage was detected
    pub match_type: MatchType,
    /// Confidence attached to the match type
    pub confidence: f64,
}

impl Detection {
    fn of(match_type: MatchType) -> Self {
        Self {
            match_type,
            confidence: match_type.confidence(),
        }
    }

    /// Copy the detection onto a recommendation row.
    fn applied_to(&self, mut rec: SkillRecommendation) -> SkillRecommendation {
        rec.was_applied = self.was_applied();
        rec.match_type = self.match_type;
        rec.detection_confidence = self.confidence;
        rec
    }

    /// Whether the skill counts as applied.
    pub fn was_applied(&self) -> bool {
        self.match_type != MatchType::None
    }
}

/// Build the explicit-reference pattern for a title.
///
/// Matches the title in quotes, or right after a referential verb
/// ("applying", "based on", ...), optionally quoted.
fn explicit_regex(title: &str) -> Option<Regex> {
    let words: Vec<String> = title.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    let name = words.join(r"\s+");
    let quote_open = r#"["'`‘“]"#;
    let quote_close = r#"["'`’”]"#;
    let pattern = format!(
        r"(?i){qo}\s*{name}\s*{qc}|\b(?:{verbs})\s+(?:the\s+)?(?:(?:skill|lesson|rule)\s+)?{qo}?\s*{name}(?:\W|$)",
        qo = quote_open,
        qc = quote_close,
        name = name,
        verbs = REFERENTIAL,
    );
    Regex::new(&pattern).ok()
}

/// Detect whether `reasoning` used `skill`.
pub fn detect_usage(skill: &SkillRecord, reasoning: &str) -> Detection {
    if let Some(re) = explicit_regex(&skill.title) {
        if re.is_match(reasoning) {
            return Detection::of(MatchType::Explicit);
        }
    }

    let phrases = extract_key_phrases(&skill.body);
    if count_phrase_hits(&phrases, reasoning) >= IMPLICIT_MIN_HITS {
        return Detection::of(MatchType::Implicit);
    }

    Detection::of(MatchType::None)
}

/// Summary of one decision's resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Recommendations resolved by this call
    pub resolved: usize,
    /// Applied skills whose counters were updated
    pub applied: Vec<SkillId>,
    /// Applied skill ids with no skill row behind them
    pub missing: Vec<SkillId>,
}

/// Links decisions to the skills offered to them and feeds outcomes back.
#[derive(Clone)]
pub struct UsageTracker {
    storage: Arc<dyn Storage>,
    policy: SkillPolicy,
}

impl UsageTracker {
    /// Create a tracker.
    pub fn new(storage: Arc<dyn Storage>, policy: SkillPolicy) -> Self {
        Self { storage, policy }
    }

    /// Record that a skill was offered to a decision.
    ///
    /// Returns false if the pair was already recorded.
    pub async fn record_recommendation(
        &self,
        decision_id: DecisionId,
        skill_id: SkillId,
        relevance: f64,
    ) -> Result<bool> {
        let rec = SkillRecommendation::new(decision_id, skill_id, relevance);
        let inserted = self.storage.insert_recommendation(&rec).await?;
        if !inserted {
            debug!("Recommendation {}/{} already recorded", rec.decision_id, skill_id);
        }
        Ok(inserted)
    }

    /// Run detection over the decision's reasoning for each offered skill.
    ///
    /// Missing recommendation rows are created (relevance 0). Rows already
    /// resolved are left untouched.
    pub async fn track_usage(
        &self,
        decision_id: &DecisionId,
        reasoning: &str,
        skills: &[SkillRecord],
    ) -> Result<Vec<SkillRecommendation>> {
        let mut tracked = Vec::with_capacity(skills.len());
        for skill in skills {
            let detection = detect_usage(skill, reasoning);
            let mut existing = self.storage.load_recommendation(decision_id, skill.id).await?;

            if existing.is_none() {
                let fresh = detection.applied_to(SkillRecommendation::new(decision_id.clone(), skill.id, 0.0));
                if self.storage.insert_recommendation(&fresh).await? {
                    tracked.push(fresh);
                    continue;
                }
                // A concurrent record_recommendation created the row first.
                existing = self.storage.load_recommendation(decision_id, skill.id).await?;
            }

            let rec = match existing {
                Some(rec) if rec.is_resolved() => rec,
                Some(rec) => {
                    let rec = detection.applied_to(rec);
                    self.storage.update_recommendation(&rec).await?;
                    rec
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "recommendation {}/{} vanished while tracking",
                        decision_id,
                        skill.id
                    ))
                }
            };
            debug!(
                "Skill {} on decision {}: {:?} ({:.2})",
                skill.id, decision_id, detection.match_type, detection.confidence
            );
            tracked.push(rec);
        }
        Ok(tracked)
    }

    /// Record the outcome of a decision on its recommendations and count one
    /// application on every skill that was applied.
    ///
    /// Each recommendation resolves at most once; a repeated call is a no-op.
    /// On error nothing is resolved, so calling again is safe.
    pub async fn resolve(&self, decision_id: &DecisionId, outcome: TradeOutcome, at: Time) -> Result<Resolution> {
        let outcome_rows = self
            .storage
            .resolve_and_apply(decision_id, outcome, at, &self.policy)
            .await?;

        for skill in outcome_rows.counted.iter().filter(|s| s.excluded_from_retrieval) {
            debug!(
                "Skill {} excluded from retrieval ({} applied, {:?} success)",
                skill.id, skill.times_applied, skill.success_rate
            );
        }
        for id in &outcome_rows.missing {
            warn!("Decision {} applied unknown skill {}; not counted", decision_id, id);
        }

        Ok(Resolution {
            resolved: outcome_rows.resolved.len(),
            applied: outcome_rows.counted.iter().map(|s| s.id).collect(),
            missing: outcome_rows.missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skillmem_core::{
        BucketKey, Domain, JudgeInsight, JudgeMode, SkillFilter, SkillType,
    };
    use skillmem_storage::{AppliedOutcome, BucketCommit, MemoryStorage, StorageError};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory storage with switchable faults.
    #[derive(Default)]
    struct Faulty {
        inner: MemoryStorage,
        fail_next_resolve: AtomicBool,
        hide_next_load: AtomicBool,
    }

    #[async_trait]
    impl Storage for Faulty {
        async fn load_skill(&self, id: SkillId) -> skillmem_storage::Result<Option<SkillRecord>> {
            self.inner.load_skill(id).await
        }
        async fn list_skills(&self, filter: &SkillFilter) -> skillmem_storage::Result<Vec<SkillRecord>> {
            self.inner.list_skills(filter).await
        }
        async fn count_skills(&self) -> skillmem_storage::Result<usize> {
            self.inner.count_skills().await
        }
        async fn bucket_version(&self, bucket: BucketKey) -> skillmem_storage::Result<u64> {
            self.inner.bucket_version(bucket).await
        }
        async fn commit_bucket(&self, commit: &BucketCommit) -> skillmem_storage::Result<u64> {
            self.inner.commit_bucket(commit).await
        }
        async fn record_application(
            &self,
            id: SkillId,
            successful: bool,
            policy: &SkillPolicy,
        ) -> skillmem_storage::Result<SkillRecord> {
            self.inner.record_application(id, successful, policy).await
        }
        async fn expire_due(&self, now: Time) -> skillmem_storage::Result<Vec<SkillId>> {
            self.inner.expire_due(now).await
        }
        async fn insert_recommendation(&self, rec: &SkillRecommendation) -> skillmem_storage::Result<bool> {
            self.inner.insert_recommendation(rec).await
        }
        async fn update_recommendation(&self, rec: &SkillRecommendation) -> skillmem_storage::Result<()> {
            self.inner.update_recommendation(rec).await
        }
        async fn load_recommendation(
            &self,
            decision_id: &DecisionId,
            skill_id: SkillId,
        ) -> skillmem_storage::Result<Option<SkillRecommendation>> {
            if self.hide_next_load.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.load_recommendation(decision_id, skill_id).await
        }
        async fn list_recommendations(
            &self,
            decision_id: Option<&DecisionId>,
        ) -> skillmem_storage::Result<Vec<SkillRecommendation>> {
            self.inner.list_recommendations(decision_id).await
        }
        async fn resolve_and_apply(
            &self,
            decision_id: &DecisionId,
            outcome: TradeOutcome,
            at: Time,
            policy: &SkillPolicy,
        ) -> skillmem_storage::Result<AppliedOutcome> {
            if self.fail_next_resolve.swap(false, Ordering::SeqCst) {
                return Err(StorageError::Other("disk full".into()));
            }
            self.inner.resolve_and_apply(decision_id, outcome, at, policy).await
        }
        async fn insert_insight(&self, insight: &JudgeInsight) -> skillmem_storage::Result<bool> {
            self.inner.insert_insight(insight).await
        }
        async fn load_insight(
            &self,
            decision_id: &DecisionId,
            mode: JudgeMode,
        ) -> skillmem_storage::Result<Option<JudgeInsight>> {
            self.inner.load_insight(decision_id, mode).await
        }
        async fn list_insights(
            &self,
            domain: Option<Domain>,
            mode: Option<JudgeMode>,
            limit: usize,
        ) -> skillmem_storage::Result<Vec<JudgeInsight>> {
            self.inner.list_insights(domain, mode, limit).await
        }
        async fn attach_insight_outcome(
            &self,
            decision_id: &DecisionId,
            outcome: TradeOutcome,
        ) -> skillmem_storage::Result<Vec<JudgeInsight>> {
            self.inner.attach_insight_outcome(decision_id, outcome).await
        }
    }

    fn skill(title: &str, body: &str) -> SkillRecord {
        SkillRecord::new(Domain::Perps, SkillType::Warning, title, body, &SkillPolicy::default())
    }

    const BODY: &str = "- **reduce leverage** when funding spikes\n- size down after two losses\n- check open interest";

    #[test]
    fn explicit_references() {
        let s = skill("Funding Spike Exit", BODY);
        for reasoning in [
            "Applying 'Funding Spike Exit' here.",
            "based on \"funding spike exit\" I close",
            "following the lesson Funding Spike Exit, exit now",
            "Per Funding  Spike Exit we wait",
        ] {
            assert_eq!(detect_usage(&s, reasoning).match_type, MatchType::Explicit, "{}", reasoning);
        }
        assert_eq!(detect_usage(&s, "Applying 'Funding Spike Exit'").confidence, 0.95);
    }

    #[test]
    fn bare_mention_is_not_explicit() {
        let s = skill("Funding", BODY);
        assert_eq!(detect_usage(&s, "funding is positive").match_type, MatchType::None);
    }

    #[test]
    fn title_metacharacters_are_literal() {
        let s = skill("Size (x2) rule?", "plain");
        assert_eq!(detect_usage(&s, "using 'Size (x2) rule?' today").match_type, MatchType::Explicit);
        assert_eq!(detect_usage(&s, "using Size x2 rule today").match_type, MatchType::None);
    }

    #[test]
    fn implicit_needs_three_phrases() {
        let s = skill("Unnamed", BODY);
        let two = "I reduce leverage and will size down after two losses.";
        let three = "I reduce leverage, size down after two losses, and check open interest.";
        assert_eq!(detect_usage(&s, two).match_type, MatchType::None);
        let d = detect_usage(&s, three);
        assert_eq!(d.match_type, MatchType::Implicit);
        assert_eq!(d.confidence, 0.6);
    }

    #[tokio::test]
    async fn resolution_counts_only_applied_skills_once() {
        let storage = Arc::new(MemoryStorage::new());
        let applied = skill("Funding Spike Exit", BODY);
        let ignored = skill("Other lesson", "- **buy dips**");
        for s in [&applied, &ignored] {
            storage.commit_bucket(&BucketCommit::insert(s.clone(), storage.bucket_version(s.bucket()).await.unwrap())).await.unwrap();
        }

        let tracker = UsageTracker::new(storage.clone(), SkillPolicy::default());
        let decision: DecisionId = "d-1".into();
        assert!(tracker.record_recommendation(decision.clone(), applied.id, 0.9).await.unwrap());
        assert!(tracker.record_recommendation(decision.clone(), ignored.id, 0.4).await.unwrap());
        assert!(!tracker.record_recommendation(decision.clone(), ignored.id, 0.4).await.unwrap());

        let recs = tracker
            .track_usage(&decision, "Applying 'Funding Spike Exit'.", &[applied.clone(), ignored.clone()])
            .await
            .unwrap();
        assert!(recs[0].was_applied);
        assert!(!recs[1].was_applied);
        assert_eq!(recs[0].relevance_score, 0.9);

        let now = chrono::Utc::now();
        let first = tracker.resolve(&decision, TradeOutcome::Profit, now).await.unwrap();
        assert_eq!(first.resolved, 2);
        assert_eq!(first.applied, vec![applied.id]);
        let again = tracker.resolve(&decision, TradeOutcome::Profit, now).await.unwrap();
        assert_eq!(again, Resolution::default());

        let s = storage.load_skill(applied.id).await.unwrap().unwrap();
        assert_eq!((s.times_applied, s.times_successful), (1, 1));
        let untouched = storage.load_skill(ignored.id).await.unwrap().unwrap();
        assert_eq!(untouched.times_applied, 0);

        let rec = storage.load_recommendation(&decision, applied.id).await.unwrap().unwrap();
        assert!(rec.contributed_to_success);
    }

    #[tokio::test]
    async fn failed_resolution_is_counted_on_the_next_call() {
        let storage = Arc::new(Faulty::default());
        let s = skill("Funding Spike Exit", BODY);
        storage.commit_bucket(&BucketCommit::insert(s.clone(), 0)).await.unwrap();

        let tracker = UsageTracker::new(storage.clone(), SkillPolicy::default());
        let decision: DecisionId = "d-2".into();
        tracker.record_recommendation(decision.clone(), s.id, 0.8).await.unwrap();
        tracker
            .track_usage(&decision, "Applying 'Funding Spike Exit'.", &[s.clone()])
            .await
            .unwrap();

        storage.fail_next_resolve.store(true, Ordering::SeqCst);
        let now = chrono::Utc::now();
        assert!(tracker.resolve(&decision, TradeOutcome::Loss, now).await.is_err());
        let pending = storage.load_recommendation(&decision, s.id).await.unwrap().unwrap();
        assert!(!pending.is_resolved());

        let retry = tracker.resolve(&decision, TradeOutcome::Loss, now).await.unwrap();
        assert_eq!(retry.applied, vec![s.id]);
        let counted = storage.load_skill(s.id).await.unwrap().unwrap();
        assert_eq!((counted.times_applied, counted.times_successful), (1, 0));
    }

    #[tokio::test]
    async fn unknown_applied_skill_is_reported_missing() {
        let storage = Arc::new(MemoryStorage::new());
        let ghost = skill("Ghost rule", BODY);
        let tracker = UsageTracker::new(storage.clone(), SkillPolicy::default());
        let decision: DecisionId = "d-3".into();
        tracker
            .track_usage(&decision, "using 'Ghost rule' again", &[ghost.clone()])
            .await
            .unwrap();

        let resolution = tracker.resolve(&decision, TradeOutcome::Profit, chrono::Utc::now()).await.unwrap();
        assert_eq!(resolution.resolved, 1);
        assert!(resolution.applied.is_empty());
        assert_eq!(resolution.missing, vec![ghost.id]);
    }

    #[tokio::test]
    async fn detection_lands_on_a_row_created_concurrently() {
        let storage = Arc::new(Faulty::default());
        let s = skill("Funding Spike Exit", BODY);
        let tracker = UsageTracker::new(storage.clone(), SkillPolicy::default());
        let decision: DecisionId = "d-4".into();
        tracker.record_recommendation(decision.clone(), s.id, 0.9).await.unwrap();

        // Tracking sees no row, then loses the insert race.
        storage.hide_next_load.store(true, Ordering::SeqCst);
        let recs = tracker
            .track_usage(&decision, "Applying 'Funding Spike Exit'.", &[s.clone()])
            .await
            .unwrap();
        assert!(recs[0].was_applied);

        let stored = storage.load_recommendation(&decision, s.id).await.unwrap().unwrap();
        assert!(stored.was_applied);
        assert_eq!(stored.match_type, MatchType::Explicit);
        assert_eq!(stored.relevance_score, 0.9);
    }
}
