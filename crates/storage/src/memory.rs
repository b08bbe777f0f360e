//! In-memory storage backend.
//!
//! All state sits behind one async RwLock, so every trait method is a single
//! critical section. Used by tests and short-lived tools.

use async_trait::async_trait;
use skillmem_core::{
    BucketKey, DecisionId, Domain, JudgeInsight, JudgeMode, SkillFilter, SkillId, SkillPolicy,
    SkillRecommendation, SkillRecord, Time, TradeOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::trait_::{apply_commit, AppliedOutcome, BucketCommit, Result, Storage, StorageError};

#[derive(Default)]
struct State {
    skills: HashMap<SkillId, SkillRecord>,
    versions: HashMap<BucketKey, u64>,
    recommendations: HashMap<(DecisionId, SkillId), SkillRecommendation>,
    insights: HashMap<(DecisionId, JudgeMode), JudgeInsight>,
}

/// In-memory storage. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_skill(&self, id: SkillId) -> Result<Option<SkillRecord>> {
        Ok(self.state.read().await.skills.get(&id).cloned())
    }

    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<SkillRecord>> {
        let state = self.state.read().await;
        let mut skills: Vec<_> = state.skills.values().filter(|s| filter.matches(s)).cloned().collect();
        skills.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(skills)
    }

    async fn count_skills(&self) -> Result<usize> {
        Ok(self.state.read().await.skills.len())
    }

    async fn bucket_version(&self, bucket: BucketKey) -> Result<u64> {
        Ok(self.state.read().await.versions.get(&bucket).copied().unwrap_or(0))
    }

    async fn commit_bucket(&self, commit: &BucketCommit) -> Result<u64> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        // Validate on copies so a rejected commit leaves no trace.
        let mut skills: HashMap<SkillId, SkillRecord> = commit
            .archive
            .iter()
            .filter_map(|(id, _)| state.skills.get(id).map(|s| (*id, s.clone())))
            .collect();
        for skill in &commit.insert {
            if let Some(existing) = state.skills.get(&skill.id) {
                skills.insert(skill.id, existing.clone());
            }
        }
        let mut versions = state.versions.clone();
        let version = apply_commit(&mut skills, &mut versions, commit, chrono::Utc::now())?;

        state.skills.extend(skills);
        state.versions = versions;
        Ok(version)
    }

    async fn record_application(
        &self,
        id: SkillId,
        successful: bool,
        policy: &SkillPolicy,
    ) -> Result<SkillRecord> {
        let mut state = self.state.write().await;
        let skill = state
            .skills
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("skill {}", id)))?;
        skill.record_application(successful, policy);
        Ok(skill.clone())
    }

    async fn expire_due(&self, now: Time) -> Result<Vec<SkillId>> {
        let mut state = self.state.write().await;
        let mut expired = Vec::new();
        for skill in state.skills.values_mut() {
            if skill.is_due_for_expiry(now) && skill.expire(now) {
                expired.push(skill.id);
            }
        }
        expired.sort();
        Ok(expired)
    }

    async fn insert_recommendation(&self, rec: &SkillRecommendation) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (rec.decision_id.clone(), rec.skill_id);
        if state.recommendations.contains_key(&key) {
            return Ok(false);
        }
        state.recommendations.insert(key, rec.clone());
        Ok(true)
    }

    async fn update_recommendation(&self, rec: &SkillRecommendation) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (rec.decision_id.clone(), rec.skill_id);
        match state.recommendations.get_mut(&key) {
            Some(existing) if existing.is_resolved() => Err(StorageError::Conflict(format!(
                "recommendation {}/{} already resolved",
                rec.decision_id, rec.skill_id
            ))),
            Some(existing) => {
                *existing = rec.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "recommendation {}/{}",
                rec.decision_id, rec.skill_id
            ))),
        }
    }

    async fn load_recommendation(
        &self,
        decision_id: &DecisionId,
        skill_id: SkillId,
    ) -> Result<Option<SkillRecommendation>> {
        let state = self.state.read().await;
        Ok(state.recommendations.get(&(decision_id.clone(), skill_id)).cloned())
    }

    async fn list_recommendations(
        &self,
        decision_id: Option<&DecisionId>,
    ) -> Result<Vec<SkillRecommendation>> {
        let state = self.state.read().await;
        let mut recs: Vec<_> = state
            .recommendations
            .values()
            .filter(|r| decision_id.map_or(true, |d| &r.decision_id == d))
            .cloned()
            .collect();
        recs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(recs)
    }

    async fn resolve_and_apply(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
        at: Time,
        policy: &SkillPolicy,
    ) -> Result<AppliedOutcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let successful = outcome == TradeOutcome::Profit;
        let mut applied = AppliedOutcome::default();
        for rec in state.recommendations.values_mut() {
            if &rec.decision_id != decision_id || !rec.resolve(outcome, at) {
                continue;
            }
            if rec.was_applied {
                match state.skills.get_mut(&rec.skill_id) {
                    Some(skill) => {
                        skill.record_application(successful, policy);
                        applied.counted.push(skill.clone());
                    }
                    None => applied.missing.push(rec.skill_id),
                }
            }
            applied.resolved.push(rec.clone());
        }
        Ok(applied)
    }

    async fn insert_insight(&self, insight: &JudgeInsight) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (insight.decision_id.clone(), insight.mode);
        if state.insights.contains_key(&key) {
            return Ok(false);
        }
        state.insights.insert(key, insight.clone());
        Ok(true)
    }

    async fn load_insight(&self, decision_id: &DecisionId, mode: JudgeMode) -> Result<Option<JudgeInsight>> {
        let state = self.state.read().await;
        Ok(state.insights.get(&(decision_id.clone(), mode)).cloned())
    }

    async fn list_insights(
        &self,
        domain: Option<Domain>,
        mode: Option<JudgeMode>,
        limit: usize,
    ) -> Result<Vec<JudgeInsight>> {
        let state = self.state.read().await;
        let mut insights: Vec<_> = state
            .insights
            .values()
            .filter(|i| domain.map_or(true, |d| i.domain == d))
            .filter(|i| mode.map_or(true, |m| i.mode == m))
            .cloned()
            .collect();
        insights.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        insights.truncate(limit);
        Ok(insights)
    }

    async fn attach_insight_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
    ) -> Result<Vec<JudgeInsight>> {
        let mut state = self.state.write().await;
        let mut updated = Vec::new();
        for insight in state.insights.values_mut() {
            if &insight.decision_id == decision_id && insight.actual_outcome.is_none() {
                insight.attach_outcome(outcome);
                updated.push(insight.clone());
            }
        }
        Ok(updated)
    }
}
