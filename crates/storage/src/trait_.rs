//! Storage trait abstraction.

use async_trait::async_trait;
use skillmem_core::{
    BucketKey, DecisionId, Domain, JudgeInsight, JudgeMode, SkillFilter, SkillId, SkillPolicy,
    SkillRecommendation, SkillRecord, Time, TradeOutcome,
};
use std::collections::HashMap;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A bucket changed underneath a commit, or a row was no longer active
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Row already exists
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether the failed operation can succeed if re-planned against fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// A unit of work against one (domain, skill_type) bucket, applied atomically.
///
/// The commit only applies if the bucket is still at `expected_version` and
/// every skill in `archive` is still active; otherwise nothing is written and
/// [`StorageError::Conflict`] is returned.
#[derive(Debug, Clone)]
pub struct BucketCommit {
    /// Bucket the plan was computed against
    pub bucket: BucketKey,

    /// Bucket version observed when planning
    pub expected_version: u64,

    /// (archived skill, evolved skill that supersedes it)
    pub archive: Vec<(SkillId, SkillId)>,

    /// New rows
    pub insert: Vec<SkillRecord>,
}

impl BucketCommit {
    /// Plain insert of one skill into its bucket.
    pub fn insert(skill: SkillRecord, expected_version: u64) -> Self {
        Self {
            bucket: skill.bucket(),
            expected_version,
            archive: Vec::new(),
            insert: vec![skill],
        }
    }
}

/// What one `resolve_and_apply` call changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedOutcome {
    /// Recommendations resolved by this call
    pub resolved: Vec<SkillRecommendation>,
    /// Applied skills, as stored after their counter update
    pub counted: Vec<SkillRecord>,
    /// Applied skill ids with no skill row to count against
    pub missing: Vec<SkillId>,
}

/// Storage abstraction for skill-lifecycle data.
///
/// Every write is atomic with respect to other writes on the same store, so
/// services can share one instance across concurrently running domain cycles.
/// Nothing is ever deleted.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Skill operations ===

    /// Load a skill by ID, whatever its status.
    async fn load_skill(&self, id: SkillId) -> Result<Option<SkillRecord>>;

    /// List skills matching the filter, oldest first.
    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<SkillRecord>>;

    /// Total number of skill rows of any status.
    async fn count_skills(&self) -> Result<usize>;

    /// Current version of a bucket (0 if never written).
    async fn bucket_version(&self, bucket: BucketKey) -> Result<u64>;

    /// Apply a bucket commit; returns the bucket's new version.
    async fn commit_bucket(&self, commit: &BucketCommit) -> Result<u64>;

    /// Atomically count one application and recompute effectiveness.
    async fn record_application(
        &self,
        id: SkillId,
        successful: bool,
        policy: &SkillPolicy,
    ) -> Result<SkillRecord>;

    /// Mark every active skill with `expires_at <= now` as expired.
    /// Returns the ids that changed.
    async fn expire_due(&self, now: Time) -> Result<Vec<SkillId>>;

    // === Recommendation operations ===

    /// Insert a recommendation. Returns false if the pair already exists.
    async fn insert_recommendation(&self, rec: &SkillRecommendation) -> Result<bool>;

    /// Overwrite an unresolved recommendation (detection fields).
    async fn update_recommendation(&self, rec: &SkillRecommendation) -> Result<()>;

    /// Load one recommendation.
    async fn load_recommendation(
        &self,
        decision_id: &DecisionId,
        skill_id: SkillId,
    ) -> Result<Option<SkillRecommendation>>;

    /// List recommendations, for one decision or all.
    async fn list_recommendations(
        &self,
        decision_id: Option<&DecisionId>,
    ) -> Result<Vec<SkillRecommendation>>;

    /// Record the outcome on every still-pending recommendation of a decision
    /// and count one application on each skill those rows mark as applied.
    ///
    /// Resolution and counter updates land together or not at all: on error
    /// the decision stays pending and a later call counts it exactly once.
    async fn resolve_and_apply(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
        at: Time,
        policy: &SkillPolicy,
    ) -> Result<AppliedOutcome>;

    // === Judge insight operations ===

    /// Insert an insight. Returns false if one exists for (decision, mode).
    async fn insert_insight(&self, insight: &JudgeInsight) -> Result<bool>;

    /// Load the insight for a decision and mode.
    async fn load_insight(&self, decision_id: &DecisionId, mode: JudgeMode) -> Result<Option<JudgeInsight>>;

    /// Newest-first insights, optionally by domain and mode.
    async fn list_insights(
        &self,
        domain: Option<Domain>,
        mode: Option<JudgeMode>,
        limit: usize,
    ) -> Result<Vec<JudgeInsight>>;

    /// Attach a realized outcome to the decision's insights that lack one.
    async fn attach_insight_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
    ) -> Result<Vec<JudgeInsight>>;
}

/// Validate and apply a commit against an in-memory view of the rows.
///
/// Shared by backends that hold (or load) the affected rows in memory.
/// `skills` must contain every id named in `commit.archive`.
pub(crate) fn apply_commit(
    skills: &mut HashMap<SkillId, SkillRecord>,
    versions: &mut HashMap<BucketKey, u64>,
    commit: &BucketCommit,
    now: Time,
) -> Result<u64> {
    let current = versions.get(&commit.bucket).copied().unwrap_or(0);
    if current != commit.expected_version {
        return Err(StorageError::Conflict(format!(
            "bucket {} is at version {}, plan expected {}",
            commit.bucket, current, commit.expected_version
        )));
    }
    for (id, _) in &commit.archive {
        match skills.get(id) {
            Some(s) if s.is_active() => {}
            Some(_) => {
                return Err(StorageError::Conflict(format!("skill {} is no longer active", id)));
            }
            None => return Err(StorageError::NotFound(format!("skill {}", id))),
        }
    }
    for skill in &commit.insert {
        if skills.contains_key(&skill.id) {
            return Err(StorageError::Duplicate(format!("skill {}", skill.id)));
        }
    }

    for (id, merged_into) in &commit.archive {
        if let Some(s) = skills.get_mut(id) {
            s.archive(*merged_into, now);
        }
    }

    let mut touched = vec![commit.bucket];
    for skill in &commit.insert {
        skills.insert(skill.id, skill.clone());
        if !touched.contains(&skill.bucket()) {
            touched.push(skill.bucket());
        }
    }
    for bucket in touched {
        *versions.entry(bucket).or_insert(0) += 1;
    }

    Ok(current + 1)
}
