//! Skill model - persisted, typed, time-bounded lessons.

use serde::{Deserialize, Serialize};
use crate::config::SkillPolicy;
use crate::domain::Domain;
use crate::id::{DecisionId, SkillId};
use crate::Time;

/// A skill is a lesson derived from trade outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    /// Unique identifier
    pub id: SkillId,

    /// Domain the lesson applies to (`general` for cross-domain skills)
    pub domain: Domain,

    /// Kind of lesson
    pub skill_type: SkillType,

    /// Short name, used for explicit usage detection
    pub title: String,

    /// Human-readable lesson text
    pub body: String,

    /// Created at
    pub created_at: Time,

    /// Updated at
    pub updated_at: Time,

    /// Time-to-live in days
    pub ttl_days: u32,

    /// created_at + ttl_days
    pub expires_at: Time,

    /// Lifecycle status
    pub status: SkillStatus,

    /// Decisions that gave rise to this skill
    pub source_decision_ids: Vec<DecisionId>,

    /// Skills subsumed by this one (empty unless evolved)
    pub merged_from_skill_ids: Vec<SkillId>,

    /// Evolved skill that superseded this one
    #[serde(default)]
    pub merged_into: Option<SkillId>,

    /// When the record was archived
    #[serde(default)]
    pub archived_at: Option<Time>,

    /// When the record was expired by a sweep
    #[serde(default)]
    pub expired_at: Option<Time>,

    /// Number of resolved decisions that applied this skill
    pub times_applied: u32,

    /// Number of those that ended in profit
    pub times_successful: u32,

    /// times_successful / times_applied; None while times_applied == 0
    pub success_rate: Option<f64>,

    /// Soft exclusion from retrieval, recomputed on every application
    pub excluded_from_retrieval: bool,
}

/// Kinds of skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    /// Something to avoid
    Warning,
    /// Something that tends to work
    Pattern,
    /// A longer-lived playbook
    Strategy,
    /// Produced by merging similar skills
    Evolved,
}

impl SkillType {
    /// All skill types.
    pub const ALL: [SkillType; 4] = [
        SkillType::Warning,
        SkillType::Pattern,
        SkillType::Strategy,
        SkillType::Evolved,
    ];

    /// Built-in TTL in days.
    pub fn default_ttl_days(&self) -> u32 {
        match self {
            SkillType::Warning => 60,
            SkillType::Pattern => 90,
            SkillType::Strategy => 180,
            SkillType::Evolved => 180,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillType::Warning => "warning",
            SkillType::Pattern => "pattern",
            SkillType::Strategy => "strategy",
            SkillType::Evolved => "evolved",
        }
    }
}

impl std::fmt::Display for SkillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SkillType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warning" => Ok(SkillType::Warning),
            "pattern" => Ok(SkillType::Pattern),
            "strategy" => Ok(SkillType::Strategy),
            "evolved" => Ok(SkillType::Evolved),
            other => Err(format!("unknown skill type: {}", other)),
        }
    }
}

/// Lifecycle status. Only `Active -> Archived` and `Active -> Expired` exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    /// Eligible for retrieval
    Active,
    /// Superseded by a merge
    Archived,
    /// TTL elapsed
    Expired,
}

impl SkillStatus {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillStatus::Active => "active",
            SkillStatus::Archived => "archived",
            SkillStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for SkillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SkillStatus::Active),
            "archived" => Ok(SkillStatus::Archived),
            "expired" => Ok(SkillStatus::Expired),
            other => Err(format!("unknown skill status: {}", other)),
        }
    }
}

/// The (domain, skill_type) partition that merges operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Domain
    pub domain: Domain,
    /// Skill type
    pub skill_type: SkillType,
}

impl BucketKey {
    /// Create a bucket key.
    pub fn new(domain: Domain, skill_type: SkillType) -> Self {
        Self { domain, skill_type }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.domain, self.skill_type)
    }
}

impl SkillRecord {
    /// Create a new active skill, taking its TTL from the policy.
    pub fn new(
        domain: Domain,
        skill_type: SkillType,
        title: impl Into<String>,
        body: impl Into<String>,
        policy: &SkillPolicy,
    ) -> Self {
        let now = chrono::Utc::now();
        let ttl_days = policy.ttl_days(skill_type);
        Self {
            id: SkillId::new(),
            domain,
            skill_type,
            title: title.into(),
            body: body.into(),
            created_at: now,
            updated_at: now,
            ttl_days,
            expires_at: now + chrono::Duration::days(ttl_days as i64),
            status: SkillStatus::Active,
            source_decision_ids: Vec::new(),
            merged_from_skill_ids: Vec::new(),
            merged_into: None,
            archived_at: None,
            expired_at: None,
            times_applied: 0,
            times_successful: 0,
            success_rate: None,
            excluded_from_retrieval: false,
        }
    }

    /// Override the creation time, keeping expires_at consistent.
    pub fn with_created_at(mut self, created_at: Time) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self.expires_at = created_at + chrono::Duration::days(self.ttl_days as i64);
        self
    }

    /// Attach source decisions.
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = DecisionId>) -> Self {
        self.source_decision_ids.extend(sources);
        self
    }

    /// The bucket this skill belongs to.
    pub fn bucket(&self) -> BucketKey {
        BucketKey::new(self.domain, self.skill_type)
    }

    /// Whether the skill is active.
    pub fn is_active(&self) -> bool {
        self.status == SkillStatus::Active
    }

    /// Whether the TTL has elapsed at `now`.
    pub fn is_due_for_expiry(&self, now: Time) -> bool {
        self.is_active() && now >= self.expires_at
    }

    /// Active and not soft-excluded.
    pub fn is_retrievable(&self) -> bool {
        self.is_active() && !self.excluded_from_retrieval
    }

    /// Count one application of this skill and recompute effectiveness.
    pub fn record_application(&mut self, successful: bool, policy: &SkillPolicy) {
        self.times_applied = self.times_applied.saturating_add(1);
        if successful {
            self.times_successful = self.times_successful.saturating_add(1);
        }
        self.updated_at = chrono::Utc::now();
        self.recompute_effectiveness(policy);
    }

    /// Recompute success_rate and the retrieval exclusion flag from the counters.
    pub fn recompute_effectiveness(&mut self, policy: &SkillPolicy) {
        self.success_rate = if self.times_applied > 0 {
            let successful = self.times_successful.min(self.times_applied);
            Some(successful as f64 / self.times_applied as f64)
        } else {
            None
        };
        self.excluded_from_retrieval = policy.should_exclude(self.times_applied, self.success_rate);
    }

    /// Mark as superseded by `merged_into`. Returns false if not active.
    pub fn archive(&mut self, merged_into: SkillId, at: Time) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = SkillStatus::Archived;
        self.merged_into = Some(merged_into);
        self.archived_at = Some(at);
        self.updated_at = at;
        true
    }

    /// Mark as expired. Returns false if not active.
    pub fn expire(&mut self, at: Time) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = SkillStatus::Expired;
        self.expired_at = Some(at);
        self.updated_at = at;
        true
    }
}

/// Filter for listing skills.
#[derive(Debug, Clone, Default)]
pub struct SkillFilter {
    /// Restrict to one domain
    pub domain: Option<Domain>,
    /// Restrict to one type
    pub skill_type: Option<SkillType>,
    /// Allowed statuses (None = any)
    pub statuses: Option<Vec<SkillStatus>>,
    /// Include rows flagged excluded_from_retrieval
    pub include_excluded: bool,
}

impl SkillFilter {
    /// Active, non-excluded skills.
    pub fn active() -> Self {
        Self {
            statuses: Some(vec![SkillStatus::Active]),
            ..Default::default()
        }
    }

    /// Every row, regardless of status (audit view).
    pub fn all() -> Self {
        Self {
            include_excluded: true,
            ..Default::default()
        }
    }

    /// Restrict to a domain.
    pub fn in_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Restrict to a skill type.
    pub fn of_type(mut self, skill_type: SkillType) -> Self {
        self.skill_type = Some(skill_type);
        self
    }

    /// Restrict to a bucket.
    pub fn in_bucket(self, bucket: BucketKey) -> Self {
        self.in_domain(bucket.domain).of_type(bucket.skill_type)
    }

    /// Include soft-excluded rows.
    pub fn including_excluded(mut self) -> Self {
        self.include_excluded = true;
        self
    }

    /// Whether a record passes this filter.
    pub fn matches(&self, skill: &SkillRecord) -> bool {
        if let Some(domain) = self.domain {
            if skill.domain != domain {
                return false;
            }
        }
        if let Some(skill_type) = self.skill_type {
            if skill.skill_type != skill_type {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&skill.status) {
                return false;
            }
        }
        self.include_excluded || !skill.excluded_from_retrieval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(skill_type: SkillType) -> SkillRecord {
        SkillRecord::new(Domain::Perps, skill_type, "Title", "Body", &SkillPolicy::default())
    }

    #[test]
    fn ttl_follows_skill_type() {
        assert_eq!(skill(SkillType::Warning).ttl_days, 60);
        assert_eq!(skill(SkillType::Pattern).ttl_days, 90);
        assert_eq!(skill(SkillType::Strategy).ttl_days, 180);
        assert_eq!(skill(SkillType::Evolved).ttl_days, 180);
    }

    #[test]
    fn expires_at_tracks_created_at() {
        let created = chrono::Utc::now() - chrono::Duration::days(10);
        let s = skill(SkillType::Warning).with_created_at(created);
        assert_eq!(s.expires_at, created + chrono::Duration::days(60));
    }

    #[test]
    fn success_rate_undefined_until_applied() {
        let mut s = skill(SkillType::Pattern);
        assert_eq!(s.success_rate, None);
        s.record_application(true, &SkillPolicy::default());
        assert_eq!(s.success_rate, Some(1.0));
    }

    #[test]
    fn exclusion_is_recomputed_not_sticky() {
        let policy = SkillPolicy::default();
        let mut s = skill(SkillType::Pattern);
        s.record_application(true, &policy);
        for _ in 0..5 {
            s.record_application(false, &policy);
        }
        assert_eq!((s.times_applied, s.times_successful), (6, 1));
        assert!(s.excluded_from_retrieval);

        for _ in 0..4 {
            s.record_application(true, &policy);
        }
        assert_eq!(s.success_rate, Some(0.5));
        assert!(!s.excluded_from_retrieval);
    }

    #[test]
    fn status_transitions_only_from_active() {
        let now = chrono::Utc::now();
        let mut s = skill(SkillType::Warning);
        assert!(s.expire(now));
        assert!(!s.archive(SkillId::new(), now));
        assert_eq!(s.status, SkillStatus::Expired);
    }

    #[test]
    fn active_filter_hides_excluded_unless_requested() {
        let mut s = skill(SkillType::Warning);
        s.excluded_from_retrieval = true;
        assert!(!SkillFilter::active().matches(&s));
        assert!(SkillFilter::active().including_excluded().matches(&s));
    }
}
