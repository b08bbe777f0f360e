//! Skill store service: lifecycle operations over the storage backend.

use skillmem_core::{
    BucketKey, Domain, SkillFilter, SkillId, SkillRecord, SkillStatus, SkillType, Time,
};
use skillmem_storage::{BucketCommit, Result, Storage, StorageError};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Attempts for a plain create before giving up on a busy bucket.
const CREATE_ATTEMPTS: u32 = 4;

/// Skill store.
///
/// Status only moves forward (`active -> archived`, `active -> expired`) and
/// nothing is ever deleted; archived and expired rows remain listable for
/// audit through [`SkillStore::list`].
#[derive(Clone)]
pub struct SkillStore {
    storage: Arc<dyn Storage>,
}

impl SkillStore {
    /// Create a store over a backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// The underlying backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Persist a skill as-is, without the merge gate.
    pub async fn create(&self, skill: SkillRecord) -> Result<SkillId> {
        let id = skill.id;
        let mut commit = BucketCommit::insert(skill, 0);
        for _ in 0..CREATE_ATTEMPTS {
            commit.expected_version = self.storage.bucket_version(commit.bucket).await?;
            match self.storage.commit_bucket(&commit).await {
                Ok(_) => {
                    debug!("Created skill {} in {}", id, commit.bucket);
                    return Ok(id);
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict(format!("bucket {} kept changing", commit.bucket)))
    }

    /// Load a skill by id, whatever its status.
    pub async fn get(&self, id: SkillId) -> Result<Option<SkillRecord>> {
        self.storage.load_skill(id).await
    }

    /// Active skills, optionally by domain and type.
    ///
    /// Soft-excluded skills are left out unless `include_excluded` is set.
    pub async fn list_active(
        &self,
        domain: Option<Domain>,
        skill_type: Option<SkillType>,
        include_excluded: bool,
    ) -> Result<Vec<SkillRecord>> {
        let filter = SkillFilter {
            domain,
            skill_type,
            statuses: Some(vec![SkillStatus::Active]),
            include_excluded,
        };
        self.storage.list_skills(&filter).await
    }

    /// Audit listing with an arbitrary filter.
    pub async fn list(&self, filter: &SkillFilter) -> Result<Vec<SkillRecord>> {
        self.storage.list_skills(filter).await
    }

    /// Archive skills as superseded by `merged_into`.
    ///
    /// Skills are grouped by bucket and each bucket is archived in one
    /// commit. Fails with a conflict if any of them is no longer active.
    pub async fn mark_archived(&self, ids: &[SkillId], merged_into: SkillId) -> Result<usize> {
        let mut by_bucket: BTreeMap<BucketKey, Vec<SkillId>> = BTreeMap::new();
        for id in ids {
            let skill = self
                .storage
                .load_skill(*id)
                .await?
                .ok_or_else(|| StorageError::NotFound(format!("skill {}", id)))?;
            by_bucket.entry(skill.bucket()).or_default().push(*id);
        }

        let mut archived = 0;
        for (bucket, ids) in by_bucket {
            let commit = BucketCommit {
                bucket,
                expected_version: self.storage.bucket_version(bucket).await?,
                archive: ids.iter().map(|id| (*id, merged_into)).collect(),
                insert: Vec::new(),
            };
            self.storage.commit_bucket(&commit).await?;
            archived += ids.len();
        }
        Ok(archived)
    }

    /// Expire every active skill whose TTL has elapsed. Idempotent.
    pub async fn sweep_expired(&self, now: Time) -> Result<Vec<SkillId>> {
        let expired = self.storage.expire_due(now).await?;
        if !expired.is_empty() {
            info!("Expired {} skills", expired.len());
        }
        Ok(expired)
    }

    /// Skills to offer a decision in `domain`.
    ///
    /// Active, non-excluded skills of the domain and of `general`, ordered by
    /// success rate (defined rates first, highest first) then newest first.
    pub async fn retrieve(&self, domain: Domain, max_count: usize) -> Result<Vec<SkillRecord>> {
        let mut skills = self.list_active(Some(domain), None, false).await?;
        if !domain.is_general() {
            skills.extend(self.list_active(Some(Domain::General), None, false).await?);
        }
        // Expired by time but not yet swept still must not be offered.
        let now = chrono::Utc::now();
        skills.retain(|s| s.is_retrievable() && !s.is_due_for_expiry(now));

        skills.sort_by(retrieval_order);
        skills.truncate(max_count);
        Ok(skills)
    }
}

/// Success rate descending (undefined last), then created_at descending.
pub fn retrieval_order(a: &SkillRecord, b: &SkillRecord) -> Ordering {
    let by_rate = match (a.success_rate, b.success_rate) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_rate.then_with(|| b.created_at.cmp(&a.created_at))
}

/// Render retrieved skills as a context block for a decision prompt.
pub fn render_skills(skills: &[SkillRecord]) -> String {
    let mut out = String::new();
    for skill in skills {
        let rate = match skill.success_rate {
            Some(r) => format!("{:.0}% over {} uses", r * 100.0, skill.times_applied),
            None => "untested".to_string(),
        };
        out.push_str(&format!(
            "### {} [{} / {}] ({})\n{}\n\n",
            skill.title, skill.domain, skill.skill_type, rate, skill.body
        ));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmem_core::SkillPolicy;
    use skillmem_storage::MemoryStorage;

    fn store() -> SkillStore {
        SkillStore::new(Arc::new(MemoryStorage::new()))
    }

    fn skill(domain: Domain, title: &str) -> SkillRecord {
        SkillRecord::new(domain, SkillType::Pattern, title, "body", &SkillPolicy::default())
    }

    #[tokio::test]
    async fn retrieval_orders_by_rate_then_recency() {
        let store = store();
        let now = chrono::Utc::now();

        let mut rated_low = skill(Domain::Spot, "low").with_created_at(now - chrono::Duration::days(3));
        rated_low.times_applied = 4;
        rated_low.times_successful = 2;
        rated_low.success_rate = Some(0.5);
        let mut rated_high = skill(Domain::Spot, "high").with_created_at(now - chrono::Duration::days(5));
        rated_high.times_applied = 4;
        rated_high.times_successful = 3;
        rated_high.success_rate = Some(0.75);
        let fresh = skill(Domain::General, "fresh").with_created_at(now - chrono::Duration::days(1));
        let older = skill(Domain::Spot, "older").with_created_at(now - chrono::Duration::days(2));
        let other_domain = skill(Domain::Perps, "perps");

        for s in [&rated_low, &rated_high, &fresh, &older, &other_domain] {
            store.create(s.clone()).await.unwrap();
        }

        let titles: Vec<_> = store
            .retrieve(Domain::Spot, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["high", "low", "fresh", "older"]);

        assert_eq!(store.retrieve(Domain::Spot, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retrieval_skips_excluded_and_inactive() {
        let store = store();
        let mut excluded = skill(Domain::Dlmm, "excluded");
        excluded.excluded_from_retrieval = true;
        let archived = skill(Domain::Dlmm, "archived");
        let kept = skill(Domain::Dlmm, "kept");
        for s in [&excluded, &archived, &kept] {
            store.create(s.clone()).await.unwrap();
        }
        store.mark_archived(&[archived.id], kept.id).await.unwrap();

        let got = store.retrieve(Domain::Dlmm, 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, kept.id);

        let audit = store.list_active(Some(Domain::Dlmm), None, true).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(store.list(&SkillFilter::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let store = store();
        let old = skill(Domain::Perps, "old").with_created_at(chrono::Utc::now() - chrono::Duration::days(91));
        store.create(old.clone()).await.unwrap();

        let now = chrono::Utc::now();
        assert_eq!(store.sweep_expired(now).await.unwrap(), vec![old.id]);
        assert!(store.sweep_expired(now).await.unwrap().is_empty());
        assert_eq!(store.get(old.id).await.unwrap().unwrap().status, SkillStatus::Expired);
    }

    #[test]
    fn render_lists_titles_and_rates() {
        let s = skill(Domain::Spot, "Breakouts");
        let text = render_skills(&[s]);
        assert!(text.starts_with("### Breakouts [spot / pattern] (untested)"));
    }
}
