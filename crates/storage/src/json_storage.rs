//! JSON file storage implementation.
//!
//! Stores one JSON file per row under a data directory and keeps bucket
//! versions in `meta/buckets.json`. A single writer lock makes every mutating
//! trait method one critical section; files are replaced via rename so a crash
//! never leaves a half-written row behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use skillmem_core::{
    BucketKey, DecisionId, Domain, JudgeInsight, JudgeMode, SkillFilter, SkillId, SkillPolicy,
    SkillRecommendation, SkillRecord, SkillType, Time, TradeOutcome,
};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::trait_::{apply_commit, AppliedOutcome, BucketCommit, Result, Storage, StorageError};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct BucketVersions {
    buckets: Vec<BucketVersion>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct BucketVersion {
    domain: Domain,
    skill_type: SkillType,
    version: u64,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the subdirectories it needs.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("skills")).await?;
        fs::create_dir_all(root.join("recommendations")).await?;
        fs::create_dir_all(root.join("insights")).await?;
        fs::create_dir_all(root.join("meta")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn skill_path(&self, id: SkillId) -> PathBuf {
        self.root.join("skills").join(format!("{}.json", id))
    }

    fn recommendation_path(&self, decision_id: &DecisionId, skill_id: SkillId) -> PathBuf {
        self.root
            .join("recommendations")
            .join(format!("{}.{}.json", encode_key(decision_id.as_str()), skill_id))
    }

    fn insight_path(&self, decision_id: &DecisionId, mode: JudgeMode) -> PathBuf {
        let mode = match mode {
            JudgeMode::PostHoc => "post_hoc",
            JudgeMode::Inline => "inline",
        };
        self.root
            .join("insights")
            .join(format!("{}.{}.json", encode_key(decision_id.as_str()), mode))
    }

    fn versions_path(&self) -> PathBuf {
        self.root.join("meta").join("buckets.json")
    }

    async fn read_versions(&self) -> Result<HashMap<BucketKey, u64>> {
        let stored: BucketVersions = read_json(&self.versions_path()).await?.unwrap_or_default();
        Ok(stored
            .buckets
            .into_iter()
            .map(|b| (BucketKey::new(b.domain, b.skill_type), b.version))
            .collect())
    }

    async fn write_versions(&self, versions: &HashMap<BucketKey, u64>) -> Result<()> {
        let mut buckets: Vec<_> = versions
            .iter()
            .map(|(k, v)| BucketVersion {
                domain: k.domain,
                skill_type: k.skill_type,
                version: *v,
            })
            .collect();
        buckets.sort_by_key(|b| (b.domain, b.skill_type));
        write_json(&self.versions_path(), &BucketVersions { buckets }).await
    }

    async fn write_resolution(&self, skills: &[SkillRecord], recs: &[SkillRecommendation]) -> Result<()> {
        for skill in skills {
            write_json(&self.skill_path(skill.id), skill).await?;
        }
        for rec in recs {
            write_json(&self.recommendation_path(&rec.decision_id, rec.skill_id), rec).await?;
        }
        Ok(())
    }

    async fn recommendations_of(&self, decision_id: &DecisionId) -> Result<Vec<SkillRecommendation>> {
        let all: Vec<SkillRecommendation> = list_dir(&self.root.join("recommendations")).await?;
        Ok(all.into_iter().filter(|r| &r.decision_id == decision_id).collect())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn load_skill(&self, id: SkillId) -> Result<Option<SkillRecord>> {
        read_json(&self.skill_path(id)).await
    }

    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<SkillRecord>> {
        let all: Vec<SkillRecord> = list_dir(&self.root.join("skills")).await?;
        let mut skills: Vec<_> = all.into_iter().filter(|s| filter.matches(s)).collect();
        skills.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(skills)
    }

    async fn count_skills(&self) -> Result<usize> {
        let mut count = 0;
        let mut rd = fs::read_dir(self.root.join("skills")).await?;
        while let Some(entry) = rd.next_entry().await? {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn bucket_version(&self, bucket: BucketKey) -> Result<u64> {
        Ok(self.read_versions().await?.get(&bucket).copied().unwrap_or(0))
    }

    async fn commit_bucket(&self, commit: &BucketCommit) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let mut versions = self.read_versions().await?;
        let mut skills = HashMap::new();
        for (id, _) in &commit.archive {
            if let Some(skill) = self.load_skill(*id).await? {
                skills.insert(*id, skill);
            }
        }
        for skill in &commit.insert {
            if let Some(existing) = self.load_skill(skill.id).await? {
                skills.insert(skill.id, existing);
            }
        }

        let version = apply_commit(&mut skills, &mut versions, commit, chrono::Utc::now())?;

        // New rows first: a crash mid-commit leaves extra rows, never lost ones.
        for skill in &commit.insert {
            write_json(&self.skill_path(skill.id), skill).await?;
        }
        for (id, _) in &commit.archive {
            if let Some(skill) = skills.get(id) {
                write_json(&self.skill_path(*id), skill).await?;
            }
        }
        self.write_versions(&versions).await?;

        debug!("Committed bucket {} at version {}", commit.bucket, version);
        Ok(version)
    }

    async fn record_application(
        &self,
        id: SkillId,
        successful: bool,
        policy: &SkillPolicy,
    ) -> Result<SkillRecord> {
        let _guard = self.write_lock.lock().await;
        let mut skill = self
            .load_skill(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("skill {}", id)))?;
        skill.record_application(successful, policy);
        write_json(&self.skill_path(id), &skill).await?;
        Ok(skill)
    }

    async fn expire_due(&self, now: Time) -> Result<Vec<SkillId>> {
        let _guard = self.write_lock.lock().await;
        let all: Vec<SkillRecord> = list_dir(&self.root.join("skills")).await?;
        let mut expired = Vec::new();
        for mut skill in all {
            if skill.is_due_for_expiry(now) && skill.expire(now) {
                write_json(&self.skill_path(skill.id), &skill).await?;
                expired.push(skill.id);
            }
        }
        expired.sort();
        Ok(expired)
    }

    async fn insert_recommendation(&self, rec: &SkillRecommendation) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.recommendation_path(&rec.decision_id, rec.skill_id);
        if fs::try_exists(&path).await? {
            return Ok(false);
        }
        write_json(&path, rec).await?;
        Ok(true)
    }

    async fn update_recommendation(&self, rec: &SkillRecommendation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.recommendation_path(&rec.decision_id, rec.skill_id);
        let existing: Option<SkillRecommendation> = read_json(&path).await?;
        match existing {
            Some(existing) if existing.is_resolved() => Err(StorageError::Conflict(format!(
                "recommendation {}/{} already resolved",
                rec.decision_id, rec.skill_id
            ))),
            Some(_) => write_json(&path, rec).await,
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
        read_json(&self.recommendation_path(decision_id, skill_id)).await
    }

    async fn list_recommendations(
        &self,
        decision_id: Option<&DecisionId>,
    ) -> Result<Vec<SkillRecommendation>> {
        let mut recs = match decision_id {
            Some(id) => self.recommendations_of(id).await?,
            None => list_dir(&self.root.join("recommendations")).await?,
        };
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
        let _guard = self.write_lock.lock().await;
        let successful = outcome == TradeOutcome::Profit;

        let mut applied = AppliedOutcome::default();
        let mut before_recs = Vec::new();
        let mut before_skills = Vec::new();
        for rec in self.recommendations_of(decision_id).await? {
            let mut resolved = rec.clone();
            if !resolved.resolve(outcome, at) {
                continue;
            }
            if resolved.was_applied {
                match self.load_skill(resolved.skill_id).await? {
                    Some(skill) => {
                        let mut counted = skill.clone();
                        counted.record_application(successful, policy);
                        before_skills.push(skill);
                        applied.counted.push(counted);
                    }
                    None => applied.missing.push(resolved.skill_id),
                }
            }
            before_recs.push(rec);
            applied.resolved.push(resolved);
        }

        if let Err(e) = self.write_resolution(&applied.counted, &applied.resolved).await {
            // Put back every touched row so the decision stays pending.
            if let Err(restore) = self.write_resolution(&before_skills, &before_recs).await {
                warn!("Failed to roll back resolution of {}: {}", decision_id, restore);
            }
            return Err(e);
        }
        Ok(applied)
    }

    async fn insert_insight(&self, insight: &JudgeInsight) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.insight_path(&insight.decision_id, insight.mode);
        if fs::try_exists(&path).await? {
            return Ok(false);
        }
        write_json(&path, insight).await?;
        Ok(true)
    }

    async fn load_insight(&self, decision_id: &DecisionId, mode: JudgeMode) -> Result<Option<JudgeInsight>> {
        read_json(&self.insight_path(decision_id, mode)).await
    }

    async fn list_insights(
        &self,
        domain: Option<Domain>,
        mode: Option<JudgeMode>,
        limit: usize,
    ) -> Result<Vec<JudgeInsight>> {
        let all: Vec<JudgeInsight> = list_dir(&self.root.join("insights")).await?;
        let mut insights: Vec<_> = all
            .into_iter()
            .filter(|i| domain.map_or(true, |d| i.domain == d))
            .filter(|i| mode.map_or(true, |m| i.mode == m))
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
        let _guard = self.write_lock.lock().await;
        let mut updated = Vec::new();
        for mode in [JudgeMode::PostHoc, JudgeMode::Inline] {
            let path = self.insight_path(decision_id, mode);
            if let Some(mut insight) = read_json::<JudgeInsight>(&path).await? {
                if insight.actual_outcome.is_none() {
                    insight.attach_outcome(outcome);
                    write_json(&path, &insight).await?;
                    updated.push(insight);
                }
            }
        }
        Ok(updated)
    }
}

/// Hex-encode an external key so any decision id is a safe, unique file stem.
fn encode_key(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}
