//! Similarity gate and batch consolidation of overlapping skills.
//!
//! Both paths work on one (domain, skill_type) bucket at a time and commit
//! through the bucket's version check, so a plan computed against stale
//! state is never applied.

use anyhow::{anyhow, Result};
use skillmem_ai::{fallback_draft, Evidence, EvidenceItem, PromptKind, SkillDraft, Synthesizer};
use skillmem_core::{
    BucketKey, DecisionId, Domain, MergeConfig, SkillFilter, SkillId, SkillPolicy, SkillRecord, SkillType,
};
use skillmem_storage::{BucketCommit, Storage};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::similarity::Similarity;

/// Result of passing a candidate through the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// No similar skill existed; the candidate was stored as-is
    Created(SkillId),
    /// The candidate and its matches were folded into an evolved skill
    Merged {
        /// The new evolved skill
        evolved: SkillId,
        /// Pre-existing skills it superseded
        merged_from: Vec<SkillId>,
    },
}

impl CreateOutcome {
    /// Id of the skill that now carries the lesson.
    pub fn skill_id(&self) -> SkillId {
        match self {
            CreateOutcome::Created(id) => *id,
            CreateOutcome::Merged { evolved, .. } => *evolved,
        }
    }
}

/// Report of one batch merge pass.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Buckets examined
    pub buckets_scanned: usize,
    /// Evolved skills created
    pub evolved: Vec<SkillId>,
    /// Skills archived into them
    pub archived: usize,
    /// Buckets that changed while being planned; retried next run
    pub conflicts: Vec<BucketKey>,
    /// Buckets that failed outright
    pub failures: Vec<(BucketKey, String)>,
}

/// Every bucket the batch pass visits.
pub fn all_buckets() -> Vec<BucketKey> {
    Domain::TRADING
        .iter()
        .chain(std::iter::once(&Domain::General))
        .flat_map(|d| SkillType::ALL.iter().map(move |t| BucketKey::new(*d, *t)))
        .collect()
}

/// Merge engine.
pub struct MergeEngine {
    storage: Arc<dyn Storage>,
    synthesizer: Arc<dyn Synthesizer>,
    similarity: Arc<dyn Similarity>,
    policy: SkillPolicy,
    config: MergeConfig,
}

impl MergeEngine {
    /// Create a merge engine.
    pub fn new(
        storage: Arc<dyn Storage>,
        synthesizer: Arc<dyn Synthesizer>,
        similarity: Arc<dyn Similarity>,
        policy: SkillPolicy,
        config: MergeConfig,
    ) -> Self {
        Self {
            storage,
            synthesizer,
            similarity,
            policy,
            config,
        }
    }

    /// Active skills of a bucket, excluded ones included.
    async fn bucket_members(&self, bucket: BucketKey) -> Result<Vec<SkillRecord>> {
        let filter = SkillFilter::active().in_bucket(bucket).including_excluded();
        Ok(self.storage.list_skills(&filter).await?)
    }

    /// Compose one evolved skill from a group, candidate first.
    ///
    /// Falls back to deterministic concatenation when the synthesizer fails.
    async fn compose_evolved(&self, group: &[&SkillRecord]) -> SkillDraft {
        let Some(lead) = group.first() else {
            return SkillDraft {
                title: String::new(),
                body: String::new(),
            };
        };
        let evidence = Evidence {
            domain: lead.domain,
            skill_type: Some(lead.skill_type),
            subject: lead.title.clone(),
            items: group
                .iter()
                .map(|s| EvidenceItem::new(s.title.clone(), s.body.clone()))
                .collect(),
            notes: Vec::new(),
            max_chars: self.config.max_body_chars,
        };

        match self.synthesizer.compose(PromptKind::MergeSkills, &evidence).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(
                    "Synthesizer {} failed to merge {} skills in {}/{}: {}; using concatenation",
                    self.synthesizer.name(),
                    group.len(),
                    lead.domain,
                    lead.skill_type,
                    e
                );
                fallback_draft(PromptKind::MergeSkills, &evidence)
            }
        }
    }

    /// Build the evolved record for a group.
    ///
    /// `merged_from` lists only pre-existing skills; provenance of a fresh
    /// candidate survives through its source decisions.
    fn evolved_record(&self, draft: SkillDraft, group: &[&SkillRecord], merged_from: Vec<SkillId>) -> SkillRecord {
        let domain = group.first().map(|s| s.domain).unwrap_or(Domain::General);
        let mut sources: Vec<DecisionId> = Vec::new();
        for skill in group {
            for id in &skill.source_decision_ids {
                if !sources.contains(id) {
                    sources.push(id.clone());
                }
            }
        }
        let mut evolved = SkillRecord::new(domain, SkillType::Evolved, draft.title, draft.body, &self.policy)
            .with_sources(sources);
        evolved.merged_from_skill_ids = merged_from;
        evolved
    }

    /// Pass a new skill through the similarity gate.
    ///
    /// Evolved skills are committed as-is. Otherwise the candidate is compared
    /// against every active skill of its bucket; if any reach the threshold,
    /// the candidate and all of them are merged into one evolved skill and
    /// the matches are archived, in one commit. A concurrent change to the
    /// bucket restarts the attempt, up to `max_cas_retries` times.
    pub async fn create_skill(&self, candidate: SkillRecord) -> Result<CreateOutcome> {
        let bucket = candidate.bucket();
        let mut composed: Option<(Vec<SkillId>, SkillDraft)> = None;

        for attempt in 0..=self.config.max_cas_retries {
            let version = self.storage.bucket_version(bucket).await?;

            let matches: Vec<SkillRecord> = if candidate.skill_type == SkillType::Evolved {
                Vec::new()
            } else {
                self.bucket_members(bucket)
                    .await?
                    .into_iter()
                    .filter(|s| self.similarity.score(&candidate, s) >= self.policy.similarity_threshold)
                    .collect()
            };

            if matches.is_empty() {
                match self.storage.commit_bucket(&BucketCommit::insert(candidate.clone(), version)).await {
                    Ok(_) => {
                        debug!("Created skill {} ({})", candidate.id, bucket);
                        return Ok(CreateOutcome::Created(candidate.id));
                    }
                    Err(e) if e.is_conflict() => {
                        debug!("Bucket {} changed, retrying create (attempt {})", bucket, attempt + 1);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let merged_from: Vec<SkillId> = matches.iter().map(|s| s.id).collect();
            let mut group: Vec<&SkillRecord> = vec![&candidate];
            group.extend(matches.iter());

            // Reuse the draft while the match set is unchanged across retries.
            let draft = match composed.take() {
                Some((ids, draft)) if ids == merged_from => draft,
                _ => self.compose_evolved(&group).await,
            };
            composed = Some((merged_from.clone(), draft.clone()));

            let evolved = self.evolved_record(draft, &group, merged_from.clone());
            let commit = BucketCommit {
                bucket,
                expected_version: version,
                archive: merged_from.iter().map(|id| (*id, evolved.id)).collect(),
                insert: vec![evolved.clone()],
            };

            match self.storage.commit_bucket(&commit).await {
                Ok(_) => {
                    info!(
                        "Merged candidate '{}' with {} similar skills into evolved skill {}",
                        candidate.title,
                        merged_from.len(),
                        evolved.id
                    );
                    return Ok(CreateOutcome::Merged {
                        evolved: evolved.id,
                        merged_from,
                    });
                }
                Err(e) if e.is_conflict() => {
                    debug!("Bucket {} changed, retrying merge (attempt {})", bucket, attempt + 1);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!("Giving up on skill '{}': bucket {} kept changing", candidate.title, bucket);
        Err(anyhow!("bucket {} kept changing", bucket))
    }

    /// Group a bucket's members greedily: each unassigned skill, oldest first,
    /// gathers every unassigned skill similar to it.
    fn cluster<'a>(&self, members: &'a [SkillRecord]) -> Vec<Vec<&'a SkillRecord>> {
        let mut assigned = vec![false; members.len()];
        let mut groups = Vec::new();

        for i in 0..members.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut group = vec![&members[i]];
            for j in (i + 1)..members.len() {
                if !assigned[j]
                    && self.similarity.score(&members[i], &members[j]) >= self.policy.similarity_threshold
                {
                    assigned[j] = true;
                    group.push(&members[j]);
                }
            }
            if group.len() > 1 {
                groups.push(group);
            }
        }
        groups
    }

    /// Consolidate one bucket. Returns the evolved skills and archive count.
    pub async fn merge_bucket(&self, bucket: BucketKey) -> Result<(Vec<SkillId>, usize)> {
        let version = self.storage.bucket_version(bucket).await?;
        let members = self.bucket_members(bucket).await?;
        let groups = self.cluster(&members);
        if groups.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut commit = BucketCommit {
            bucket,
            expected_version: version,
            archive: Vec::new(),
            insert: Vec::new(),
        };
        for group in &groups {
            let draft = self.compose_evolved(group).await;
            let ids: Vec<SkillId> = group.iter().map(|s| s.id).collect();
            let evolved = self.evolved_record(draft, group, ids.clone());
            commit.archive.extend(ids.into_iter().map(|id| (id, evolved.id)));
            commit.insert.push(evolved);
        }

        self.storage.commit_bucket(&commit).await?;
        let evolved: Vec<SkillId> = commit.insert.iter().map(|s| s.id).collect();
        info!(
            "Merged {} skills of {} into {} evolved skills",
            commit.archive.len(),
            bucket,
            evolved.len()
        );
        Ok((evolved, commit.archive.len()))
    }

    /// Batch pass over every bucket.
    ///
    /// A bucket that changes while planned is skipped until the next run; a
    /// failing bucket does not stop the others.
    pub async fn run_merge_pass(&self) -> MergeReport {
        let mut report = MergeReport::default();
        for bucket in all_buckets() {
            report.buckets_scanned += 1;
            match self.merge_bucket(bucket).await {
                Ok((evolved, archived)) => {
                    report.evolved.extend(evolved);
                    report.archived += archived;
                }
                Err(e) => {
                    let conflict = e
                        .downcast_ref::<skillmem_storage::StorageError>()
                        .map(|se| se.is_conflict())
                        .unwrap_or(false);
                    if conflict {
                        warn!("Bucket {} changed during merge pass; skipping until next run", bucket);
                        report.conflicts.push(bucket);
                    } else {
                        warn!("Merge pass failed for bucket {}: {}", bucket, e);
                        report.failures.push((bucket, e.to_string()));
                    }
                }
            }
        }
        report
    }
}
