//! Promotion of themes that recur across domains into general skills.

use skillmem_ai::{Evidence, EvidenceItem, PromptKind, Synthesizer};
use skillmem_core::{
    CrossDomainConfig, CrossDomainPattern, Domain, DomainStats, SkillFilter, SkillId, SkillPolicy,
    SkillRecord, SkillType, TradeOutcome,
};
use skillmem_knowledge::phrases::normalize;
use skillmem_knowledge::{CreateOutcome, MergeEngine};
use skillmem_storage::{DecisionFeed, Storage};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::taxonomy::ThemeTaxonomy;

/// Longest evidence excerpt, in characters.
const MAX_EXCERPT_CHARS: usize = 240;

/// What happened to one qualifying pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    /// A general skill now carries the theme
    Promoted(CreateOutcome),
    /// An active general skill already covers the theme
    Collision(SkillId),
    /// The synthesizer failed; retried next run
    SynthesisFailed(String),
}

/// Report of one synthesis run.
#[derive(Debug, Clone, Default)]
pub struct CrossDomainReport {
    /// Every aggregated theme, qualifying or not
    pub patterns: Vec<CrossDomainPattern>,
    /// Outcome per qualifying theme that was considered
    pub outcomes: Vec<(String, PromotionOutcome)>,
    /// Domains whose decisions could not be read
    pub failures: Vec<(Domain, String)>,
}

impl CrossDomainReport {
    /// Ids of general skills created or merged by this run.
    pub fn promoted(&self) -> Vec<SkillId> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                PromotionOutcome::Promoted(created) => Some(created.skill_id()),
                _ => None,
            })
            .collect()
    }
}

/// Title of the general skill for a theme.
fn general_title(theme_key: &str) -> String {
    format!("Cross-domain: {}", theme_key)
}

/// Whether `skill`, or any skill it was merged from, has the normalized `title`.
fn descends_from_title(skill: &SkillRecord, title: &str, by_id: &HashMap<SkillId, &SkillRecord>) -> bool {
    let mut pending = vec![skill];
    let mut seen = HashSet::new();
    while let Some(current) = pending.pop() {
        if !seen.insert(current.id) {
            continue;
        }
        if normalize(&current.title) == title {
            return true;
        }
        pending.extend(current.merged_from_skill_ids.iter().filter_map(|id| by_id.get(id).copied()));
    }
    false
}

/// Take excerpts one domain at a time so every domain is represented.
fn interleave(per_domain: BTreeMap<Domain, Vec<String>>, max: usize) -> Vec<String> {
    let mut queues: Vec<_> = per_domain.into_values().map(|v| v.into_iter()).collect();
    let mut out = Vec::new();
    while out.len() < max {
        let before = out.len();
        for queue in queues.iter_mut() {
            if out.len() == max {
                break;
            }
            if let Some(excerpt) = queue.next() {
                out.push(excerpt);
            }
        }
        if out.len() == before {
            break;
        }
    }
    out
}

/// Cross-domain pattern synthesizer.
pub struct CrossDomainSynthesizer {
    storage: Arc<dyn Storage>,
    feed: Arc<dyn DecisionFeed>,
    synthesizer: Arc<dyn Synthesizer>,
    merge: Arc<MergeEngine>,
    taxonomy: ThemeTaxonomy,
    policy: SkillPolicy,
    config: CrossDomainConfig,
    max_body_chars: usize,
}

impl CrossDomainSynthesizer {
    /// Create a synthesizer over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        feed: Arc<dyn DecisionFeed>,
        synthesizer: Arc<dyn Synthesizer>,
        merge: Arc<MergeEngine>,
        taxonomy: ThemeTaxonomy,
        policy: SkillPolicy,
        config: CrossDomainConfig,
        max_body_chars: usize,
    ) -> Self {
        Self {
            storage,
            feed,
            synthesizer,
            merge,
            taxonomy,
            policy,
            config,
            max_body_chars,
        }
    }

    /// Tag each domain's recent resolved decisions and aggregate per theme.
    ///
    /// Patterns come back strongest first (win rate, then sample size).
    pub async fn aggregate(&self) -> (Vec<CrossDomainPattern>, Vec<(Domain, String)>) {
        let since = chrono::Utc::now() - chrono::Duration::days(self.config.lookback_days);
        let mut counts: BTreeMap<String, BTreeMap<Domain, DomainStats>> = BTreeMap::new();
        let mut evidence: BTreeMap<String, BTreeMap<Domain, Vec<String>>> = BTreeMap::new();
        let mut failures = Vec::new();

        for domain in Domain::TRADING {
            let decisions = match self.feed.closed_decisions(domain, since).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Skipping {} in cross-domain synthesis: {}", domain, e);
                    failures.push((domain, e.to_string()));
                    continue;
                }
            };

            for decision in decisions
                .iter()
                .filter(|d| d.outcome.is_resolved())
                .take(self.config.window)
            {
                let won = decision.outcome == TradeOutcome::Profit;
                for theme in self.taxonomy.tag(&decision.reasoning) {
                    let stats = counts
                        .entry(theme.to_string())
                        .or_default()
                        .entry(domain)
                        .or_default();
                    stats.samples += 1;
                    if won {
                        stats.wins += 1;
                        let excerpts = evidence
                            .entry(theme.to_string())
                            .or_default()
                            .entry(domain)
                            .or_default();
                        if excerpts.len() < self.config.max_evidence {
                            excerpts.push(format!(
                                "[{}] {}",
                                domain,
                                skillmem_ai::truncate_chars(decision.reasoning.trim(), MAX_EXCERPT_CHARS)
                            ));
                        }
                    }
                }
            }
        }

        let mut patterns: Vec<CrossDomainPattern> = counts
            .into_iter()
            .map(|(theme, per_domain)| {
                let excerpts = interleave(evidence.remove(&theme).unwrap_or_default(), self.config.max_evidence);
                CrossDomainPattern::from_counts(theme, per_domain, excerpts)
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.win_rate
                .partial_cmp(&a.win_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.sample_size.cmp(&a.sample_size))
        });
        (patterns, failures)
    }

    /// Whether a pattern meets the promotion gates.
    pub fn qualifies(&self, pattern: &CrossDomainPattern) -> bool {
        pattern.domains().len() >= self.config.min_domains
            && pattern.win_rate > self.config.min_win_rate
            && pattern.sample_size >= self.config.min_sample_size
    }

    /// Active general skill already covering a theme, if any.
    ///
    /// A skill covers the theme when it is the theme's promoted skill or an
    /// evolved skill whose merge lineage reaches one.
    async fn collision(&self, theme_key: &str) -> anyhow::Result<Option<SkillId>> {
        let general = self
            .storage
            .list_skills(&SkillFilter::all().in_domain(Domain::General))
            .await?;
        let by_id: HashMap<SkillId, &SkillRecord> = general.iter().map(|s| (s.id, s)).collect();
        let title = normalize(&general_title(theme_key));

        Ok(general
            .iter()
            .filter(|s| s.is_active())
            .find(|s| descends_from_title(s, &title, &by_id))
            .map(|s| s.id))
    }

    fn evidence_for(&self, pattern: &CrossDomainPattern) -> Evidence {
        let mut notes = vec![
            format!(
                "Combined win rate {:.0}% over {} decisions in {} domains",
                pattern.win_rate * 100.0,
                pattern.sample_size,
                pattern.domains().len()
            ),
            format!("Applicability: {}", pattern.applicability.as_str()),
        ];
        for (domain, stats) in &pattern.per_domain {
            notes.push(format!("{}: {}/{} wins", domain, stats.wins, stats.samples));
        }
        Evidence {
            domain: Domain::General,
            skill_type: Some(SkillType::Pattern),
            subject: general_title(&pattern.theme_key),
            items: pattern
                .evidence
                .iter()
                .map(|e| EvidenceItem::new(String::new(), e.clone()))
                .collect(),
            notes,
            max_chars: self.max_body_chars,
        }
    }

    /// Try to promote one qualifying pattern.
    pub async fn promote(&self, pattern: &CrossDomainPattern) -> anyhow::Result<PromotionOutcome> {
        if let Some(existing) = self.collision(&pattern.theme_key).await? {
            debug!("Theme {} already covered by general skill {}", pattern.theme_key, existing);
            return Ok(PromotionOutcome::Collision(existing));
        }

        let evidence = self.evidence_for(pattern);
        let draft = match self
            .synthesizer
            .compose(PromptKind::GeneralizePattern, &evidence)
            .await
        {
            Ok(draft) => draft,
            Err(e) => {
                warn!("Skipping promotion of {} until next run: {}", pattern.theme_key, e);
                return Ok(PromotionOutcome::SynthesisFailed(e.to_string()));
            }
        };

        // Keep the theme in the title so the collision check finds it.
        let skill = SkillRecord::new(
            Domain::General,
            SkillType::Pattern,
            general_title(&pattern.theme_key),
            draft.body,
            &self.policy,
        );
        let created = self.merge.create_skill(skill).await?;
        info!(
            "Promoted theme {} ({} tier, {:.2} over {}) to general skill {}",
            pattern.theme_key,
            pattern.applicability.as_str(),
            pattern.win_rate,
            pattern.sample_size,
            created.skill_id()
        );
        Ok(PromotionOutcome::Promoted(created))
    }

    /// Aggregate, gate and promote, up to `max_promotions` per run.
    pub async fn run(&self) -> CrossDomainReport {
        let (patterns, failures) = self.aggregate().await;
        let mut report = CrossDomainReport {
            failures,
            ..Default::default()
        };

        let mut promoted = 0;
        for pattern in patterns.iter().filter(|p| self.qualifies(p)) {
            if promoted >= self.config.max_promotions {
                debug!("Promotion limit reached; {} deferred", pattern.theme_key);
                break;
            }
            match self.promote(pattern).await {
                Ok(outcome) => {
                    if matches!(outcome, PromotionOutcome::Promoted(_)) {
                        promoted += 1;
                    }
                    report.outcomes.push((pattern.theme_key.clone(), outcome));
                }
                Err(e) => {
                    warn!("Promotion of {} failed: {}", pattern.theme_key, e);
                    report
                        .outcomes
                        .push((pattern.theme_key.clone(), PromotionOutcome::SynthesisFailed(e.to_string())));
                }
            }
        }

        report.patterns = patterns;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skillmem_ai::{FallbackSynthesizer, SynthesisError, SkillDraft};
    use skillmem_core::{ClosedDecision, MergeConfig};
    use skillmem_knowledge::PhraseJaccard;
    use skillmem_storage::{MemoryStorage, StaticDecisionFeed};

    struct Refusing;

    #[async_trait]
    impl Synthesizer for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn synthesize(&self, _prompt: &str) -> Result<String, SynthesisError> {
            Err(SynthesisError::Malformed("garbage".to_string()))
        }

        async fn compose(&self, _kind: PromptKind, _evidence: &Evidence) -> Result<SkillDraft, SynthesisError> {
            Err(SynthesisError::Malformed("garbage".to_string()))
        }
    }

    fn decisions(domain: Domain, reasoning: &str, wins: u32, losses: u32) -> Vec<ClosedDecision> {
        let now = chrono::Utc::now();
        (0..wins + losses)
            .map(|i| {
                let won = i < wins;
                ClosedDecision {
                    id: format!("{}-{}", domain, i).into(),
                    domain,
                    reasoning: reasoning.to_string(),
                    amount_usd: 100.0,
                    confidence: 0.6,
                    outcome: if won { TradeOutcome::Profit } else { TradeOutcome::Loss },
                    realized_pnl: if won { 5.0 } else { -5.0 },
                    pnl_percent: if won { 5.0 } else { -5.0 },
                    closed_at: now - chrono::Duration::hours(i as i64 + 1),
                }
            })
            .collect()
    }

    fn synthesizer(
        storage: Arc<MemoryStorage>,
        feed: StaticDecisionFeed,
        composer: Arc<dyn Synthesizer>,
    ) -> CrossDomainSynthesizer {
        let merge = Arc::new(MergeEngine::new(
            storage.clone(),
            composer.clone(),
            Arc::new(PhraseJaccard),
            SkillPolicy::default(),
            MergeConfig::default(),
        ));
        CrossDomainSynthesizer::new(
            storage,
            Arc::new(feed),
            composer,
            merge,
            ThemeTaxonomy::builtin(),
            SkillPolicy::default(),
            CrossDomainConfig::default(),
            2000,
        )
    }

    #[tokio::test]
    async fn single_domain_theme_is_never_promoted() {
        let storage = Arc::new(MemoryStorage::new());
        let feed = StaticDecisionFeed::from_decisions(decisions(Domain::Perps, "waited for the breakout", 24, 6));
        let report = synthesizer(storage.clone(), feed, Arc::new(FallbackSynthesizer)).run().await;

        assert_eq!(report.patterns.len(), 1);
        assert_eq!(report.patterns[0].sample_size, 30);
        assert!(report.outcomes.is_empty());
        assert_eq!(storage.count_skills().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn theme_across_two_domains_is_promoted_once() {
        let storage = Arc::new(MemoryStorage::new());
        let mut all = decisions(Domain::Perps, "waited for the breakout", 5, 3);
        all.extend(decisions(Domain::Spot, "late entry after the breakout", 2, 2));
        let feed = StaticDecisionFeed::from_decisions(all);
        let synth = synthesizer(storage.clone(), feed, Arc::new(FallbackSynthesizer));

        let report = synth.run().await;
        let promoted = report.promoted();
        assert_eq!(promoted.len(), 1);
        let skill = storage.load_skill(promoted[0]).await.unwrap().unwrap();
        assert_eq!(skill.domain, Domain::General);
        assert_eq!(skill.skill_type, SkillType::Pattern);
        assert_eq!(skill.title, "Cross-domain: timing");
        assert!(skill.body.contains("perps: 5/8 wins"));
        assert!(skill.body.contains("Applicability: medium"));

        // Second run collides with the skill it just created.
        let again = synth.run().await;
        assert!(matches!(again.outcomes[0].1, PromotionOutcome::Collision(id) if id == promoted[0]));
        assert_eq!(storage.count_skills().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn thin_samples_or_weak_win_rate_do_not_qualify() {
        let storage = Arc::new(MemoryStorage::new());
        let mut all = decisions(Domain::Perps, "waited for the breakout", 3, 2);
        all.extend(decisions(Domain::Spot, "waited for the breakout", 2, 2));
        let synth = synthesizer(storage, StaticDecisionFeed::from_decisions(all), Arc::new(FallbackSynthesizer));
        let (patterns, _) = synth.aggregate().await;
        // 9 samples: below the size gate
        assert!(!synth.qualifies(&patterns[0]));
    }

    #[tokio::test]
    async fn malformed_synthesis_aborts_promotion() {
        let storage = Arc::new(MemoryStorage::new());
        let mut all = decisions(Domain::Perps, "waited for the breakout", 5, 3);
        all.extend(decisions(Domain::Spot, "waited for the breakout", 2, 2));
        let synth = synthesizer(storage.clone(), StaticDecisionFeed::from_decisions(all), Arc::new(Refusing));

        let report = synth.run().await;
        assert!(matches!(report.outcomes[0].1, PromotionOutcome::SynthesisFailed(_)));
        assert_eq!(storage.count_skills().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unrelated_general_title_does_not_block_promotion() {
        let storage = Arc::new(MemoryStorage::new());
        let unrelated = SkillRecord::new(
            Domain::General,
            SkillType::Pattern,
            "Timing of funding payments",
            "- **funding settles hourly** on most venues",
            &SkillPolicy::default(),
        );
        storage
            .commit_bucket(&skillmem_storage::BucketCommit::insert(unrelated.clone(), 0))
            .await
            .unwrap();

        let mut all = decisions(Domain::Perps, "waited for the breakout", 5, 3);
        all.extend(decisions(Domain::Spot, "late entry after the breakout", 2, 2));
        let synth = synthesizer(storage.clone(), StaticDecisionFeed::from_decisions(all), Arc::new(FallbackSynthesizer));

        let report = synth.run().await;
        assert_eq!(report.promoted().len(), 1);
        assert_ne!(report.promoted()[0], unrelated.id);
    }

    #[tokio::test]
    async fn merged_promotion_still_collides() {
        let storage = Arc::new(MemoryStorage::new());
        let policy = SkillPolicy::default();
        let promoted = SkillRecord::new(Domain::General, SkillType::Pattern, "Cross-domain: timing", "- wait", &policy);
        let mut evolved = SkillRecord::new(Domain::General, SkillType::Evolved, "Patience pays", "- wait", &policy);
        evolved.merged_from_skill_ids = vec![promoted.id];
        storage
            .commit_bucket(&skillmem_storage::BucketCommit::insert(promoted.clone(), 0))
            .await
            .unwrap();
        let version = storage.bucket_version(promoted.bucket()).await.unwrap();
        storage
            .commit_bucket(&skillmem_storage::BucketCommit {
                bucket: promoted.bucket(),
                expected_version: version,
                archive: vec![(promoted.id, evolved.id)],
                insert: vec![evolved.clone()],
            })
            .await
            .unwrap();

        let synth = synthesizer(storage, StaticDecisionFeed::new(), Arc::new(FallbackSynthesizer));
        assert_eq!(synth.collision("timing").await.unwrap(), Some(evolved.id));
        assert_eq!(synth.collision("risk").await.unwrap(), None);
    }

    #[tokio::test]
    async fn evidence_is_drawn_from_every_domain() {
        let storage = Arc::new(MemoryStorage::new());
        let mut all = decisions(Domain::Perps, "waited for the breakout", 12, 3);
        all.extend(decisions(Domain::Spot, "late entry after the breakout", 6, 2));
        let synth = synthesizer(storage, StaticDecisionFeed::from_decisions(all), Arc::new(FallbackSynthesizer));

        let (patterns, _) = synth.aggregate().await;
        let evidence = &patterns[0].evidence;
        assert_eq!(evidence.len(), CrossDomainConfig::default().max_evidence);
        assert!(evidence.iter().any(|e| e.starts_with("[perps]")));
        assert!(evidence.iter().any(|e| e.starts_with("[spot]")));
    }

    #[test]
    fn interleave_alternates_domains() {
        let mut per_domain = BTreeMap::new();
        per_domain.insert(Domain::Perps, vec!["p1".to_string(), "p2".to_string(), "p3".to_string()]);
        per_domain.insert(Domain::Spot, vec!["s1".to_string()]);
        assert_eq!(interleave(per_domain, 3), vec!["p1", "s1", "p2"]);
    }
}
