//! The lifecycle engine: the surface the decision loop talks to.

use anyhow::Result;
use skillmem_ai::Synthesizer;
use skillmem_core::{
    ClosedDecision, DecisionId, Domain, JudgeInsight, LifecycleConfig, ProposedDecision,
    SkillFilter, SkillId, SkillRecommendation, SkillRecord, Time, TradeOutcome,
};
use skillmem_evolution::{
    build_report, CrossDomainReport, CrossDomainSynthesizer, EffectivenessReport, ThemeTaxonomy,
};
use skillmem_knowledge::{
    similarity_for, CreateOutcome, LessonExtractor, MergeEngine, MergeReport, Resolution,
    SkillStore, UsageTracker,
};
use skillmem_reflection::{
    GateDecision, HeuristicEvaluator, JudgeEvaluator, JudgeFeedbackLoop, JudgeRunReport,
    JudgeSynthesis, LlmJudgeEvaluator,
};
use skillmem_storage::{DecisionFeed, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::scheduler::{CycleSchedule, CycleScheduler};
use crate::setup::{build_synthesizer, open_storage};

/// What resolving one decision did.
#[derive(Debug, Clone, Default)]
pub struct OutcomeReport {
    /// Recommendation resolution and counter updates
    pub resolution: Resolution,
    /// Post-hoc judge insight, when the judge ran
    pub insight: Option<JudgeInsight>,
    /// Lesson recorded from the outcome, if it crossed a threshold
    pub lesson: Option<CreateOutcome>,
    /// Why the lesson step failed, if it did; resolving again retries it
    pub lesson_error: Option<String>,
}

/// What one scheduled cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Cycle number
    pub cycle: u64,
    /// Skills expired by the sweep
    pub expired: Vec<SkillId>,
    /// Decisions judged post-hoc
    pub judged: usize,
    /// Merge pass, when due
    pub merge: Option<MergeReport>,
    /// Cross-domain synthesis, when due
    pub cross_domain: Option<CrossDomainReport>,
}

/// Handle to the background task started by `spawn_background`.
pub struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Signal the task to stop after its current cycle and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
}

/// Skill lifecycle engine.
///
/// Owns skills, recommendations and judge insights. Decisions are read
/// through the feed and never written.
pub struct LifecycleEngine {
    config: LifecycleConfig,
    storage: Arc<dyn Storage>,
    feed: Arc<dyn DecisionFeed>,
    store: SkillStore,
    usage: UsageTracker,
    merge: Arc<MergeEngine>,
    lessons: LessonExtractor,
    cross_domain: CrossDomainSynthesizer,
    judge: JudgeFeedbackLoop,
    scheduler: CycleScheduler,
}

impl LifecycleEngine {
    /// Assemble an engine over explicit collaborators.
    ///
    /// The judge scores with the model when `config.synthesizer.enabled`,
    /// otherwise with the heuristic evaluator.
    pub fn new(
        config: LifecycleConfig,
        storage: Arc<dyn Storage>,
        feed: Arc<dyn DecisionFeed>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let evaluator: Arc<dyn JudgeEvaluator> = if config.synthesizer.enabled {
            Arc::new(LlmJudgeEvaluator::new(synthesizer.clone()))
        } else {
            Arc::new(HeuristicEvaluator)
        };

        let merge = Arc::new(MergeEngine::new(
            storage.clone(),
            synthesizer.clone(),
            similarity_for(config.policy.similarity),
            config.policy.clone(),
            config.merge.clone(),
        ));
        let cross_domain = CrossDomainSynthesizer::new(
            storage.clone(),
            feed.clone(),
            synthesizer,
            merge.clone(),
            ThemeTaxonomy::builtin(),
            config.policy.clone(),
            config.cross_domain.clone(),
            config.merge.max_body_chars,
        );
        let judge = JudgeFeedbackLoop::new(
            storage.clone(),
            feed.clone(),
            evaluator.clone(),
            evaluator,
            config.judge.clone(),
        );
        let scheduler = CycleScheduler::new(CycleSchedule {
            merge_every: config.merge.every_cycles,
            cross_domain_every: config.cross_domain.every_cycles,
        });

        Self {
            store: SkillStore::new(storage.clone()),
            usage: UsageTracker::new(storage.clone(), config.policy.clone()),
            lessons: LessonExtractor::new(config.lessons.clone(), config.policy.clone()),
            merge,
            cross_domain,
            judge,
            scheduler,
            storage,
            feed,
            config,
        }
    }

    /// Open the configured storage and synthesizer and assemble an engine.
    pub async fn open(config: LifecycleConfig, feed: Arc<dyn DecisionFeed>) -> Result<Self> {
        let storage = open_storage(&config.storage).await?;
        let synthesizer = build_synthesizer(&config.synthesizer);
        Ok(Self::new(config, storage, feed, synthesizer))
    }

    /// Replace the judge evaluators.
    pub fn with_evaluators(
        mut self,
        post_hoc: Arc<dyn JudgeEvaluator>,
        inline: Arc<dyn JudgeEvaluator>,
    ) -> Self {
        self.judge = JudgeFeedbackLoop::new(
            self.storage.clone(),
            self.feed.clone(),
            post_hoc,
            inline,
            self.config.judge.clone(),
        );
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Underlying storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    // === Decision-time operations ===

    /// Skills to show the decision step for `domain`: the domain's own plus
    /// general ones, best first.
    pub async fn retrieve_skills(&self, domain: Domain, max_count: usize) -> Result<Vec<SkillRecord>> {
        Ok(self.store.retrieve(domain, max_count).await?)
    }

    /// Record that a skill was offered to a decision.
    pub async fn record_recommendation(
        &self,
        decision_id: DecisionId,
        skill_id: SkillId,
        relevance: f64,
    ) -> Result<bool> {
        self.usage.record_recommendation(decision_id, skill_id, relevance).await
    }

    /// Detect which offered skills the decision's reasoning used.
    pub async fn track_usage(
        &self,
        decision_id: &DecisionId,
        reasoning: &str,
        skills: &[SkillRecord],
    ) -> Result<Vec<SkillRecommendation>> {
        self.usage.track_usage(decision_id, reasoning, skills).await
    }

    /// Judge a decision before execution. Never errors; fails open.
    pub async fn gate(&self, proposal: &ProposedDecision) -> GateDecision {
        self.judge.gate(proposal).await
    }

    /// Judge context for the decision step.
    pub async fn get_judge_synthesis(&self, domain: Option<Domain>, limit: usize) -> Result<JudgeSynthesis> {
        self.judge.synthesis(domain, limit).await
    }

    // === Outcome operations ===

    /// Feed a realized outcome back.
    ///
    /// Resolves the decision's recommendations (at most once), counts
    /// applications, attaches the outcome to judge insights, judges the
    /// decision post-hoc and records a lesson when the pnl crosses a
    /// threshold. Judge and lesson steps need the decision from the feed and
    /// are skipped with a warning when it is missing.
    ///
    /// Only a failed resolution is returned as an error; nothing was resolved
    /// then, so the caller may resolve again. Later steps log and carry on,
    /// and calling again retries a lesson that was not recorded.
    pub async fn resolve_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
        pnl_percent: f64,
    ) -> Result<OutcomeReport> {
        let mut report = OutcomeReport::default();
        if !outcome.is_resolved() {
            debug!("Outcome of {} still pending", decision_id);
            return Ok(report);
        }

        report.resolution = self.usage.resolve(decision_id, outcome, chrono::Utc::now()).await?;

        if let Err(e) = self.judge.attach_outcome(decision_id, outcome).await {
            warn!("Failed to attach outcome to insights for {}: {}", decision_id, e);
        }

        let decision = match self.feed.find_decision(decision_id).await {
            Ok(Some(decision)) => decision,
            Ok(None) => {
                warn!("Decision {} not in feed; skipping judge and lesson", decision_id);
                return Ok(report);
            }
            Err(e) => {
                warn!("Failed to read decision {}: {}; skipping judge and lesson", decision_id, e);
                return Ok(report);
            }
        };

        report.insight = match self.judge.judge_post_hoc(&decision).await {
            Ok(insight) => insight,
            Err(e) => {
                warn!("Post-hoc judge failed for {}: {}", decision_id, e);
                None
            }
        };

        match self.record_lesson(&decision, pnl_percent, report.insight.as_ref()).await {
            Ok(lesson) => report.lesson = lesson,
            Err(e) => {
                warn!("Failed to record lesson from {}: {}", decision_id, e);
                report.lesson_error = Some(e.to_string());
            }
        }

        Ok(report)
    }

    async fn record_lesson(
        &self,
        decision: &ClosedDecision,
        pnl_percent: f64,
        insight: Option<&JudgeInsight>,
    ) -> Result<Option<CreateOutcome>> {
        if self.has_lesson_from(decision).await? {
            debug!("Lesson from {} already recorded", decision.id);
            return Ok(None);
        }
        let Some(candidate) = self.lessons.extract(decision, pnl_percent, insight) else {
            return Ok(None);
        };
        let created = self.merge.create_skill(candidate).await?;
        info!("Lesson from {} recorded as {}", decision.id, created.skill_id());
        Ok(Some(created))
    }

    async fn has_lesson_from(&self, decision: &ClosedDecision) -> Result<bool> {
        let skills = self
            .store
            .list(&SkillFilter::all().in_domain(decision.domain))
            .await?;
        Ok(skills
            .iter()
            .any(|s| s.source_decision_ids.contains(&decision.id)))
    }

    /// Store a skill candidate through the merge gate.
    pub async fn create_skill(&self, candidate: SkillRecord) -> Result<CreateOutcome> {
        self.merge.create_skill(candidate).await
    }

    // === Audit ===

    /// One skill by id, whatever its status.
    pub async fn get_skill(&self, id: SkillId) -> Result<Option<SkillRecord>> {
        Ok(self.store.get(id).await?)
    }

    /// Skills matching a filter, archived and expired rows included when
    /// the filter allows them.
    pub async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<SkillRecord>> {
        Ok(self.store.list(filter).await?)
    }

    /// Effectiveness metrics over the pool.
    pub async fn effectiveness_report(&self) -> Result<EffectivenessReport> {
        build_report(self.storage.as_ref()).await
    }

    // === Scheduled entry points ===

    /// Expire every active skill past its TTL. Idempotent.
    pub async fn sweep_expired_skills(&self, now: Time) -> Result<Vec<SkillId>> {
        Ok(self.store.sweep_expired(now).await?)
    }

    /// Merge similar skills in every bucket.
    pub async fn run_merge_pass(&self) -> MergeReport {
        self.merge.run_merge_pass().await
    }

    /// Promote qualifying cross-domain themes to general skills.
    pub async fn run_cross_domain_synthesis(&self) -> CrossDomainReport {
        self.cross_domain.run().await
    }

    /// Judge closed decisions of a domain that lack an insight.
    pub async fn judge_pending(&self, domain: Domain) -> Result<JudgeRunReport> {
        self.judge.judge_pending(domain).await
    }

    /// Run one cycle: sweep, judge every domain, and the periodic jobs that
    /// are due. Failures are logged and do not stop the rest of the cycle.
    pub async fn run_cycle(&self, now: Time) -> CycleReport {
        let tick = self.scheduler.next_cycle();
        let mut report = CycleReport {
            cycle: tick.cycle,
            ..Default::default()
        };
        debug!("Starting lifecycle cycle {}", tick.cycle);

        match self.sweep_expired_skills(now).await {
            Ok(expired) => report.expired = expired,
            Err(e) => error!("Expiry sweep failed: {}", e),
        }

        for domain in Domain::TRADING {
            match self.judge_pending(domain).await {
                Ok(run) => report.judged += run.evaluated,
                Err(e) => warn!("Judge pass for {} failed: {}", domain, e),
            }
        }

        if tick.run_merge {
            report.merge = Some(self.run_merge_pass().await);
        }
        if tick.run_cross_domain {
            report.cross_domain = Some(self.run_cross_domain_synthesis().await);
        }

        info!(
            "Cycle {}: {} expired, {} judged{}{}",
            tick.cycle,
            report.expired.len(),
            report.judged,
            if report.merge.is_some() { ", merge ran" } else { "" },
            if report.cross_domain.is_some() { ", synthesis ran" } else { "" },
        );
        report
    }

    /// Cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.scheduler.cycles()
    }

    /// Run `run_cycle` every `interval` until the returned handle is stopped.
    pub fn spawn_background(self: Arc<Self>, interval: Duration) -> BackgroundTask {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle(chrono::Utc::now()).await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            info!("Background lifecycle stopped after {} cycles", self.cycles());
                            break;
                        }
                    }
                }
            }
        });
        BackgroundTask { shutdown, handle }
    }
}
