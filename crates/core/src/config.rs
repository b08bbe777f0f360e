//! Lifecycle configuration and policy constants.
//!
//! Every threshold here is configuration with the historical literal as its
//! default, so behaviour is unchanged unless a config file overrides it.

use serde::{Deserialize, Serialize};
use crate::skill::SkillType;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Skill TTL, similarity and pruning policy
    #[serde(default)]
    pub policy: SkillPolicy,

    /// Merge engine settings
    #[serde(default)]
    pub merge: MergeConfig,

    /// Cross-domain synthesizer settings
    #[serde(default)]
    pub cross_domain: CrossDomainConfig,

    /// Judge settings
    #[serde(default)]
    pub judge: JudgeConfig,

    /// Lesson extraction from resolved outcomes
    #[serde(default)]
    pub lessons: LessonConfig,

    /// Text synthesis collaborator
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Skill TTL, similarity and pruning policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillPolicy {
    /// Minimum similarity for two skills to merge
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Applications needed before a skill can be pruned
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u32,

    /// Success rate below which a sampled skill is excluded
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Similarity function used for merges
    #[serde(default)]
    pub similarity: SimilarityKind,

    /// TTL overrides (days)
    #[serde(default)]
    pub ttl: TtlConfig,
}

fn default_similarity_threshold() -> f64 {
    0.70
}

fn default_min_sample_size() -> u32 {
    5
}

fn default_min_success_rate() -> f64 {
    0.30
}

impl Default for SkillPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_sample_size: default_min_sample_size(),
            min_success_rate: default_min_success_rate(),
            similarity: SimilarityKind::default(),
            ttl: TtlConfig::default(),
        }
    }
}

impl SkillPolicy {
    /// TTL in days for a skill type.
    pub fn ttl_days(&self, skill_type: SkillType) -> u32 {
        match skill_type {
            SkillType::Warning => self.ttl.warning,
            SkillType::Pattern => self.ttl.pattern,
            SkillType::Strategy => self.ttl.strategy,
            SkillType::Evolved => self.ttl.evolved,
        }
    }

    /// Whether counters put a skill below the pruning line.
    pub fn should_exclude(&self, times_applied: u32, success_rate: Option<f64>) -> bool {
        match success_rate {
            Some(rate) => times_applied >= self.min_sample_size && rate < self.min_success_rate,
            None => false,
        }
    }
}

/// Available similarity functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityKind {
    /// Jaccard over extracted key phrases
    #[default]
    KeyPhrase,
    /// Jaccard over word tokens
    Token,
}

/// TTL per skill type, in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Warning TTL
    #[serde(default = "default_warning_ttl")]
    pub warning: u32,
    /// Pattern TTL
    #[serde(default = "default_pattern_ttl")]
    pub pattern: u32,
    /// Strategy TTL
    #[serde(default = "default_strategy_ttl")]
    pub strategy: u32,
    /// Evolved TTL
    #[serde(default = "default_evolved_ttl")]
    pub evolved: u32,
}

fn default_warning_ttl() -> u32 {
    SkillType::Warning.default_ttl_days()
}

fn default_pattern_ttl() -> u32 {
    SkillType::Pattern.default_ttl_days()
}

fn default_strategy_ttl() -> u32 {
    SkillType::Strategy.default_ttl_days()
}

fn default_evolved_ttl() -> u32 {
    SkillType::Evolved.default_ttl_days()
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            warning: default_warning_ttl(),
            pattern: default_pattern_ttl(),
            strategy: default_strategy_ttl(),
            evolved: default_evolved_ttl(),
        }
    }
}

/// Merge engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Run the batch merge pass every N cycles
    #[serde(default = "default_merge_every_cycles")]
    pub every_cycles: u64,

    /// Maximum length of a fallback (concatenated) evolved body
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,

    /// Attempts at the bucket compare-and-swap before giving up for this run
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
}

fn default_merge_every_cycles() -> u64 {
    5
}

fn default_max_body_chars() -> usize {
    2000
}

fn default_max_cas_retries() -> u32 {
    3
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            every_cycles: default_merge_every_cycles(),
            max_body_chars: default_max_body_chars(),
            max_cas_retries: default_max_cas_retries(),
        }
    }
}

/// Cross-domain synthesizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDomainConfig {
    /// Run every N cycles
    #[serde(default = "default_cross_domain_every_cycles")]
    pub every_cycles: u64,

    /// Most recent resolved decisions pulled per domain
    #[serde(default = "default_window")]
    pub window: usize,

    /// Distinct domains required for promotion
    #[serde(default = "default_min_domains")]
    pub min_domains: usize,

    /// Combined win rate that must be exceeded
    #[serde(default = "default_min_win_rate")]
    pub min_win_rate: f64,

    /// Combined sample size required
    #[serde(default = "default_cross_min_sample_size")]
    pub min_sample_size: u32,

    /// Promotions allowed per run
    #[serde(default = "default_max_promotions")]
    pub max_promotions: usize,

    /// Example reasonings attached per promotion
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,

    /// How far back to look for closed decisions, in days
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_cross_domain_every_cycles() -> u64 {
    10
}

fn default_window() -> usize {
    50
}

fn default_min_domains() -> usize {
    2
}

fn default_min_win_rate() -> f64 {
    0.55
}

fn default_cross_min_sample_size() -> u32 {
    10
}

fn default_max_promotions() -> usize {
    5
}

fn default_max_evidence() -> usize {
    3
}

fn default_lookback_days() -> i64 {
    90
}

impl Default for CrossDomainConfig {
    fn default() -> Self {
        Self {
            every_cycles: default_cross_domain_every_cycles(),
            window: default_window(),
            min_domains: default_min_domains(),
            min_win_rate: default_min_win_rate(),
            min_sample_size: default_cross_min_sample_size(),
            max_promotions: default_max_promotions(),
            max_evidence: default_max_evidence(),
            lookback_days: default_lookback_days(),
        }
    }
}

/// Judge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Quality at or above which a decision is predicted good
    #[serde(default = "default_good_decision_threshold")]
    pub good_decision_threshold: f64,

    /// Inline gate blocks below this quality
    #[serde(default = "default_block_quality")]
    pub block_quality_below: f64,

    /// Inline gate blocks when the suggested confidence is below this
    #[serde(default = "default_min_adjusted_confidence")]
    pub min_adjusted_confidence: f64,

    /// Inline gate blocks positions above this fraction of balance
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,

    /// Post-hoc evaluator time budget, seconds
    #[serde(default = "default_post_hoc_timeout_secs")]
    pub post_hoc_timeout_secs: u64,

    /// Inline evaluator time budget, seconds
    #[serde(default = "default_inline_timeout_secs")]
    pub inline_timeout_secs: u64,

    /// Insights considered when synthesizing context
    #[serde(default = "default_synthesis_window")]
    pub synthesis_window: usize,

    /// How far back the background judge looks for closed decisions, in days
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_good_decision_threshold() -> f64 {
    0.6
}

fn default_block_quality() -> f64 {
    0.4
}

fn default_min_adjusted_confidence() -> f64 {
    0.5
}

fn default_max_position_fraction() -> f64 {
    0.20
}

fn default_post_hoc_timeout_secs() -> u64 {
    30
}

fn default_inline_timeout_secs() -> u64 {
    5
}

fn default_synthesis_window() -> usize {
    20
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            good_decision_threshold: default_good_decision_threshold(),
            block_quality_below: default_block_quality(),
            min_adjusted_confidence: default_min_adjusted_confidence(),
            max_position_fraction: default_max_position_fraction(),
            post_hoc_timeout_secs: default_post_hoc_timeout_secs(),
            inline_timeout_secs: default_inline_timeout_secs(),
            synthesis_window: default_synthesis_window(),
            lookback_days: default_lookback_days(),
        }
    }
}

/// Lesson extraction thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonConfig {
    /// pnl percent at or below which a warning is recorded
    #[serde(default = "default_loss_threshold_pct")]
    pub loss_threshold_pct: f64,

    /// pnl percent at or above which a pattern is recorded
    #[serde(default = "default_win_threshold_pct")]
    pub win_threshold_pct: f64,
}

fn default_loss_threshold_pct() -> f64 {
    -10.0
}

fn default_win_threshold_pct() -> f64 {
    10.0
}

impl Default for LessonConfig {
    fn default() -> Self {
        Self {
            loss_threshold_pct: default_loss_threshold_pct(),
            win_threshold_pct: default_win_threshold_pct(),
        }
    }
}

/// Text synthesis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    /// Use the remote model; when false only the deterministic fallback runs
    #[serde(default)]
    pub enabled: bool,

    /// Ollama server URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call timeout, seconds
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen3:8b".to_string()
}

fn default_synthesis_timeout_secs() -> u64 {
    30
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: default_ollama_url(),
            model: default_model(),
            timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory (json) or database file (sqlite)
    #[serde(default = "default_storage_path")]
    pub path: std::path::PathBuf,

    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackend,
}

fn default_storage_path() -> std::path::PathBuf {
    std::path::PathBuf::from(".skillmem")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            backend: StorageBackend::default(),
        }
    }
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per row
    #[default]
    Json,
    /// SQLite database (requires the `sqlite` feature)
    Sqlite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_literal_defaults() {
        let config: LifecycleConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.policy.similarity_threshold, 0.70);
        assert_eq!(config.policy.min_sample_size, 5);
        assert_eq!(config.policy.min_success_rate, 0.30);
        assert_eq!(config.cross_domain.every_cycles, 10);
        assert_eq!(config.cross_domain.max_promotions, 5);
        assert_eq!(config.judge.max_position_fraction, 0.20);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: LifecycleConfig =
            serde_json::from_str(r#"{"policy": {"similarity_threshold": 0.8, "ttl": {"warning": 30}}}"#).unwrap();
        assert_eq!(config.policy.similarity_threshold, 0.8);
        assert_eq!(config.policy.ttl_days(SkillType::Warning), 30);
        assert_eq!(config.policy.ttl_days(SkillType::Pattern), 90);
        assert_eq!(config.policy.min_sample_size, 5);
    }

    #[test]
    fn exclusion_needs_minimum_samples() {
        let policy = SkillPolicy::default();
        assert!(!policy.should_exclude(4, Some(0.0)));
        assert!(policy.should_exclude(5, Some(0.2)));
        assert!(!policy.should_exclude(5, Some(0.3)));
        assert!(!policy.should_exclude(0, None));
    }
}
