//! Skill lifecycle core data models.
//!
//! This crate defines the records the lifecycle engine owns (skills,
//! recommendations, judge insights), the read-only views of decisions it
//! consumes, and the policy/configuration that governs them.

#![warn(missing_docs)]

// Core identities
mod id;
mod domain;

// Owned records
mod skill;
mod recommendation;
mod judge;
mod pattern;

// Decision-loop views
mod decision;

pub mod config;

// Re-exports
pub use id::*;
pub use domain::{Domain, UnknownDomain};

pub use skill::{SkillRecord, SkillType, SkillStatus, SkillFilter, BucketKey};
pub use recommendation::{SkillRecommendation, MatchType, TradeOutcome};
pub use judge::{JudgeInsight, Dimension, DimensionScores, InsightType, JudgeMode};
pub use pattern::{CrossDomainPattern, DomainStats, Applicability};
pub use decision::{ClosedDecision, ProposedDecision};

pub use config::{
    LifecycleConfig, SkillPolicy, SimilarityKind, TtlConfig, MergeConfig,
    CrossDomainConfig, JudgeConfig, LessonConfig, SynthesizerConfig,
    StorageConfig, StorageBackend,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
