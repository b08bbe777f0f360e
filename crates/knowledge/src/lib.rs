//! Skill knowledge services.
//!
//! Storage-facing services for the skill pool: the store itself, usage
//! tracking, the similarity gate and merge pass, retrieval, and lesson
//! extraction from closed decisions.

#![warn(missing_docs)]

pub mod phrases;
pub mod similarity;
pub mod store;
pub mod usage;
pub mod merge;
pub mod lessons;

pub use similarity::{similarity_for, PhraseJaccard, Similarity, TokenJaccard};
pub use store::{render_skills, retrieval_order, SkillStore};
pub use usage::{detect_usage, Detection, Resolution, UsageTracker};
pub use merge::{all_buckets, CreateOutcome, MergeEngine, MergeReport};
pub use lessons::LessonExtractor;
