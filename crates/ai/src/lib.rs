//! Language-model collaborators for the skill lifecycle.
//!
//! The lifecycle never depends on a model being present: every capability
//! here has a deterministic fallback, and every call is bounded by a timeout.

#![warn(missing_docs)]

pub mod synthesizer;
pub mod fallback;
pub mod ollama;

pub use synthesizer::{
    Evidence, EvidenceItem, PromptKind, SkillDraft, SynthesisError, Synthesizer, TimeoutSynthesizer,
};
pub use fallback::{fallback_draft, merge_bodies, truncate_chars, FallbackSynthesizer};
pub use ollama::OllamaSynthesizer;
