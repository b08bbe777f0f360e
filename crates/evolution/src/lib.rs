//! Evolution layer - how the skill pool performs and generalizes.
//!
//! Effectiveness reporting over the pool, the versioned theme taxonomy, and
//! promotion of themes that hold up across independent domains.

#![warn(missing_docs, unused_crate_dependencies)]

mod taxonomy;
mod report;
mod cross_domain;

pub use taxonomy::{Theme, ThemeTaxonomy, TAXONOMY_VERSION};
pub use report::{build_report, DomainEffectiveness, EffectivenessReport};
pub use cross_domain::{CrossDomainReport, CrossDomainSynthesizer, PromotionOutcome};
