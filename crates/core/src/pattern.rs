//! Cross-domain pattern aggregates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::domain::Domain;

/// Sample/win counts for one theme in one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStats {
    /// Decisions tagged with the theme
    pub samples: u32,
    /// Of those, profitable ones
    pub wins: u32,
}

/// How broadly a promoted pattern applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    /// win rate > 0.65
    High,
    /// win rate > 0.55
    Medium,
    /// otherwise
    Low,
}

impl Applicability {
    /// Tier for a combined win rate.
    pub fn from_win_rate(win_rate: f64) -> Self {
        if win_rate > 0.65 {
            Applicability::High
        } else if win_rate > 0.55 {
            Applicability::Medium
        } else {
            Applicability::Low
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Applicability::High => "high",
            Applicability::Medium => "medium",
            Applicability::Low => "low",
        }
    }
}

/// A theme observed across domains. Not persisted until promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDomainPattern {
    /// Normalized theme key
    pub theme_key: String,

    /// Per-domain counts
    pub per_domain: BTreeMap<Domain, DomainStats>,

    /// Combined win rate across all domains
    pub win_rate: f64,

    /// Combined sample size
    pub sample_size: u32,

    /// Applicability tier
    pub applicability: Applicability,

    /// Example reasonings backing the pattern
    pub evidence: Vec<String>,
}

impl CrossDomainPattern {
    /// Build from per-domain counts, deriving the combined figures.
    pub fn from_counts(
        theme_key: impl Into<String>,
        per_domain: BTreeMap<Domain, DomainStats>,
        evidence: Vec<String>,
    ) -> Self {
        let sample_size: u32 = per_domain.values().map(|s| s.samples).sum();
        let wins: u32 = per_domain.values().map(|s| s.wins).sum();
        let win_rate = if sample_size > 0 {
            wins as f64 / sample_size as f64
        } else {
            0.0
        };
        Self {
            theme_key: theme_key.into(),
            per_domain,
            win_rate,
            sample_size,
            applicability: Applicability::from_win_rate(win_rate),
            evidence,
        }
    }

    /// Domains with at least one sample.
    pub fn domains(&self) -> Vec<Domain> {
        self.per_domain
            .iter()
            .filter(|(_, s)| s.samples > 0)
            .map(|(d, _)| *d)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_counts_across_domains() {
        let mut per_domain = BTreeMap::new();
        per_domain.insert(Domain::Perps, DomainStats { samples: 8, wins: 5 });
        per_domain.insert(Domain::Spot, DomainStats { samples: 4, wins: 2 });
        let p = CrossDomainPattern::from_counts("timing", per_domain, vec![]);
        assert_eq!(p.sample_size, 12);
        assert!((p.win_rate - 7.0 / 12.0).abs() < 1e-9);
        assert_eq!(p.applicability, Applicability::Medium);
        assert_eq!(p.domains(), vec![Domain::Perps, Domain::Spot]);
    }

    #[test]
    fn applicability_tiers() {
        assert_eq!(Applicability::from_win_rate(0.7), Applicability::High);
        assert_eq!(Applicability::from_win_rate(0.65), Applicability::Medium);
        assert_eq!(Applicability::from_win_rate(0.55), Applicability::Low);
    }
}
