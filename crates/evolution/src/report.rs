//! Effectiveness metrics over the skill pool.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use skillmem_core::{Domain, SkillFilter, SkillStatus};
use skillmem_storage::Storage;
use std::collections::{BTreeMap, HashMap};

/// Metrics for one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainEffectiveness {
    /// Active skills, excluded ones included
    pub active: usize,
    /// Active skills currently excluded from retrieval
    pub excluded: usize,
    /// Archived by merges
    pub archived: usize,
    /// Expired by TTL
    pub expired: usize,
    /// Mean success rate over active skills with a defined rate
    pub mean_success_rate: Option<f64>,
    /// Recommendations offered for skills of this domain
    pub presented: usize,
    /// Of those, detected as applied
    pub applied: usize,
}

impl DomainEffectiveness {
    /// Fraction of presented skills that were applied.
    pub fn application_rate(&self) -> Option<f64> {
        if self.presented == 0 {
            None
        } else {
            Some(self.applied as f64 / self.presented as f64)
        }
    }
}

/// Metrics for the whole pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectivenessReport {
    /// Per-domain metrics
    pub domains: BTreeMap<Domain, DomainEffectiveness>,
    /// Rows of any status
    pub total_skills: usize,
}

/// Compute the effectiveness report from storage.
pub async fn build_report(storage: &dyn Storage) -> Result<EffectivenessReport> {
    let skills = storage.list_skills(&SkillFilter::all()).await?;
    let recommendations = storage.list_recommendations(None).await?;

    let mut report = EffectivenessReport {
        total_skills: skills.len(),
        ..Default::default()
    };
    let mut rates: BTreeMap<Domain, Vec<f64>> = BTreeMap::new();
    let mut domain_of = HashMap::new();

    for skill in &skills {
        domain_of.insert(skill.id, skill.domain);
        let entry = report.domains.entry(skill.domain).or_default();
        match skill.status {
            SkillStatus::Active => {
                entry.active += 1;
                if skill.excluded_from_retrieval {
                    entry.excluded += 1;
                }
                if let Some(rate) = skill.success_rate {
                    rates.entry(skill.domain).or_default().push(rate);
                }
            }
            SkillStatus::Archived => entry.archived += 1,
            SkillStatus::Expired => entry.expired += 1,
        }
    }

    for (domain, values) in rates {
        if let Some(entry) = report.domains.get_mut(&domain) {
            entry.mean_success_rate = Some(values.iter().sum::<f64>() / values.len() as f64);
        }
    }

    for rec in &recommendations {
        if let Some(domain) = domain_of.get(&rec.skill_id) {
            let entry = report.domains.entry(*domain).or_default();
            entry.presented += 1;
            if rec.was_applied {
                entry.applied += 1;
            }
        }
    }

    Ok(report)
}
