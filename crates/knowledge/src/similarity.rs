//! Pluggable similarity between skills.
//!
//! Every implementation must return a value in [0, 1], score a skill against
//! itself as 1, and be symmetric.

use skillmem_core::{SimilarityKind, SkillRecord};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use crate::phrases::{extract_key_phrases, normalize, tokens};

/// Similarity between two skills.
pub trait Similarity: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Score in [0, 1].
    fn score(&self, a: &SkillRecord, b: &SkillRecord) -> f64;
}

/// |a ∩ b| / |a ∪ b|, with two empty sets counting as identical.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

fn phrase_set(skill: &SkillRecord) -> HashSet<String> {
    let mut set: HashSet<String> = extract_key_phrases(&skill.body).into_iter().collect();
    let title = normalize(&skill.title);
    if !title.is_empty() {
        set.insert(title);
    }
    set
}

fn token_set(skill: &SkillRecord) -> HashSet<String> {
    let mut set = tokens(&skill.title);
    set.extend(tokens(&skill.body));
    set
}

/// Jaccard over key phrases plus the normalized title.
///
/// Skills whose body has no key phrases are compared by tokens instead, so
/// plain-prose lessons are still deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhraseJaccard;

impl Similarity for PhraseJaccard {
    fn name(&self) -> &str {
        "key-phrase-jaccard"
    }

    fn score(&self, a: &SkillRecord, b: &SkillRecord) -> f64 {
        let pa = extract_key_phrases(&a.body);
        let pb = extract_key_phrases(&b.body);
        if pa.is_empty() || pb.is_empty() {
            return TokenJaccard.score(a, b);
        }
        jaccard(&phrase_set(a), &phrase_set(b))
    }
}

/// Jaccard over word tokens of title and body.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl Similarity for TokenJaccard {
    fn name(&self) -> &str {
        "token-jaccard"
    }

    fn score(&self, a: &SkillRecord, b: &SkillRecord) -> f64 {
        jaccard(&token_set(a), &token_set(b))
    }
}

/// The similarity function selected by configuration.
pub fn similarity_for(kind: SimilarityKind) -> Arc<dyn Similarity> {
    match kind {
        SimilarityKind::KeyPhrase => Arc::new(PhraseJaccard),
        SimilarityKind::Token => Arc::new(TokenJaccard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmem_core::{Domain, SkillPolicy, SkillType};

    fn skill(title: &str, body: &str) -> SkillRecord {
        SkillRecord::new(Domain::Dlmm, SkillType::Warning, title, body, &SkillPolicy::default())
    }

    #[test]
    fn identical_skills_score_one() {
        let a = skill("Thin books", "- **avoid thin books**\n- size down");
        let plain = skill("Plain", "no markup at all here");
        let empty = skill("", "");
        for s in [&a, &plain, &empty] {
            assert_eq!(PhraseJaccard.score(s, s), 1.0);
            assert_eq!(TokenJaccard.score(s, s), 1.0);
        }
    }

    #[test]
    fn scores_are_symmetric_and_bounded() {
        let a = skill("Thin books", "- **avoid thin books**\n- size down\n- wait for depth");
        let b = skill("Thin books", "- **avoid thin books**\n- size down");
        let c = skill("Other", "plain prose about funding");
        for (x, y) in [(&a, &b), (&a, &c), (&b, &c)] {
            let s = PhraseJaccard.score(x, y);
            assert_eq!(s, PhraseJaccard.score(y, x));
            assert!((0.0..=1.0).contains(&s));
        }
        // {thin books, avoid thin books, size down, wait for depth} vs
        // {thin books, avoid thin books, size down}
        assert!((PhraseJaccard.score(&a, &b) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn config_selects_implementation() {
        assert_eq!(similarity_for(SimilarityKind::Token).name(), "token-jaccard");
        assert_eq!(similarity_for(SimilarityKind::KeyPhrase).name(), "key-phrase-jaccard");
    }
}
