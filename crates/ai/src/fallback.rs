//! Deterministic composition used when no model is available or a call fails.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::synthesizer::{Evidence, PromptKind, SkillDraft, SynthesisError, Synthesizer};

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Concatenate bodies, dropping repeated lines, then truncate.
///
/// Lines compare case-insensitively after trimming; blank lines separate
/// the inputs.
pub fn merge_bodies<'a>(bodies: impl IntoIterator<Item = &'a str>, max_chars: usize) -> String {
    let mut seen = HashSet::new();
    let mut parts: Vec<String> = Vec::new();

    for body in bodies {
        let lines: Vec<&str> = body
            .lines()
            .map(str::trim_end)
            .filter(|line| {
                let key = line.trim().to_lowercase();
                !key.is_empty() && seen.insert(key)
            })
            .collect();
        if !lines.is_empty() {
            parts.push(lines.join("\n"));
        }
    }

    truncate_chars(&parts.join("\n\n"), max_chars)
}

/// Build a draft without a model.
pub fn fallback_draft(kind: PromptKind, evidence: &Evidence) -> SkillDraft {
    match kind {
        PromptKind::MergeSkills => SkillDraft {
            title: evidence.subject.clone(),
            body: merge_bodies(evidence.items.iter().map(|i| i.body.as_str()), evidence.max_chars),
        },
        PromptKind::GeneralizePattern => {
            let mut body = String::new();
            for note in &evidence.notes {
                body.push_str(note);
                body.push('\n');
            }
            if !evidence.items.is_empty() {
                body.push_str("\nExamples:\n");
                for item in &evidence.items {
                    let line = item.body.lines().next().unwrap_or_default();
                    body.push_str(&format!("- {}\n", truncate_chars(line.trim(), 200)));
                }
            }
            SkillDraft {
                title: evidence.subject.clone(),
                body: truncate_chars(body.trim(), evidence.max_chars),
            }
        }
    }
}

/// Synthesizer that never calls a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSynthesizer;

impl FallbackSynthesizer {
    /// Create the fallback synthesizer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Synthesizer for FallbackSynthesizer {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn synthesize(&self, _prompt: &str) -> Result<String, SynthesisError> {
        Err(SynthesisError::Rejected("no language model configured".to_string()))
    }

    async fn compose(&self, kind: PromptKind, evidence: &Evidence) -> Result<SkillDraft, SynthesisError> {
        Ok(fallback_draft(kind, evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::EvidenceItem;
    use skillmem_core::Domain;

    #[test]
    fn merge_dedupes_lines_across_bodies() {
        let merged = merge_bodies(
            ["- avoid **thin books**\n- size down", "- Avoid **thin books**\n- wait for depth"],
            2000,
        );
        assert_eq!(merged, "- avoid **thin books**\n- size down\n\n- wait for depth");
    }

    #[test]
    fn merge_truncates_on_char_boundary() {
        let merged = merge_bodies(["ééééé"], 3);
        assert_eq!(merged, "ééé");
    }

    #[test]
    fn generalize_lists_evidence() {
        let evidence = Evidence {
            domain: Domain::General,
            skill_type: None,
            subject: "Cross-domain: timing".to_string(),
            items: vec![EvidenceItem::new("", "waited for the close before entry\nmore")],
            notes: vec!["Win rate 58% over 12 decisions".to_string()],
            max_chars: 2000,
        };
        let draft = fallback_draft(PromptKind::GeneralizePattern, &evidence);
        assert_eq!(draft.title, "Cross-domain: timing");
        assert!(draft.body.starts_with("Win rate 58%"));
        assert!(draft.body.contains("- waited for the close before entry"));
        assert!(!draft.body.contains("more"));
    }

    #[tokio::test]
    async fn fallback_never_calls_a_model() {
        let s = FallbackSynthesizer::new();
        assert!(matches!(s.synthesize("x").await, Err(SynthesisError::Rejected(_))));
    }
}
