//! Key-phrase extraction from skill bodies.
//!
//! Key phrases are the emphasised spans (`**bold**`, `__bold__`) and the
//! leading clause of each bullet item. They are normalized to lowercase with
//! collapsed whitespace so they can be compared and searched for directly.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Shortest phrase worth keeping, in characters.
const MIN_PHRASE_CHARS: usize = 3;

fn bold_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").expect("valid regex"))
}

fn bullet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+•]|\d+[.)])\s+(.+)$").expect("valid regex"))
}

fn clause_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[:;,.!?(]|\s[-–—]\s").expect("valid regex"))
}

/// Lowercase, strip markup and edge punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned = text.replace("**", "").replace("__", "").replace('`', "");
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Extract the normalized key phrases of a body, in order of appearance.
pub fn extract_key_phrases(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut phrases = Vec::new();
    let mut push = |raw: &str| {
        let phrase = normalize(raw);
        if phrase.chars().count() >= MIN_PHRASE_CHARS && seen.insert(phrase.clone()) {
            phrases.push(phrase);
        }
    };

    for caps in bold_regex().captures_iter(body) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            push(m.as_str());
        }
    }

    for line in body.lines() {
        if let Some(caps) = bullet_regex().captures(line) {
            if let Some(item) = caps.get(1) {
                let item = item.as_str().replace("**", "").replace("__", "");
                let clause = match clause_end_regex().find(&item) {
                    Some(m) => &item[..m.start()],
                    None => item.as_str(),
                };
                push(clause);
            }
        }
    }

    phrases
}

/// Count key phrases that occur in `text`, case-insensitively.
pub fn count_phrase_hits(phrases: &[String], text: &str) -> usize {
    let haystack = normalize(text);
    phrases.iter().filter(|p| haystack.contains(p.as_str())).count()
}

/// Lowercase alphanumeric tokens of at least three characters, minus stopwords.
pub fn tokens(text: &str) -> HashSet<String> {
    const STOPWORDS: &[&str] = &[
        "the", "and", "for", "with", "that", "this", "from", "into", "when", "then", "than", "are",
        "was", "were", "has", "have", "had", "not", "but", "all", "any", "its", "our", "you",
    ];
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "When funding flips, **reduce leverage** fast.\n\
        - Avoid entries into thin books: spreads widen\n\
        - __Wait for confirmation__ before adding\n\
        * Size down after two losses, always\n\
        1. Check the funding rate; it mean-reverts";

    #[test]
    fn extracts_bold_spans_and_leading_clauses() {
        let phrases = extract_key_phrases(BODY);
        assert_eq!(
            phrases,
            vec![
                "reduce leverage",
                "wait for confirmation",
                "avoid entries into thin books",
                "wait for confirmation before adding",
                "size down after two losses",
                "check the funding rate",
            ]
        );
    }

    #[test]
    fn plain_prose_has_no_phrases() {
        assert!(extract_key_phrases("just a sentence without markup").is_empty());
    }

    #[test]
    fn counts_hits_case_insensitively() {
        let phrases = extract_key_phrases(BODY);
        let reasoning = "Funding looks hot so I REDUCE LEVERAGE and will size down after two losses; \
                         also check the funding rate.";
        assert_eq!(count_phrase_hits(&phrases, reasoning), 3);
    }

    #[test]
    fn normalize_collapses_whitespace_and_markup() {
        assert_eq!(normalize("  **Thin   Books** "), "thin books");
    }

    #[test]
    fn tokens_skip_short_words_and_stopwords() {
        let t = tokens("The spread on thin books is wide");
        assert!(t.contains("spread"));
        assert!(t.contains("books"));
        assert!(!t.contains("the"));
        assert!(!t.contains("on"));
    }
}
