//! The narrow text-composition capability and its error taxonomy.

use async_trait::async_trait;
use skillmem_core::{Domain, SkillType};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Errors from a synthesis call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    /// The call exceeded its time budget
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure, rate limit or overload
    #[error("transient synthesis failure: {0}")]
    Transient(String),

    /// Empty or unparseable output
    #[error("malformed synthesis output: {0}")]
    Malformed(String),

    /// The collaborator refused the request
    #[error("synthesis rejected: {0}")]
    Rejected(String),
}

impl SynthesisError {
    /// Whether the next scheduled run may succeed without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, SynthesisError::Timeout(_) | SynthesisError::Transient(_))
    }
}

/// What a composition is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Combine near-duplicate skills of one bucket into one evolved skill
    MergeSkills,
    /// Turn a theme that recurs across domains into a general skill
    GeneralizePattern,
}

/// One input skill or excerpt.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceItem {
    /// Title, empty for raw excerpts
    pub title: String,
    /// Text
    pub body: String,
}

impl EvidenceItem {
    /// Create an item.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Everything a composition may draw on.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    /// Domain of the resulting skill
    pub domain: Domain,
    /// Type of the inputs
    pub skill_type: Option<SkillType>,
    /// Working title of the result
    pub subject: String,
    /// Inputs, most relevant first
    pub items: Vec<EvidenceItem>,
    /// Supporting facts (statistics, tiers)
    pub notes: Vec<String>,
    /// Upper bound on the body length, in characters
    pub max_chars: usize,
}

/// Title and body of a composed skill.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillDraft {
    /// Title
    pub title: String,
    /// Body
    pub body: String,
}

impl SkillDraft {
    /// Parse a model response of the form `Title: ...` followed by the body.
    ///
    /// Without a title line the whole response is the body and the title
    /// falls back to `default_title`.
    pub fn parse(text: &str, default_title: &str, max_chars: usize) -> Result<Self, SynthesisError> {
        let text = strip_reasoning(text).trim();
        if text.is_empty() {
            return Err(SynthesisError::Malformed("empty response".to_string()));
        }

        let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
        let (title, body) = if first.trim().to_lowercase().starts_with("title:") {
            (first.trim()["title:".len()..].trim().to_string(), rest.trim())
        } else {
            (String::new(), text)
        };

        if body.is_empty() {
            return Err(SynthesisError::Malformed("response has a title but no body".to_string()));
        }

        let title = if title.is_empty() { default_title.to_string() } else { title };
        Ok(Self {
            title,
            body: crate::fallback::truncate_chars(body, max_chars),
        })
    }
}

/// Drop a leading `<think>...</think>` block some local models emit.
fn strip_reasoning(text: &str) -> &str {
    match (text.find("<think>"), text.find("</think>")) {
        (Some(start), Some(end)) if start < end => &text[end + "</think>".len()..],
        _ => text,
    }
}

impl PromptKind {
    /// Render the prompt for this kind of composition.
    pub fn render(&self, evidence: &Evidence) -> String {
        let mut prompt = String::new();
        match self {
            PromptKind::MergeSkills => {
                prompt.push_str(&format!(
                    "You maintain a library of trading lessons for the {} domain.\n\
                     The following {} lessons overlap. Combine them into ONE lesson that keeps every \
                     distinct point and drops repetition.\n\n",
                    evidence.domain,
                    evidence.items.len()
                ));
            }
            PromptKind::GeneralizePattern => {
                prompt.push_str(
                    "You maintain a library of trading lessons that apply across markets.\n\
                     The theme below held up in several independent domains. Write ONE general \
                     lesson that states when it applies and what to do.\n\n",
                );
            }
        }

        prompt.push_str(&format!("Subject: {}\n\n", evidence.subject));
        for (i, item) in evidence.items.iter().enumerate() {
            if item.title.is_empty() {
                prompt.push_str(&format!("[{}]\n{}\n\n", i + 1, item.body));
            } else {
                prompt.push_str(&format!("[{}] {}\n{}\n\n", i + 1, item.title, item.body));
            }
        }
        if !evidence.notes.is_empty() {
            prompt.push_str("Facts:\n");
            for note in &evidence.notes {
                prompt.push_str(&format!("- {}\n", note));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Answer with a first line `Title: <short title>` followed by the lesson body \
             (at most {} characters). Use **bold** for the key phrases and bullet points for rules.",
            evidence.max_chars
        ));
        prompt
    }
}

/// Composes skill text from evidence.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Send a raw prompt and return the model's text.
    async fn synthesize(&self, prompt: &str) -> Result<String, SynthesisError>;

    /// Compose a skill from evidence.
    async fn compose(&self, kind: PromptKind, evidence: &Evidence) -> Result<SkillDraft, SynthesisError> {
        let text = self.synthesize(&kind.render(evidence)).await?;
        SkillDraft::parse(&text, &evidence.subject, evidence.max_chars)
    }
}

/// Bounds every call of an inner synthesizer by a timeout.
pub struct TimeoutSynthesizer {
    inner: Arc<dyn Synthesizer>,
    timeout: Duration,
}

impl TimeoutSynthesizer {
    /// Wrap a synthesizer.
    pub fn new(inner: Arc<dyn Synthesizer>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Synthesizer for TimeoutSynthesizer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn synthesize(&self, prompt: &str) -> Result<String, SynthesisError> {
        match tokio::time::timeout(self.timeout, self.inner.synthesize(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Synthesizer {} timed out after {:?}", self.inner.name(), self.timeout);
                Err(SynthesisError::Timeout(self.timeout))
            }
        }
    }

    async fn compose(&self, kind: PromptKind, evidence: &Evidence) -> Result<SkillDraft, SynthesisError> {
        match tokio::time::timeout(self.timeout, self.inner.compose(kind, evidence)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Synthesizer {} timed out after {:?}", self.inner.name(), self.timeout);
                Err(SynthesisError::Timeout(self.timeout))
            }
        }
    }
}
