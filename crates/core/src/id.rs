//! Unique identifiers for skill-lifecycle entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a SkillRecord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkillId(Ulid);

impl SkillId {
    /// Generate a new SkillId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SkillId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SkillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SkillId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identifier of a trading decision.
///
/// Decisions are owned by the trading loop, so the id is an opaque string
/// rather than something this crate generates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(pub String);

impl DecisionId {
    /// Wrap an external decision id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DecisionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DecisionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_id_parses_its_display_form() {
        let id = SkillId::new();
        let parsed: SkillId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn decision_id_serializes_as_plain_string() {
        let id = DecisionId::new("dec-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dec-42\"");
    }
}
