//! Operating domains of the trading agent.

use serde::{Deserialize, Serialize};

/// An independent operating market/strategy, or the `general` sentinel used
/// for skills promoted across domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Perpetual futures
    Perps,
    /// Spot swaps
    Spot,
    /// Concentrated liquidity (DLMM) positions
    Dlmm,
    /// Prediction markets
    Prediction,
    /// Domain-agnostic skills
    General,
}

impl Domain {
    /// Every trading domain, excluding the `general` sentinel.
    pub const TRADING: [Domain; 4] = [Domain::Perps, Domain::Spot, Domain::Dlmm, Domain::Prediction];

    /// Lowercase name used in storage keys and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Perps => "perps",
            Domain::Spot => "spot",
            Domain::Dlmm => "dlmm",
            Domain::Prediction => "prediction",
            Domain::General => "general",
        }
    }

    /// Whether this is the `general` sentinel.
    pub fn is_general(&self) -> bool {
        matches!(self, Domain::General)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown domain name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown domain: {0}")]
pub struct UnknownDomain(pub String);

impl std::str::FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "perps" | "perp" => Ok(Domain::Perps),
            "spot" => Ok(Domain::Spot),
            "dlmm" => Ok(Domain::Dlmm),
            "prediction" | "polymarket" => Ok(Domain::Prediction),
            "general" => Ok(Domain::General),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_domains_case_insensitively() {
        assert_eq!("DLMM".parse::<Domain>().unwrap(), Domain::Dlmm);
        assert_eq!("general".parse::<Domain>().unwrap(), Domain::General);
        assert!("forex".parse::<Domain>().is_err());
    }

    #[test]
    fn trading_set_excludes_general() {
        assert!(!Domain::TRADING.contains(&Domain::General));
    }
}
