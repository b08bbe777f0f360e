//! Versioned theme taxonomy for tagging decision reasoning.

use regex::Regex;

/// Version of the built-in keyword table. Bump when keywords change, since
/// theme counts from different versions are not comparable.
pub const TAXONOMY_VERSION: u32 = 1;

/// One theme and the keywords that tag it.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Theme key, also the collision key for promoted skills
    pub key: String,
    /// Keywords, any of which tags a text
    pub keywords: Vec<String>,
    matcher: Option<Regex>,
}

impl Theme {
    /// Create a theme from its keywords.
    pub fn new(key: impl Into<String>, keywords: &[&str]) -> Self {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let alternation = keywords
            .iter()
            .map(|k| regex::escape(k).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        let matcher = if alternation.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).ok()
        };
        Self {
            key: key.into(),
            keywords,
            matcher,
        }
    }

    /// Whether any keyword occurs in `text` as a whole word.
    pub fn matches(&self, text: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// Category -> keyword table.
#[derive(Debug, Clone)]
pub struct ThemeTaxonomy {
    /// Table version
    pub version: u32,
    /// Themes in table order
    pub themes: Vec<Theme>,
}

impl Default for ThemeTaxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ThemeTaxonomy {
    /// The built-in table.
    pub fn builtin() -> Self {
        let themes = vec![
            Theme::new(
                "timing",
                &[
                    "timing", "entry", "exit", "early", "late", "wait", "waited", "patience",
                    "breakout", "reversal", "momentum",
                ],
            ),
            Theme::new(
                "risk",
                &[
                    "risk", "stop", "stop-loss", "stop loss", "leverage", "sizing", "position size",
                    "exposure", "drawdown", "hedge", "liquidation",
                ],
            ),
            Theme::new(
                "liquidity",
                &[
                    "liquidity", "volume", "spread", "slippage", "depth", "thin", "order book", "tvl",
                    "pool",
                ],
            ),
            Theme::new(
                "sentiment",
                &[
                    "sentiment", "funding", "fear", "greed", "hype", "news", "social", "narrative",
                    "crowded",
                ],
            ),
            Theme::new(
                "technical",
                &[
                    "rsi", "macd", "support", "resistance", "moving average", "ema", "trend",
                    "volatility", "bollinger", "fibonacci",
                ],
            ),
        ];
        Self {
            version: TAXONOMY_VERSION,
            themes,
        }
    }

    /// Theme keys tagging `text`, in table order.
    pub fn tag(&self, text: &str) -> Vec<&str> {
        self.themes
            .iter()
            .filter(|t| t.matches(text))
            .map(|t| t.key.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_by_whole_word_keyword() {
        let taxonomy = ThemeTaxonomy::builtin();
        assert_eq!(
            taxonomy.tag("Waited for the breakout; RSI oversold, funding negative"),
            vec!["timing", "sentiment", "technical"]
        );
        // "pooled" is not "pool", "stopped" is not "stop"
        assert!(taxonomy.tag("pooled capital and stopped").is_empty());
    }

    #[test]
    fn multi_word_keywords_tolerate_spacing() {
        let taxonomy = ThemeTaxonomy::builtin();
        assert_eq!(taxonomy.tag("the ORDER   BOOK was empty"), vec!["liquidity"]);
        assert_eq!(taxonomy.tag("set a stop-loss"), vec!["risk"]);
    }

    #[test]
    fn builtin_is_versioned() {
        let taxonomy = ThemeTaxonomy::default();
        assert_eq!(taxonomy.version, TAXONOMY_VERSION);
        assert_eq!(taxonomy.themes.len(), 5);
    }
}
