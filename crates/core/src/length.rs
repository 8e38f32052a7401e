use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthCategory {
    Short,
    Medium,
    Long,
}

impl LengthCategory {
    pub const ALL: [LengthCategory; 3] = [Self::Short, Self::Medium, Self::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for LengthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LengthCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            _ => Err(ConfigError::InvalidLength(s.to_string())),
        }
    }
}

/// Word-count band and prompt guidance for one length category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LengthPolicy {
    pub category: LengthCategory,
    pub min_words: u32,
    pub max_words: u32,
    pub generation_hint: &'static str,
}

impl LengthPolicy {
    pub fn resolve(category: LengthCategory) -> Self {
        let (min_words, max_words, generation_hint) = match category {
            LengthCategory::Short => (
                300,
                500,
                "A quick read: a short introduction, two or three brief sections and a \
                 one-paragraph conclusion.",
            ),
            LengthCategory::Medium => (
                800,
                1200,
                "A standard post: an introduction, four to five sections with subheadings and a \
                 conclusion with a call to action.",
            ),
            LengthCategory::Long => (
                1500,
                2500,
                "An in-depth guide: an introduction, six or more detailed sections with \
                 subheadings, practical examples and a thorough conclusion.",
            ),
        };

        Self {
            category,
            min_words,
            max_words,
            generation_hint,
        }
    }

    pub fn resolve_str(raw: &str) -> Result<Self, ConfigError> {
        raw.parse::<LengthCategory>().map(Self::resolve)
    }

    pub fn contains(&self, word_count: u32) -> bool {
        (self.min_words..=self.max_words).contains(&word_count)
    }

    pub fn target_words(&self) -> u32 {
        (self.min_words + self.max_words) / 2
    }

    /// Output budget handed to the model. English prose averages about 1.3
    /// tokens per word; the extra headroom covers the title and markup.
    pub fn max_tokens(&self) -> u32 {
        self.max_words * 2 + 256
    }
}

/// Counts words the way a reader would: markup-only tokens such as `##` or
/// `-` bullets are ignored.
pub fn count_words(text: &str) -> u32 {
    text.split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_band_matches_scenario() {
        let policy = LengthPolicy::resolve(LengthCategory::Short);
        assert_eq!((policy.min_words, policy.max_words), (300, 500));
        assert!(policy.contains(450));
        assert!(policy.contains(300));
        assert!(policy.contains(500));
        assert!(!policy.contains(501));
        assert_eq!(policy.target_words(), 400);
    }

    #[test]
    fn bands_do_not_overlap() {
        let bands: Vec<_> = LengthCategory::ALL
            .iter()
            .map(|category| LengthPolicy::resolve(*category))
            .collect();
        for pair in bands.windows(2) {
            assert!(pair[0].max_words < pair[1].min_words);
            assert!(pair[0].max_tokens() < pair[1].max_tokens());
        }
    }

    #[test]
    fn parses_category_case_insensitively() {
        assert_eq!(" Medium ".parse::<LengthCategory>().unwrap(), LengthCategory::Medium);
        let policy = LengthPolicy::resolve_str("LONG").unwrap();
        assert_eq!(policy.category, LengthCategory::Long);
    }

    #[test]
    fn unknown_category_is_a_config_error() {
        match LengthPolicy::resolve_str("epic") {
            Err(ConfigError::InvalidLength(raw)) => assert_eq!(raw, "epic"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn count_words_skips_markup() {
        assert_eq!(count_words("## Trail tips\n\n- Pack water\n- Start early"), 6);
        assert_eq!(count_words("   "), 0);
    }
}
