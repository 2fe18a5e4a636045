//! Comment sentiment scoring.

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;
use ytetl_core::SentimentLabel;

/// Maps free text to a polarity in [-1, 1].
pub trait SentimentScorer: Send + Sync {
    fn polarity(&self, text: &str) -> f64;
}

/// Score comment text; missing or blank text is neutral.
pub fn score_text(scorer: &dyn SentimentScorer, text: Option<&str>) -> f64 {
    match text {
        Some(text) if !text.trim().is_empty() => {
            let score = scorer.polarity(text);
            if score.is_finite() {
                score.clamp(-1.0, 1.0)
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

pub fn categorize(score: f64) -> SentimentLabel {
    SentimentLabel::from_score(score)
}

// Normalization constant for the compound score.
const ALPHA: f64 = 15.0;
const BOOSTER_INCREMENT: f64 = 0.293;
const NEGATION_SCALAR: f64 = -0.74;
const EXCLAMATION_BOOST: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;
const NEGATION_WINDOW: usize = 3;

const LEXICON: &[(&str, f64)] = &[
    ("good", 1.9),
    ("great", 3.1),
    ("excellent", 2.7),
    ("amazing", 2.8),
    ("wonderful", 2.7),
    ("fantastic", 2.6),
    ("happy", 2.7),
    ("joy", 2.8),
    ("love", 3.2),
    ("loved", 2.9),
    ("like", 1.5),
    ("best", 3.2),
    ("better", 1.9),
    ("awesome", 3.1),
    ("perfect", 2.7),
    ("brilliant", 2.8),
    ("outstanding", 3.0),
    ("superb", 2.9),
    ("delightful", 2.9),
    ("pleased", 1.9),
    ("satisfied", 1.8),
    ("excited", 1.4),
    ("thrilled", 2.7),
    ("grateful", 2.0),
    ("thanks", 1.9),
    ("thank", 1.5),
    ("helpful", 1.8),
    ("useful", 1.9),
    ("nice", 1.8),
    ("cool", 1.3),
    ("interesting", 1.7),
    ("clear", 1.6),
    ("recommend", 1.5),
    ("win", 2.8),
    ("success", 2.7),
    ("successful", 2.8),
    ("profit", 1.9),
    ("agree", 1.5),
    ("informative", 1.8),
    ("bad", -2.5),
    ("terrible", -2.1),
    ("awful", -2.0),
    ("horrible", -2.5),
    ("worst", -3.1),
    ("hate", -2.7),
    ("dislike", -1.6),
    ("poor", -2.1),
    ("disappointing", -2.2),
    ("disappointed", -1.9),
    ("sad", -2.1),
    ("angry", -2.3),
    ("upset", -1.6),
    ("frustrated", -1.9),
    ("annoyed", -1.6),
    ("scam", -2.5),
    ("fraud", -2.8),
    ("useless", -1.8),
    ("worthless", -1.9),
    ("boring", -1.3),
    ("wrong", -2.1),
    ("lose", -1.3),
    ("loss", -1.3),
    ("risky", -1.4),
    ("scared", -1.9),
    ("afraid", -2.0),
    ("worried", -1.2),
    ("confusing", -1.3),
    ("waste", -1.8),
    ("stupid", -2.4),
    ("misleading", -1.7),
    ("fake", -2.1),
    ("expensive", -0.9),
];

const BOOSTERS: &[(&str, f64)] = &[
    ("very", BOOSTER_INCREMENT),
    ("extremely", BOOSTER_INCREMENT),
    ("incredibly", BOOSTER_INCREMENT),
    ("absolutely", BOOSTER_INCREMENT),
    ("completely", BOOSTER_INCREMENT),
    ("totally", BOOSTER_INCREMENT),
    ("really", BOOSTER_INCREMENT),
    ("so", BOOSTER_INCREMENT),
    ("quite", BOOSTER_INCREMENT),
    ("somewhat", -BOOSTER_INCREMENT),
    ("slightly", -BOOSTER_INCREMENT),
    ("barely", -BOOSTER_INCREMENT),
    ("hardly", -BOOSTER_INCREMENT),
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "nowhere", "neither", "nor", "cannot",
    "can't", "don't", "doesn't", "didn't", "isn't", "wasn't", "aren't", "won't", "shouldn't",
];

/// Lexicon scorer producing a VADER-style compound score.
pub struct LexiconScorer {
    valences: HashMap<&'static str, f64>,
    boosters: HashMap<&'static str, f64>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl LexiconScorer {
    pub fn new() -> Self {
        Self {
            valences: LEXICON.iter().copied().collect(),
            boosters: BOOSTERS.iter().copied().collect(),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.nfc()
            .collect::<String>()
            .split_whitespace()
            .filter(|w| !w.starts_with("http://") && !w.starts_with("https://") && !w.starts_with("www."))
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }

    fn token_valence(&self, tokens: &[String], index: usize) -> Option<f64> {
        let mut valence = *self.valences.get(tokens[index].as_str())?;

        if let Some(prev) = index.checked_sub(1).map(|i| tokens[i].as_str()) {
            if let Some(boost) = self.boosters.get(prev) {
                valence += boost * valence.signum();
            }
        }

        let window_start = index.saturating_sub(NEGATION_WINDOW);
        if tokens[window_start..index]
            .iter()
            .any(|t| NEGATIONS.iter().any(|n| *n == t.as_str()))
        {
            valence *= NEGATION_SCALAR;
        }

        Some(valence)
    }
}

impl SentimentScorer for LexiconScorer {
    fn polarity(&self, text: &str) -> f64 {
        let tokens = Self::tokenize(text);
        let mut sum: f64 = (0..tokens.len())
            .filter_map(|i| self.token_valence(&tokens, i))
            .sum();

        if sum == 0.0 {
            return 0.0;
        }

        let exclamations = text.matches('!').count().min(MAX_EXCLAMATIONS) as f64;
        sum += exclamations * EXCLAMATION_BOOST * sum.signum();

        (sum / (sum * sum + ALPHA).sqrt()).clamp(-1.0, 1.0)
    }
}
