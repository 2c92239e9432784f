//! Response value classification.
//!
//! Maps input text to a [`ValueTier`] and the token ceiling that tier is
//! allowed. The complexity score is a weighted sum of five features, each
//! normalized to `[0, 1]`:
//!
//! | Feature | Weight | Saturates at |
//! |---------|--------|--------------|
//! | Length (words) | 0.25 | 40 words |
//! | Lexical density (concept words / words) | 0.20 | 1.0 |
//! | Long words (9+ characters) | 0.15 | 1.0 |
//! | Structure (questions, clauses) | 0.15 | 2 questions or 4 clauses |
//! | Abstract vocabulary | 0.25 | 3 abstract words |
//!
//! Density and long-word shares are scaled by `words / 4` below four words,
//! so a lone word cannot outrank a short question. Short greetings ("hi",
//! "hey there", "good morning") score 0.

use mnemo_core::{ValueAssessment, ValueTier, concepts};

/// Upper score bound (exclusive) and token ceiling per tier, ascending.
const TIERS: &[(f64, ValueTier, u64)] = &[
    (0.08, ValueTier::Trivial, 12),
    (0.20, ValueTier::Low, 60),
    (0.35, ValueTier::Medium, 150),
    (0.55, ValueTier::High, 300),
    (0.75, ValueTier::Critical, 600),
    (f64::INFINITY, ValueTier::Maximum, 1000),
];

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "hiya", "howdy", "yo", "sup", "thanks", "thank", "thx", "bye", "goodbye",
    "cheers", "ok", "okay", "cool", "good", "morning", "afternoon", "evening", "night", "there",
    "you", "all",
];

const CLAUSE_MARKERS: &[&str] = &[
    "because", "although", "though", "whereas", "unless", "since", "therefore", "however",
    "whether", "if", "while", "when", "why", "how",
];

const ABSTRACT_ROOTS: &[&str] = &[
    "philosoph", "conscious", "ethic", "moral", "meaning", "existen", "theor", "metaphys",
    "epistem", "ontolog", "paradox", "abstract", "concept", "free will", "purpose", "truth",
    "identity", "intelligen",
];

const ABSTRACT_SUFFIXES: &[&str] = &[
    "tion", "tions", "ism", "isms", "ity", "ities", "ence", "ences", "ance", "ances", "ology",
    "ical", "ness", "ment", "ments",
];

/// Stateless classifier. Identical text always gets the identical verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueClassifier;

impl ValueClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> ValueAssessment {
        let score = complexity(text);
        let (tier, max_budget) = tier_for(score);
        ValueAssessment {
            tier,
            max_budget,
            complexity: score,
        }
    }
}

/// Tier and token ceiling for a complexity score.
///
/// Non-finite scores are treated as 0.
pub fn tier_for(score: f64) -> (ValueTier, u64) {
    let score = if score.is_finite() { score } else { 0.0 };
    TIERS
        .iter()
        .find(|(bound, _, _)| score < *bound)
        .map(|(_, tier, budget)| (*tier, *budget))
        .unwrap_or((ValueTier::Maximum, 1000))
}

/// Complexity score of `text` in `[0, 1]`.
pub fn complexity(text: &str) -> f64 {
    let words: Vec<String> = concepts::words(text).collect();
    if words.is_empty() || is_greeting(&words) {
        return 0.0;
    }
    let count = words.len() as f64;

    let length = (count / 40.0).min(1.0);
    let substance = (count / 4.0).min(1.0);
    let density =
        substance * words.iter().filter(|w| !concepts::is_noise(w)).count() as f64 / count;
    let long_words =
        substance * words.iter().filter(|w| w.chars().count() >= 9).count() as f64 / count;

    let questions = text.matches('?').count() as f64;
    let clauses = text.matches([',', ';', ':']).count()
        + words
            .iter()
            .filter(|w| CLAUSE_MARKERS.contains(&w.as_str()))
            .count();
    let structure = (questions * 0.5 + clauses as f64 * 0.25).min(1.0);

    let lowered = text.to_lowercase();
    let abstract_hits = words.iter().filter(|w| is_abstract(w)).count()
        + ABSTRACT_ROOTS
            .iter()
            .filter(|root| root.contains(' ') && lowered.contains(*root))
            .count();
    let abstraction = (abstract_hits as f64 / 3.0).min(1.0);

    let score = 0.25 * length
        + 0.20 * density
        + 0.15 * long_words
        + 0.15 * structure
        + 0.25 * abstraction;
    score.clamp(0.0, 1.0)
}

fn is_greeting(words: &[String]) -> bool {
    words.len() <= 3 && words.iter().all(|w| GREETING_WORDS.contains(&w.as_str()))
}

fn is_abstract(word: &str) -> bool {
    if ABSTRACT_ROOTS
        .iter()
        .any(|root| !root.contains(' ') && word.starts_with(root))
    {
        return true;
    }
    word.len() >= 6 && ABSTRACT_SUFFIXES.iter().any(|s| word.ends_with(s))
}
