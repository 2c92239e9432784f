//! Concept extraction: a stable, deterministic view of what a text is about.
//!
//! Text is lowercased and split on anything that is not alphanumeric.
//! Stopwords, conversational fillers and single characters are dropped and
//! a trailing plural `s` is stripped. The result is a sorted set, so the
//! same content always yields the same concepts regardless of word order
//! or repetition.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "for",
    "from", "had", "has", "have", "having", "he", "her", "here", "him", "his", "how", "if", "in",
    "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not", "now", "of",
    "off", "on", "once", "only", "or", "other", "our", "out", "over", "own", "same", "she", "should",
    "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you",
    "your",
];

const FILLERS: &[&str] = &[
    "um", "umm", "uh", "uhh", "er", "erm", "hmm", "like", "know", "yeah", "yep", "ok", "okay",
    "basically", "actually", "literally", "really", "well", "anyway", "kinda", "sorta", "mean",
];

/// Whether a lowercased word carries no concept.
pub fn is_noise(word: &str) -> bool {
    word.chars().count() < 2 || STOPWORDS.contains(&word) || FILLERS.contains(&word)
}

fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Lowercased alphanumeric words, in order.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// The concept set of a text.
pub fn extract(text: &str) -> BTreeSet<String> {
    words(text)
        .filter(|w| !is_noise(w))
        .map(|w| stem(&w))
        .collect()
}

/// Canonical string form of a concept set (space-joined, sorted).
pub fn signature(text: &str) -> String {
    extract(text).into_iter().collect::<Vec<_>>().join(" ")
}

/// Lowercased content with whitespace runs collapsed.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sorted_unique_concepts() {
        let concepts = extract("The server crashed; the SERVER restarted twice.");
        let expected: BTreeSet<String> = ["crashed", "restarted", "server", "twice"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(concepts, expected);
    }

    #[test]
    fn plural_and_singular_share_a_concept() {
        assert_eq!(signature("database errors"), signature("Database error"));
        // Short words and -ss/-us endings are left alone
        assert!(extract("gas class status").contains("class"));
        assert!(extract("gas class status").contains("status"));
        assert!(extract("gas class status").contains("gas"));
    }

    #[test]
    fn fillers_do_not_remove_concepts() {
        let clean = "deploy pipeline failed on staging cluster";
        let noisy = format!("um, {clean}, like, you know, yeah");
        let clean_set = extract(clean);
        let noisy_set = extract(&noisy);
        assert!(clean_set.is_subset(&noisy_set));
        assert_eq!(clean_set, noisy_set);
    }

    #[test]
    fn order_and_repetition_do_not_matter() {
        assert_eq!(
            signature("alpha beta gamma"),
            signature("gamma gamma alpha beta")
        );
    }

    #[test]
    fn stopword_only_text_has_no_concepts() {
        assert!(extract("and the of it").is_empty());
        assert_eq!(signature("..."), "");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Hello \n  World\t"), "hello world");
    }

    #[test]
    fn unicode_words_are_kept() {
        assert!(extract("café naïve").contains("café"));
    }
}
