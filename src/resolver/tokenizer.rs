use std::sync::OnceLock;

use regex::Regex;

/// Everything that cannot be part of a word
const NON_WORD: &str = r"[^a-z0-9'\s]";

/// Contractions and spellings folded to the word that has a sign
const CONTRACTIONS: [(&str, &str); 10] = [
    ("i'm", "i"),
    ("im", "i"),
    ("we're", "we"),
    ("you're", "you"),
    ("they're", "they"),
    ("can't", "cannot"),
    ("won't", "will"),
    ("don't", "do"),
    ("doesn't", "do"),
    ("didn't", "do"),
];

/// Words carrying no sign of their own
const STOPWORDS: [&str; 33] = [
    "the", "a", "an", "is", "am", "are", "to", "at", "in", "on", "for", "of", "and", "or", "with",
    "be", "was", "were", "will", "would", "should", "could", "have", "has", "had", "do", "did",
    "does", "that", "this", "these", "those", "it",
];

/// Suffixes tried in order, at most one is removed
const SUFFIXES: [&str; 4] = ["ing", "ed", "es", "s"];

static NON_WORD_RE: OnceLock<Regex> = OnceLock::new();

fn non_word_re() -> &'static Regex {
    // The pattern is a constant known to be valid
    NON_WORD_RE.get_or_init(|| Regex::new(NON_WORD).unwrap())
}

/// Split a sentence into lowercase words, punctuation replaced by spaces
pub fn words(sentence: &str) -> Vec<String> {
    let lower = sentence.trim().to_lowercase();
    non_word_re()
        .replace_all(&lower, " ")
        .split_whitespace()
        .map(String::from)
        .collect()
}

pub fn expand_contraction(word: &str) -> &str {
    CONTRACTIONS
        .iter()
        .find(|(from, _)| *from == word)
        .map_or(word, |(_, to)| *to)
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Remove one common suffix from words longer than 3 characters
pub fn stem(word: &str) -> &str {
    if word.chars().count() <= 3 {
        return word;
    }
    SUFFIXES
        .iter()
        .find_map(|suffix| word.strip_suffix(suffix))
        .unwrap_or(word)
}

/// Local, deterministic sentence to gloss candidates conversion:
/// words, contractions expanded, stopwords dropped, suffixes stripped
pub fn candidates(sentence: &str) -> Vec<String> {
    words(sentence)
        .iter()
        .map(|w| expand_contraction(w))
        .filter(|w| !is_stopword(w))
        .map(|w| stem(w).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_case() {
        assert_eq!(words("  Hello,   World!! "), ["hello", "world"]);
        assert_eq!(words("I'm here."), ["i'm", "here"]);
        assert!(words("?!...").is_empty());
        assert!(words("").is_empty());
    }

    #[test]
    fn stems_only_long_words() {
        assert_eq!(stem("going"), "go");
        assert_eq!(stem("played"), "play");
        assert_eq!(stem("boxes"), "box");
        assert_eq!(stem("books"), "book");
        assert_eq!(stem("bus"), "bus");
        assert_eq!(stem("college"), "college");
    }

    #[test]
    fn drops_stopwords_after_contractions() {
        assert_eq!(candidates("We are going to college"), ["we", "go", "college"]);
        assert_eq!(candidates("I don't like it"), ["i", "like"]);
        assert_eq!(candidates("You're reading the books"), ["you", "read", "book"]);
    }

    #[test]
    fn keeps_repeats_in_order() {
        assert_eq!(candidates("photo photo photo"), ["photo", "photo", "photo"]);
    }
}
