use serde::Serialize;

use crate::{availability::AvailabilityIndex, types::Token};

use super::tokenizer::stem;

/// Default minimum similarity of an approximate match
pub const DEFAULT_FUZZY_CUTOFF: f64 = 0.86;

/// Words without a clip mapped to a close word that has one
const SYNONYMS: [(&str, &str); 14] = [
    ("those", "they"),
    ("these", "they"),
    ("them", "they"),
    ("people", "they"),
    ("achieve", "success"),
    ("achievement", "success"),
    ("great", "good"),
    ("nice", "good"),
    ("things", "thing"),
    ("stuff", "thing"),
    ("life", "live"),
    ("today", "day"),
    ("exam", "test"),
    ("always", "always"),
];

/// How a candidate word was matched to an available token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Stem,
    Synonym,
    Fuzzy,
}

/// Outcome of mapping candidate words onto the availability index
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Repaired {
    pub mapped: Vec<(Token, MatchKind)>,
    pub missing: Vec<String>,
}

impl Repaired {
    pub fn tokens(&self) -> Vec<Token> {
        self.mapped.iter().map(|(t, _)| t.clone()).collect()
    }
}

/// Map candidate words to available tokens.
///
/// Tiers, first hit wins: exact, suffix-stripped, synonym table,
/// approximate match at or above `cutoff`. Otherwise the word is missing.
pub fn map_to_available<S: AsRef<str>>(
    words: &[S],
    index: &AvailabilityIndex,
    cutoff: f64,
) -> Repaired {
    let mut repaired = Repaired::default();

    for word in words {
        let Some(word) = Token::new(word.as_ref()) else {
            continue;
        };

        match repair_one(&word, index, cutoff) {
            Some(found) => repaired.mapped.push(found),
            None => repaired.missing.push(word.to_string()),
        }
    }

    repaired
}

fn repair_one(word: &Token, index: &AvailabilityIndex, cutoff: f64) -> Option<(Token, MatchKind)> {
    if let Some(t) = index.get(word) {
        return Some((t.clone(), MatchKind::Exact));
    }

    if let Some(t) = index.get(stem(word)) {
        return Some((t.clone(), MatchKind::Stem));
    }

    if let Some(t) = synonym(word).and_then(|s| index.get(s)) {
        return Some((t.clone(), MatchKind::Synonym));
    }

    closest(word, index, cutoff).map(|t| (t.clone(), MatchKind::Fuzzy))
}

fn synonym(word: &str) -> Option<&'static str> {
    SYNONYMS
        .iter()
        .find(|(from, _)| *from == word)
        .map(|(_, to)| *to)
}

/// Most similar available token, if similar enough.
/// Ties keep the first token in sorted order.
fn closest<'a>(word: &str, index: &'a AvailabilityIndex, cutoff: f64) -> Option<&'a Token> {
    let mut best: Option<(&Token, f64)> = None;

    for token in index.iter() {
        let score = strsim::normalized_levenshtein(word, token);
        if score >= cutoff && best.map_or(true, |(_, s)| score > s) {
            best = Some((token, score));
        }
    }

    best.map(|(t, _)| t)
}
