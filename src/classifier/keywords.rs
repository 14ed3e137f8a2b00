//! Keyword layer of the risk classifier
//!
//! Synchronous, in-process, no external calls. Messages are tokenized once
//! and every token (and every adjacent token pair, for two-word phrases) is
//! looked up in fixed hash sets, so the cost per token does not depend on
//! the size of the word lists.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Terms that always escalate to `critical`
const URGENT_TERMS: &[&str] = &[
    "emergency",
    "911",
    "can't breathe",
    "cannot breathe",
    "cant breathe",
    "chest pain",
    "bleeding badly",
    "unconscious",
    "fire",
    "smoke",
    "poison",
    "poisoned",
    "overdose",
];

/// Terms that escalate to `medium`
const CONCERN_TERMS: &[&str] = &[
    "hurt",
    "hurts",
    "hurting",
    "pain",
    "painful",
    "bleeding",
    "bleed",
    "blood",
    "fell",
    "falling",
    "sick",
    "scared",
    "afraid",
    "stranger",
    "strangers",
    "alone",
    "help",
    "broken",
    "crying",
    "dizzy",
];

/// Result of a keyword scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordMatch {
    /// Matched the urgent list
    Urgent(String),
    /// Matched the concern list
    Concern(String),
}

impl KeywordMatch {
    pub fn term(&self) -> &str {
        match self {
            Self::Urgent(t) | Self::Concern(t) => t,
        }
    }
}

struct KeywordSets {
    urgent: HashSet<&'static str>,
    concern: HashSet<&'static str>,
}

fn sets() -> &'static KeywordSets {
    static SETS: OnceLock<KeywordSets> = OnceLock::new();
    SETS.get_or_init(|| KeywordSets {
        urgent: URGENT_TERMS.iter().copied().collect(),
        concern: CONCERN_TERMS.iter().copied().collect(),
    })
}

/// Split a message into lowercase word tokens.
///
/// Apostrophes stay inside words ("can't"), typographic apostrophes are
/// folded to ASCII, everything else that is not alphanumeric separates.
pub fn tokenize(message: &str) -> Vec<String> {
    message
        .to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scan a message against the urgent and concern lists.
///
/// An urgent hit anywhere in the message wins over an earlier concern hit.
pub fn scan(message: &str) -> Option<KeywordMatch> {
    let sets = sets();
    let tokens = tokenize(message);
    let mut concern: Option<String> = None;

    for (i, token) in tokens.iter().enumerate() {
        let pair = tokens.get(i + 1).map(|next| format!("{} {}", token, next));
        let candidates = std::iter::once(token.as_str()).chain(pair.as_deref());

        for candidate in candidates {
            if sets.urgent.contains(candidate) {
                return Some(KeywordMatch::Urgent(candidate.to_string()));
            }
            if concern.is_none() && sets.concern.contains(candidate) {
                concern = Some(candidate.to_string());
            }
        }
    }

    concern.map(KeywordMatch::Concern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_keeps_apostrophes() {
        assert_eq!(
            tokenize("I CAN'T breathe!!"),
            vec!["i".to_string(), "can't".to_string(), "breathe".to_string()]
        );
        assert_eq!(tokenize("I can\u{2019}t"), vec!["i", "can't"]);
    }

    #[test]
    fn test_urgent_phrase_matches() {
        let hit = scan("help, I can't breathe").unwrap();
        assert_eq!(hit, KeywordMatch::Urgent("can't breathe".into()));
    }

    #[test]
    fn test_urgent_beats_earlier_concern() {
        let hit = scan("I'm scared there is smoke in the kitchen").unwrap();
        assert_eq!(hit, KeywordMatch::Urgent("smoke".into()));
    }

    #[test]
    fn test_concern_inflections() {
        let hit = scan("I fell down and my knee hurts").unwrap();
        assert_eq!(hit, KeywordMatch::Concern("fell".into()));
        assert!(matches!(scan("my tummy hurts"), Some(KeywordMatch::Concern(_))));
    }

    #[test]
    fn test_whole_word_matching() {
        // "firetruck" and "helpful" are not danger words
        assert_eq!(scan("I love my red firetruck, it is helpful"), None);
        assert_eq!(scan("can we read a story about dinosaurs?"), None);
    }

    #[test]
    fn test_number_token() {
        assert_eq!(scan("should I call 911?"), Some(KeywordMatch::Urgent("911".into())));
    }
}
