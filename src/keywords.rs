//! Keyword matching for on-screen trading commands (English + Portuguese)

use std::collections::HashSet;

use crate::config::KeywordSets;

/// Which keyword set fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordHit {
    Buy,
    Sell,
    Exit,
}

/// Pre-normalised keyword sets
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    buy: HashSet<String>,
    sell: HashSet<String>,
    exit: HashSet<String>,
}

impl KeywordMatcher {
    pub fn new(sets: &KeywordSets) -> Self {
        let build = |words: &[String]| -> HashSet<String> {
            words.iter().map(|w| normalize_token(w)).filter(|w| !w.is_empty()).collect()
        };
        Self {
            buy: build(&sets.buy),
            sell: build(&sets.sell),
            exit: build(&sets.exit),
        }
    }

    /// First match wins: buy, then sell, then exit
    pub fn classify<S: AsRef<str>>(&self, words: &[S]) -> Option<KeywordHit> {
        let tokens: Vec<String> = words.iter().map(|w| normalize_token(w.as_ref())).collect();
        let any_in = |set: &HashSet<String>| tokens.iter().any(|t| set.contains(t));

        if any_in(&self.buy) {
            Some(KeywordHit::Buy)
        } else if any_in(&self.sell) {
            Some(KeywordHit::Sell)
        } else if any_in(&self.exit) {
            Some(KeywordHit::Exit)
        } else {
            None
        }
    }

    pub fn has_buy<S: AsRef<str>>(&self, words: &[S]) -> bool {
        words.iter().any(|w| self.buy.contains(&normalize_token(w.as_ref())))
    }

    /// Sell and exit both mean "get out or go short"
    pub fn has_sell_or_exit<S: AsRef<str>>(&self, words: &[S]) -> bool {
        words.iter().any(|w| {
            let t = normalize_token(w.as_ref());
            self.sell.contains(&t) || self.exit.contains(&t)
        })
    }
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(&KeywordSets::default())
    }
}

/// Lower-case and strip surrounding punctuation ("BUY!" -> "buy")
pub fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_and_punctuation() {
        let matcher = KeywordMatcher::default();
        assert_eq!(matcher.classify(&["Agora", "COMPRA!"]), Some(KeywordHit::Buy));
        assert_eq!(matcher.classify(&["vender"]), Some(KeywordHit::Sell));
        assert_eq!(matcher.classify(&["(Fechar)"]), Some(KeywordHit::Exit));
        assert_eq!(matcher.classify(&["nothing", "here", "42"]), None);
    }

    #[test]
    fn test_buy_beats_sell_beats_exit() {
        let matcher = KeywordMatcher::default();
        assert_eq!(matcher.classify(&["sell", "buy"]), Some(KeywordHit::Buy));
        assert_eq!(matcher.classify(&["close", "short"]), Some(KeywordHit::Sell));
    }

    #[test]
    fn test_custom_sets() {
        let matcher = KeywordMatcher::new(&KeywordSets {
            buy: vec!["Achat".to_string()],
            sell: vec![],
            exit: vec!["sortie".to_string()],
        });
        assert_eq!(matcher.classify(&["achat"]), Some(KeywordHit::Buy));
        assert_eq!(matcher.classify(&["buy"]), None);
        assert!(matcher.has_sell_or_exit(&["SORTIE"]));
    }
}
