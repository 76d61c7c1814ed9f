//! Query keyword extraction for substring search.

use std::collections::HashSet;

/// Maximum number of keywords returned by [`extract_keywords`].
pub const MAX_KEYWORDS: usize = 12;

/// Minimum keyword length, in characters.
pub const MIN_KEYWORD_CHARS: usize = 3;

/// Common Dutch and English stopwords.
const STOPWORDS: &[&str] = &[
    // nl
    "de", "het", "een", "en", "van", "in", "op", "is", "te", "dat", "die", "voor", "met", "aan",
    "als", "bij", "wat", "hoe", "wie", "waar", "welke", "niet", "ook", "maar", "naar", "zijn",
    "worden", "wordt", "heb", "heeft", "ons", "onze", "jullie", "deze", "dit",
    // en
    "the", "be", "to", "of", "and", "a", "that", "have", "i", "it", "for", "not", "on", "with",
    "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we", "say", "her",
    "she", "or", "an", "will", "my", "one", "all", "would", "there", "their", "what", "which",
    "who", "how", "are", "was", "were", "can", "our", "your", "about",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Splits `text` into lowercase, deduplicated, stopword-free keywords.
///
/// Tokens are runs of alphanumeric characters. Order is first occurrence;
/// at most [`MAX_KEYWORDS`] are returned.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.chars().count() < MIN_KEYWORD_CHARS || is_stopword(token) {
            continue;
        }
        if seen.insert(token) {
            keywords.push(token.to_string());
            if keywords.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_policy_query() {
        let kw = extract_keywords("What is the the refund policy?");
        assert_eq!(kw, vec!["refund".to_string(), "policy".to_string()]);
    }

    #[test]
    fn test_dutch_stopwords_dropped() {
        let kw = extract_keywords("Wat is de omzet van het bedrijf voor 2024?");
        assert_eq!(
            kw,
            vec!["omzet".to_string(), "bedrijf".to_string(), "2024".to_string()]
        );
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let kw = extract_keywords("Pricing, PRICING; pricing tiers and Pricing");
        assert_eq!(kw, vec!["pricing".to_string(), "tiers".to_string()]);
    }

    #[test]
    fn test_splits_on_punctuation_runs() {
        let kw = extract_keywords("alpha--beta//gamma...delta");
        assert_eq!(kw, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn test_empty_and_short_input() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("a an to of ??").is_empty());
    }

    #[test]
    fn test_cap_and_invariants() {
        let inputs = [
            "one two three four five six seven eight nine ten eleven twelve thirteen fourteen",
            "Ünïcode wörds ärë fine, ÄÖÜ äöü",
            "the the the and and with from",
            "x1 y22 z333 w4444 repeated repeated REPEATED",
        ];
        for input in inputs {
            let kw = extract_keywords(input);
            assert!(kw.len() <= MAX_KEYWORDS);
            let unique: HashSet<&String> = kw.iter().collect();
            assert_eq!(unique.len(), kw.len());
            for k in &kw {
                assert_eq!(k, &k.to_lowercase());
                assert!(k.chars().count() >= MIN_KEYWORD_CHARS);
                assert!(!is_stopword(k));
            }
        }
        let long = extract_keywords(inputs[0]);
        assert_eq!(long.len(), MAX_KEYWORDS);
        assert_eq!(long[0], "two");
    }
}
