//! Text normalisation shared by scoring, corpus statistics and expansion.
//!
//! Every component that counts terms goes through these functions so that a
//! document frequency computed at load time refers to the same token a query
//! produces at search time.

/// English function words dropped from content tokens.
///
/// Negations ("not", "no", "nor") are deliberately absent: they carry the
/// exclusion signal.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "according", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "being", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
    "has", "have", "he", "her", "here", "his", "how", "i", "if", "in", "into", "is", "it", "its",
    "may", "me", "might", "must", "my", "of", "on", "or", "our", "per", "shall", "she", "should",
    "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "to", "under", "was", "we", "were", "what", "when", "where",
    "which", "who", "whom", "whose", "why", "will", "with", "would", "you", "your",
];

/// Check whether a (lower-cased) token is a stop word.
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Lower-case and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Tokens with stop words removed, in original order.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stop_word(t))
        .collect()
}

/// Normalised form of a text: its tokens joined by single spaces.
pub fn normalize(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Strip a plural "s" so "exclusions" and "exclusion" compare equal.
///
/// Short tokens and "ss" endings are left alone.
pub fn fold_plural(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Tokenize and fold plurals.
pub fn folded_tokens(text: &str) -> Vec<String> {
    tokenize(text).iter().map(|t| fold_plural(t)).collect()
}

/// Content tokens with plurals folded; the key space of corpus statistics.
pub fn folded_content_tokens(text: &str) -> Vec<String> {
    content_tokens(text).iter().map(|t| fold_plural(t)).collect()
}

/// Token-aligned phrase match.
///
/// An empty phrase never matches.
pub fn contains_phrase(haystack: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > haystack.len() {
        return false;
    }
    haystack.windows(phrase.len()).any(|w| w == phrase)
}

/// Count non-overlapping occurrences of a phrase in a token sequence.
pub fn count_phrase(haystack: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() || phrase.len() > haystack.len() {
        return 0;
    }

    let mut count = 0;
    let mut i = 0;
    while i + phrase.len() <= haystack.len() {
        if haystack[i..i + phrase.len()] == *phrase {
            count += 1;
            i += phrase.len();
        } else {
            i += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_sorted() {
        // binary_search in is_stop_word relies on this
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("New Born Baby: aged up to 90 days."),
            vec!["new", "born", "baby", "aged", "up", "to", "90", "days"]
        );
        assert_eq!(tokenize("pre-hospitalization"), vec!["pre", "hospitalization"]);
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn test_content_tokens_keep_negation() {
        assert_eq!(
            content_tokens("What is not covered under the policy?"),
            vec!["not", "covered", "policy"]
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Sum-Insured (SI)"), "sum insured si");
    }

    #[test]
    fn test_fold_plural() {
        assert_eq!(fold_plural("days"), "day");
        assert_eq!(fold_plural("exclusions"), "exclusion");
        assert_eq!(fold_plural("class"), "class");
        assert_eq!(fold_plural("bus"), "bus");
        assert_eq!(folded_tokens("Waiting Periods"), vec!["waiting", "period"]);
    }

    #[test]
    fn test_contains_phrase() {
        let hay = tokenize("Expenses are not covered under this section");
        assert!(contains_phrase(&hay, &tokenize("not covered")));
        assert!(!contains_phrase(&hay, &tokenize("covered not")));
        assert!(!contains_phrase(&hay, &[]));
    }

    #[test]
    fn test_count_phrase() {
        let hay = tokenize("excluded; excluded and also excluded");
        assert_eq!(count_phrase(&hay, &tokenize("excluded")), 3);
        assert_eq!(count_phrase(&hay, &tokenize("not excluded")), 0);
    }
}
