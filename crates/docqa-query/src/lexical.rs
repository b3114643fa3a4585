//! Lexical overlap scoring between a query and a fragment.
//!
//! Five independent components are computed over normalised content tokens
//! (see [`docqa_core::text`]); [`LexicalScores::combined`] folds them into
//! the single lexical signal with the fixed weights below.

use std::collections::{HashMap, HashSet};

use docqa_core::text::{contains_phrase, content_tokens, fold_plural, folded_content_tokens};
use docqa_core::{CorpusStats, ScoringConfig};

/// Weights used by [`LexicalScores::combined`]. They sum to 1.0.
pub const JACCARD_WEIGHT: f32 = 0.15;
pub const BM25_WEIGHT: f32 = 0.30;
pub const NGRAM_WEIGHT: f32 = 0.20;
pub const COVERAGE_WEIGHT: f32 = 0.25;
pub const FUZZY_WEIGHT: f32 = 0.10;

/// Share of the n-gram score given to bigrams when the query also has trigrams.
const BIGRAM_SHARE: f32 = 2.0 / 3.0;

/// A text prepared for lexical scoring.
#[derive(Debug, Clone, Default)]
pub struct Terms {
    /// Content tokens in order.
    pub tokens: Vec<String>,

    /// Distinct content tokens.
    pub distinct: HashSet<String>,

    /// Content token frequencies.
    pub frequencies: HashMap<String, usize>,
}

impl Terms {
    pub fn new(text: &str) -> Self {
        let tokens = content_tokens(text);
        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.clone()).or_default() += 1;
        }
        let distinct = frequencies.keys().cloned().collect();

        Self {
            tokens,
            distinct,
            frequencies,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// The five lexical components, each in [0,1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LexicalScores {
    /// Jaccard index of the distinct token sets.
    pub jaccard: f32,
    /// Rarity-weighted, saturated term match.
    pub bm25: f32,
    /// Query bigrams and trigrams found verbatim.
    pub ngram: f32,
    /// Fraction of distinct query tokens present.
    pub coverage: f32,
    /// Token-level longest common subsequence ratio.
    pub fuzzy: f32,
}

impl LexicalScores {
    /// Weighted combination of the components.
    pub fn combined(&self) -> f32 {
        let score = self.jaccard * JACCARD_WEIGHT
            + self.bm25 * BM25_WEIGHT
            + self.ngram * NGRAM_WEIGHT
            + self.coverage * COVERAGE_WEIGHT
            + self.fuzzy * FUZZY_WEIGHT;
        score.clamp(0.0, 1.0)
    }
}

/// Computes [`LexicalScores`]. Pure; holds only tuning parameters.
#[derive(Debug, Clone)]
pub struct LexicalScorer {
    bm25_k: f32,
    fuzzy_max_tokens: usize,
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

impl LexicalScorer {
    pub fn new(bm25_k: f32, fuzzy_max_tokens: usize) -> Self {
        Self {
            bm25_k,
            fuzzy_max_tokens,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(config.bm25_k, config.fuzzy_max_tokens)
    }

    /// Score raw texts.
    pub fn score(&self, query: &str, fragment: &str, stats: &dyn CorpusStats) -> LexicalScores {
        self.score_terms(&Terms::new(query), &Terms::new(fragment), stats)
    }

    /// Score prepared texts. Empty input on either side scores zero.
    pub fn score_terms(
        &self,
        query: &Terms,
        fragment: &Terms,
        stats: &dyn CorpusStats,
    ) -> LexicalScores {
        if query.is_empty() || fragment.is_empty() {
            return LexicalScores::default();
        }

        LexicalScores {
            jaccard: jaccard(query, fragment),
            bm25: self.bm25(query, fragment, stats),
            ngram: ngram_match(query, fragment),
            coverage: coverage(query, fragment),
            fuzzy: self.fuzzy(query, fragment),
        }
    }

    /// `Σ idf·tf/(tf+k) / Σ idf` over distinct query terms, with
    /// `idf = ln(1 + N/df)`. Document frequency is floored at 1 so unseen
    /// terms get the highest weight instead of dividing by zero.
    fn bm25(&self, query: &Terms, fragment: &Terms, stats: &dyn CorpusStats) -> f32 {
        let n = stats.corpus_size().max(1) as f32;
        let k = if self.bm25_k > 0.0 { self.bm25_k } else { 1.0 };

        let mut weighted = 0.0f32;
        let mut total_idf = 0.0f32;
        for term in sorted(&query.distinct) {
            let df = stats.document_frequency(term).max(1) as f32;
            let idf = (1.0 + n / df).ln();
            total_idf += idf;

            let tf = fragment.frequencies.get(term).copied().unwrap_or(0) as f32;
            if tf > 0.0 {
                weighted += idf * tf / (tf + k);
            }
        }

        if total_idf > 0.0 {
            (weighted / total_idf).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// LCS length over query length, with the fragment cut to
    /// `fuzzy_max_tokens` tokens.
    fn fuzzy(&self, query: &Terms, fragment: &Terms) -> f32 {
        let end = fragment.tokens.len().min(self.fuzzy_max_tokens);
        let lcs = lcs_len(&query.tokens, &fragment.tokens[..end]);
        (lcs as f32 / query.tokens.len() as f32).clamp(0.0, 1.0)
    }
}

/// Iterate a set in a fixed order so float sums are reproducible.
fn sorted(set: &HashSet<String>) -> Vec<&String> {
    let mut items: Vec<&String> = set.iter().collect();
    items.sort();
    items
}

fn jaccard(query: &Terms, fragment: &Terms) -> f32 {
    let shared = query.distinct.intersection(&fragment.distinct).count();
    let union = query.distinct.len() + fragment.distinct.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f32 / union as f32
    }
}

fn coverage(query: &Terms, fragment: &Terms) -> f32 {
    if query.distinct.is_empty() {
        return 0.0;
    }
    let present = query
        .distinct
        .iter()
        .filter(|t| fragment.distinct.contains(*t))
        .count();
    present as f32 / query.distinct.len() as f32
}

fn ngram_fraction(query: &[String], fragment: &[String], n: usize) -> Option<f32> {
    if query.len() < n {
        return None;
    }
    let grams: Vec<&[String]> = query.windows(n).collect();
    let found = grams.iter().filter(|g| contains_phrase(fragment, g)).count();
    Some(found as f32 / grams.len() as f32)
}

/// Bigram fraction, blended with the trigram fraction when the query is
/// long enough to have trigrams. Single-token queries have no n-grams.
fn ngram_match(query: &Terms, fragment: &Terms) -> f32 {
    match (
        ngram_fraction(&query.tokens, &fragment.tokens, 2),
        ngram_fraction(&query.tokens, &fragment.tokens, 3),
    ) {
        (Some(bi), Some(tri)) => bi * BIGRAM_SHARE + tri * (1.0 - BIGRAM_SHARE),
        (Some(bi), None) => bi,
        _ => 0.0,
    }
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // Two-row dynamic programme over b.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Corpus statistics approximated from the texts of a candidate pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    size: usize,
    doc_freq: HashMap<String, usize>,
}

impl PoolStats {
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut size = 0;
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            size += 1;
            let terms: HashSet<String> = folded_content_tokens(text).into_iter().collect();
            for term in terms {
                *doc_freq.entry(term).or_default() += 1;
            }
        }
        Self { size, doc_freq }
    }
}

impl CorpusStats for PoolStats {
    fn corpus_size(&self) -> usize {
        self.size
    }

    fn document_frequency(&self, term: &str) -> usize {
        self.doc_freq.get(&fold_plural(term)).copied().unwrap_or(0)
    }
}
