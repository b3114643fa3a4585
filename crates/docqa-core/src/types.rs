//! Core domain types for the retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::SignalWeights;
use crate::error::RagError;

/// Characters kept in a reference preview before the ellipsis.
const PREVIEW_CHARS: usize = 150;

/// Separator placed between fragment texts in the downstream context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// An immutable unit of retrievable text, produced by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Unique fragment identifier.
    pub id: String,

    /// Identifier of the source document.
    pub doc_id: String,

    /// Source filename (used by the metadata signal).
    pub filename: String,

    /// Raw fragment text.
    pub content: String,

    /// Structural tag such as "definitions", "exclusions" or "general".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Embedding vector, owned by the embedding collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Fragment {
    /// Create a new fragment without a section tag or embedding.
    pub fn new(id: &str, doc_id: &str, filename: &str, content: &str) -> Self {
        Self {
            id: id.to_string(),
            doc_id: doc_id.to_string(),
            filename: filename.to_string(),
            content: content.to_string(),
            section: None,
            embedding: None,
        }
    }

    /// Attach a structural tag.
    pub fn with_section(mut self, section: &str) -> Self {
        self.section = Some(section.to_string());
        self
    }

    /// Character length of the fragment text.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// A user question, optionally restricted to one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// The raw question.
    pub text: String,

    /// Only fragments of this document are retrievable when set.
    #[serde(default)]
    pub document_filter: Option<String>,
}

impl Query {
    /// Create a query over the whole corpus.
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            document_filter: None,
        }
    }

    /// Restrict retrieval to a single document.
    pub fn for_document(mut self, doc_id: &str) -> Self {
        self.document_filter = Some(doc_id.to_string());
        self
    }

    /// True when the question has no searchable characters.
    pub fn is_blank(&self) -> bool {
        !self.text.chars().any(char::is_alphanumeric)
    }
}

/// Query intent, selects the signal weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Definition,
    Exclusion,
    Coverage,
    General,
}

impl QueryType {
    /// Every query type, in weight-table order.
    pub const ALL: [QueryType; 4] = [
        QueryType::Definition,
        QueryType::Exclusion,
        QueryType::Coverage,
        QueryType::General,
    ];

    /// Lower-case label used in config files and generation output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Exclusion => "exclusion",
            Self::Coverage => "coverage",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "definition" => Ok(Self::Definition),
            "exclusion" => Ok(Self::Exclusion),
            "coverage" => Ok(Self::Coverage),
            "general" => Ok(Self::General),
            other => Err(RagError::invalid_argument(format!(
                "unknown query type: {:?}",
                other
            ))),
        }
    }
}

/// Where an expansion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionSource {
    /// Parsed from generation output.
    Generated,
    /// Produced by the deterministic classifier.
    RuleBased,
    /// Generation failed; baseline query-only behaviour.
    Degraded,
}

/// Artifacts derived from a query to widen and steer retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpansion {
    /// Classified intent.
    pub query_type: QueryType,

    /// Full alternate phrasings of the question.
    pub variants: Vec<String>,

    /// Key concept terms (synonyms, abbreviations).
    pub concepts: Vec<String>,

    /// Short passages written the way an answer would appear in the documents.
    pub hypothetical_answers: Vec<String>,

    /// Likely section titles.
    pub context_hints: Vec<String>,

    /// How this expansion was produced.
    pub source: ExpansionSource,
}

impl QueryExpansion {
    /// The baseline expansion used when generation is unavailable.
    pub fn degraded() -> Self {
        Self {
            query_type: QueryType::General,
            variants: Vec::new(),
            concepts: Vec::new(),
            hypothetical_answers: Vec::new(),
            context_hints: Vec::new(),
            source: ExpansionSource::Degraded,
        }
    }

    /// Check whether generation failed for this expansion.
    pub fn is_degraded(&self) -> bool {
        self.source == ExpansionSource::Degraded
    }
}

/// Which sub-query surfaced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum SubQueryKind {
    /// The user's question as typed.
    Original,
    /// A semantic variant, by position in the expansion.
    Variant(usize),
    /// A hypothetical answer, by position in the expansion.
    Hypothetical(usize),
}

/// One similarity search issued during retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub kind: SubQueryKind,
    pub text: String,
}

/// A fragment surfaced by at least one sub-query.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The referenced fragment.
    pub fragment: Arc<Fragment>,

    /// The sub-query that produced the best distance.
    pub origin: SubQueryKind,

    /// Best (smallest) raw distance reported by the store.
    pub distance: f32,

    /// Number of sub-queries that surfaced this fragment.
    pub hit_count: u32,
}

impl Candidate {
    /// Create a candidate from its first hit.
    pub fn new(fragment: Arc<Fragment>, origin: SubQueryKind, distance: f32) -> Self {
        Self {
            fragment,
            origin,
            distance,
            hit_count: 1,
        }
    }

    /// Fold another hit for the same fragment into this candidate.
    pub fn merge_hit(&mut self, origin: SubQueryKind, distance: f32) {
        self.hit_count += 1;
        if distance < self.distance {
            self.distance = distance;
            self.origin = origin;
        }
    }
}

/// The nine relevance signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Semantic,
    Lexical,
    Hypothetical,
    Concept,
    Exclusion,
    ContextHint,
    MultiQuery,
    Length,
    Metadata,
}

impl Signal {
    pub const ALL: [Signal; 9] = [
        Signal::Semantic,
        Signal::Lexical,
        Signal::Hypothetical,
        Signal::Concept,
        Signal::Exclusion,
        Signal::ContextHint,
        Signal::MultiQuery,
        Signal::Length,
        Signal::Metadata,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Lexical => "lexical",
            Self::Hypothetical => "hypothetical",
            Self::Concept => "concept",
            Self::Exclusion => "exclusion",
            Self::ContextHint => "context_hint",
            Self::MultiQuery => "multi_query",
            Self::Length => "length",
            Self::Metadata => "metadata",
        }
    }
}

/// Per-candidate signal values, each in [0,1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    pub semantic: f32,
    pub lexical: f32,
    pub hypothetical: f32,
    pub concept: f32,
    pub exclusion: f32,
    pub context_hint: f32,
    pub multi_query: f32,
    pub length: f32,
    pub metadata: f32,
}

impl SignalScores {
    /// Value of a single signal.
    pub fn get(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Semantic => self.semantic,
            Signal::Lexical => self.lexical,
            Signal::Hypothetical => self.hypothetical,
            Signal::Concept => self.concept,
            Signal::Exclusion => self.exclusion,
            Signal::ContextHint => self.context_hint,
            Signal::MultiQuery => self.multi_query,
            Signal::Length => self.length,
            Signal::Metadata => self.metadata,
        }
    }

    /// Weighted sum in `Signal::ALL` order.
    ///
    /// The summation order is fixed so the result is reproducible bit for bit.
    pub fn weighted_sum(&self, weights: &SignalWeights) -> f32 {
        Signal::ALL
            .iter()
            .fold(0.0f32, |acc, s| acc + self.get(*s) * weights.get(*s))
    }
}

/// A candidate annotated with its signals and composite score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub signals: SignalScores,
    pub composite: f32,
}

impl ScoredCandidate {
    /// Score a candidate; the composite is derived, never stored independently.
    pub fn new(candidate: Candidate, signals: SignalScores, weights: &SignalWeights) -> Self {
        let composite = signals.weighted_sum(weights);
        Self {
            candidate,
            signals,
            composite,
        }
    }

    pub fn fragment(&self) -> &Fragment {
        &self.candidate.fragment
    }
}

/// One entry of the final ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFragment {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// Composite score (higher is better).
    pub score: f32,

    /// The selected fragment.
    pub fragment: Arc<Fragment>,

    /// Signal breakdown behind the score.
    pub signals: SignalScores,

    /// How many sub-queries surfaced the fragment.
    pub hit_count: u32,
}

/// A source reference for the answer generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// 1-based position in the ranking.
    pub index: usize,
    pub doc_id: String,
    pub fragment_id: String,
    pub filename: String,
    pub text_preview: String,
}

/// Ordered fragments handed to the downstream answer generator.
///
/// Holds only values derived from the inputs, so identical inputs give
/// equal results. Timing is logged by the engine, not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// The original question.
    pub query: String,

    /// Resolved intent.
    pub query_type: QueryType,

    /// Fragments in non-increasing score order.
    pub results: Vec<RankedFragment>,

    /// Size of the merged candidate pool.
    pub candidates_considered: usize,

    /// Set when backfill had to exceed the per-source cap.
    pub diversity_shortfall: bool,
}

impl RankedResult {
    /// A result with no fragments ("no relevant context found").
    pub fn empty(query: &str, query_type: QueryType) -> Self {
        Self {
            query: query.to_string(),
            query_type,
            results: Vec::new(),
            candidates_considered: 0,
            diversity_shortfall: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Source references with short previews, in rank order.
    pub fn references(&self) -> Vec<Reference> {
        self.results
            .iter()
            .enumerate()
            .map(|(i, r)| Reference {
                index: i + 1,
                doc_id: r.fragment.doc_id.clone(),
                fragment_id: r.fragment.id.clone(),
                filename: r.fragment.filename.clone(),
                text_preview: preview(&r.fragment.content),
            })
            .collect()
    }

    /// Fragment texts joined for prompt construction.
    pub fn context(&self) -> String {
        self.results
            .iter()
            .map(|r| r.fragment.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(id: &str, doc: &str, content: &str, score: f32) -> RankedFragment {
        RankedFragment {
            rank: 0,
            score,
            fragment: Arc::new(Fragment::new(id, doc, "policy.pdf", content)),
            signals: SignalScores::default(),
            hit_count: 1,
        }
    }

    #[test]
    fn test_query_type_from_str() {
        assert_eq!("definition".parse::<QueryType>().unwrap(), QueryType::Definition);
        assert_eq!(" Exclusion ".parse::<QueryType>().unwrap(), QueryType::Exclusion);
        assert!("eligibility".parse::<QueryType>().is_err());
    }

    #[test]
    fn test_query_blank() {
        assert!(Query::new("").is_blank());
        assert!(Query::new("  ?! ").is_blank());
        assert!(!Query::new("newborn?").is_blank());
    }

    #[test]
    fn test_degraded_expansion() {
        let e = QueryExpansion::degraded();
        assert!(e.is_degraded());
        assert_eq!(e.query_type, QueryType::General);
        assert!(e.variants.is_empty() && e.hypothetical_answers.is_empty());
        assert!(e.concepts.is_empty() && e.context_hints.is_empty());
    }

    #[test]
    fn test_candidate_merge_keeps_best_distance() {
        let frag = Arc::new(Fragment::new("f1", "d1", "a.pdf", "text"));
        let mut c = Candidate::new(frag, SubQueryKind::Original, 0.6);
        c.merge_hit(SubQueryKind::Variant(0), 0.3);
        c.merge_hit(SubQueryKind::Hypothetical(1), 0.9);

        assert_eq!(c.hit_count, 3);
        assert!((c.distance - 0.3).abs() < f32::EPSILON);
        assert_eq!(c.origin, SubQueryKind::Variant(0));
    }

    #[test]
    fn test_weighted_sum() {
        let signals = SignalScores {
            semantic: 1.0,
            exclusion: 0.5,
            ..Default::default()
        };
        let weights = SignalWeights {
            semantic: 0.5,
            exclusion: 0.5,
            ..SignalWeights::zero()
        };
        assert!((signals.weighted_sum(&weights) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_references_preview() {
        let long = "x".repeat(200);
        let result = RankedResult {
            results: vec![ranked("a", "d1", "short", 0.9), ranked("b", "d2", &long, 0.8)],
            ..RankedResult::empty("q", QueryType::General)
        };

        let refs = result.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].index, 1);
        assert_eq!(refs[0].text_preview, "short");
        assert_eq!(refs[1].text_preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(refs[1].text_preview.ends_with("..."));
    }

    #[test]
    fn test_context_join() {
        let result = RankedResult {
            results: vec![ranked("a", "d1", "one", 0.9), ranked("b", "d1", "two", 0.8)],
            ..RankedResult::empty("q", QueryType::General)
        };
        assert_eq!(result.context(), "one\n\n---\n\ntwo");
    }

    #[test]
    fn test_fragment_serde_defaults() {
        let json = r#"{"id":"f1","doc_id":"d1","filename":"a.pdf","content":"Hello"}"#;
        let frag: Fragment = serde_json::from_str(json).unwrap();
        assert!(frag.section.is_none());
        assert!(frag.embedding.is_none());
        assert_eq!(frag.char_len(), 5);
    }
}
