//! Nine-signal hybrid scoring.

use docqa_core::text::{contains_phrase, content_tokens, count_phrase, folded_tokens};
use docqa_core::{
    Candidate, CorpusStats, Fragment, Query, QueryExpansion, ScoredCandidate, ScoringConfig,
    SignalScores, SignalWeights, SubQueryKind, WeightTable,
};

use crate::lexical::{LexicalScorer, Terms};

/// Phrases that mark exclusionary policy wording.
pub const NEGATION_MARKERS: &[&str] = &[
    "does not cover",
    "exclude",
    "excluded",
    "exclusion",
    "no coverage",
    "not admissible",
    "not be covered",
    "not be payable",
    "not covered",
    "not eligible",
    "not include",
    "not included",
    "not liable",
    "not payable",
];

/// Leading fragment tokens compared against context hints.
const LEADING_TOKENS: usize = 32;

/// Hit count at which the multi-query signal reaches 0.5.
const MULTI_QUERY_HALF: f32 = 2.0;

/// Map a cosine distance in [0, 2] to a similarity in [0, 1].
///
/// Strictly decreasing over the valid range; non-finite distances map to 0.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Query-side material prepared once per request.
struct Prepared {
    query: Terms,
    query_folded: Vec<String>,
    hypotheticals: Vec<Terms>,
    concepts: Vec<Vec<String>>,
    hints: Vec<Vec<String>>,
    weights: SignalWeights,
}

/// Fragment-side tokens shared by several signals.
struct FragmentView<'a> {
    fragment: &'a Fragment,
    terms: Terms,
    folded: Vec<String>,
    section: Vec<String>,
}

impl<'a> FragmentView<'a> {
    fn new(fragment: &'a Fragment) -> Self {
        Self {
            fragment,
            terms: Terms::new(&fragment.content),
            folded: folded_tokens(&fragment.content),
            section: fragment.section.as_deref().map(folded_tokens).unwrap_or_default(),
        }
    }
}

/// Computes signals and composite scores for candidates.
#[derive(Debug, Clone)]
pub struct HybridScorer {
    lexical: LexicalScorer,
    weights: WeightTable,
    length_min: usize,
    length_max: usize,
    negation_markers: Vec<Vec<String>>,
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl HybridScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            lexical: LexicalScorer::from_config(config),
            weights: config.weights.clone(),
            length_min: config.length_min_chars,
            length_max: config.length_max_chars,
            negation_markers: NEGATION_MARKERS.iter().map(|m| folded_tokens(m)).collect(),
        }
    }

    /// Resolved weight vector for an expansion's query type.
    pub fn weights_for(&self, expansion: &QueryExpansion) -> &SignalWeights {
        self.weights.weights_for(expansion.query_type)
    }

    /// Score one candidate.
    pub fn score(
        &self,
        candidate: Candidate,
        query: &Query,
        expansion: &QueryExpansion,
        stats: &dyn CorpusStats,
    ) -> ScoredCandidate {
        let prepared = self.prepare(query, expansion);
        self.score_prepared(candidate, &prepared, stats)
    }

    /// Score a candidate pool, preserving its order.
    pub fn score_all(
        &self,
        candidates: Vec<Candidate>,
        query: &Query,
        expansion: &QueryExpansion,
        stats: &dyn CorpusStats,
    ) -> Vec<ScoredCandidate> {
        let prepared = self.prepare(query, expansion);
        candidates
            .into_iter()
            .map(|c| self.score_prepared(c, &prepared, stats))
            .collect()
    }

    fn prepare(&self, query: &Query, expansion: &QueryExpansion) -> Prepared {
        Prepared {
            query: Terms::new(&query.text),
            query_folded: content_tokens(&query.text)
                .iter()
                .flat_map(|t| folded_tokens(t))
                .collect(),
            hypotheticals: expansion
                .hypothetical_answers
                .iter()
                .map(|h| Terms::new(h))
                .collect(),
            concepts: expansion
                .concepts
                .iter()
                .map(|c| folded_tokens(c))
                .filter(|t| !t.is_empty())
                .collect(),
            hints: expansion
                .context_hints
                .iter()
                .map(|h| folded_tokens(h))
                .filter(|t| !t.is_empty())
                .collect(),
            weights: *self.weights_for(expansion),
        }
    }

    fn score_prepared(
        &self,
        candidate: Candidate,
        prepared: &Prepared,
        stats: &dyn CorpusStats,
    ) -> ScoredCandidate {
        let signals = self.signals(&candidate, prepared, stats);
        ScoredCandidate::new(candidate, signals, &prepared.weights)
    }

    fn signals(
        &self,
        candidate: &Candidate,
        prepared: &Prepared,
        stats: &dyn CorpusStats,
    ) -> SignalScores {
        let view = FragmentView::new(&candidate.fragment);
        let semantic = distance_to_similarity(candidate.distance);

        SignalScores {
            semantic,
            lexical: self
                .lexical
                .score_terms(&prepared.query, &view.terms, stats)
                .combined(),
            hypothetical: self.hypothetical(candidate, semantic, prepared, &view, stats),
            concept: concept_coverage(&prepared.concepts, &view),
            exclusion: self.exclusion(&view),
            context_hint: context_hint(&prepared.hints, &view),
            multi_query: multi_query(candidate.hit_count),
            length: self.length(view.fragment.char_len()),
            metadata: metadata(&prepared.query_folded, &view.fragment.filename),
        }
    }

    /// Best lexical match against any hypothetical answer; when the
    /// candidate was surfaced by a hypothetical sub-query its semantic
    /// similarity counts too.
    fn hypothetical(
        &self,
        candidate: &Candidate,
        semantic: f32,
        prepared: &Prepared,
        view: &FragmentView<'_>,
        stats: &dyn CorpusStats,
    ) -> f32 {
        let lexical = prepared
            .hypotheticals
            .iter()
            .map(|h| self.lexical.score_terms(h, &view.terms, stats).combined())
            .fold(0.0f32, f32::max);

        match candidate.origin {
            SubQueryKind::Hypothetical(_) if !prepared.hypotheticals.is_empty() => {
                lexical.max(semantic)
            }
            _ => lexical,
        }
    }

    /// `1 - 0.5^h` where `h` counts negation markers, plus one for an
    /// exclusions section tag.
    fn exclusion(&self, view: &FragmentView<'_>) -> f32 {
        let mut hits: usize = self
            .negation_markers
            .iter()
            .map(|m| count_phrase(&view.folded, m))
            .sum();
        if view.section.iter().any(|t| t == "exclusion") {
            hits += 1;
        }
        1.0 - 0.5f32.powi(hits.min(64) as i32)
    }

    /// 1 inside the preferred band, proportional falloff outside it.
    fn length(&self, chars: usize) -> f32 {
        if chars == 0 || self.length_min == 0 || self.length_max == 0 {
            return 0.0;
        }
        let value = if chars < self.length_min {
            chars as f32 / self.length_min as f32
        } else if chars > self.length_max {
            self.length_max as f32 / chars as f32
        } else {
            1.0
        };
        value.clamp(0.0, 1.0)
    }
}

fn concept_coverage(concepts: &[Vec<String>], view: &FragmentView<'_>) -> f32 {
    if concepts.is_empty() {
        return 0.0;
    }
    let found = concepts
        .iter()
        .filter(|c| contains_phrase(&view.folded, c))
        .count();
    found as f32 / concepts.len() as f32
}

/// Best hint match against the section tag or the leading text.
fn context_hint(hints: &[Vec<String>], view: &FragmentView<'_>) -> f32 {
    let leading_end = view.folded.len().min(LEADING_TOKENS);
    let leading = &view.folded[..leading_end];

    hints
        .iter()
        .map(|hint| {
            if !view.section.is_empty() && view.section == *hint {
                return 1.0;
            }
            let present = hint
                .iter()
                .filter(|t| view.section.contains(*t) || leading.contains(*t))
                .count();
            present as f32 / hint.len() as f32
        })
        .fold(0.0f32, f32::max)
}

/// `h / (h + 2)`: rises with hit count and saturates below 1.
fn multi_query(hit_count: u32) -> f32 {
    let h = hit_count as f32;
    h / (h + MULTI_QUERY_HALF)
}

/// Overlap between query tokens and filename tokens, extension dropped.
fn metadata(query: &[String], filename: &str) -> f32 {
    let stem = match filename.rfind('.') {
        Some(pos) if pos > 0 => &filename[..pos],
        _ => filename,
    };
    let mut name: Vec<String> = content_tokens(stem)
        .iter()
        .flat_map(|t| folded_tokens(t))
        .collect();
    name.sort();
    name.dedup();

    let mut terms: Vec<&String> = query.iter().collect();
    terms.sort();
    terms.dedup();

    let denominator = name.len().min(terms.len());
    if denominator == 0 {
        return 0.0;
    }
    let shared = terms.iter().filter(|t| name.contains(**t)).count();
    (shared as f32 / denominator as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::{ExpansionSource, NoCorpusStats, QueryType, Signal};
    use std::sync::Arc;

    fn candidate(fragment: Fragment, distance: f32) -> Candidate {
        Candidate::new(Arc::new(fragment), SubQueryKind::Original, distance)
    }

    fn expansion(query_type: QueryType) -> QueryExpansion {
        QueryExpansion {
            query_type,
            source: ExpansionSource::RuleBased,
            ..QueryExpansion::degraded()
        }
    }

    #[test]
    fn test_distance_to_similarity() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert_eq!(distance_to_similarity(2.0), 0.0);
        assert_eq!(distance_to_similarity(5.0), 0.0);
        assert_eq!(distance_to_similarity(f32::NAN), 0.0);
        assert!(distance_to_similarity(0.3) > distance_to_similarity(0.4));
    }

    #[test]
    fn test_signals_in_unit_range() {
        let scorer = HybridScorer::default();
        let query = Query::new("Which surgeries are excluded?");
        let mut e = expansion(QueryType::Exclusion);
        e.concepts = vec!["surgery".into(), "excluded".into()];
        e.context_hints = vec!["Exclusions".into()];
        e.hypothetical_answers = vec!["Cosmetic surgery is excluded.".into()];

        let fragments = [
            Fragment::new("a", "d", "exclusions.pdf", "Cosmetic surgery is excluded. Excluded excluded not covered."),
            Fragment::new("b", "d", "x", ""),
            Fragment::new("c", "d", "", &"word ".repeat(1000)),
        ];
        for fragment in fragments {
            let scored = scorer.score(candidate(fragment, 0.7), &query, &e, &NoCorpusStats);
            for signal in Signal::ALL {
                let v = scored.signals.get(signal);
                assert!((0.0..=1.0).contains(&v), "{} = {}", signal.name(), v);
            }
            assert!(scored.composite.is_finite());
        }
    }

    #[test]
    fn test_empty_fragment_scores_neutral() {
        let scorer = HybridScorer::default();
        let scored = scorer.score(
            candidate(Fragment::new("e", "d", "", ""), 2.0),
            &Query::new("newborn"),
            &expansion(QueryType::General),
            &NoCorpusStats,
        );
        let s = scored.signals;
        assert_eq!(s.semantic, 0.0);
        assert_eq!(s.lexical, 0.0);
        assert_eq!(s.exclusion, 0.0);
        assert_eq!(s.length, 0.0);
        assert_eq!(s.metadata, 0.0);
    }

    #[test]
    fn test_exclusion_signal_counts_markers() {
        let scorer = HybridScorer::default();
        let plain = Fragment::new("a", "d", "f", "Surgery is covered.");
        let one = Fragment::new("b", "d", "f", "Surgery is not covered.");
        let two = Fragment::new("c", "d", "f", "Cosmetic surgery is excluded and not payable.");
        let tagged = two.clone().with_section("Exclusions");

        assert_eq!(scorer.exclusion(&FragmentView::new(&plain)), 0.0);
        assert!((scorer.exclusion(&FragmentView::new(&one)) - 0.5).abs() < 1e-6);
        assert!((scorer.exclusion(&FragmentView::new(&two)) - 0.75).abs() < 1e-6);
        assert!((scorer.exclusion(&FragmentView::new(&tagged)) - 0.875).abs() < 1e-6);
    }

    #[test]
    fn test_length_band() {
        let scorer = HybridScorer::default();
        assert_eq!(scorer.length(0), 0.0);
        assert!((scorer.length(150) - 0.5).abs() < 1e-6);
        assert_eq!(scorer.length(300), 1.0);
        assert_eq!(scorer.length(1200), 1.0);
        assert!((scorer.length(2400) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_multi_query_saturates() {
        assert!((multi_query(2) - 0.5).abs() < 1e-6);
        assert!(multi_query(3) > multi_query(2));
        assert!(multi_query(1000) < 1.0);
        assert_eq!(multi_query(0), 0.0);
    }

    #[test]
    fn test_metadata_overlap() {
        let query = folded_tokens("maternity benefits");
        assert_eq!(metadata(&query, "Maternity_Benefit_Policy.pdf"), 1.0);
        assert_eq!(metadata(&query, "dental.pdf"), 0.0);
        assert_eq!(metadata(&query, ""), 0.0);
        assert_eq!(metadata(&[], "maternity.pdf"), 0.0);
    }

    #[test]
    fn test_context_hint() {
        let hints = vec![folded_tokens("Definitions"), folded_tokens("scope of cover")];
        let tagged = Fragment::new("a", "d", "f", "Some text").with_section("definitions");
        let leading = Fragment::new("b", "d", "f", "Scope of cover: hospital expenses");
        let none = Fragment::new("c", "d", "f", "Claims must be filed promptly");

        assert_eq!(context_hint(&hints, &FragmentView::new(&tagged)), 1.0);
        assert!((context_hint(&hints, &FragmentView::new(&leading)) - 1.0).abs() < 1e-6);
        assert_eq!(context_hint(&hints, &FragmentView::new(&none)), 0.0);
        assert_eq!(context_hint(&[], &FragmentView::new(&tagged)), 0.0);
    }

    #[test]
    fn test_concept_coverage() {
        let concepts = vec![folded_tokens("new born baby"), folded_tokens("infant")];
        let fragment = Fragment::new("a", "d", "f", "A New Born Baby is covered from day one.");
        assert!((concept_coverage(&concepts, &FragmentView::new(&fragment)) - 0.5).abs() < 1e-6);
        assert_eq!(concept_coverage(&[], &FragmentView::new(&fragment)), 0.0);
    }

    #[test]
    fn test_hypothetical_origin_uses_semantic() {
        let scorer = HybridScorer::default();
        let query = Query::new("room rent limit");
        let mut e = expansion(QueryType::General);
        e.hypothetical_answers = vec!["Charges are capped at one percent.".into()];

        let fragment = Arc::new(Fragment::new("a", "d", "f", "Accommodation is limited."));
        let from_original = Candidate::new(fragment.clone(), SubQueryKind::Original, 0.2);
        let from_hypothetical = Candidate::new(fragment, SubQueryKind::Hypothetical(0), 0.2);

        let a = scorer.score(from_original, &query, &e, &NoCorpusStats);
        let b = scorer.score(from_hypothetical, &query, &e, &NoCorpusStats);
        assert_eq!(a.signals.hypothetical, 0.0);
        assert!((b.signals.hypothetical - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_exclusion_weights_favour_negation() {
        let scorer = HybridScorer::default();
        let query = Query::new("What medical procedures are excluded?");
        let e = expansion(QueryType::Exclusion);

        let excluded = candidate(
            Fragment::new("x", "d", "f", "Cosmetic procedures are excluded and not covered."),
            0.5,
        );
        let similar = candidate(
            Fragment::new("y", "d", "f", "Medical procedures performed in hospital are reimbursed."),
            0.45,
        );

        let a = scorer.score(excluded, &query, &e, &NoCorpusStats);
        let b = scorer.score(similar, &query, &e, &NoCorpusStats);
        assert!(a.signals.exclusion >= b.signals.exclusion);
        assert!(a.composite > b.composite);
    }

    #[test]
    fn test_composite_is_weighted_sum() {
        let scorer = HybridScorer::default();
        let e = expansion(QueryType::Definition);
        let scored = scorer.score(
            candidate(Fragment::new("a", "d", "f", "New born baby means a baby aged up to 90 days."), 0.4),
            &Query::new("new born baby"),
            &e,
            &NoCorpusStats,
        );
        let expected = scored.signals.weighted_sum(&SignalWeights::builtin(QueryType::Definition));
        assert_eq!(scored.composite.to_bits(), expected.to_bits());
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let scorer = HybridScorer::default();
        let query = Query::new("maternity waiting period");
        let mut e = expansion(QueryType::Coverage);
        e.concepts = vec!["maternity".into(), "waiting period".into()];
        let fragment = Fragment::new("a", "d", "maternity.pdf", "Maternity benefits have a waiting period of 9 months.");

        let first = scorer.score(candidate(fragment.clone(), 0.3), &query, &e, &NoCorpusStats);
        let second = scorer.score(candidate(fragment, 0.3), &query, &e, &NoCorpusStats);
        assert_eq!(first.composite.to_bits(), second.composite.to_bits());
        assert_eq!(first.signals, second.signals);
    }
}
