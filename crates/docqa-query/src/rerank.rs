//! Diversity-aware reranking.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::warn;

use docqa_core::{RankedFragment, ScoredCandidate};

/// Outcome of a rerank pass.
#[derive(Debug, Clone)]
pub struct Reranked {
    /// Selected fragments, best first, ranks assigned from 1.
    pub results: Vec<RankedFragment>,

    /// Fragments admitted by backfill beyond the per-source cap.
    pub backfilled: usize,
}

impl Reranked {
    pub fn diversity_shortfall(&self) -> bool {
        self.backfilled > 0
    }
}

/// Greedy top-k selection with a per-document cap and backfill.
#[derive(Debug, Clone, Copy)]
pub struct DiversityReranker {
    top_k: usize,
    max_per_source: usize,
}

impl DiversityReranker {
    pub fn new(top_k: usize, max_per_source: usize) -> Self {
        Self {
            top_k,
            max_per_source,
        }
    }

    /// Composite score descending, fragment id ascending on ties.
    fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
        b.composite
            .total_cmp(&a.composite)
            .then_with(|| a.fragment().id.cmp(&b.fragment().id))
    }

    /// Select at most `top_k` candidates.
    ///
    /// The greedy pass admits a candidate only while its document is under
    /// `max_per_source`. If that leaves free slots, the best remaining
    /// candidates fill them regardless of the cap. The final list is in
    /// score order and never repeats a fragment id.
    pub fn rerank(&self, mut scored: Vec<ScoredCandidate>) -> Reranked {
        scored.sort_by(Self::compare);
        let mut seen = HashSet::new();
        scored.retain(|sc| seen.insert(sc.fragment().id.clone()));

        let mut selected = vec![false; scored.len()];
        let mut per_source: HashMap<&str, usize> = HashMap::new();
        let mut taken = 0;

        for (i, candidate) in scored.iter().enumerate() {
            if taken == self.top_k {
                break;
            }
            let count = per_source.entry(candidate.fragment().doc_id.as_str()).or_default();
            if *count < self.max_per_source {
                *count += 1;
                selected[i] = true;
                taken += 1;
            }
        }

        let mut backfilled = 0;
        for flag in selected.iter_mut() {
            if taken == self.top_k {
                break;
            }
            if !*flag {
                *flag = true;
                taken += 1;
                backfilled += 1;
            }
        }

        if backfilled > 0 {
            warn!(
                "Diversity shortfall: backfilled {} fragments beyond the per-source cap of {}",
                backfilled, self.max_per_source
            );
        }

        // Selection flags follow the sorted order, so keeping them in
        // sequence preserves non-increasing scores.
        let results = scored
            .into_iter()
            .zip(selected)
            .filter(|(_, keep)| *keep)
            .enumerate()
            .map(|(i, (sc, _))| RankedFragment {
                rank: i as u32 + 1,
                score: sc.composite,
                signals: sc.signals,
                hit_count: sc.candidate.hit_count,
                fragment: sc.candidate.fragment,
            })
            .collect();

        Reranked {
            results,
            backfilled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::{Candidate, Fragment, SignalScores, SubQueryKind};
    use std::sync::Arc;

    fn scored(id: &str, doc: &str, composite: f32) -> ScoredCandidate {
        let fragment = Arc::new(Fragment::new(id, doc, "f.pdf", id));
        ScoredCandidate {
            candidate: Candidate::new(fragment, SubQueryKind::Original, 0.5),
            signals: SignalScores::default(),
            composite,
        }
    }

    fn ids(r: &Reranked) -> Vec<&str> {
        r.results.iter().map(|f| f.fragment.id.as_str()).collect()
    }

    #[test]
    fn test_cap_applied_when_pool_is_diverse() {
        let pool = vec![
            scored("a1", "A", 0.9),
            scored("a2", "A", 0.8),
            scored("a3", "A", 0.7),
            scored("b1", "B", 0.6),
            scored("c1", "C", 0.5),
        ];
        let r = DiversityReranker::new(3, 2).rerank(pool);

        assert_eq!(ids(&r), vec!["a1", "a2", "b1"]);
        assert!(!r.diversity_shortfall());
        assert_eq!(r.results[2].rank, 3);
    }

    #[test]
    fn test_backfill_when_cap_too_tight() {
        let pool = vec![
            scored("a1", "A", 0.9),
            scored("a2", "A", 0.8),
            scored("b1", "B", 0.7),
            scored("a3", "A", 0.6),
        ];
        let r = DiversityReranker::new(4, 1).rerank(pool);

        assert_eq!(ids(&r), vec!["a1", "a2", "b1", "a3"]);
        assert_eq!(r.backfilled, 2);
        assert!(r.diversity_shortfall());
        assert!(r.results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let pool = vec![scored("z", "A", 0.5), scored("m", "B", 0.5), scored("a", "C", 0.5)];
        let r = DiversityReranker::new(2, 3).rerank(pool);
        assert_eq!(ids(&r), vec!["a", "m"]);
    }

    #[test]
    fn test_small_pool_not_padded() {
        let r = DiversityReranker::new(7, 3).rerank(vec![scored("a", "A", 0.4), scored("b", "B", 0.3)]);
        assert_eq!(r.results.len(), 2);

        let empty = DiversityReranker::new(7, 3).rerank(Vec::new());
        assert!(empty.results.is_empty());
        assert!(!empty.diversity_shortfall());
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let pool = vec![scored("a", "A", 0.9), scored("a", "A", 0.9), scored("b", "B", 0.1)];
        let r = DiversityReranker::new(5, 3).rerank(pool);
        assert_eq!(ids(&r), vec!["a", "b"]);
    }

    #[test]
    fn test_rerank_is_deterministic() {
        let pool = || {
            vec![
                scored("c", "A", 0.3),
                scored("a", "B", 0.9),
                scored("b", "A", 0.9),
                scored("d", "A", 0.1),
            ]
        };
        let reranker = DiversityReranker::new(3, 1);
        let first = reranker.rerank(pool());
        let second = reranker.rerank(pool());
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec!["a", "b", "c"]);
    }
}
