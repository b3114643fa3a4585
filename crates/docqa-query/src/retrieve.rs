//! Multi-query candidate retrieval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, warn};

use docqa_core::text::normalize;
use docqa_core::{
    Candidate, Fragment, Query, QueryExpansion, RagError, SimilarityStore, SubQuery, SubQueryKind,
};

/// Log a collaborator failure the retriever is about to absorb.
fn report(stage: &str, e: &RagError) {
    if e.is_recoverable() {
        warn!("{} [{}]: {}", stage, e.error_code(), e);
    } else {
        error!("{} [{}]: {}", stage, e.error_code(), e);
    }
}

/// Issues the original query, every variant and every hypothetical answer
/// against the similarity store and merges the hits by fragment id.
pub struct MultiQueryRetriever {
    store: Arc<dyn SimilarityStore>,
    search_timeout: Duration,
}

impl MultiQueryRetriever {
    pub fn new(store: Arc<dyn SimilarityStore>, search_timeout: Duration) -> Self {
        Self {
            store,
            search_timeout,
        }
    }

    /// Sub-queries in issue order: original, variants, hypothetical answers.
    ///
    /// Texts that normalise to an already issued text are skipped, and at
    /// most `candidate_limit` sub-queries are kept so each gets at least one
    /// result slot.
    pub fn sub_queries(query: &Query, expansion: &QueryExpansion, candidate_limit: usize) -> Vec<SubQuery> {
        let original = std::iter::once(SubQuery {
            kind: SubQueryKind::Original,
            text: query.text.trim().to_string(),
        });
        let variants = expansion.variants.iter().enumerate().map(|(i, v)| SubQuery {
            kind: SubQueryKind::Variant(i),
            text: v.trim().to_string(),
        });
        let hypotheticals = expansion
            .hypothetical_answers
            .iter()
            .enumerate()
            .map(|(i, h)| SubQuery {
                kind: SubQueryKind::Hypothetical(i),
                text: h.trim().to_string(),
            });

        let mut seen = HashSet::new();
        original
            .chain(variants)
            .chain(hypotheticals)
            .filter(|s| {
                let key = normalize(&s.text);
                !key.is_empty() && seen.insert(key)
            })
            .take(candidate_limit)
            .collect()
    }

    /// Retrieve and merge candidates, ordered by distance then fragment id.
    ///
    /// Failed or timed-out sub-queries are dropped; if nothing succeeds the
    /// pool is empty.
    pub async fn retrieve(
        &self,
        query: &Query,
        expansion: &QueryExpansion,
        candidate_limit: usize,
    ) -> Vec<Candidate> {
        let sub_queries = Self::sub_queries(query, expansion, candidate_limit);
        if sub_queries.is_empty() {
            return Vec::new();
        }

        let per_query = (candidate_limit / sub_queries.len()).max(1);
        let filter = query.document_filter.as_deref();

        debug!(
            "Issuing {} sub-queries, {} results each",
            sub_queries.len(),
            per_query
        );

        let searches = sub_queries.iter().map(|sub| async move {
            let outcome = tokio::time::timeout(
                self.search_timeout,
                self.store.search(&sub.text, per_query, filter),
            )
            .await
            .unwrap_or_else(|_| {
                Err(RagError::timeout(
                    "similarity search",
                    self.search_timeout.as_millis() as u64,
                ))
            });
            (sub.kind, outcome)
        });
        let outcomes = join_all(searches).await;

        // Hits in issue order, so equal distances keep the earliest origin.
        let mut hits: Vec<(SubQueryKind, String, f32)> = Vec::new();
        let mut failed = 0;
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(results) => hits.extend(
                    results
                        .into_iter()
                        .filter(|(_, distance)| distance.is_finite())
                        .map(|(id, distance)| (kind, id, distance)),
                ),
                Err(e) => {
                    report(&format!("Sub-query {:?} dropped", kind), &e);
                    failed += 1;
                }
            }
        }

        if failed == sub_queries.len() {
            warn!("All {} sub-queries failed; no candidates", failed);
            return Vec::new();
        }
        if hits.is_empty() {
            return Vec::new();
        }

        let mut ids: Vec<String> = hits
            .iter()
            .map(|(_, id, _)| id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        let fragments = match self.lookup(&ids).await {
            Ok(fragments) => fragments,
            Err(e) => {
                report("Fragment lookup failed", &e);
                return Vec::new();
            }
        };
        let by_id: HashMap<&str, &Arc<Fragment>> =
            fragments.iter().map(|f| (f.id.as_str(), f)).collect();

        let mut merged: HashMap<String, Candidate> = HashMap::new();
        for (kind, id, distance) in hits {
            let Some(fragment) = by_id.get(id.as_str()) else {
                continue;
            };
            merged
                .entry(id)
                .and_modify(|c| c.merge_hit(kind, distance))
                .or_insert_with(|| Candidate::new(Arc::clone(fragment), kind, distance));
        }

        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.fragment.id.cmp(&b.fragment.id))
        });
        candidates.truncate(candidate_limit);

        debug!(
            "Merged {} candidates from {} sub-queries ({} failed)",
            candidates.len(),
            sub_queries.len(),
            failed
        );
        candidates
    }

    /// Resolve fragment ids under the same deadline as a search.
    async fn lookup(&self, ids: &[String]) -> docqa_core::Result<Vec<Arc<Fragment>>> {
        tokio::time::timeout(self.search_timeout, self.store.get_fragments(ids))
            .await
            .unwrap_or_else(|_| {
                Err(RagError::timeout(
                    "fragment lookup",
                    self.search_timeout.as_millis() as u64,
                ))
            })
    }
}
