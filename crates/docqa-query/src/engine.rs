//! Retrieval pipeline: expand, retrieve, score, rerank.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use docqa_core::{
    CorpusStats, DocqaConfig, Expander, Generator, NoCorpusStats, Query, QueryExpansion,
    QueryType, RankedResult, Result, RetrievalConfig, SimilarityStore,
};

use crate::expand::{LlmExpander, RuleBasedExpander, SynonymTable};
use crate::lexical::PoolStats;
use crate::rerank::DiversityReranker;
use crate::retrieve::MultiQueryRetriever;
use crate::score::HybridScorer;

/// Pick the expander for a configuration.
///
/// The generation-backed expander is used when expansion is enabled and a
/// generator is available; otherwise the rule-based one.
pub fn expander_for(config: &DocqaConfig, generator: Option<Arc<dyn Generator>>) -> Arc<dyn Expander> {
    let synonyms = Arc::new(SynonymTable::from_config(&config.expansion));
    if let Some(generator) = generator.filter(|_| config.expansion.enabled) {
        return Arc::new(LlmExpander::new(
            generator,
            synonyms,
            config.expansion.clone(),
        ));
    }
    Arc::new(RuleBasedExpander::new(synonyms, config.expansion.clone()))
}

/// Question → ranked fragments.
///
/// Stateless per request; one engine can serve concurrent searches.
pub struct RetrievalEngine {
    expander: Arc<dyn Expander>,
    retriever: MultiQueryRetriever,
    scorer: HybridScorer,
    reranker: DiversityReranker,
    stats: Option<Arc<dyn CorpusStats>>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    /// Create an engine. The configuration is validated here so that no
    /// configuration problem can surface at query time.
    pub fn new(
        config: &DocqaConfig,
        store: Arc<dyn SimilarityStore>,
        expander: Arc<dyn Expander>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            expander,
            retriever: MultiQueryRetriever::new(store, config.retrieval.search_timeout()),
            scorer: HybridScorer::new(&config.scoring),
            reranker: DiversityReranker::new(
                config.retrieval.top_k,
                config.retrieval.max_per_source,
            ),
            stats: None,
            config: config.retrieval.clone(),
        })
    }

    /// Use corpus-wide term statistics instead of approximating them from
    /// each candidate pool.
    pub fn with_corpus_stats(mut self, stats: Arc<dyn CorpusStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Expand a query without retrieving.
    pub async fn expand(&self, query: &Query) -> QueryExpansion {
        match &self.stats {
            Some(stats) => self.expander.expand(query, stats.as_ref()).await,
            None => self.expander.expand(query, &NoCorpusStats).await,
        }
    }

    /// Run the full pipeline. Never fails: collaborator problems degrade the
    /// result, and an empty result means no relevant context was found.
    pub async fn search(&self, query: &Query) -> RankedResult {
        let start = Instant::now();

        if query.is_blank() {
            debug!("Blank query, nothing to search");
            return RankedResult::empty(&query.text, QueryType::General);
        }

        info!("Searching for: {:?}", query.text);

        let expansion = self.expand(query).await;
        let result = self.search_with_expansion(query, &expansion).await;

        info!(
            "Search completed in {}ms, returned {} results (type={})",
            start.elapsed().as_millis(),
            result.len(),
            result.query_type
        );
        result
    }

    /// Retrieve, score and rerank with a fixed expansion.
    ///
    /// Given the same store contents and expansion the output is identical
    /// across calls.
    pub async fn search_with_expansion(
        &self,
        query: &Query,
        expansion: &QueryExpansion,
    ) -> RankedResult {
        if query.is_blank() {
            return RankedResult::empty(&query.text, QueryType::General);
        }

        let candidates = self
            .retriever
            .retrieve(query, expansion, self.config.candidate_limit)
            .await;

        if candidates.is_empty() {
            info!("No candidates for {:?}", query.text);
            return RankedResult::empty(&query.text, expansion.query_type);
        }

        let candidates_considered = candidates.len();
        let pool_stats;
        let stats: &dyn CorpusStats = match &self.stats {
            Some(stats) => stats.as_ref(),
            None => {
                pool_stats =
                    PoolStats::from_texts(candidates.iter().map(|c| c.fragment.content.as_str()));
                &pool_stats
            }
        };

        let scored = self.scorer.score_all(candidates, query, expansion, stats);
        let reranked = self.reranker.rerank(scored);

        debug!(
            "Scored {} candidates, selected {} ({} backfilled)",
            candidates_considered,
            reranked.results.len(),
            reranked.backfilled
        );

        RankedResult {
            query: query.text.clone(),
            query_type: expansion.query_type,
            diversity_shortfall: reranked.diversity_shortfall(),
            results: reranked.results,
            candidates_considered,
        }
    }
}
