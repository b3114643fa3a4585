//! Collaborator interfaces consumed by the retrieval core.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Fragment, Query, QueryExpansion};

/// Embedding-similarity store.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Nearest-neighbour search for a text.
    ///
    /// Returns `(fragment_id, distance)` pairs ordered by ascending distance.
    /// When `document_filter` is set only that document's fragments are
    /// considered.
    async fn search(
        &self,
        text: &str,
        limit: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<(String, f32)>>;

    /// Resolve fragment identifiers. Unknown identifiers are skipped.
    async fn get_fragments(&self, ids: &[String]) -> Result<Vec<Arc<Fragment>>>;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Language-generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a completion for a structured prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Query classification and expansion.
///
/// Implementations never fail: an unavailable or misbehaving backend yields a
/// degraded expansion instead.
#[async_trait]
pub trait Expander: Send + Sync {
    async fn expand(&self, query: &Query, stats: &dyn CorpusStats) -> QueryExpansion;
}

/// Corpus-level term statistics.
pub trait CorpusStats: Send + Sync {
    /// Number of fragments in the corpus.
    fn corpus_size(&self) -> usize;

    /// Number of fragments containing the (normalised) term.
    ///
    /// Terms are compared in plural-folded form, so "periods" and "period"
    /// share one count.
    fn document_frequency(&self, term: &str) -> usize;
}

/// Statistics provider for when nothing is known about the corpus.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorpusStats;

impl CorpusStats for NoCorpusStats {
    fn corpus_size(&self) -> usize {
        0
    }

    fn document_frequency(&self, _term: &str) -> usize {
        0
    }
}
