//! In-memory similarity store over a corpus snapshot.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use docqa_core::text::{fold_plural, folded_content_tokens};
use docqa_core::{CorpusStats, Embedder, Fragment, RagError, Result, SimilarityStore};

/// Read-only store holding fragments, their embeddings and term statistics.
///
/// Built once at startup and shared behind an `Arc`; every method takes
/// `&self`, so concurrent queries need no locking.
pub struct MemoryStore {
    /// Fragments with their embedding moved out into `embeddings`.
    fragments: Vec<Arc<Fragment>>,

    /// One vector per fragment, same order as `fragments`.
    embeddings: Vec<Vec<f32>>,

    /// Fragment id to position.
    by_id: HashMap<String, usize>,

    /// Plural-folded content token to number of fragments containing it.
    doc_freq: HashMap<String, usize>,

    /// Embeds query texts at search time.
    embedder: Arc<dyn Embedder>,
}

impl MemoryStore {
    /// Build a store, embedding every fragment that arrives without a vector.
    pub async fn new(fragments: Vec<Fragment>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(fragments.len());
        for (idx, fragment) in fragments.iter().enumerate() {
            if by_id.insert(fragment.id.clone(), idx).is_some() {
                return Err(RagError::invalid_argument(format!(
                    "duplicate fragment id: {}",
                    fragment.id
                )));
            }
        }

        let missing: Vec<usize> = fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| f.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut computed = if missing.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<&str> = missing
                .iter()
                .map(|i| fragments[*i].content.as_str())
                .collect();
            embedder.embed_documents(&texts).await?
        };
        if computed.len() != missing.len() {
            return Err(RagError::embedding(format!(
                "embedder returned {} vectors for {} texts",
                computed.len(),
                missing.len()
            )));
        }
        debug!("Embedded {} fragments without stored vectors", missing.len());

        let dimension = embedder.dimension();
        let mut stored = Vec::with_capacity(fragments.len());
        let mut embeddings = Vec::with_capacity(fragments.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        // Walk in reverse so `computed.pop()` lines up with `missing`.
        for mut fragment in fragments.into_iter().rev() {
            let embedding = match fragment.embedding.take() {
                Some(e) => e,
                None => computed
                    .pop()
                    .ok_or_else(|| RagError::internal("embedding bookkeeping mismatch"))?,
            };
            if embedding.len() != dimension {
                return Err(RagError::embedding(format!(
                    "fragment {} has dimension {}, expected {}",
                    fragment.id,
                    embedding.len(),
                    dimension
                )));
            }

            let terms: HashSet<String> = folded_content_tokens(&fragment.content).into_iter().collect();
            for term in terms {
                *doc_freq.entry(term).or_default() += 1;
            }

            stored.push(Arc::new(fragment));
            embeddings.push(embedding);
        }
        stored.reverse();
        embeddings.reverse();

        info!(
            "Memory store ready: {} fragments, {} distinct terms",
            stored.len(),
            doc_freq.len()
        );

        Ok(Self {
            fragments: stored,
            embeddings,
            by_id,
            doc_freq,
            embedder,
        })
    }

    /// Load a JSON array of fragments.
    pub async fn from_json_file(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading corpus snapshot from {:?}", path);

        let content = tokio::fs::read_to_string(path).await?;
        let fragments: Vec<Fragment> = serde_json::from_str(&content)?;
        Self::new(fragments, embedder).await
    }

    /// Number of fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Distinct document ids, sorted.
    pub fn documents(&self) -> Vec<String> {
        let mut docs: Vec<String> = self
            .fragments
            .iter()
            .map(|f| f.doc_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        docs.sort();
        docs
    }
}

/// Cosine distance in [0, 2]; a zero vector is treated as orthogonal.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (na * nb)).clamp(0.0, 2.0)
}

#[async_trait]
impl SimilarityStore for MemoryStore {
    async fn search(
        &self,
        text: &str,
        limit: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<(String, f32)>> {
        if limit == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed_query(text).await?;
        if query.iter().all(|x| *x == 0.0) {
            debug!("Query {:?} has no embeddable terms", text);
            return Ok(Vec::new());
        }

        let mut hits: Vec<(String, f32)> = self
            .fragments
            .iter()
            .zip(&self.embeddings)
            .filter(|(f, _)| document_filter.map_or(true, |d| f.doc_id == d))
            .map(|(f, e)| (f.id.clone(), cosine_distance(&query, e)))
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);

        Ok(hits)
    }

    async fn get_fragments(&self, ids: &[String]) -> Result<Vec<Arc<Fragment>>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|idx| Arc::clone(&self.fragments[*idx]))
            .collect())
    }
}

impl CorpusStats for MemoryStore {
    fn corpus_size(&self) -> usize {
        self.fragments.len()
    }

    fn document_frequency(&self, term: &str) -> usize {
        self.doc_freq.get(&fold_plural(term)).copied().unwrap_or(0)
    }
}
