//! Feature-hashing embedder.

use async_trait::async_trait;
use tracing::debug;

use docqa_core::text::{content_tokens, fold_plural};
use docqa_core::{Embedder, RagError, Result};

/// Default vector dimension.
const DEFAULT_DIMENSION: usize = 384;

/// Relative weight of a token bigram feature.
const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-features embedder.
///
/// Each content token (with a trailing plural "s" stripped) and each adjacent
/// token pair is hashed with BLAKE3 to a bucket and a sign. The vector is L2
/// normalised; text without content tokens embeds to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder with the given dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::embedding("dimension must be >= 1"));
        }
        Ok(Self { dimension })
    }

    /// Embed one text synchronously.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let tokens: Vec<String> = content_tokens(text).iter().map(|t| fold_plural(t)).collect();
        let mut embedding = vec![0.0f32; self.dimension];

        for token in &tokens {
            self.accumulate(&mut embedding, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let feature = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut embedding, feature.as_bytes(), BIGRAM_WEIGHT);
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }

    fn accumulate(&self, embedding: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();

        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };

        embedding[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding {} documents", texts.len());
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
