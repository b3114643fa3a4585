//! docqa-embed - Feature-hashing text embeddings
//!
//! Provides a deterministic [`HashingEmbedder`] that maps content tokens and
//! token bigrams into a fixed number of signed buckets. Texts that share
//! vocabulary end up close in cosine space, which is enough to drive the
//! in-memory similarity store and the pipeline tests without a model file.

mod hashing;

pub use hashing::HashingEmbedder;

// Re-export the Embedder trait for convenience
pub use docqa_core::Embedder;
