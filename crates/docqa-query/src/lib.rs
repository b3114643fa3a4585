//! docqa-query - Retrieval and reranking engine
//!
//! Selects the fragments that best support an answer to a question:
//!
//! - Query classification and expansion, generation-backed or rule-based
//! - Multi-query retrieval against a similarity store with concurrent fan-out
//! - Nine-signal hybrid scoring with per-query-type weights
//! - Diversity-aware reranking with a per-document cap
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_query::{expander_for, RetrievalEngine};
//! use docqa_core::{DocqaConfig, Query};
//! use std::sync::Arc;
//!
//! let config = DocqaConfig::default();
//! let engine = RetrievalEngine::new(&config, store.clone(), expander_for(&config, None))?
//!     .with_corpus_stats(store);
//! let result = engine.search(&Query::new("What is covered for a newborn baby?")).await;
//! ```

mod engine;
mod expand;
mod lexical;
mod rerank;
mod retrieve;
mod score;

pub use engine::{expander_for, RetrievalEngine};
pub use expand::{classify, parse_expansion, LlmExpander, RuleBasedExpander, SynonymTable};
pub use lexical::{LexicalScorer, LexicalScores, PoolStats, Terms};
pub use rerank::{DiversityReranker, Reranked};
pub use retrieve::MultiQueryRetriever;
pub use score::{distance_to_similarity, HybridScorer, NEGATION_MARKERS};

// Re-export for convenience
pub use docqa_core::{QueryExpansion, QueryType, RankedFragment, RankedResult};
