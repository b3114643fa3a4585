//! Configuration types for the docqa pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::types::{QueryType, Signal};

/// Allowed drift of a weight vector's sum from 1.0.
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Main configuration for the docqa pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocqaConfig {
    /// Retrieval pool and result sizing.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query expansion configuration.
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Hybrid scoring configuration.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Generation collaborator configuration.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Upper bound on the merged candidate pool.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Number of fragments in the final result.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Diversity cap: fragments admitted per source document.
    #[serde(default = "default_max_per_source")]
    pub max_per_source: usize,

    /// Deadline for a single similarity search, in milliseconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            top_k: 7,
            max_per_source: 3,
            search_timeout_ms: 5000,
        }
    }
}

impl RetrievalConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

/// Query expansion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Use the generation collaborator (rule-based expansion otherwise).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deadline for the generation call, in milliseconds.
    #[serde(default = "default_expansion_timeout")]
    pub timeout_ms: u64,

    /// Maximum semantic variants kept.
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,

    /// Maximum concept terms kept.
    #[serde(default = "default_max_concepts")]
    pub max_concepts: usize,

    /// Maximum hypothetical answers kept.
    #[serde(default = "default_max_hypothetical")]
    pub max_hypothetical: usize,

    /// Maximum context hints kept.
    #[serde(default = "default_max_context_hints")]
    pub max_context_hints: usize,

    /// Extra synonym entries merged over the built-in table.
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
            max_variants: 8,
            max_concepts: 12,
            max_hypothetical: 3,
            max_context_hints: 6,
            synonyms: BTreeMap::new(),
        }
    }
}

impl ExpansionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Hybrid scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Term-frequency saturation constant for the rarity-weighted match.
    #[serde(default = "default_bm25_k")]
    pub bm25_k: f32,

    /// Fragment tokens considered by the sequence similarity.
    #[serde(default = "default_fuzzy_max_tokens")]
    pub fuzzy_max_tokens: usize,

    /// Lower edge of the preferred fragment length band (characters).
    #[serde(default = "default_length_min")]
    pub length_min_chars: usize,

    /// Upper edge of the preferred fragment length band (characters).
    #[serde(default = "default_length_max")]
    pub length_max_chars: usize,

    /// Signal weights per query type.
    #[serde(default)]
    pub weights: WeightTable,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            bm25_k: 1.2,
            fuzzy_max_tokens: 256,
            length_min_chars: 300,
            length_max_chars: 1200,
            weights: WeightTable::default(),
        }
    }
}

/// Generation collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model name.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    /// HTTP request timeout, in milliseconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: 0.2,
            max_tokens: 1024,
            timeout_ms: 30_000,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector dimension of the hashing embedder.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

/// Weights over the nine signals; a valid vector sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
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

/// Definition queries: semantic similarity and concept coverage dominate.
const DEFINITION_WEIGHTS: SignalWeights = SignalWeights {
    semantic: 0.30,
    lexical: 0.12,
    hypothetical: 0.08,
    concept: 0.25,
    exclusion: 0.02,
    context_hint: 0.08,
    multi_query: 0.08,
    length: 0.03,
    metadata: 0.04,
};

/// Exclusion queries: semantic similarity and negation markers dominate.
const EXCLUSION_WEIGHTS: SignalWeights = SignalWeights {
    semantic: 0.30,
    lexical: 0.10,
    hypothetical: 0.08,
    concept: 0.10,
    exclusion: 0.25,
    context_hint: 0.06,
    multi_query: 0.06,
    length: 0.02,
    metadata: 0.03,
};

/// Coverage queries: balanced semantic, lexical, concepts and hypotheticals.
const COVERAGE_WEIGHTS: SignalWeights = SignalWeights {
    semantic: 0.24,
    lexical: 0.18,
    hypothetical: 0.16,
    concept: 0.18,
    exclusion: 0.06,
    context_hint: 0.06,
    multi_query: 0.06,
    length: 0.03,
    metadata: 0.03,
};

const GENERAL_WEIGHTS: SignalWeights = SignalWeights {
    semantic: 0.25,
    lexical: 0.18,
    hypothetical: 0.12,
    concept: 0.12,
    exclusion: 0.05,
    context_hint: 0.08,
    multi_query: 0.10,
    length: 0.05,
    metadata: 0.05,
};

impl SignalWeights {
    /// All-zero vector, useful as a struct-update base.
    pub fn zero() -> Self {
        Self {
            semantic: 0.0,
            lexical: 0.0,
            hypothetical: 0.0,
            concept: 0.0,
            exclusion: 0.0,
            context_hint: 0.0,
            multi_query: 0.0,
            length: 0.0,
            metadata: 0.0,
        }
    }

    /// Built-in vector for a query type.
    pub fn builtin(query_type: QueryType) -> Self {
        match query_type {
            QueryType::Definition => DEFINITION_WEIGHTS,
            QueryType::Exclusion => EXCLUSION_WEIGHTS,
            QueryType::Coverage => COVERAGE_WEIGHTS,
            QueryType::General => GENERAL_WEIGHTS,
        }
    }

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

    pub fn sum(&self) -> f32 {
        Signal::ALL.iter().map(|s| self.get(*s)).sum()
    }

    fn validate(&self, label: &str) -> Result<()> {
        for signal in Signal::ALL {
            let w = self.get(signal);
            if !w.is_finite() || w < 0.0 {
                return Err(RagError::config(format!(
                    "weight {}.{} must be a non-negative number, got {}",
                    label,
                    signal.name(),
                    w
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RagError::config(format!(
                "weights for {} sum to {:.4}, expected 1.0",
                label, sum
            )));
        }
        Ok(())
    }
}

/// Immutable mapping from query type to weight vector.
///
/// Serialized as a table keyed by query-type label; unknown labels are
/// rejected when the config is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, SignalWeights>",
    into = "BTreeMap<String, SignalWeights>"
)]
pub struct WeightTable {
    entries: BTreeMap<QueryType, SignalWeights>,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            entries: QueryType::ALL
                .iter()
                .map(|qt| (*qt, SignalWeights::builtin(*qt)))
                .collect(),
        }
    }
}

impl WeightTable {
    /// Build a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (QueryType, SignalWeights)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Weight vector for a query type, falling back to `general`.
    pub fn weights_for(&self, query_type: QueryType) -> &SignalWeights {
        self.entries
            .get(&query_type)
            .or_else(|| self.entries.get(&QueryType::General))
            .unwrap_or(&GENERAL_WEIGHTS)
    }

    /// Every query type must be present and every vector must sum to 1.0.
    pub fn validate(&self) -> Result<()> {
        for qt in QueryType::ALL {
            let weights = self.entries.get(&qt).ok_or_else(|| {
                RagError::config(format!("missing weight vector for query type {}", qt))
            })?;
            weights.validate(qt.as_str())?;
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<String, SignalWeights>> for WeightTable {
    type Error = RagError;

    /// Entries given in the file replace the built-in vector for that type.
    fn try_from(raw: BTreeMap<String, SignalWeights>) -> Result<Self> {
        let mut table = Self::default();
        for (label, weights) in raw {
            table.entries.insert(label.parse::<QueryType>()?, weights);
        }
        Ok(table)
    }
}

impl From<WeightTable> for BTreeMap<String, SignalWeights> {
    fn from(table: WeightTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(qt, w)| (qt.as_str().to_string(), w))
            .collect()
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_candidate_limit() -> usize {
    50
}

fn default_top_k() -> usize {
    7
}

fn default_max_per_source() -> usize {
    3
}

fn default_search_timeout() -> u64 {
    5000
}

fn default_expansion_timeout() -> u64 {
    10_000
}

fn default_max_variants() -> usize {
    8
}

fn default_max_concepts() -> usize {
    12
}

fn default_max_hypothetical() -> usize {
    3
}

fn default_max_context_hints() -> usize {
    6
}

fn default_bm25_k() -> f32 {
    1.2
}

fn default_fuzzy_max_tokens() -> usize {
    256
}

fn default_length_min() -> usize {
    300
}

fn default_length_max() -> usize {
    1200
}

fn default_llm_endpoint() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_max_tokens() -> usize {
    1024
}

fn default_llm_timeout() -> u64 {
    30_000
}

fn default_dimension() -> usize {
    384
}

impl DocqaConfig {
    /// Load and validate configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("docqa").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("docqa.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.top_k == 0 {
            return Err(RagError::config("retrieval.top_k must be >= 1"));
        }
        if r.max_per_source == 0 {
            return Err(RagError::config("retrieval.max_per_source must be >= 1"));
        }
        if r.candidate_limit == 0 {
            return Err(RagError::config("retrieval.candidate_limit must be >= 1"));
        }
        if r.search_timeout_ms == 0 {
            return Err(RagError::config("retrieval.search_timeout_ms must be > 0"));
        }
        if self.expansion.timeout_ms == 0 {
            return Err(RagError::config("expansion.timeout_ms must be > 0"));
        }
        if self.llm.timeout_ms == 0 {
            return Err(RagError::config("llm.timeout_ms must be > 0"));
        }

        let s = &self.scoring;
        if !(s.bm25_k.is_finite() && s.bm25_k > 0.0) {
            return Err(RagError::config("scoring.bm25_k must be > 0"));
        }
        if s.length_min_chars >= s.length_max_chars {
            return Err(RagError::config(
                "scoring.length_min_chars must be below scoring.length_max_chars",
            ));
        }
        s.weights.validate()?;

        if self.embedding.dimension == 0 {
            return Err(RagError::config("embedding.dimension must be >= 1"));
        }
        Ok(())
    }
}
