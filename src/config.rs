//! Configuration management using figment
//!
//! Loads configuration with this precedence (highest wins):
//! 1. Defaults (hardcoded)
//! 2. TOML file: evidence.toml (in working directory)
//! 3. Environment variables: prefixed EVIDENCE_, nested keys split on `__`
//!    (e.g., EVIDENCE_RETRIEVAL__RRF_K=40, EVIDENCE_LOG_LEVEL=debug)

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::EvidenceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

/// Fan-out limits, fusion parameters and latency budgets for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-branch cap for the direct semantic retrieval
    #[serde(default = "default_limit")]
    pub semantic_limit: usize,

    /// Per-branch cap for each HyDE retrieval
    #[serde(default = "default_limit")]
    pub hyde_limit: usize,

    /// Cap for the lexical retrieval
    #[serde(default = "default_limit")]
    pub keyword_limit: usize,

    /// Final result cap after deduplication
    #[serde(default = "default_limit")]
    pub max_deduplicated: usize,

    /// Number of hypothetical documents to generate (0 disables HyDE)
    #[serde(default = "default_hyde_count")]
    pub hyde_count: usize,

    /// Normalized fused-score cutoff in [0, 1]
    #[serde(default)]
    pub threshold: f64,

    /// Raw cosine-similarity floor handed to the vector retriever
    #[serde(default)]
    pub similarity_floor: f32,

    /// Reciprocal rank fusion constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Sampling temperature for hypothetical document generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    /// Timeout for one retrieval branch (embedding + search)
    #[serde(default = "default_branch_timeout_ms")]
    pub branch_timeout_ms: u64,

    /// Deadline for the whole query; stragglers are cancelled when it passes
    #[serde(default = "default_query_deadline_ms")]
    pub query_deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// "ollama" (default) or "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    #[serde(default = "default_generation_ollama_model")]
    pub ollama_model: String,

    /// Any OpenAI-compatible chat completions endpoint
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_generation_openai_model")]
    pub openai_model: String,

    /// Upper bound on tokens per hypothetical abstract
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama" (default) or "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    #[serde(default = "default_embedding_ollama_model")]
    pub ollama_model: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_embedding_openai_model")]
    pub openai_model: String,

    /// Dimension the configured model produces; must match a vector table
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Number of embeddings kept in the in-client cache (0 disables caching)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// A pgvector table holding document embeddings of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorTable {
    pub dimension: usize,
    pub table: String,
}

/// Location of the pre-built vector and lexical indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_vector_tables")]
    pub vector_tables: Vec<VectorTable>,

    /// Column in every vector table referencing the document
    #[serde(default = "default_document_id_column")]
    pub document_id_column: String,

    #[serde(default = "default_embedding_column")]
    pub embedding_column: String,

    /// Table carrying the full-text search vector
    #[serde(default = "default_documents_table")]
    pub documents_table: String,

    #[serde(default = "default_documents_id_column")]
    pub documents_id_column: String,

    /// tsvector column used for lexical search
    #[serde(default = "default_text_search_column")]
    pub text_search_column: String,

    /// Postgres text search configuration (e.g. "english")
    #[serde(default = "default_text_search_config")]
    pub text_search_config: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_limit() -> usize {
    50
}

fn default_hyde_count() -> usize {
    3
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_temperature() -> f32 {
    0.7
}

fn default_generation_timeout_ms() -> u64 {
    30_000
}

fn default_branch_timeout_ms() -> u64 {
    10_000
}

fn default_query_deadline_ms() -> u64 {
    60_000
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_generation_ollama_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_generation_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_embedding_ollama_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_database_url() -> String {
    "postgres://localhost/evidence".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_vector_tables() -> Vec<VectorTable> {
    vec![
        VectorTable {
            dimension: 768,
            table: "document_embeddings_768".to_string(),
        },
        VectorTable {
            dimension: 1024,
            table: "document_embeddings_1024".to_string(),
        },
    ]
}

fn default_document_id_column() -> String {
    "document_id".to_string()
}

fn default_embedding_column() -> String {
    "embedding".to_string()
}

fn default_documents_table() -> String {
    "documents".to_string()
}

fn default_documents_id_column() -> String {
    "id".to_string()
}

fn default_text_search_column() -> String {
    "search_vector".to_string()
}

fn default_text_search_config() -> String {
    "english".to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            semantic_limit: default_limit(),
            hyde_limit: default_limit(),
            keyword_limit: default_limit(),
            max_deduplicated: default_limit(),
            hyde_count: default_hyde_count(),
            threshold: 0.0,
            similarity_floor: 0.0,
            rrf_k: default_rrf_k(),
            temperature: default_temperature(),
            generation_timeout_ms: default_generation_timeout_ms(),
            branch_timeout_ms: default_branch_timeout_ms(),
            query_deadline_ms: default_query_deadline_ms(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            provider: default_provider(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_generation_ollama_model(),
            openai_base_url: default_openai_base_url(),
            openai_api_key: None,
            openai_model: default_generation_openai_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_provider(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_embedding_ollama_model(),
            openai_base_url: default_openai_base_url(),
            openai_api_key: None,
            openai_model: default_embedding_openai_model(),
            dimension: default_dimension(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            vector_tables: default_vector_tables(),
            document_id_column: default_document_id_column(),
            embedding_column: default_embedding_column(),
            documents_table: default_documents_table(),
            documents_id_column: default_documents_id_column(),
            text_search_column: default_text_search_column(),
            text_search_config: default_text_search_config(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl RetrievalConfig {
    /// Reject values that would break fusion arithmetic or the fan-out.
    pub fn validate(&self) -> Result<(), EvidenceError> {
        for (field, value) in [
            ("retrieval.semantic_limit", self.semantic_limit),
            ("retrieval.hyde_limit", self.hyde_limit),
            ("retrieval.keyword_limit", self.keyword_limit),
            ("retrieval.max_deduplicated", self.max_deduplicated),
        ] {
            if value == 0 {
                return Err(EvidenceError::validation(field, "must be greater than zero"));
            }
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(EvidenceError::validation("retrieval.threshold", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return Err(EvidenceError::validation(
                "retrieval.similarity_floor",
                "must lie in [0, 1]",
            ));
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(EvidenceError::validation("retrieval.rrf_k", "must be a positive number"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(EvidenceError::validation(
                "retrieval.temperature",
                "must be a non-negative number",
            ));
        }
        for (field, value) in [
            ("retrieval.generation_timeout_ms", self.generation_timeout_ms),
            ("retrieval.branch_timeout_ms", self.branch_timeout_ms),
            ("retrieval.query_deadline_ms", self.query_deadline_ms),
        ] {
            if value == 0 {
                return Err(EvidenceError::validation(field, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: EVIDENCE_RETRIEVAL__HYDE_COUNT=0 disables HyDE regardless of evidence.toml
    pub fn load() -> Result<Config, EvidenceError> {
        Self::figment()
            .extract()
            .map_err(|e| EvidenceError::Config(format!("Failed to load config: {}", e)))
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("evidence.toml"))
            .merge(Env::prefixed("EVIDENCE_").split("__"))
    }

    pub fn validate(&self) -> Result<(), EvidenceError> {
        self.retrieval.validate()?;
        if self.embedding.dimension == 0 {
            return Err(EvidenceError::validation(
                "embedding.dimension",
                "must be greater than zero",
            ));
        }
        if !self
            .index
            .vector_tables
            .iter()
            .any(|t| t.dimension == self.embedding.dimension)
        {
            return Err(EvidenceError::validation(
                "index.vector_tables",
                &format!(
                    "no vector table configured for embedding dimension {}",
                    self.embedding.dimension
                ),
            ));
        }
        Ok(())
    }
}
