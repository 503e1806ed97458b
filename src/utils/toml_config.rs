//! TOML-based configuration for the RAG core
//!
//! Every section and field has a default, so an empty file (or no file at all)
//! yields a working local setup: file-backed libsql, in-memory vector index
//! and cache. Secrets are never stored in the file; the config names the
//! environment variable that holds them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure loaded from ares-rag.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub vector: VectorConfig,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub allocator: AllocatorConfig,

    #[serde(default)]
    pub document: DocumentConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local database path, or ":memory:"
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Environment variable for Turso URL (optional cloud config)
    pub turso_url_env: Option<String>,

    /// Environment variable for Turso auth token
    pub turso_token_env: Option<String>,
}

fn default_database_url() -> String {
    "./data/ares-rag.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            turso_url_env: None,
            turso_token_env: None,
        }
    }
}

// ============= Vector Index Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// "memory" or "qdrant"
    #[serde(default = "default_vector_provider")]
    pub provider: String,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable for Qdrant API key
    pub qdrant_api_key_env: Option<String>,

    /// Embedding dimensions, used when creating collections
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_vector_provider() -> String {
    "memory".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_dimensions() -> usize {
    1024
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: None,
            dimensions: default_dimensions(),
        }
    }
}

// ============= Cache Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_max_size")]
    pub max_size_bytes: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_cache_max_size() -> u64 {
    256 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size_bytes: default_cache_max_size(),
            enabled: true,
        }
    }
}

// ============= Embedding Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Environment variable containing the bearer token
    pub api_key_env: Option<String>,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_embedding_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum number of texts per upstream batch request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-v3".to_string()
}

fn default_embedding_timeout() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_embedding_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_batch_size() -> usize {
    10
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: None,
            timeout_secs: default_embedding_timeout(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            cache_ttl_secs: default_embedding_cache_ttl(),
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

// ============= Allocator Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Number of ids reserved per round trip to the sequence table
    #[serde(default = "default_step")]
    pub step: u64,
}

fn default_step() -> u64 {
    100
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
        }
    }
}

// ============= Document Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Sentences per chunk
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Sentences between consecutive chunk starts
    #[serde(default = "default_window_stride")]
    pub window_stride: usize,

    #[serde(default = "default_keywords_top_n")]
    pub keywords_top_n: usize,

    #[serde(default = "default_search_cache_ttl")]
    pub search_cache_ttl_secs: u64,

    #[serde(default = "default_doc_cache_ttl")]
    pub doc_cache_ttl_secs: u64,

    /// Weight of the keyword overlap in the chunk score (0 = vector only)
    #[serde(default)]
    pub keyword_weight: f32,

    /// Drop chunks sharing no keyword with the query
    #[serde(default)]
    pub require_keyword_match: bool,

    /// Attempts for the post-commit vector write
    #[serde(default = "default_vector_retries")]
    pub vector_retries: u32,
}

fn default_window_size() -> usize {
    3
}

fn default_window_stride() -> usize {
    2
}

fn default_keywords_top_n() -> usize {
    5
}

fn default_search_cache_ttl() -> u64 {
    60 * 60
}

fn default_doc_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_vector_retries() -> u32 {
    3
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_stride: default_window_stride(),
            keywords_top_n: default_keywords_top_n(),
            search_cache_ttl_secs: default_search_cache_ttl(),
            doc_cache_ttl_secs: default_doc_cache_ttl(),
            keyword_weight: 0.0,
            require_keyword_match: false,
            vector_retries: default_vector_retries(),
        }
    }
}

impl DocumentConfig {
    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }

    pub fn doc_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.doc_cache_ttl_secs)
    }
}

// ============= Memory Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_ttl_days")]
    pub default_ttl_days: i64,

    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Clamp the recency term to [0, 1]. Off keeps the raw ratio
    #[serde(default)]
    pub clamp_recency: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_memory_ttl_days() -> i64 {
    7
}

fn default_similarity_weight() -> f32 {
    0.6
}

fn default_importance_weight() -> f32 {
    0.3
}

fn default_recency_weight() -> f32 {
    0.1
}

fn default_sweep_interval() -> u64 {
    60 * 60
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: default_memory_ttl_days(),
            similarity_weight: default_similarity_weight(),
            importance_weight: default_importance_weight(),
            recency_weight: default_recency_weight(),
            clamp_recency: false,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl MemoryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl RagConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: RagConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Like [`RagConfig::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(_)) => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Validate value ranges and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        let doc = &self.document;
        if doc.window_size == 0 || doc.window_stride == 0 {
            return Err(ConfigError::ValidationError(
                "document.window_size and document.window_stride must be positive".into(),
            ));
        }
        if doc.window_stride > doc.window_size {
            return Err(ConfigError::ValidationError(format!(
                "document.window_stride ({}) must not exceed document.window_size ({})",
                doc.window_stride, doc.window_size
            )));
        }
        if !(0.0..=1.0).contains(&doc.keyword_weight) {
            return Err(ConfigError::ValidationError(
                "document.keyword_weight must be within [0, 1]".into(),
            ));
        }
        if doc.vector_retries == 0 {
            return Err(ConfigError::ValidationError(
                "document.vector_retries must be at least 1".into(),
            ));
        }

        let emb = &self.embedding;
        if emb.max_concurrency == 0 || emb.max_retries == 0 || emb.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.max_concurrency, max_retries and batch_size must be positive".into(),
            ));
        }

        if self.allocator.step == 0 {
            return Err(ConfigError::ValidationError(
                "allocator.step must be positive".into(),
            ));
        }

        let mem = &self.memory;
        for (name, weight) in [
            ("similarity_weight", mem.similarity_weight),
            ("importance_weight", mem.importance_weight),
            ("recency_weight", mem.recency_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::ValidationError(format!(
                    "memory.{} must be within [0, 1]",
                    name
                )));
            }
        }
        if mem.default_ttl_days <= 0 {
            return Err(ConfigError::ValidationError(
                "memory.default_ttl_days must be positive".into(),
            ));
        }

        match self.vector.provider.as_str() {
            "memory" | "qdrant" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown vector provider: {}",
                    other
                )))
            }
        }

        for env in [
            &self.database.turso_url_env,
            &self.database.turso_token_env,
            &self.vector.qdrant_api_key_env,
            &self.embedding.api_key_env,
        ]
        .into_iter()
        .flatten()
        {
            self.validate_env_var(env)?;
        }

        Ok(())
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        self.resolve_env(name)
            .map(|_| ())
            .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
    }

    /// Resolve an environment variable reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok().filter(|v| !v.is_empty())
    }

    /// Embedding API key, if one is configured
    pub fn embedding_api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.embedding.api_key_env {
            Some(env) => self
                .resolve_env(env)
                .map(Some)
                .ok_or_else(|| ConfigError::MissingEnvVar(env.clone())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: RagConfig = toml::from_str("").expect("Failed to parse config");

        assert_eq!(config.allocator.step, 100);
        assert_eq!(config.document.window_size, 3);
        assert_eq!(config.document.window_stride, 2);
        assert_eq!(config.document.keywords_top_n, 5);
        assert_eq!(config.embedding.max_concurrency, 10);
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.embedding.timeout(), Duration::from_secs(10));
        assert_eq!(config.memory.default_ttl_days, 7);
        assert!(!config.memory.clamp_recency);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[database]
url = ":memory:"

[embedding]
base_url = "http://localhost:8080/v1"
model = "bge-m3"
retry_delay_ms = 5

[memory]
clamp_recency = true
"#;
        let config: RagConfig = toml::from_str(content).expect("Failed to parse config");

        assert_eq!(config.database.url, ":memory:");
        assert_eq!(config.embedding.model, "bge-m3");
        assert_eq!(config.embedding.retry_delay(), Duration::from_millis(5));
        assert_eq!(config.embedding.batch_size, 10);
        assert!(config.memory.clamp_recency);
        assert_eq!(config.vector.provider, "memory");
    }

    #[test]
    fn test_validation_rejects_stride_larger_than_window() {
        let content = r#"
[document]
window_size = 2
window_stride = 3
"#;
        let config: RagConfig = toml::from_str(content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_unknown_provider() {
        let content = r#"
[vector]
provider = "faiss"
"#;
        let config: RagConfig = toml::from_str(content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_missing_env_var() {
        let content = r#"
[embedding]
api_key_env = "ARES_RAG_TEST_UNSET_KEY_9F2C"
"#;
        let config: RagConfig = toml::from_str(content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEnvVar(name)) if name == "ARES_RAG_TEST_UNSET_KEY_9F2C"
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[allocator]\nstep = 10").unwrap();

        let config = RagConfig::load(file.path()).unwrap();
        assert_eq!(config.allocator.step, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let result = RagConfig::load("/nonexistent/ares-rag.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));

        let fallback = RagConfig::load_or_default("/nonexistent/ares-rag.toml").unwrap();
        assert_eq!(fallback.allocator.step, 100);
    }
}
