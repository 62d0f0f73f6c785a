/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: mailrank.toml (in working directory)
/// 3. Environment variables: prefixed MAILRANK_, nested with `__`
///    (e.g., MAILRANK_LOG_LEVEL=debug, MAILRANK_VECTOR__BASE_URL=http://chroma:8000)
///
/// `PipelineConfig` is the per-search stage configuration. The `[pipeline]` table
/// only supplies the default a caller gets from `Config::pipeline`; callers may
/// pass any other `PipelineConfig` to `SearchEngine::search`.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::SearchError;

/// Collections the email assistant expects to find in the vector index.
pub const CLASSIFICATION_COLLECTION: &str = "email_classification";
pub const REPLY_TEMPLATE_COLLECTION: &str = "reply_templates";
pub const IMPORTANCE_COLLECTION: &str = "email_importance";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector: VectorConfig,

    /// Named pairwise scorers. `PipelineConfig.rerank.scorer` picks one by name.
    #[serde(default = "default_rerankers")]
    pub rerankers: Vec<RerankerConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rerankers() -> Vec<RerankerConfig> {
    vec![RerankerConfig::default()]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            embedding: EmbeddingConfig::default(),
            vector: VectorConfig::default(),
            rerankers: default_rerankers(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: MAILRANK_LOG_LEVEL=debug overrides log_level in mailrank.toml
    pub fn load() -> Result<Config, SearchError> {
        Self::figment()
            .extract()
            .map_err(|e| SearchError::Config(format!("Failed to load config: {}", e)))
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("mailrank.toml"))
            .merge(Env::prefixed("MAILRANK_").split("__"))
    }
}

/// Embedder selection. `provider` is "local" (fastembed) or "openai" (any
/// OpenAI-compatible embeddings endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Local model name. The multilingual MiniLM handles Korean and English mail.
    #[serde(default = "default_local_model")]
    pub local_model: String,

    /// Directory where fastembed caches model weights
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,
}

fn default_embedding_provider() -> String {
    "local".to_string()
}

fn default_local_model() -> String {
    "paraphrase-multilingual-MiniLM-L12-v2".to_string()
}

fn default_cache_dir() -> String {
    dirs::cache_dir()
        .map(|d| d.join("mailrank").join("models"))
        .unwrap_or_else(|| std::path::PathBuf::from(".fastembed_cache"))
        .to_string_lossy()
        .into_owned()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_embedding_provider(),
            local_model: default_local_model(),
            cache_dir: default_cache_dir(),
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            openai_api_key: None,
        }
    }
}

/// Connection settings for the external Chroma vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_vector_base_url")]
    pub base_url: String,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Collections that must exist for `SearchEngine::is_ready` to report true
    #[serde(default = "default_required_collections")]
    pub required_collections: Vec<String>,
}

fn default_vector_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_tenant() -> String {
    "default_tenant".to_string()
}

fn default_database() -> String {
    "default_database".to_string()
}

fn default_required_collections() -> Vec<String> {
    vec![
        CLASSIFICATION_COLLECTION.to_string(),
        REPLY_TEMPLATE_COLLECTION.to_string(),
        IMPORTANCE_COLLECTION.to_string(),
    ]
}

impl Default for VectorConfig {
    fn default() -> Self {
        VectorConfig {
            base_url: default_vector_base_url(),
            tenant: default_tenant(),
            database: default_database(),
            required_collections: default_required_collections(),
        }
    }
}

/// One named pairwise scorer. `provider` is "local" (fastembed cross-encoder)
/// or "http" (Jina/Cohere-style `/rerank` endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_name")]
    pub name: String,

    #[serde(default = "default_reranker_provider")]
    pub provider: String,

    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Base URL for the http provider (e.g., "https://api.jina.ai/v1")
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_reranker_name() -> String {
    "default".to_string()
}

fn default_reranker_provider() -> String {
    "local".to_string()
}

fn default_reranker_model() -> String {
    "bge-reranker-v2-m3".to_string()
}

impl Default for RerankerConfig {
    fn default() -> Self {
        RerankerConfig {
            name: default_reranker_name(),
            provider: default_reranker_provider(),
            model: default_reranker_model(),
            base_url: None,
            api_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-search pipeline configuration
// ---------------------------------------------------------------------------

/// Which retrieval stages run and with what parameters.
///
/// Immutable once built; validate with [`PipelineConfig::validate`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of results returned to the caller. Must be >= 1.
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    #[serde(default)]
    pub relevance_filter: RelevanceFilterConfig,

    #[serde(default)]
    pub hybrid: HybridConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub mmr: MmrConfig,

    /// Deadline for the embed + knn lookup, in milliseconds
    #[serde(default = "default_vector_timeout_ms")]
    pub vector_timeout_ms: u64,
}

fn default_final_top_k() -> usize {
    5
}

fn default_vector_timeout_ms() -> u64 {
    5_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            final_top_k: default_final_top_k(),
            relevance_filter: RelevanceFilterConfig::default(),
            hybrid: HybridConfig::default(),
            rerank: RerankConfig::default(),
            mmr: MmrConfig::default(),
            vector_timeout_ms: default_vector_timeout_ms(),
        }
    }
}

/// Distance-threshold filter. There is deliberately no default threshold:
/// distances depend on the embedding model and must be calibrated per deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevanceFilterConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum accepted raw vector distance (inclusive)
    #[serde(default)]
    pub distance_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
}

fn default_true() -> bool {
    true
}

fn default_vector_weight() -> f64 {
    0.7
}

fn default_lexical_weight() -> f64 {
    0.3
}

impl Default for HybridConfig {
    fn default() -> Self {
        HybridConfig {
            enabled: true,
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of candidates sent to the pairwise scorer
    #[serde(default = "default_rerank_pool_size")]
    pub pool_size: usize,

    /// Name of the registered pairwise scorer (see `Config::rerankers`)
    #[serde(default = "default_reranker_name")]
    pub scorer: String,

    #[serde(default = "default_rerank_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rerank_pool_size() -> usize {
    20
}

fn default_rerank_timeout_ms() -> u64 {
    2_000
}

impl Default for RerankConfig {
    fn default() -> Self {
        RerankConfig {
            enabled: false,
            pool_size: default_rerank_pool_size(),
            scorer: default_reranker_name(),
            timeout_ms: default_rerank_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmrConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Relevance vs diversity trade-off: 1.0 = pure relevance, 0.0 = pure diversity
    #[serde(default = "default_lambda")]
    pub lambda: f64,

    /// Maximum number of candidates entering MMR selection
    #[serde(default = "default_mmr_pool")]
    pub candidate_pool: usize,
}

fn default_lambda() -> f64 {
    0.7
}

fn default_mmr_pool() -> usize {
    20
}

impl Default for MmrConfig {
    fn default() -> Self {
        MmrConfig {
            enabled: false,
            lambda: default_lambda(),
            candidate_pool: default_mmr_pool(),
        }
    }
}

impl PipelineConfig {
    /// Check the invariants every stage relies on.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.final_top_k == 0 {
            return Err(SearchError::invalid_config("final_top_k", "must be at least 1"));
        }
        if self.relevance_filter.enabled {
            match self.relevance_filter.distance_threshold {
                None => {
                    return Err(SearchError::invalid_config(
                        "relevance_filter.distance_threshold",
                        "required when the relevance filter is enabled; calibrate it for the embedding model in use",
                    ))
                }
                Some(t) if !t.is_finite() || t < 0.0 => {
                    return Err(SearchError::invalid_config(
                        "relevance_filter.distance_threshold",
                        "must be a finite, non-negative distance",
                    ))
                }
                Some(_) => {}
            }
        }
        if self.hybrid.enabled {
            let weights = [self.hybrid.vector_weight, self.hybrid.lexical_weight];
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(SearchError::invalid_config("hybrid", "weights must be finite and non-negative"));
            }
            let sum = self.hybrid.vector_weight + self.hybrid.lexical_weight;
            if (sum - 1.0).abs() > 1e-6 {
                tracing::debug!(sum, "hybrid weights do not sum to 1.0");
            }
        }
        if self.rerank.enabled && self.rerank.pool_size == 0 {
            return Err(SearchError::invalid_config("rerank.pool_size", "must be at least 1"));
        }
        if self.mmr.enabled && !(0.0..=1.0).contains(&self.mmr.lambda) {
            return Err(SearchError::invalid_config("mmr.lambda", "must be within [0, 1]"));
        }
        Ok(())
    }

    /// How many candidates the downstream stages want to see.
    ///
    /// The vector index is over-fetched at twice this when hybrid fusion runs.
    pub fn candidate_target(&self) -> usize {
        let mut target = self.final_top_k;
        if self.rerank.enabled {
            target = target.max(self.rerank.pool_size);
        }
        if self.mmr.enabled {
            target = target.max(self.mmr.candidate_pool);
        }
        target
    }

    /// Number of candidates the stage after reranking consumes.
    pub fn downstream_count(&self) -> usize {
        if self.mmr.enabled {
            self.mmr.candidate_pool.max(self.final_top_k)
        } else {
            self.final_top_k
        }
    }

    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank.timeout_ms)
    }

    /// Every stage off: raw vector ranking truncated to `final_top_k`.
    pub fn vector_only(final_top_k: usize) -> Self {
        PipelineConfig {
            final_top_k,
            relevance_filter: RelevanceFilterConfig::default(),
            hybrid: HybridConfig {
                enabled: false,
                ..HybridConfig::default()
            },
            rerank: RerankConfig::default(),
            mmr: MmrConfig::default(),
            vector_timeout_ms: default_vector_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.vector.base_url, "http://localhost:8000");
        assert_eq!(config.vector.required_collections.len(), 3);
        assert_eq!(config.rerankers.len(), 1);
        assert_eq!(config.embedding.provider, "local");
    }

    #[test]
    fn test_pipeline_defaults_are_valid() {
        let pipeline = PipelineConfig::default();
        assert!(pipeline.validate().is_ok());
        assert!(pipeline.hybrid.enabled);
        assert!(!pipeline.relevance_filter.enabled);
        assert_eq!(pipeline.relevance_filter.distance_threshold, None);
    }

    #[test]
    fn test_filter_without_threshold_is_rejected() {
        let mut pipeline = PipelineConfig::default();
        pipeline.relevance_filter.enabled = true;
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("distance_threshold"));

        pipeline.relevance_filter.distance_threshold = Some(10.0);
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_zero_top_k_is_rejected() {
        let pipeline = PipelineConfig::vector_only(0);
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_lambda_out_of_range_is_rejected() {
        let mut pipeline = PipelineConfig::default();
        pipeline.mmr.enabled = true;
        pipeline.mmr.lambda = 1.5;
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_unbalanced_weights_are_allowed() {
        let mut pipeline = PipelineConfig::default();
        pipeline.hybrid.vector_weight = 1.0;
        pipeline.hybrid.lexical_weight = 1.0;
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_non_finite_weights_are_rejected() {
        let mut pipeline = PipelineConfig::default();
        pipeline.hybrid.enabled = true;
        pipeline.hybrid.lexical_weight = f64::NAN;
        assert!(matches!(pipeline.validate(), Err(SearchError::InvalidConfig { .. })));

        pipeline.hybrid.lexical_weight = 0.3;
        pipeline.hybrid.vector_weight = f64::INFINITY;
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_candidate_target() {
        let mut pipeline = PipelineConfig::vector_only(3);
        assert_eq!(pipeline.candidate_target(), 3);
        pipeline.rerank.enabled = true;
        pipeline.rerank.pool_size = 10;
        assert_eq!(pipeline.candidate_target(), 10);
        pipeline.mmr.enabled = true;
        pipeline.mmr.candidate_pool = 15;
        assert_eq!(pipeline.candidate_target(), 15);
        assert_eq!(pipeline.downstream_count(), 15);
    }

    #[test]
    fn test_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "mailrank.toml",
                r#"
                log_level = "debug"

                [pipeline]
                final_top_k = 3

                [pipeline.relevance_filter]
                enabled = true
                distance_threshold = 10.0
                "#,
            )?;
            jail.set_env("MAILRANK_VECTOR__BASE_URL", "http://chroma:8000");

            let config = Config::load().expect("config should load");
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.vector.base_url, "http://chroma:8000");
            assert_eq!(config.pipeline.final_top_k, 3);
            assert_eq!(config.pipeline.relevance_filter.distance_threshold, Some(10.0));
            assert!(config.pipeline.hybrid.enabled);
            Ok(())
        });
    }
}
