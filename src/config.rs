use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Route;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai`, `azure`, or `disabled`.
    pub provider: String,
    /// Base URL. Defaults to the public OpenAI API; required for `azure`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_azure_api_version")]
    pub api_version: String,
    /// Model (or Azure deployment) used for classification.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    /// Model (or Azure deployment) used for grounded answer generation.
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_classifier_temperature")]
    pub classifier_temperature: f32,
    /// Some reasoning models reject a temperature parameter, so this is opt-in.
    #[serde(default)]
    pub generation_temperature: Option<f32>,
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_azure_api_version() -> String {
    "2024-12-01-preview".to_string()
}
fn default_classifier_model() -> String {
    "gpt-4o".to_string()
}
fn default_generation_model() -> String {
    "o3-mini".to_string()
}
fn default_classifier_temperature() -> f32 {
    0.1
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `azure`, `ollama`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_api_version")]
    pub api_version: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_llm_key_env(),
            api_version: default_embedding_api_version(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_api_version() -> String {
    "2024-02-01".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `azure` or `memory`.
    pub backend: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
    /// JSON document file loaded by the `memory` backend.
    #[serde(default)]
    pub documents_path: Option<PathBuf>,
}

fn default_search_key_env() -> String {
    "AZURE_SEARCH_KEY".to_string()
}
fn default_search_api_version() -> String {
    "2024-07-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Documents returned by a structured filter search.
    #[serde(default = "default_basic_top")]
    pub basic_top: usize,
    /// Documents requested from the hybrid query.
    #[serde(default = "default_advanced_top")]
    pub advanced_top: usize,
    /// Nearest neighbours requested per vector field.
    #[serde(default = "default_k_nearest")]
    pub k_nearest_neighbors: usize,
    /// Passages forwarded to answer generation.
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,
    #[serde(default = "default_vector_fields")]
    pub vector_fields: Vec<String>,
    /// Weight of vector similarity in the in-memory hybrid merge.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            basic_top: default_basic_top(),
            advanced_top: default_advanced_top(),
            k_nearest_neighbors: default_k_nearest(),
            max_passages: default_max_passages(),
            vector_fields: default_vector_fields(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_basic_top() -> usize {
    50
}
fn default_advanced_top() -> usize {
    15
}
fn default_k_nearest() -> usize {
    30
}
fn default_max_passages() -> usize {
    10
}
fn default_vector_fields() -> Vec<String> {
    vec![
        "KeyFactsVector".to_string(),
        "DocumentTextVector".to_string(),
        "CommentaryVector".to_string(),
    ]
}
fn default_hybrid_alpha() -> f64 {
    0.6
}

/// Per-call budgets, in seconds. Each external call kind is independent.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_classification_secs")]
    pub classification_secs: u64,
    #[serde(default = "default_embedding_secs")]
    pub embedding_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classification_secs: default_classification_secs(),
            embedding_secs: default_embedding_secs(),
            search_secs: default_search_secs(),
            generation_secs: default_generation_secs(),
        }
    }
}

/// Upper bound on any single timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

fn default_classification_secs() -> u64 {
    30
}
fn default_embedding_secs() -> u64 {
    15
}
fn default_search_secs() -> u64 {
    20
}
fn default_generation_secs() -> u64 {
    120
}

impl TimeoutConfig {
    pub fn classification(&self) -> Duration {
        Duration::from_secs(self.classification_secs)
    }
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }
    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }
    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    /// Overall execution budget for one route: the sum of the calls it makes.
    pub fn for_route(&self, route: Route) -> Duration {
        match route {
            Route::BasicSearch => self.search(),
            Route::AdvancedSearch => self
                .embedding()
                .saturating_add(self.search())
                .saturating_add(self.generation()),
            Route::Statistical | Route::Clarification => self.search(),
        }
    }

    /// Slowest single call; used as the HTTP client ceiling.
    pub fn longest(&self) -> Duration {
        [
            self.classification_secs,
            self.embedding_secs,
            self.search_secs,
            self.generation_secs,
        ]
        .into_iter()
        .max()
        .map(Duration::from_secs)
        .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_classification_attempts")]
    pub classification_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_low_confidence")]
    pub low_confidence_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            classification_attempts: default_classification_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            low_confidence_threshold: default_low_confidence(),
        }
    }
}

fn default_classification_attempts() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_low_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct TracingConfig {
    #[serde(default = "default_tracing_enabled")]
    pub enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: default_tracing_enabled(),
        }
    }
}

fn default_tracing_enabled() -> bool {
    true
}

/// Display value → index code tables for structured filters.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct VocabularyConfig {
    #[serde(default)]
    pub programs: HashMap<String, String>,
    #[serde(default)]
    pub industries: HashMap<String, String>,
    #[serde(default)]
    pub document_types: HashMap<String, String>,
}

impl Config {
    /// A config with every backend disabled or in-memory. No network access.
    pub fn minimal() -> Self {
        Self {
            llm: LlmConfig {
                provider: "disabled".to_string(),
                url: None,
                api_key_env: default_llm_key_env(),
                api_version: default_azure_api_version(),
                classifier_model: default_classifier_model(),
                generation_model: default_generation_model(),
                classifier_temperature: default_classifier_temperature(),
                generation_temperature: None,
            },
            embedding: EmbeddingConfig::default(),
            search: SearchConfig {
                backend: "memory".to_string(),
                endpoint: None,
                index: None,
                api_key_env: default_search_key_env(),
                api_version: default_search_api_version(),
                documents_path: None,
            },
            retrieval: RetrievalConfig::default(),
            timeouts: TimeoutConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            tracing: TracingConfig::default(),
            vocabulary: VocabularyConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        "azure" => {
            if config.llm.url.is_none() {
                anyhow::bail!("llm.url must be set when provider is 'azure'");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.classifier_temperature) {
        anyhow::bail!("llm.classifier_temperature must be in [0.0, 2.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        "azure" => {
            if config.embedding.url.is_none() {
                anyhow::bail!("embedding.url must be set when provider is 'azure'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, azure, or ollama.",
            other
        ),
    }

    match config.search.backend.as_str() {
        "memory" => {}
        "azure" => {
            if config.search.endpoint.is_none() || config.search.index.is_none() {
                anyhow::bail!("search.endpoint and search.index must be set for the azure backend");
            }
        }
        other => anyhow::bail!(
            "Unknown search backend: '{}'. Must be memory or azure.",
            other
        ),
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.basic_top == 0 || r.advanced_top == 0 {
        anyhow::bail!("retrieval.basic_top and retrieval.advanced_top must be >= 1");
    }
    if r.max_passages == 0 {
        anyhow::bail!("retrieval.max_passages must be >= 1");
    }
    if r.vector_fields.is_empty() {
        anyhow::bail!("retrieval.vector_fields must name at least one field");
    }
    if !(0.0..=1.0).contains(&r.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    let t = &config.timeouts;
    if [
        t.classification_secs,
        t.embedding_secs,
        t.search_secs,
        t.generation_secs,
    ]
    .contains(&0)
    {
        anyhow::bail!("timeouts must all be > 0 seconds");
    }
    if t.longest() > Duration::from_secs(MAX_TIMEOUT_SECS) {
        anyhow::bail!("timeouts must each be at most {} seconds", MAX_TIMEOUT_SECS);
    }

    if config.orchestrator.classification_attempts == 0 {
        anyhow::bail!("orchestrator.classification_attempts must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.orchestrator.low_confidence_threshold) {
        anyhow::bail!("orchestrator.low_confidence_threshold must be in [0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("esearch.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[llm]
provider = "openai"

[search]
backend = "memory"
documents_path = "docs.json"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.classifier_model, "gpt-4o");
        assert_eq!(config.retrieval.advanced_top, 15);
        assert_eq!(config.retrieval.k_nearest_neighbors, 30);
        assert_eq!(config.orchestrator.classification_attempts, 2);
        assert_eq!(config.retrieval.vector_fields.len(), 3);
        assert!(config.tracing.enabled);
    }

    #[test]
    fn test_vocabulary_tables() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[llm]
provider = "disabled"

[search]
backend = "memory"

[vocabulary.programs]
"Iran" = "2"
"Cuba" = "3"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.vocabulary.programs.get("Iran").unwrap(), "2");
        assert!(config.vocabulary.industries.is_empty());
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        let mut config = Config::minimal();
        config.llm.provider = "bard".to_string();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("Unknown llm provider"));
    }

    #[test]
    fn test_azure_search_requires_endpoint() {
        let mut config = Config::minimal();
        config.search.backend = "azure".to_string();
        assert!(validate(&config).is_err());
        config.search.endpoint = Some("https://example.search.windows.net".to_string());
        config.search.index = Some("enforcement".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_embedding_requires_model_and_dims() {
        let mut config = Config::minimal();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err());
        config.embedding.model = Some("text-embedding-3-large".to_string());
        config.embedding.dims = Some(3072);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::minimal();
        config.orchestrator.classification_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_route_budgets() {
        let t = TimeoutConfig::default();
        assert_eq!(t.for_route(Route::BasicSearch), Duration::from_secs(20));
        assert_eq!(t.for_route(Route::AdvancedSearch), Duration::from_secs(155));
        assert_eq!(t.longest(), Duration::from_secs(120));
    }

    #[test]
    fn test_route_budget_saturates() {
        let t = TimeoutConfig {
            generation_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(t.for_route(Route::AdvancedSearch), Duration::MAX);
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let mut config = Config::minimal();
        config.timeouts.generation_secs = u64::MAX;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("at most 86400 seconds"), "{}", err);

        config.timeouts.generation_secs = MAX_TIMEOUT_SECS;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_config(Path::new("/nonexistent/esearch.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/esearch.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.search.backend, "azure");
        assert_eq!(config.embedding.dims, Some(3072));
        assert_eq!(config.vocabulary.programs.len(), 2);
    }
}
