//! TOML configuration parsing and startup validation.
//!
//! The whole configuration is loaded once, validated once, and then passed
//! explicitly into each component. Nothing reads ambient global state.
//!
//! ```toml
//! [db]
//! path = "./data/crag.sqlite"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 100
//!
//! [retrieval]
//! max_results = 5
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [llm]
//! model = "claude-sonnet-4-20250514"
//! ```

use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk, excluding the provenance prefix.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters carried over from the end of the previous chunk.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Kept signed so that a negative value in the file is caught by
    /// validation instead of failing deserialization with a vaguer message.
    #[serde(default = "default_max_results")]
    pub max_results: i64,
    /// Minimum cosine similarity for a fuzzy course-name match.
    #[serde(default = "default_course_match_floor")]
    pub course_match_floor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            course_match_floor: default_course_match_floor(),
        }
    }
}

impl RetrievalConfig {
    /// The validated result limit.
    pub fn result_limit(&self) -> Result<ResultLimit, ConfigError> {
        ResultLimit::new(self.max_results)
    }
}

fn default_max_results() -> i64 {
    5
}
fn default_course_match_floor() -> f32 {
    0.2
}

/// A strictly positive search result limit.
///
/// The only way to obtain one is through [`ResultLimit::new`], so a zero or
/// negative limit can never reach the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLimit(NonZeroUsize);

impl ResultLimit {
    pub fn new(value: i64) -> Result<Self, ConfigError> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(ResultLimit)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "retrieval.max_results must be > 0 (got {}); a zero limit makes every content search return nothing",
                    value
                ))
            })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for rate-limited or 5xx responses before giving up.
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

fn default_llm_provider() -> String {
    "anthropic".to_string()
}
fn default_llm_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_max_tokens() -> u32 {
    800
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestrationConfig {
    /// How many model responses may request tools before the final,
    /// tools-free call is forced.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Send tool declarations again on follow-up calls within the bound.
    #[serde(default)]
    pub tools_on_followup: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            tools_on_followup: false,
        }
    }
}

fn default_max_tool_rounds() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Number of user/assistant pairs kept per session.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

fn default_max_history() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Check every invariant that must hold before any component is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(invalid("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(invalid("chunking.chunk_overlap must be < chunking.chunk_size"));
        }

        self.retrieval.result_limit()?;

        if !(-1.0..=1.0).contains(&self.retrieval.course_match_floor) {
            return Err(invalid("retrieval.course_match_floor must be in [-1.0, 1.0]"));
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    )));
                }
                if matches!(self.embedding.dims, None | Some(0)) {
                    return Err(ConfigError::Invalid(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    )));
                }
            }
            "local" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
                    other
                )))
            }
        }
        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size must be > 0"));
        }

        if self.llm.provider != "anthropic" {
            return Err(ConfigError::Invalid(format!(
                "Unknown llm provider: '{}'. Must be anthropic.",
                self.llm.provider
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature must be in [0.0, 1.0]"));
        }
        if self.llm.max_tokens == 0 {
            return Err(invalid("llm.max_tokens must be > 0"));
        }

        if self.orchestration.max_tool_rounds == 0 {
            return Err(invalid("orchestration.max_tool_rounds must be >= 1"));
        }
        if self.session.max_history == 0 {
            return Err(invalid("session.max_history must be >= 1"));
        }
        if self.ingest.include_globs.is_empty() {
            return Err(invalid("ingest.include_globs must not be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Read, parse, and validate the configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}
