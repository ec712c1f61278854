//! TOML configuration for the application (`tdx.toml`).
//!
//! Cutover state (modes, tenant overrides, debug-override gate) is *not*
//! part of this file — it is environment-driven and parsed once at startup
//! by [`tender_index_core::cutover::CutoverConfig::from_env`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of fused results to return.
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Candidates requested from each index before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    /// The RRF constant `k` in `1 / (k + rank)`.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Deadline for each sub-query (lexical, vector, query embedding).
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            rrf_k: default_rrf_k(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_top_k() -> i64 {
    12
}
fn default_candidate_k() -> i64 {
    80
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_query_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
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
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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
pub struct ShadowConfig {
    /// Detached shadow executions are abandoned after this long.
    #[serde(default = "default_shadow_timeout_secs")]
    pub timeout_secs: u64,
    /// Similarity below this flags a shadow diff as significant.
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: f64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shadow_timeout_secs(),
            diff_threshold: default_diff_threshold(),
        }
    }
}

fn default_shadow_timeout_secs() -> u64 {
    15
}
fn default_diff_threshold() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    if !(0.0..=1.0).contains(&config.shadow.diff_threshold) {
        anyhow::bail!("shadow.diff_threshold must be in [0.0, 1.0]");
    }

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
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
