//! TOML configuration parsing and validation.
//!
//! A single file (default `config/pfeed.toml`) drives every command:
//!
//! ```toml
//! [db]
//! path = "./data/pfeed.sqlite"
//!
//! [arxiv]
//! categories = ["cs.CL", "cs.LG"]
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [ranking]
//! final_limit = 50
//! personalized_ratio = 0.8
//!
//! [enrichment]
//! provider = "openai"
//! chat_model = "gpt-4o-mini"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```
//!
//! API keys are never read from this file; providers look them up in the
//! environment (`OPENAI_API_KEY`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_arxiv_max_results")]
    pub max_results: usize,
    #[serde(default = "default_arxiv_page_size")]
    pub page_size: usize,
    /// Pause between paged API calls, as asked for by the arXiv API terms.
    #[serde(default = "default_arxiv_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_arxiv_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            categories: default_arxiv_categories(),
            max_results: default_arxiv_max_results(),
            page_size: default_arxiv_page_size(),
            page_delay_ms: default_arxiv_delay_ms(),
            base_url: default_arxiv_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_arxiv_categories() -> Vec<String> {
    vec!["cs.CL".to_string(), "cs.LG".to_string(), "cs.AI".to_string()]
}
fn default_arxiv_max_results() -> usize {
    200
}
fn default_arxiv_page_size() -> usize {
    100
}
fn default_arxiv_delay_ms() -> u64 {
    3000
}
fn default_arxiv_base_url() -> String {
    "https://export.arxiv.org/api/query".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// API base URL override (OpenAI-compatible or Ollama).
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
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Knobs for the recommendation pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct RankingConfig {
    /// Only papers published within this many days are candidates.
    #[serde(default = "default_candidate_days")]
    pub candidate_days: i64,
    /// Upper bound on candidates scored per user (newest first).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Size of the returned window.
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Share of the window filled from personalized scores; the rest is exploration.
    #[serde(default = "default_personalized_ratio")]
    pub personalized_ratio: f64,
    /// Positive interactions (with embeddings) needed before a profile is used.
    #[serde(default = "default_min_interactions")]
    pub min_interactions: usize,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life_days: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            candidate_days: default_candidate_days(),
            pool_size: default_pool_size(),
            final_limit: default_final_limit(),
            personalized_ratio: default_personalized_ratio(),
            min_interactions: default_min_interactions(),
            recency_weight: default_recency_weight(),
            recency_half_life_days: default_recency_half_life(),
        }
    }
}

fn default_candidate_days() -> i64 {
    30
}
fn default_pool_size() -> usize {
    500
}
fn default_final_limit() -> usize {
    50
}
fn default_personalized_ratio() -> f64 {
    0.8
}
fn default_min_interactions() -> usize {
    3
}
fn default_recency_weight() -> f64 {
    0.1
}
fn default_recency_half_life() -> f64 {
    7.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_base: default_api_base(),
            chat_model: default_chat_model(),
            tts_model: default_tts_model(),
            voice: default_voice(),
            default_language: default_language(),
            artifacts_dir: default_artifacts_dir(),
            max_attempts: default_max_attempts(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_voice() -> String {
    "alloy".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("./data/artifacts")
}
fn default_max_attempts() -> i64 {
    3
}
fn default_generation_timeout() -> u64 {
    120
}

impl EnrichmentConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate ranking
    let ranking = &config.ranking;
    if ranking.final_limit < 1 {
        anyhow::bail!("ranking.final_limit must be >= 1");
    }
    if ranking.pool_size < ranking.final_limit {
        anyhow::bail!("ranking.pool_size must be >= ranking.final_limit");
    }
    if !(0.0..=1.0).contains(&ranking.personalized_ratio) {
        anyhow::bail!("ranking.personalized_ratio must be in [0.0, 1.0]");
    }
    if ranking.recency_weight < 0.0 {
        anyhow::bail!("ranking.recency_weight must be >= 0.0");
    }
    if ranking.recency_half_life_days <= 0.0 {
        anyhow::bail!("ranking.recency_half_life_days must be > 0.0");
    }
    if ranking.candidate_days < 1 {
        anyhow::bail!("ranking.candidate_days must be >= 1");
    }

    if config.arxiv.page_size == 0 {
        anyhow::bail!("arxiv.page_size must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.provider != "local"
            && (config.embedding.dims.is_none() || config.embedding.dims == Some(0))
        {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider != "local" && config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.enrichment.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown enrichment provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.enrichment.max_attempts < 1 {
        anyhow::bail!("enrichment.max_attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/test.sqlite"

[server]
bind = "127.0.0.1:8080"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.ranking.final_limit, 50);
        assert_eq!(cfg.ranking.min_interactions, 3);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.enrichment.is_enabled());
        assert_eq!(cfg.arxiv.categories.len(), 3);
    }

    #[test]
    fn rejects_ratio_out_of_range() {
        let text = format!("{}\n[ranking]\npersonalized_ratio = 1.5\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("personalized_ratio"));
    }

    #[test]
    fn rejects_pool_smaller_than_window() {
        let text = format!("{}\n[ranking]\npool_size = 10\nfinal_limit = 20\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let text = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn rejects_unknown_enrichment_provider() {
        let text = format!("{}\n[enrichment]\nprovider = \"carrier-pigeon\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }
}
