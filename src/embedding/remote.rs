//! HTTP embedding providers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let Some(model) = config.model.clone() else {
        bail!("embedding.model required for {} provider", provider);
    };
    let Some(dims) = config.dims else {
        bail!("embedding.dims required for {} provider", provider);
    };
    Ok((model, dims))
}

fn build_client(config: &EmbeddingConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn endpoint(config: &EmbeddingConfig, default_base: &str, path: &str) -> String {
    let base = config.url.as_deref().unwrap_or(default_base);
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn check_count(service: &str, expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "{} returned {} embeddings for {} texts",
            service,
            vectors.len(),
            expected
        );
    }
    Ok(vectors)
}

// ============ OpenAI ============

/// OpenAI `/embeddings` or any compatible endpoint. Reads `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: build_client(config)?,
            url: endpoint(config, OPENAI_DEFAULT_URL, "embeddings"),
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddings {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbedding {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// The API may return entries out of order; `index` says where each belongs.
fn into_input_order(resp: OpenAIEmbeddings) -> Vec<Vec<f32>> {
    let mut indexed: Vec<(usize, Vec<f32>)> = resp
        .data
        .into_iter()
        .enumerate()
        .map(|(pos, e)| (e.index.unwrap_or(pos), e.embedding))
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, v)| v).collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = http::send_with_retry("OpenAI embeddings", self.max_retries, || {
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let parsed: OpenAIEmbeddings = response
            .json()
            .await
            .context("Invalid OpenAI embeddings response")?;
        check_count("OpenAI", texts.len(), into_input_order(parsed))
    }
}

// ============ Ollama ============

/// A local Ollama server.
pub struct OllamaProvider {
    client: Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        Ok(Self {
            client: build_client(config)?,
            url: endpoint(config, OLLAMA_DEFAULT_URL, "api/embed"),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddings {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = http::send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&self.url).json(&body)
        })
        .await?;

        let parsed: OllamaEmbeddings = response
            .json()
            .await
            .context("Invalid Ollama embeddings response")?;
        check_count("Ollama", texts.len(), parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_entries_are_put_back_in_input_order() {
        let resp: OpenAIEmbeddings = serde_json::from_value(serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }))
        .unwrap();
        assert_eq!(into_input_order(resp), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_response_shape() {
        let resp: OllamaEmbeddings =
            serde_json::from_value(serde_json::json!({"embeddings": [[0.5, 0.5]]})).unwrap();
        assert_eq!(resp.embeddings, vec![vec![0.5, 0.5]]);
        assert!(serde_json::from_value::<OllamaEmbeddings>(serde_json::json!({})).is_err());
    }

    #[test]
    fn count_mismatch_is_an_error() {
        assert!(check_count("x", 2, vec![vec![1.0]]).is_err());
        assert_eq!(check_count("x", 1, vec![vec![1.0]]).unwrap().len(), 1);
    }

    #[test]
    fn endpoint_honours_url_override() {
        let config = EmbeddingConfig {
            url: Some("http://gpu-box:8000/v1/".to_string()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(
            endpoint(&config, OPENAI_DEFAULT_URL, "embeddings"),
            "http://gpu-box:8000/v1/embeddings"
        );
        assert_eq!(
            endpoint(&EmbeddingConfig::default(), OLLAMA_DEFAULT_URL, "api/embed"),
            "http://localhost:11434/api/embed"
        );
    }

    #[test]
    fn missing_model_is_reported() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            dims: Some(384),
            ..EmbeddingConfig::default()
        };
        assert!(OllamaProvider::new(&config).is_err());
    }
}
