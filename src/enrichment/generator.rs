//! Text and speech generation backends.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::http;

/// Produces AI content for papers.
///
/// Implementations must be safe to share across tasks; the server and the
/// batch worker hold them behind a `Box<dyn ContentGenerator>`.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Model recorded on text artifacts.
    fn text_model(&self) -> &str;
    /// Model recorded on speech artifacts.
    fn speech_model(&self) -> &str;
    /// Single-turn chat completion.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
    /// Encoded audio for `text`.
    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>>;
}

/// Rejects every request. Used when `[enrichment] provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl ContentGenerator for DisabledGenerator {
    fn text_model(&self) -> &str {
        "disabled"
    }
    fn speech_model(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        bail!("Content generation is disabled")
    }
    async fn synthesize_speech(&self, _text: &str) -> Result<Vec<u8>> {
        bail!("Content generation is disabled")
    }
}

/// OpenAI-compatible chat completions and `/audio/speech`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    chat_model: String,
    tts_model: String,
    voice: String,
    max_retries: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            tts_model: config.tts_model.clone(),
            voice: config.voice.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn text_model(&self) -> &str {
        &self.chat_model
    }

    fn speech_model(&self) -> &str {
        &self.tts_model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let response = http::send_with_retry("OpenAI chat", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }

    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.api_base);
        let body = serde_json::json!({
            "model": self.tts_model,
            "voice": self.voice,
            "input": text,
            "response_format": "mp3",
        });

        let response = http::send_with_retry("OpenAI speech", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or(false);

        if is_json {
            let json: serde_json::Value = response.json().await?;
            return decode_audio_json(&json);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            anyhow::anyhow!("Invalid chat response: missing choices[0].message.content")
        })?;
    let content = content.trim();
    if content.is_empty() {
        bail!("Invalid chat response: empty content");
    }
    Ok(content.to_string())
}

/// Some compatible gateways wrap audio as `{"audio": "<base64>"}`.
fn decode_audio_json(json: &serde_json::Value) -> Result<Vec<u8>> {
    let encoded = json
        .get("audio")
        .or_else(|| json.get("data"))
        .and_then(|a| a.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid speech response: no audio field"))?;
    Ok(STANDARD.decode(encoded)?)
}

/// Build the generator named by `[enrichment] provider`.
pub fn create_generator(config: &EnrichmentConfig) -> Result<Box<dyn ContentGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown enrichment provider: {}", other),
    }
}
