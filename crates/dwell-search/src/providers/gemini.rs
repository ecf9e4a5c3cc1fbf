//! Gemini generation and embedding over the Generative Language REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{EmbeddingProvider, GenerativeProvider};
use crate::config::AiConfig;
use crate::error::{Result, SearchError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| SearchError::provider("gemini", format!("client build failed: {}", e)))
}

/// Parse a response body as JSON, returning a clear error if the server returned HTML.
async fn parse_json_response<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        SearchError::provider(
            provider,
            format!("failed to read response body from {}: {}", endpoint, e),
        )
    })?;
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(SearchError::provider(
            provider,
            format!(
                "{} returned HTML instead of JSON (HTTP {}), service may be down: {}",
                endpoint, status, preview
            ),
        ));
    }
    if !status.is_success() {
        let preview: String = body.chars().take(300).collect();
        return Err(SearchError::provider(
            provider,
            format!("HTTP {} from {}: {}", status, endpoint, preview),
        ));
    }
    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        SearchError::provider(
            provider,
            format!(
                "failed to parse JSON from {} (HTTP {}): {}. Body: {}",
                endpoint, status, e, preview
            ),
        )
    })
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Deserialize)]
struct GenerateCandidate {
    content: Option<GenerateContent>,
}

#[derive(Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>, config: &AiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_key: api_key.into(),
            model: config.generative_model.clone(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", API_BASE, self.model)
    }
}

#[async_trait]
impl GenerativeProvider for GeminiGenerator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, instruction: &str, text: &str, max_tokens: usize) -> Result<String> {
        let request = json!({
            "systemInstruction": {"parts": [{"text": instruction}]},
            "contents": [{
                "role": "user",
                "parts": [{"text": text}]
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": max_tokens,
            }
        });

        let endpoint = self.endpoint();
        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::provider(self.name(), format!("request failed: {}", e)))?;

        let result: GenerateResponse = parse_json_response(self.name(), response, &endpoint).await?;
        extract_text(result)
            .ok_or_else(|| SearchError::provider(self.name(), "no response from Gemini"))
    }

    async fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }
}

fn extract_text(response: GenerateResponse) -> Option<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

/// Embeds text with the first model in the configured list that answers.
/// Once a model works it is tried first on later calls.
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    models: Vec<String>,
    dimension: usize,
    active: AtomicUsize,
}

impl GeminiEmbedder {
    pub fn new(api_key: impl Into<String>, config: &AiConfig) -> Result<Self> {
        if config.embedding_models.is_empty() {
            return Err(SearchError::InvalidConfig(
                "ai.embedding_models must not be empty".to_string(),
            ));
        }
        Ok(Self {
            client: build_client()?,
            api_key: api_key.into(),
            models: config.embedding_models.clone(),
            dimension: config.embedding_dimension,
            active: AtomicUsize::new(0),
        })
    }

    async fn embed_with(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/models/{}:embedContent", API_BASE, model);
        let request = json!({
            "model": format!("models/{}", model),
            "content": {"parts": [{"text": text}]},
            "taskType": "RETRIEVAL_QUERY",
            "outputDimensionality": self.dimension,
        });

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::provider("gemini-embed", format!("request failed: {}", e)))?;

        let result: EmbedResponse = parse_json_response("gemini-embed", response, &endpoint).await?;
        if result.embedding.values.len() != self.dimension {
            return Err(SearchError::provider(
                "gemini-embed",
                format!(
                    "{} returned {} dimensions, expected {}",
                    model,
                    result.embedding.values.len(),
                    self.dimension
                ),
            ));
        }
        Ok(result.embedding.values)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn name(&self) -> &'static str {
        "gemini-embed"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = self.active.load(Ordering::Relaxed);
        let order = (0..self.models.len()).map(|i| (start + i) % self.models.len());

        let mut last_error = None;
        for idx in order {
            let model = &self.models[idx];
            match self.embed_with(model, text).await {
                Ok(values) => {
                    if idx != start {
                        tracing::info!(model = %model, "switched embedding model");
                        self.active.store(idx, Ordering::Relaxed);
                    }
                    return Ok(values);
                }
                Err(e) => {
                    tracing::warn!(model = %model, "embedding model failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SearchError::provider(self.name(), "no embedding models configured")
        }))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }
}
