
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::answer::{GenerativeModel, ModelTier};
use crate::config::{GenerationConfig, OllamaConfig};
use crate::embeddings::EmbeddingProvider;
use crate::{RagError, Result};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Blocking HTTP client for a single Ollama server.
///
/// Requests are never retried; the first failure is reported to the caller.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .map_err(|e| RagError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Verify the server is reachable and every named model is installed
    #[inline]
    pub fn health_check(&self, models: &[&str]) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let available = self.list_models()?;
        for model in models {
            if !available.iter().any(|m| model_matches(&m.name, model)) {
                let names: Vec<&str> = available.iter().map(|m| m.name.as_str()).collect();
                warn!("Model {} not found. Available models: {:?}", model, names);
                return Err(RagError::InvalidConfiguration(format!(
                    "Model '{}' is not available. Available models: {:?}",
                    model, names
                )));
            }
        }

        info!("Health check passed for Ollama server at {}", self.base_url);
        Ok(())
    }

    /// List all installed models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text = self.call(RagError::EmbeddingProvider, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let models: ModelsResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::EmbeddingProvider(format!("Failed to parse models response: {}", e))
        })?;

        debug!("Found {} models", models.models.len());
        Ok(models.models)
    }

    /// Embed all texts in one `/api/embed` request
    #[inline]
    pub fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("/api/embed")?;
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            RagError::EmbeddingProvider(format!("Failed to serialize embedding request: {}", e))
        })?;

        debug!(
            "Requesting {} embeddings from {} with model {}",
            texts.len(),
            url,
            self.embedding_model
        );

        let response_text = self.call(RagError::EmbeddingProvider, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::EmbeddingProvider(format!("Failed to parse embedding response: {}", e))
        })?;

        Ok(response.embeddings)
    }

    /// Run a single non-streaming completion with `model`
    #[inline]
    pub fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = self.endpoint("/api/generate")?;
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            RagError::Generation(format!("Failed to serialize generation request: {}", e))
        })?;

        debug!(
            "Requesting completion from {} with model {} (prompt length: {})",
            url,
            model,
            prompt.len()
        );

        let response_text = self.call(RagError::Generation, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::Generation(format!("Failed to parse generation response: {}", e))
        })?;

        Ok(response.response)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RagError::InvalidConfiguration(format!("Failed to build URL: {}", e)))
    }

    fn call<F>(&self, wrap: fn(String) -> RagError, request_fn: F) -> Result<String>
    where
        F: FnOnce() -> std::result::Result<String, ureq::Error>,
    {
        request_fn().map_err(|error| {
            let message = match &error {
                ureq::Error::StatusCode(status) => {
                    format!("Ollama returned HTTP {}", status)
                }
                ureq::Error::ConnectionFailed
                | ureq::Error::HostNotFound
                | ureq::Error::Timeout(_)
                | ureq::Error::Io(_) => {
                    format!("Transport error talking to {}: {}", self.base_url, error)
                }
                _ => format!("Request to {} failed: {}", self.base_url, error),
            };
            warn!("{}", message);
            wrap(message)
        })
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Ollama lists models with an explicit tag, so an untagged name means `:latest`
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted || (!wanted.contains(':') && installed == format!("{}:latest", wanted))
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_texts(&texts))
            .await
            .map_err(|e| RagError::EmbeddingProvider(format!("Embedding task failed: {}", e)))?
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

/// Generative capability backed by Ollama, mapping each tier to a configured model
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    fast_model: String,
    intelligent_model: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(client: OllamaClient, config: &GenerationConfig) -> Self {
        Self {
            client,
            fast_model: config.fast_model.clone(),
            intelligent_model: config.intelligent_model.clone(),
        }
    }

    #[inline]
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Intelligent => &self.intelligent_model,
        }
    }
}

#[async_trait]
impl GenerativeModel for OllamaGenerator {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<String> {
        let client = self.client.clone();
        let model = self.model_for(tier).to_string();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || client.generate(&model, &prompt))
            .await
            .map_err(|e| RagError::Generation(format!("Generation task failed: {}", e)))?
    }
}
