
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EmbeddingModel, ModelConfiguration, ModelHandle, ModelLoader};
use crate::RagError;
use crate::config::{ConfigError, OllamaConfig};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DIMENSION_SAMPLE: &str = "dimension sample";

/// Blocking client for the Ollama embedding API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
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
    pub fn new(base_url: Url, model: impl Into<String>, batch_size: u32) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Self {
            base_url,
            model: model.into(),
            batch_size: batch_size.max(1),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubled after every further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the server answers and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        if !models.iter().any(|m| m.name == self.model) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            anyhow::bail!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available
            );
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;
        debug!("Found {} models", models.models.len());
        Ok(models.models)
    }

    /// Embed `texts` in request batches of at most `batch_size`
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let vectors = self
                .embed_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            embeddings.extend(vectors);
        }

        debug!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;
        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            );
        }
        Ok(response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            let error = match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => error,
            };

            match &error {
                ureq::Error::StatusCode(status) if *status >= 500 => {
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                }
                ureq::Error::StatusCode(status) => {
                    warn!("Client error (status {}), not retrying", status);
                    anyhow::bail!("Client error: HTTP {}", status);
                }
                ureq::Error::ConnectionFailed
                | ureq::Error::HostNotFound
                | ureq::Error::Timeout(_)
                | ureq::Error::Io(_) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                }
                _ => anyhow::bail!("Non-retryable error: {}", error),
            }

            last_error = Some(anyhow::anyhow!("Request error: {}", error));

            if attempt < self.retry_attempts {
                let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// Model handle backed by an Ollama server
#[derive(Debug)]
pub struct OllamaModel {
    client: OllamaClient,
    dimension: usize,
}

impl OllamaModel {
    async fn run_blocking(&self, texts: Vec<String>) -> crate::Result<Vec<Vec<f32>>> {
        let client = self.client.clone();
        let vectors = tokio::task::spawn_blocking(move || client.embed(&texts))
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| RagError::Embedding(format!("{e:#}")))?;

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingModel for OllamaModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.run_blocking(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("server returned no embedding".to_string()))
    }

    async fn batch_encode(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_blocking(texts.to_vec()).await
    }
}

/// Loads models by name from an Ollama server.
///
/// `hub_repo_id` is the Ollama model name. Loading runs the health check and
/// embeds a sample text to learn the model's dimension.
#[derive(Debug, Clone)]
pub struct OllamaLoader {
    base_url: Url,
    batch_size: u32,
    retry_attempts: u32,
    backoff: Duration,
}

impl OllamaLoader {
    #[inline]
    pub fn new(base_url: Url, batch_size: u32) -> Self {
        Self {
            base_url,
            batch_size,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    #[inline]
    pub fn from_config(config: &OllamaConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.url()?, config.batch_size))
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn client(&self, model: &str) -> OllamaClient {
        OllamaClient::new(self.base_url.clone(), model, self.batch_size)
            .with_retry_attempts(self.retry_attempts)
            .with_backoff(self.backoff)
    }
}

#[async_trait]
impl ModelLoader for OllamaLoader {
    async fn load(&self, config: &ModelConfiguration) -> crate::Result<ModelHandle> {
        if let Some(path) = &config.local_path {
            debug!(
                "Ollama serves models by name; ignoring local path {}",
                path.display()
            );
        }

        let client = self.client(&config.hub_repo_id);
        let sample_client = client.clone();
        let dimension = tokio::task::spawn_blocking(move || -> Result<usize> {
            sample_client.health_check()?;
            let sample = sample_client.embed(&[DIMENSION_SAMPLE.to_string()])?;
            sample
                .first()
                .map(Vec::len)
                .filter(|&len| len > 0)
                .context("Server returned an empty sample embedding")
        })
        .await
        .map_err(|e| RagError::ModelLoad(format!("load task failed: {e}")))?
        .map_err(|e| RagError::ModelLoad(format!("{}: {e:#}", config.hub_repo_id)))?;

        info!(
            "Ollama model {} ready ({} dimensions)",
            client.model(),
            dimension
        );
        Ok(Arc::new(OllamaModel { client, dimension }))
    }
}
