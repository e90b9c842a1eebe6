use std::sync::Arc;
use std::time::Duration;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::config::service::LlmConfig;
use crate::core::errors::ApiError;

/// Wraps a provider with model selection and a bounded retry policy.
///
/// Every call gets a hard timeout from the underlying HTTP client;
/// transient upstream failures are retried with exponential backoff.
/// Quota exhaustion and request errors fail immediately.
#[derive(Clone)]
pub struct LlmService {
    provider: Arc<dyn LlmProvider>,
    chat_model: String,
    embedding_model: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<String, ApiError> {
        let mut attempt = 0;
        loop {
            match self.provider.chat(request.clone(), &self.chat_model).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.retry_backoff * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "LLM chat attempt {}/{} failed, retrying in {:?}: {}",
                        attempt,
                        self.max_retries,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut attempt = 0;
        loop {
            match self.provider.embed(inputs, &self.embedding_model).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.retry_backoff * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "LLM embed attempt {}/{} failed, retrying in {:?}: {}",
                        attempt,
                        self.max_retries,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
