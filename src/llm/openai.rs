use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

/// Provider for the hosted OpenAI-compatible API.
///
/// Both chat completions and embeddings go through the same host; the
/// model is chosen per call.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn classify_failure(status: reqwest::StatusCode, body: &str) -> ApiError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || body.contains("insufficient_quota")
        {
            return ApiError::Quota(format!("{}: {}", status, body));
        }
        if status.is_client_error() {
            return ApiError::BadRequest(format!("llm request rejected: {}: {}", status, body));
        }
        ApiError::Upstream(format!("{}: {}", status, body))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &text));
        }

        let payload: Value = res.json().await.map_err(|e| ApiError::Upstream(e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Err(ApiError::Upstream(
                "chat completion contained no content".to_string(),
            ));
        }

        Ok(content)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &text));
        }

        let payload: Value = res.json().await.map_err(|e| ApiError::Upstream(e.to_string()))?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(ApiError::Upstream(format!(
                "embedding response had {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            )));
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_are_detected_from_body() {
        let err = OpenAiProvider::classify_failure(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"insufficient_quota"}}"#,
        );
        assert!(matches!(err, ApiError::Quota(_)));
    }

    #[test]
    fn server_errors_are_retryable_upstream() {
        let err =
            OpenAiProvider::classify_failure(reqwest::StatusCode::BAD_GATEWAY, "bad gateway");
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = OpenAiProvider::classify_failure(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            "bad payload",
        );
        assert!(!err.is_retryable());
    }
}
