use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::paths::AppPaths;
use crate::core::errors::ApiError;

/// LLM connection and sampling settings.
///
/// Two temperature profiles are carried: a low one for manual QA answers
/// and a higher one for the sales agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub qa_temperature: f64,
    pub agent_temperature: f64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            qa_temperature: 0.2,
            agent_temperature: 0.5,
            request_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Retrieval settings for the manual QA pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Token budget for the rolling conversation summary.
    pub memory_token_budget: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
            memory_token_budget: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Manual documents to ingest, relative to the project root.
    pub manual_files: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            manual_files: vec!["data/charge_manual.docx".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesConfig {
    /// Sales CSV, relative to the project root.
    pub csv_path: String,
}

impl Default for SalesConfig {
    fn default() -> Self {
        Self {
            csv_path: "data/sales_data.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on reasoning/tool steps per turn.
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_steps: 6 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub rag: RagConfig,
    pub ingest: IngestConfig,
    pub sales: SalesConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.rag.chunk_size == 0 {
            return Err(ApiError::BadRequest(
                "rag.chunk_size must be positive".to_string(),
            ));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ApiError::BadRequest(
                "rag.chunk_overlap must be smaller than rag.chunk_size".to_string(),
            ));
        }
        if self.rag.top_k == 0 {
            return Err(ApiError::BadRequest(
                "rag.top_k must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("llm.qa_temperature", self.llm.qa_temperature),
            ("llm.agent_temperature", self.llm.agent_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ApiError::BadRequest(format!(
                    "{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }
        if self.agent.max_steps == 0 {
            return Err(ApiError::BadRequest(
                "agent.max_steps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("MISECHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    /// Loads `config.yml`, falling back to built-in defaults when the file
    /// or individual sections are absent.
    pub fn load(&self) -> Result<AppConfig, ApiError> {
        let path = self.config_path();
        let config = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(ApiError::internal)?;
            serde_yaml::from_str::<AppConfig>(&contents).map_err(|e| {
                ApiError::BadRequest(format!("invalid config {}: {}", path.display(), e))
            })?
        } else {
            AppConfig::default()
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert!((config.llm.qa_temperature - 0.2).abs() < f64::EPSILON);
        assert!((config.llm.agent_temperature - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let mut config = AppConfig::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: AppConfig =
            serde_yaml::from_str("llm:\n  chat_model: gpt-4o\n").expect("valid yaml");
        assert_eq!(config.llm.chat_model, "gpt-4o");
        assert_eq!(config.rag.top_k, 4);
        assert_eq!(config.agent.max_steps, 6);
    }
}
