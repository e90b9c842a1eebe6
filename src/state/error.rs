use thiserror::Error;

/// Startup failures. All of these are fatal and block serving.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("OPENAI_API_KEY が設定されていません。環境変数をご確認ください。")]
    MissingApiKey,

    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize LLM provider: {0}")]
    Llm(#[source] anyhow::Error),

    #[error("Failed to initialize manual index: {0}")]
    Index(#[source] anyhow::Error),

    #[error("Failed to load sales data: {0}")]
    SalesData(#[source] anyhow::Error),
}
