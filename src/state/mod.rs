use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentRuntime, ToolRegistry};
use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::history::HistoryStore;
use crate::index::{SqliteVectorStore, VectorIndex};
use crate::ingest::Ingestor;
use crate::llm::{LlmProvider, LlmService, OpenAiProvider};
use crate::qa::QaPipeline;
use crate::sales::SalesTable;

pub mod error;

use error::InitializationError;

pub const MANUAL_THREAD: &str = "manual";
pub const SALES_THREAD: &str = "sales";

/// Global application state shared across all routes.
///
/// Built once at startup and passed by reference to request handlers.
/// The manual index and the sales table are loaded here and read-only for
/// the rest of the process lifetime; per-thread conversation memory lives
/// inside the pipelines behind their own locks.
pub struct AppState {
    pub config: AppConfig,
    pub history: HistoryStore,
    pub qa: QaPipeline,
    pub agent: AgentRuntime,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// The steps, in order:
    /// 1. Fail fast when the API key is missing
    /// 2. Load configuration and open the transcript store
    /// 3. Ingest manual documents (missing files are skipped)
    /// 4. Load or build the persisted manual index (fatal when neither
    ///    documents nor a persisted index exist)
    /// 5. Load the sales table (fatal when missing)
    /// 6. Wire the QA pipeline and the sales agent
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(InitializationError::MissingApiKey)?;

        let config = ConfigService::new(paths.clone())
            .load()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let history = HistoryStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;
        history
            .ensure_thread(MANUAL_THREAD, "マニュアル検索")
            .await
            .map_err(|e| InitializationError::History(e.into()))?;
        history
            .ensure_thread(SALES_THREAD, "売上分析")
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let provider = OpenAiProvider::new(
            config.llm.base_url.clone(),
            api_key,
            Duration::from_secs(config.llm.request_timeout_secs),
        )
        .map_err(|e| InitializationError::Llm(e.into()))?;
        tracing::info!(
            "LLM provider: {} (chat={}, embeddings={})",
            provider.name(),
            config.llm.chat_model,
            config.llm.embedding_model
        );
        let llm = LlmService::new(Arc::new(provider), &config.llm);

        let ingestor = Ingestor::new(&config);
        let chunks = ingestor.ingest_all(&paths.project_root, &config.ingest.manual_files);

        let vector_store = SqliteVectorStore::open(paths.data_dir.join("manual_index.db"))
            .await
            .map_err(|e| InitializationError::Index(e.into()))?;
        let index = VectorIndex::open(Arc::new(vector_store), llm.clone(), chunks)
            .await
            .map_err(|e| InitializationError::Index(e.into()))?;

        let qa = QaPipeline::new(
            index,
            llm.clone(),
            config.llm.qa_temperature,
            config.rag.top_k,
            config.rag.memory_token_budget,
            paths.project_root.clone(),
        );

        let sales_table = SalesTable::load(&paths.project_root.join(&config.sales.csv_path))
            .map_err(|e| InitializationError::SalesData(e.into()))?;
        tracing::info!("loaded sales table ({} records)", sales_table.len());

        let agent = AgentRuntime::new(
            llm,
            ToolRegistry::new(Arc::new(sales_table)),
            config.llm.agent_temperature,
            config.agent.max_steps,
            config.rag.memory_token_budget,
        );

        Ok(Arc::new(AppState {
            config,
            history,
            qa,
            agent,
        }))
    }
}
