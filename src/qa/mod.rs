//! Retrieval QA pipeline for the manual thread.
//!
//! Each question retrieves the nearest manual chunks, renders them into a
//! fixed instruction template together with the conversation summary, and
//! makes a single LLM call. The model is constrained to the supplied
//! context and must answer with the fixed fallback phrase when the context
//! does not contain the answer. Memory is committed only on success.

use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::core::errors::ApiError;
use crate::index::{ChunkSearchResult, VectorIndex};
use crate::ingest::artifact_path;
use crate::llm::{ChatMessage, ChatRequest, LlmService};
use crate::memory::SummaryMemory;

/// Returned verbatim by the model when the manual has no answer.
pub const FALLBACK_ANSWER: &str = "マニュアルにはその情報が見つかりませんでした。";

const EXCERPT_CHARS: usize = 100;

/// Citation for one retrieved chunk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceRef {
    pub ordinal: usize,
    pub excerpt: String,
    /// Link into the cached conversion artifact, e.g. `/abs/manual.txt#page=3`.
    pub locator: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QaAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

impl QaAnswer {
    /// Transcript rendering: the answer followed by numbered citations.
    pub fn format_with_sources(&self) -> String {
        let mut out = self.answer.clone();
        for source in &self.sources {
            out.push_str(&format!(
                "\n\n({}) {}\n　[参照元]({})",
                source.ordinal, source.excerpt, source.locator
            ));
        }
        out
    }
}

pub struct QaPipeline {
    index: VectorIndex,
    llm: LlmService,
    memory: Mutex<SummaryMemory>,
    temperature: f64,
    top_k: usize,
    project_root: PathBuf,
}

impl QaPipeline {
    pub fn new(
        index: VectorIndex,
        llm: LlmService,
        temperature: f64,
        top_k: usize,
        memory_token_budget: usize,
        project_root: PathBuf,
    ) -> Self {
        Self {
            index,
            llm,
            memory: Mutex::new(SummaryMemory::new(memory_token_budget)),
            temperature,
            top_k,
            project_root,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<QaAnswer, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("質問を入力してください。".to_string()));
        }

        // Holding the lock for the whole query serializes this thread.
        let mut memory = self.memory.lock().await;

        let retrieved = self.index.search(question, self.top_k).await?;
        let context = retrieved
            .iter()
            .map(|r| r.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = render_prompt(&memory.context(), &context, question);
        let request =
            ChatRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(self.temperature);
        let answer = self.llm.chat(request).await?.trim().to_string();

        memory.commit(question, &answer, &self.llm).await;

        let sources = retrieved
            .iter()
            .enumerate()
            .map(|(i, result)| self.source_ref(i + 1, result))
            .collect();

        Ok(QaAnswer { answer, sources })
    }

    fn source_ref(&self, ordinal: usize, result: &ChunkSearchResult) -> SourceRef {
        let artifact = artifact_path(&self.project_root.join(&result.chunk.source));
        SourceRef {
            ordinal,
            excerpt: excerpt(&result.chunk.content),
            locator: format!("{}#page={}", artifact.display(), result.chunk.page),
        }
    }
}

fn render_prompt(chat_history: &str, context: &str, question: &str) -> String {
    format!(
        "あなたは店舗のマニュアルアシスタントです。\n\
         以下の「コンテキスト」のみを参考にして、店長からの質問に明確かつ簡潔に答えてください。\n\
         もしコンテキストに質問の答えが含まれていない場合は、「{fallback}」と回答してください。\n\
         コンテキスト外の情報は一切使用しないでください。\n\n\
         チャット履歴:\n{chat_history}\n\n\
         コンテキスト:\n{context}\n\n\
         質問: {question}\n回答:",
        fallback = FALLBACK_ANSWER,
        chat_history = chat_history,
        context = context,
        question = question
    )
}

/// Bounded single-line excerpt for a citation.
fn excerpt(text: &str) -> String {
    text.trim()
        .replace('\n', " ")
        .chars()
        .take(EXCERPT_CHARS)
        .collect()
}
