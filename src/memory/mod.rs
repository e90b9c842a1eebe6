//! Rolling conversation summary memory.
//!
//! Each conversation thread keeps recent turns verbatim inside a token
//! budget. When the buffer outgrows the budget the oldest turns are folded
//! into a running summary with one LLM call. The caller commits a turn
//! only after the query that produced it succeeded.

use std::collections::VecDeque;

use crate::llm::{ChatMessage, ChatRequest, LlmService};

#[derive(Debug, Clone)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

pub struct SummaryMemory {
    summary: String,
    turns: VecDeque<Turn>,
    token_budget: usize,
}

impl SummaryMemory {
    pub fn new(token_budget: usize) -> Self {
        Self {
            summary: String::new(),
            turns: VecDeque::new(),
            token_budget,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.turns.is_empty()
    }

    /// Renders the memory for inclusion in a prompt: the running summary
    /// followed by the verbatim recent turns.
    pub fn context(&self) -> String {
        let mut out = String::new();
        if !self.summary.is_empty() {
            out.push_str("これまでの会話の要約: ");
            out.push_str(&self.summary);
            out.push('\n');
        }
        for turn in &self.turns {
            out.push_str("ユーザー: ");
            out.push_str(&turn.user);
            out.push('\n');
            out.push_str("アシスタント: ");
            out.push_str(&turn.assistant);
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    /// Appends a completed turn and folds overflow into the summary.
    ///
    /// A failed summarization keeps the overflowing turns in the buffer so
    /// nothing is lost; the budget is simply exceeded until the next commit.
    pub async fn commit(&mut self, user: &str, assistant: &str, llm: &LlmService) {
        self.turns.push_back(Turn {
            user: user.to_string(),
            assistant: assistant.to_string(),
        });

        let mut overflow = Vec::new();
        while self.turns.len() > 1 && self.buffered_tokens() > self.token_budget {
            if let Some(turn) = self.turns.pop_front() {
                overflow.push(turn);
            }
        }

        if overflow.is_empty() {
            return;
        }

        match self.summarize(&overflow, llm).await {
            Ok(summary) => self.summary = summary,
            Err(err) => {
                tracing::warn!("memory summarization failed, keeping turns verbatim: {}", err);
                for turn in overflow.into_iter().rev() {
                    self.turns.push_front(turn);
                }
            }
        }
    }

    async fn summarize(
        &self,
        overflow: &[Turn],
        llm: &LlmService,
    ) -> Result<String, crate::core::errors::ApiError> {
        let mut lines = String::new();
        for turn in overflow {
            lines.push_str(&format!(
                "ユーザー: {}\nアシスタント: {}\n",
                turn.user, turn.assistant
            ));
        }

        let prompt = format!(
            "以下はこれまでの会話の要約と、新しいやり取りです。\n\
             新しいやり取りの内容を取り込んだ簡潔な要約を日本語で作成してください。\n\n\
             現在の要約:\n{}\n\n新しいやり取り:\n{}\n新しい要約:",
            if self.summary.is_empty() {
                "(なし)"
            } else {
                self.summary.as_str()
            },
            lines
        );

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(0.0);
        let summary = llm.chat(request).await?;
        Ok(summary.trim().to_string())
    }

    fn buffered_tokens(&self) -> usize {
        estimate_tokens(&self.summary)
            + self
                .turns
                .iter()
                .map(|t| estimate_tokens(&t.user) + estimate_tokens(&t.assistant))
                .sum::<usize>()
    }
}

/// Estimate token count from text, roughly four characters per token.
fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::core::config::service::LlmConfig;
    use crate::core::errors::ApiError;
    use crate::llm::provider::LlmProvider;

    struct SummarizerStub {
        chat_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for SummarizerStub {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ApiError::Quota("insufficient_quota".to_string()))
            } else {
                Ok("要約済みの内容".to_string())
            }
        }

        async fn embed(
            &self,
            _inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn stub_service(fail: bool) -> (LlmService, Arc<SummarizerStub>) {
        let provider = Arc::new(SummarizerStub {
            chat_calls: AtomicUsize::new(0),
            fail,
        });
        (
            LlmService::new(provider.clone(), &LlmConfig::default()),
            provider,
        )
    }

    #[tokio::test]
    async fn small_history_stays_verbatim() {
        let (llm, provider) = stub_service(false);
        let mut memory = SummaryMemory::new(1000);

        memory.commit("営業時間は？", "10時から19時です。", &llm).await;

        let context = memory.context();
        assert!(context.contains("営業時間は？"));
        assert!(context.contains("10時から19時です。"));
        assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overflow_is_folded_into_summary() {
        let (llm, provider) = stub_service(false);
        let mut memory = SummaryMemory::new(20);

        memory.commit(&"質問".repeat(30), &"回答".repeat(30), &llm).await;
        memory.commit("次の質問", "次の回答", &llm).await;

        assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 1);
        let context = memory.context();
        assert!(context.contains("要約済みの内容"));
        assert!(context.contains("次の質問"));
    }

    #[tokio::test]
    async fn failed_summarization_keeps_turns() {
        let (llm, _provider) = stub_service(true);
        let mut memory = SummaryMemory::new(20);

        memory.commit(&"質問".repeat(30), &"回答".repeat(30), &llm).await;
        memory.commit("次の質問", "次の回答", &llm).await;

        let context = memory.context();
        // The oldest turn survived the failed fold.
        assert!(context.contains("質問質問"));
        assert!(context.contains("次の質問"));
    }
}
