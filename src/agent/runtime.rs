//! The tool-using reasoning loop for the sales thread.
//!
//! Each turn the model either calls one registered tool or produces a
//! final answer, speaking the JSON protocol from `instructions`. Output
//! that fails to parse as JSON is treated as the final answer, and tool
//! failures are fed back as observations so the model can correct itself;
//! neither surfaces to the user as an error. Memory is committed only
//! after the turn has produced a final answer.

use chrono::{Local, NaiveDate};
use serde_json::Value;
use tokio::sync::Mutex;

use super::instructions::build_agent_instructions;
use super::registry::ToolRegistry;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, LlmService};
use crate::memory::SummaryMemory;

const MAX_STEPS_ANSWER: &str =
    "申し訳ございません、ステップ数の上限に達したため回答をまとめられませんでした。";

enum AgentDecision {
    Final(String),
    ToolCall { name: String, args: Value },
}

pub struct AgentRuntime {
    llm: LlmService,
    registry: ToolRegistry,
    memory: Mutex<SummaryMemory>,
    temperature: f64,
    max_steps: usize,
}

impl AgentRuntime {
    pub fn new(
        llm: LlmService,
        registry: ToolRegistry,
        temperature: f64,
        max_steps: usize,
        memory_token_budget: usize,
    ) -> Self {
        Self {
            llm,
            registry,
            memory: Mutex::new(SummaryMemory::new(memory_token_budget)),
            temperature,
            max_steps,
        }
    }

    pub async fn run(&self, user_input: &str) -> Result<String, ApiError> {
        self.run_at(user_input, Local::now().date_naive()).await
    }

    async fn run_at(&self, user_input: &str, today: NaiveDate) -> Result<String, ApiError> {
        // Holding the lock for the whole turn serializes queries on this
        // conversation.
        let mut memory = self.memory.lock().await;

        let mut messages = vec![ChatMessage::system(build_agent_instructions(
            self.registry.specs(),
            today,
        ))];
        if !memory.is_empty() {
            messages.push(ChatMessage::system(format!(
                "これまでの会話:\n{}",
                memory.context()
            )));
        }
        messages.push(ChatMessage::user(user_input));

        for step in 0..self.max_steps {
            let request =
                ChatRequest::new(messages.clone()).with_temperature(self.temperature);
            let response = self.llm.chat(request).await?;

            match parse_agent_decision(&response) {
                AgentDecision::Final(content) => {
                    tracing::debug!("agent finished at step {}", step + 1);
                    memory.commit(user_input, &content, &self.llm).await;
                    return Ok(content);
                }
                AgentDecision::ToolCall { name, args } => {
                    tracing::info!("agent step {}: tool `{}`", step + 1, name);
                    messages.push(ChatMessage::assistant(response.clone()));
                    let observation = match self.registry.invoke(&name, &args, today) {
                        Ok(output) => format!("ツール `{}` の結果:\n{}", name, output),
                        Err(err) => {
                            format!("ツール `{}` の実行に失敗しました: {}", name, err)
                        }
                    };
                    messages.push(ChatMessage::system(observation));
                }
            }
        }

        tracing::warn!("agent reached max steps ({}) without a final answer", self.max_steps);
        memory.commit(user_input, MAX_STEPS_ANSWER, &self.llm).await;
        Ok(MAX_STEPS_ANSWER.to_string())
    }
}

fn parse_agent_decision(text: &str) -> AgentDecision {
    if let Some(json_value) = parse_json_from_text(text) {
        if let Some(decision) = parse_agent_decision_from_value(&json_value) {
            return decision;
        }
    }
    AgentDecision::Final(text.trim().to_string())
}

fn parse_agent_decision_from_value(value: &Value) -> Option<AgentDecision> {
    let action_type = value
        .get("type")
        .or_else(|| value.get("action"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if action_type == "tool_call" {
        let name = value
            .get("tool_name")
            .or_else(|| value.get("name"))
            .or_else(|| value.get("tool"))
            .and_then(|v| v.as_str())?;
        let args = value
            .get("tool_args")
            .or_else(|| value.get("args"))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        return Some(AgentDecision::ToolCall {
            name: name.to_string(),
            args,
        });
    }

    if action_type == "final" {
        let content = value
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        return Some(AgentDecision::Final(content));
    }

    None
}

fn parse_json_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::core::config::service::LlmConfig;
    use crate::llm::provider::LlmProvider;
    use crate::sales::data::tests::fixture_table;

    struct ScriptedProvider {
        responses: std::sync::Mutex<VecDeque<String>>,
        requests: std::sync::Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(
                    responses.into_iter().map(String::from).collect(),
                ),
                requests: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn observed_messages(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .flat_map(|r| r.messages.iter().map(|m| m.content.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ApiError::Upstream("script exhausted".to_string()))
        }

        async fn embed(
            &self,
            _inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn runtime_with(provider: Arc<ScriptedProvider>) -> AgentRuntime {
        let config = LlmConfig {
            max_retries: 0,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let llm = LlmService::new(provider, &config);
        AgentRuntime::new(
            llm,
            ToolRegistry::new(Arc::new(fixture_table())),
            0.5,
            6,
            1000,
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, 15).unwrap()
    }

    #[tokio::test]
    async fn invokes_tool_then_finishes() {
        let provider = ScriptedProvider::new(vec![
            r#"{"type":"tool_call","tool_name":"get_top_selling_products","tool_args":{"top_n":2}}"#,
            r#"{"type":"final","content":"売上上位はアウターAです。"}"#,
        ]);
        let runtime = runtime_with(provider.clone());

        let answer = runtime
            .run_at("一番売れている商品は？", today())
            .await
            .unwrap();
        assert_eq!(answer, "売上上位はアウターAです。");

        let seen = provider.observed_messages();
        assert!(seen
            .iter()
            .any(|m| m.contains("ツール `get_top_selling_products` の結果")));
    }

    #[tokio::test]
    async fn tool_failures_are_observations_not_errors() {
        let provider = ScriptedProvider::new(vec![
            r#"{"type":"tool_call","tool_name":"get_top_selling_products","tool_args":{"period":"past_decade"}}"#,
            r#"{"type":"final","content":"期間を修正して確認しました。"}"#,
        ]);
        let runtime = runtime_with(provider.clone());

        let answer = runtime.run_at("先月の売上は？", today()).await.unwrap();
        assert_eq!(answer, "期間を修正して確認しました。");

        let seen = provider.observed_messages();
        assert!(seen.iter().any(|m| m.contains("実行に失敗しました")));
    }

    #[tokio::test]
    async fn unparseable_output_is_the_final_answer() {
        let provider = ScriptedProvider::new(vec!["ただのテキストの回答です。"]);
        let runtime = runtime_with(provider);

        let answer = runtime.run_at("調子はどう？", today()).await.unwrap();
        assert_eq!(answer, "ただのテキストの回答です。");
    }

    #[tokio::test]
    async fn memory_carries_into_the_next_turn() {
        let provider = ScriptedProvider::new(vec![
            r#"{"type":"final","content":"最初の回答"}"#,
            r#"{"type":"final","content":"二度目の回答"}"#,
        ]);
        let runtime = runtime_with(provider.clone());

        runtime.run_at("最初の質問", today()).await.unwrap();
        runtime.run_at("二度目の質問", today()).await.unwrap();

        let seen = provider.observed_messages();
        assert!(seen
            .iter()
            .any(|m| m.contains("これまでの会話") && m.contains("最初の質問")));
    }

    #[tokio::test]
    async fn llm_failure_does_not_commit_memory() {
        let provider = ScriptedProvider::new(vec![]);
        let runtime = runtime_with(provider);

        let err = runtime
            .run_at("最初の質問", today())
            .await
            .expect_err("script exhausted");
        assert!(matches!(err, ApiError::Upstream(_)));
        assert!(runtime.memory.lock().await.is_empty());
    }

    #[tokio::test]
    async fn max_steps_yields_a_fallback_answer() {
        let tool_call =
            r#"{"type":"tool_call","tool_name":"get_top_selling_products","tool_args":{}}"#;
        let provider = ScriptedProvider::new(vec![tool_call; 6]);
        let runtime = runtime_with(provider);

        let answer = runtime.run_at("全部見せて", today()).await.unwrap();
        assert_eq!(answer, MAX_STEPS_ANSWER);
    }
}
