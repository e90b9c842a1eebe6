use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::state::{AppState, MANUAL_THREAD, SALES_THREAD};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub text: String,
}

pub async fn list_threads(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let threads = state.history.list_threads().await?;
    Ok(Json(json!({ "threads": threads })))
}

pub async fn get_thread_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.history.thread_exists(&thread_id).await? {
        return Err(ApiError::NotFound(format!("Thread not found: {}", thread_id)));
    }

    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(100);

    let messages = state.history.get_history(&thread_id, limit).await?;
    let formatted: Vec<Value> = messages
        .into_iter()
        .map(|msg| {
            json!({
                "role": msg.role,
                "content": msg.content,
                "timestamp": msg.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "messages": formatted })))
}

/// One full question/answer round against the thread's pipeline.
///
/// Per-query failures never crash the conversation: the friendly message
/// is appended to the transcript as the assistant turn and returned with
/// a 200, matching how startup-time failures stay fatal while query-time
/// failures degrade.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::BadRequest("質問を入力してください。".to_string()));
    }

    if thread_id != MANUAL_THREAD && thread_id != SALES_THREAD {
        return Err(ApiError::NotFound(format!("Thread not found: {}", thread_id)));
    }

    state.history.add_message(&thread_id, "user", &text).await?;

    let outcome = if thread_id == MANUAL_THREAD {
        state.qa.ask(&text).await.map(|answer| {
            let transcript = answer.format_with_sources();
            let body = json!({ "answer": answer.answer, "sources": answer.sources });
            (transcript, body)
        })
    } else {
        state.agent.run(&text).await.map(|answer| {
            let body = json!({ "answer": answer });
            (answer, body)
        })
    };

    match outcome {
        Ok((transcript, body)) => {
            state
                .history
                .add_message(&thread_id, "assistant", &transcript)
                .await?;
            Ok(Json(body))
        }
        Err(err @ ApiError::BadRequest(_)) => Err(err),
        Err(err) => {
            tracing::error!("query on thread {} failed: {}", thread_id, err);
            let friendly = friendly_error_message(&err);
            state
                .history
                .add_message(&thread_id, "assistant", friendly)
                .await?;
            Ok(Json(json!({ "answer": friendly, "degraded": true })))
        }
    }
}

fn friendly_error_message(err: &ApiError) -> &'static str {
    match err {
        ApiError::Quota(_) => {
            "申し訳ございません、AIサービスの利用上限に達しているため、現在回答できません。管理者にご連絡ください。"
        }
        _ => {
            "申し訳ございません、現在システムに問題が発生しているため、回答できません。時間をおいて再度お試しください。"
        }
    }
}
