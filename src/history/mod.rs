//! Per-thread conversation transcripts.
//!
//! The app serves a fixed set of chat threads (manual QA and sales
//! analysis), each with an append-only message log. Threads never share
//! state; a message always belongs to exactly one thread.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to connect to history db: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init threads table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(thread_id) REFERENCES threads(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init messages table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id)")
            .execute(&pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    /// Creates the thread if it does not exist yet.
    pub async fn ensure_thread(&self, thread_id: &str, title: &str) -> Result<(), ApiError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO threads (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn thread_exists(&self, thread_id: &str) -> Result<bool, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count > 0)
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadInfo>, ApiError> {
        let rows = sqlx::query(
            "SELECT t.id, t.title, t.created_at, t.updated_at, \
             COUNT(m.id) as msg_count \
             FROM threads t \
             LEFT JOIN messages m ON t.id = m.thread_id \
             GROUP BY t.id \
             ORDER BY t.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(ThreadInfo {
                id: row.try_get::<String, _>("id").unwrap_or_default(),
                title: row.try_get::<String, _>("title").unwrap_or_default(),
                created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
                updated_at: row.try_get::<String, _>("updated_at").unwrap_or_default(),
                message_count: row.try_get::<i64, _>("msg_count").unwrap_or(0),
            });
        }
        Ok(threads)
    }

    pub async fn add_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR IGNORE INTO threads (id, title, created_at, updated_at) VALUES (?, '', ?, ?)",
        )
        .bind(thread_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("UPDATE threads SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let result = sqlx::query(
            "INSERT INTO messages (thread_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(role)
        .bind(content)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;

        Ok(result.last_insert_rowid())
    }

    /// Messages in chronological order; a positive limit keeps only the
    /// most recent ones.
    pub async fn get_history(
        &self,
        thread_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let rows = if limit > 0 {
            sqlx::query(
                "SELECT * FROM (SELECT * FROM messages WHERE thread_id = ? ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
            )
            .bind(thread_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        } else {
            sqlx::query("SELECT * FROM messages WHERE thread_id = ? ORDER BY id ASC")
                .bind(thread_id)
                .fetch_all(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        let mut messages = Vec::new();
        for row in rows {
            messages.push(HistoryMessage {
                id: row.try_get::<i64, _>("id").unwrap_or_default(),
                thread_id: row.try_get::<String, _>("thread_id").unwrap_or_default(),
                role: row.try_get::<String, _>("role").unwrap_or_default(),
                content: row.try_get::<String, _>("content").unwrap_or_default(),
                created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
            });
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> HistoryStore {
        let tmp = std::env::temp_dir().join(format!(
            "misechat-history-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        HistoryStore::new(tmp).await.unwrap()
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let store = test_store().await;
        store.ensure_thread("manual", "マニュアル検索").await.unwrap();
        store.ensure_thread("sales", "売上分析").await.unwrap();

        store.add_message("manual", "user", "返金方法は？").await.unwrap();
        store.add_message("sales", "user", "今月の売上は？").await.unwrap();
        store.add_message("manual", "assistant", "レジから処理します。").await.unwrap();

        let manual = store.get_history("manual", 0).await.unwrap();
        let sales = store.get_history("sales", 0).await.unwrap();

        assert_eq!(manual.len(), 2);
        assert_eq!(sales.len(), 1);
        assert!(manual.iter().all(|m| m.thread_id == "manual"));
        assert!(sales.iter().all(|m| m.thread_id == "sales"));
    }

    #[tokio::test]
    async fn history_is_chronological_and_limited() {
        let store = test_store().await;
        store.ensure_thread("manual", "マニュアル検索").await.unwrap();

        for i in 0..5 {
            store
                .add_message("manual", "user", &format!("質問 {}", i))
                .await
                .unwrap();
        }

        let recent = store.get_history("manual", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "質問 3");
        assert_eq!(recent[1].content, "質問 4");
    }

    #[tokio::test]
    async fn ensure_thread_is_idempotent() {
        let store = test_store().await;
        store.ensure_thread("manual", "マニュアル検索").await.unwrap();
        store.ensure_thread("manual", "別のタイトル").await.unwrap();

        let threads = store.list_threads().await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].title, "マニュアル検索");
    }

    #[tokio::test]
    async fn messages_carry_timestamps() {
        let store = test_store().await;
        store.add_message("manual", "user", "hi").await.unwrap();

        let messages = store.get_history("manual", 0).await.unwrap();
        assert!(!messages[0].created_at.is_empty());
    }
}
