//! Voice log persistence: an append-only SQLite store.
//!
//! One row per recognized human utterance. The capture loop writes here
//! fire-and-forget; nothing in the core reads the log back (the `recent`
//! query exists for tooling and tests).

use std::path::Path;

use chrono::NaiveDateTime;
use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions};

use crate::error::VoiceError;

/// Append-only store of recognized utterances.
pub struct VoiceLogStore {
    pool: SqlitePool,
}

/// One persisted voice log row.
#[derive(Debug, Clone)]
pub struct VoiceLogRow {
    pub id: i64,
    pub speaker_id: i64,
    pub speaker_name: String,
    pub text: String,
    pub created_at: NaiveDateTime,
}

impl VoiceLogStore {
    /// Open (creating if missing) the log database at `db_path`.
    pub async fn connect(db_path: &Path) -> Result<Self, VoiceError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true),
        )
        .await?;

        let store = Self { pool };
        store.create_schema().await?;
        tracing::info!(path = %db_path.display(), "Voice log store ready");
        Ok(store)
    }

    /// Open a fresh in-memory store (tests and tooling).
    pub async fn in_memory() -> Result<Self, VoiceError> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), VoiceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS voice_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                speaker_id INTEGER NOT NULL,
                speaker_name TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one recognized utterance.
    pub async fn append(
        &self,
        speaker_id: i64,
        speaker_name: &str,
        text: &str,
    ) -> Result<(), VoiceError> {
        sqlx::query("INSERT INTO voice_logs (speaker_id, speaker_name, text) VALUES (?, ?, ?)")
            .bind(speaker_id)
            .bind(speaker_name)
            .bind(text)
            .execute(&self.pool)
            .await?;

        tracing::debug!(speaker_id, speaker_name, "Voice log row written");
        Ok(())
    }

    /// Most recent rows, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<VoiceLogRow>, VoiceError> {
        let rows = sqlx::query(
            "SELECT id, speaker_id, speaker_name, text, created_at
             FROM voice_logs
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VoiceLogRow {
                id: row.get("id"),
                speaker_id: row.get("speaker_id"),
                speaker_name: row.get("speaker_name"),
                text: row.get("text"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_read_back() {
        let store = VoiceLogStore::in_memory().await.unwrap();

        store.append(42, "たろう", "おはよう").await.unwrap();
        store.append(7, "はなこ", "こんにちは").await.unwrap();

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Newest first.
        assert_eq!(rows[0].speaker_name, "はなこ");
        assert_eq!(rows[0].text, "こんにちは");
        assert_eq!(rows[1].speaker_id, 42);
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let store = VoiceLogStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.append(i, "x", "y").await.unwrap();
        }
        let rows = store.recent(3).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn connect_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("voice.db");
        let store = VoiceLogStore::connect(&path).await.unwrap();
        store.append(1, "a", "b").await.unwrap();
        assert!(path.exists());
    }
}
