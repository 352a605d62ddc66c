//! SQLite-backed repository.
//!
//! One table holds every entity kind as a JSON blob; the orchestrator's
//! in-memory state is authoritative, so the schema stays a dumb checkpoint.

use crate::{Repository, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::info;

pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Connect to `url` (e.g. `sqlite:/path/to/state.db`), creating the file
    /// and schema if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let repo = Self { pool };
        repo.init_schema().await?;
        info!("State store ready at {}", url);
        Ok(repo)
    }

    /// In-memory database, used by tests.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hodei_entities (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save(&self, kind: &str, id: &str, body: serde_json::Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO hodei_entities (kind, id, body, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (kind, id)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(body.to_string())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, kind: &str, id: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            SELECT body FROM hodei_entities WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|body| serde_json::from_str(&body).ok()))
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            DELETE FROM hodei_entities WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn load_all(&self, kind: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, body FROM hodei_entities WHERE kind = ? ORDER BY id
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                let body: String = row.get("body");
                serde_json::from_str(&body).ok().map(|value| (id, value))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let repo = SqliteRepository::connect_memory().await.unwrap();
        repo.save("job", "j1", serde_json::json!({"name": "hello"}))
            .await
            .unwrap();

        let loaded = repo.load("job", "j1").await.unwrap().unwrap();
        assert_eq!(loaded["name"], "hello");
    }

    #[tokio::test]
    async fn test_upsert_replaces_body() {
        let repo = SqliteRepository::connect_memory().await.unwrap();
        repo.save("job", "j1", serde_json::json!({"v": 1}))
            .await
            .unwrap();
        repo.save("job", "j1", serde_json::json!({"v": 2}))
            .await
            .unwrap();

        let all = repo.load_all("job").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1["v"], 2);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let repo = SqliteRepository::connect_memory().await.unwrap();
        repo.save("pool", "p1", serde_json::json!({}))
            .await
            .unwrap();

        assert!(repo.delete("pool", "p1").await.unwrap());
        assert!(!repo.delete("pool", "p1").await.unwrap());
        assert!(repo.load("pool", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("state.db").display());
        let repo = SqliteRepository::connect(&url).await.unwrap();
        repo.save("worker", "w1", serde_json::json!({"ok": true}))
            .await
            .unwrap();

        // Reopen and confirm durability.
        drop(repo);
        let repo = SqliteRepository::connect(&url).await.unwrap();
        let loaded = repo.load("worker", "w1").await.unwrap().unwrap();
        assert_eq!(loaded["ok"], true);
    }
}
