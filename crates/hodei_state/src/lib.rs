//! Pluggable entity repository.
//!
//! The orchestrator owns all control-plane state in memory and writes through
//! to a `Repository` on every change; `load_all` rebuilds the world at boot.
//! Entities are stored as JSON blobs per (kind, id) so backends stay oblivious
//! to the domain model.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error for {kind}/{id}: {source}")]
    Serialize {
        kind: String,
        id: String,
        source: serde_json::Error,
    },
}

/// Something the repository can persist. `KIND` namespaces the id space.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn entity_id(&self) -> String;
}

/// Durable save/load/delete per entity kind, plus `load_all` at startup.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save(&self, kind: &str, id: &str, body: serde_json::Value) -> Result<()>;

    async fn load(&self, kind: &str, id: &str) -> Result<Option<serde_json::Value>>;

    async fn delete(&self, kind: &str, id: &str) -> Result<bool>;

    async fn load_all(&self, kind: &str) -> Result<Vec<(String, serde_json::Value)>>;
}

/// Write-through helper for a typed entity.
pub async fn save_entity<T: Entity>(repo: &dyn Repository, entity: &T) -> Result<()> {
    let id = entity.entity_id();
    let body = serde_json::to_value(entity).map_err(|source| StateError::Serialize {
        kind: T::KIND.to_string(),
        id: id.clone(),
        source,
    })?;
    repo.save(T::KIND, &id, body).await
}

/// Load every entity of a kind, skipping (and logging) undecodable rows so a
/// single bad record cannot keep the orchestrator from booting.
pub async fn load_entities<T: Entity>(repo: &dyn Repository) -> Result<Vec<T>> {
    let rows = repo.load_all(T::KIND).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, body) in rows {
        match serde_json::from_value::<T>(body) {
            Ok(entity) => out.push(entity),
            Err(err) => {
                tracing::warn!("Skipping undecodable {} '{}': {}", T::KIND, id, err);
            }
        }
    }
    Ok(out)
}

pub async fn delete_entity<T: Entity>(repo: &dyn Repository, id: &str) -> Result<bool> {
    repo.delete(T::KIND, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        weight: u32,
    }

    impl Entity for Widget {
        const KIND: &'static str = "widget";

        fn entity_id(&self) -> String {
            self.id.clone()
        }
    }

    #[tokio::test]
    async fn test_typed_round_trip_memory() {
        let repo = MemoryRepository::new();
        let widget = Widget {
            id: "w1".to_string(),
            weight: 7,
        };
        save_entity(&repo, &widget).await.unwrap();

        let loaded: Vec<Widget> = load_entities(&repo).await.unwrap();
        assert_eq!(loaded, vec![widget]);

        assert!(delete_entity::<Widget>(&repo, "w1").await.unwrap());
        assert!(!delete_entity::<Widget>(&repo, "w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let repo = MemoryRepository::new();
        repo.save("widget", "bad", serde_json::json!({"nope": true}))
            .await
            .unwrap();
        repo.save(
            "widget",
            "good",
            serde_json::json!({"id": "good", "weight": 1}),
        )
        .await
        .unwrap();

        let loaded: Vec<Widget> = load_entities(&repo).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "good");
    }
}
