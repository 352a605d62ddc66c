//! In-memory repository for tests and single-process setups.

use crate::{Repository, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// HashMap-backed repository. "Durable" for exactly as long as the process.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    entities: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save(&self, kind: &str, id: &str, body: serde_json::Value) -> Result<()> {
        let mut entities = self.entities.lock().expect("repository lock poisoned");
        entities.insert((kind.to_string(), id.to_string()), body);
        Ok(())
    }

    async fn load(&self, kind: &str, id: &str) -> Result<Option<serde_json::Value>> {
        let entities = self.entities.lock().expect("repository lock poisoned");
        Ok(entities.get(&(kind.to_string(), id.to_string())).cloned())
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<bool> {
        let mut entities = self.entities.lock().expect("repository lock poisoned");
        Ok(entities
            .remove(&(kind.to_string(), id.to_string()))
            .is_some())
    }

    async fn load_all(&self, kind: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let entities = self.entities.lock().expect("repository lock poisoned");
        Ok(entities
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, id), body)| (id.clone(), body.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_overwrites() {
        let repo = MemoryRepository::new();
        repo.save("job", "a", serde_json::json!({"v": 1}))
            .await
            .unwrap();
        repo.save("job", "a", serde_json::json!({"v": 2}))
            .await
            .unwrap();

        let loaded = repo.load("job", "a").await.unwrap().unwrap();
        assert_eq!(loaded["v"], 2);
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let repo = MemoryRepository::new();
        repo.save("job", "x", serde_json::json!(1)).await.unwrap();
        repo.save("pool", "x", serde_json::json!(2)).await.unwrap();

        assert_eq!(repo.load_all("job").await.unwrap().len(), 1);
        assert_eq!(repo.load_all("pool").await.unwrap().len(), 1);
        assert!(repo.load("worker", "x").await.unwrap().is_none());
    }
}
