//! On-disk artifact store.

use crate::{compute_artifact_id, CacheError, Result};
use hodei_protocol::validate_artifact_id;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Content-addressed blob store rooted at a directory.
///
/// Writers are single-writer per id (identical bytes by construction, so a
/// lost race costs nothing); readers never take a lock.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for an id: `objects/ab/cdef...`.
    fn object_path(&self, id: &str) -> PathBuf {
        self.root.join("objects").join(&id[..2]).join(&id[2..])
    }

    fn check_id(id: &str) -> Result<()> {
        validate_artifact_id(id).map_err(|e| CacheError::InvalidId {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Store `bytes`, returning the content id. Idempotent: storing the same
    /// bytes twice is a no-op. The write goes through a temp file and a
    /// rename so readers never observe a partial object.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let id = compute_artifact_id(bytes);
        let path = self.object_path(&id);

        if path.exists() {
            debug!("Artifact {} already stored", &id[..12]);
            return Ok(id);
        }

        let parent = path
            .parent()
            .expect("object path always has a parent directory");
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        match tmp.persist(&path) {
            Ok(_) => {}
            Err(err) if path.exists() => {
                // Lost a put/put race; the other writer's bytes are identical.
                debug!("Artifact {} raced with another writer: {}", &id[..12], err);
            }
            Err(err) => return Err(CacheError::Io(err.error)),
        }

        debug!("Stored artifact {} ({} bytes)", &id[..12], bytes.len());
        Ok(id)
    }

    /// Fetch the bytes for `id`, or None if not present.
    pub fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Self::check_id(id)?;
        let path = self.object_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::Io(err)),
        }
    }

    /// Whether a single id is present.
    pub fn contains(&self, id: &str) -> bool {
        validate_artifact_id(id).is_ok() && self.object_path(id).exists()
    }

    /// Bulk membership query: the subset of `ids` that are present.
    pub fn has<'a, I>(&self, ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .filter(|id| self.contains(id))
            .map(|id| id.to_string())
            .collect()
    }

    /// Verify a stored object still hashes to its id. Used by integrity
    /// sweeps; a mismatch means disk corruption, not a protocol fault.
    pub fn verify(&self, id: &str) -> Result<bool> {
        match self.get(id)? {
            Some(bytes) => {
                let actual = compute_artifact_id(&bytes);
                if actual != id {
                    warn!("Artifact {} failed verification (got {})", id, actual);
                    return Ok(false);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_dir, store) = store();
        let id = store.put(b"artifact bytes").unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap(), b"artifact bytes");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, store) = store();
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sharded_layout() {
        let (dir, store) = store();
        let id = store.put(b"layout").unwrap();
        let expect = dir
            .path()
            .join("objects")
            .join(&id[..2])
            .join(&id[2..]);
        assert!(expect.exists());
    }

    #[test]
    fn test_has_bulk() {
        let (_dir, store) = store();
        let a = store.put(b"one").unwrap();
        let b = store.put(b"two").unwrap();
        let missing = "0".repeat(64);

        let present = store.has([a.as_str(), b.as_str(), missing.as_str()]);
        assert!(present.contains(&a));
        assert!(present.contains(&b));
        assert!(!present.contains(&missing));
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = store();
        let missing = "f".repeat(64);
        assert!(store.get(&missing).unwrap().is_none());
    }

    #[test]
    fn test_get_rejects_bad_id() {
        let (_dir, store) = store();
        assert!(store.get("short").is_err());
    }

    #[test]
    fn test_verify_detects_tamper() {
        let (dir, store) = store();
        let id = store.put(b"pristine").unwrap();
        assert!(store.verify(&id).unwrap());

        let path = dir
            .path()
            .join("objects")
            .join(&id[..2])
            .join(&id[2..]);
        fs::write(&path, b"tampered").unwrap();
        assert!(!store.verify(&id).unwrap());
    }
}
