//! Content-addressed artifact cache.
//!
//! Artifacts are immutable blobs keyed by the lowercase-hex SHA-256 of their
//! uncompressed bytes, laid out on disk as `objects/ab/cdef...` (first byte,
//! then the rest). The chunk codec turns a stored artifact into an ordered
//! sequence of wire chunks and back, with optional per-chunk gzip.

mod codec;
mod store;

pub use codec::{assemble_from_chunks, clamp_chunk_size, ChunkStream};
pub use store::ArtifactStore;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid artifact id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Corrupt artifact {artifact_id}: declared hash does not match content ({actual})")]
    CorruptArtifact { artifact_id: String, actual: String },

    #[error("Chunk out of order for {artifact_id}: expected seq {expected}, got {got}")]
    ChunkOutOfOrder {
        artifact_id: String,
        expected: u32,
        got: u32,
    },

    #[error("Chunk stream for {artifact_id} ended without a final chunk")]
    UnterminatedStream { artifact_id: String },

    #[error("Chunk stream mixes artifact ids: started with {expected}, saw {got}")]
    MixedStream { expected: String, got: String },

    #[error("Empty chunk stream")]
    EmptyStream,

    #[error("Decompression failed for {artifact_id}: {source}")]
    Decompress {
        artifact_id: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 of `bytes` as lowercase hex. This IS the artifact id.
pub fn compute_artifact_id(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_artifact_id() {
        // SHA-256 of the empty string is a well-known vector.
        assert_eq!(
            compute_artifact_id(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let id = compute_artifact_id(b"hello");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
