//! Chunked transfer codec: artifact bytes <-> ordered `ArtifactChunk`s.

use crate::{compute_artifact_id, CacheError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hodei_protocol::defaults::{MAX_ARTIFACT_CHUNK_BYTES, MIN_ARTIFACT_CHUNK_BYTES};
use hodei_protocol::{ArtifactChunk, Compression};
use std::io::{Read, Write};

/// Clamp a requested chunk size into the protocol's [1 KiB, 4 MiB] window.
pub fn clamp_chunk_size(requested: usize) -> usize {
    requested.clamp(MIN_ARTIFACT_CHUNK_BYTES, MAX_ARTIFACT_CHUNK_BYTES)
}

/// Lazy chunk sequence over an artifact's bytes.
///
/// Chunks come out in `seq` order starting at 0; the final chunk carries
/// `is_last`. A zero-byte artifact still yields exactly one (empty, final)
/// chunk so the receiver has something to verify.
pub struct ChunkStream {
    artifact_id: String,
    data: Vec<u8>,
    chunk_size: usize,
    compression: Compression,
    offset: usize,
    seq: u32,
    done: bool,
}

impl ChunkStream {
    pub fn new(
        artifact_id: String,
        data: Vec<u8>,
        chunk_size: usize,
        compression: Compression,
    ) -> Self {
        Self {
            artifact_id,
            data,
            chunk_size: clamp_chunk_size(chunk_size),
            compression,
            offset: 0,
            seq: 0,
            done: false,
        }
    }
}

impl Iterator for ChunkStream {
    type Item = Result<ArtifactChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let end = (self.offset + self.chunk_size).min(self.data.len());
        let raw = &self.data[self.offset..end];
        let is_last = end == self.data.len();

        let payload = match self.compression {
            Compression::None => raw.to_vec(),
            Compression::Gzip => match gzip(raw) {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.done = true;
                    return Some(Err(CacheError::Io(err)));
                }
            },
        };

        let chunk = ArtifactChunk {
            artifact_id: self.artifact_id.clone(),
            seq: self.seq,
            is_last,
            compression: self.compression,
            original_size: raw.len() as u64,
            data: payload,
        };

        self.offset = end;
        self.seq += 1;
        self.done = is_last;
        Some(Ok(chunk))
    }
}

/// Reassemble an artifact from its chunk sequence.
///
/// Enforces: contiguous `seq` from 0, a single artifact id, a terminating
/// `is_last` chunk, and that the reassembled bytes hash to the declared id.
/// Returns the verified bytes.
pub fn assemble_from_chunks<I>(chunks: I) -> Result<(String, Vec<u8>)>
where
    I: IntoIterator<Item = ArtifactChunk>,
{
    let mut artifact_id: Option<String> = None;
    let mut expected_seq = 0u32;
    let mut data = Vec::new();
    let mut terminated = false;

    for chunk in chunks {
        let id = match &artifact_id {
            None => {
                artifact_id = Some(chunk.artifact_id.clone());
                artifact_id.as_ref().expect("just set").clone()
            }
            Some(existing) => {
                if *existing != chunk.artifact_id {
                    return Err(CacheError::MixedStream {
                        expected: existing.clone(),
                        got: chunk.artifact_id,
                    });
                }
                existing.clone()
            }
        };

        if terminated {
            // A chunk after is_last means the sender lost track of ordering.
            return Err(CacheError::ChunkOutOfOrder {
                artifact_id: id,
                expected: expected_seq,
                got: chunk.seq,
            });
        }

        if chunk.seq != expected_seq {
            return Err(CacheError::ChunkOutOfOrder {
                artifact_id: id,
                expected: expected_seq,
                got: chunk.seq,
            });
        }
        expected_seq += 1;

        match chunk.compression {
            Compression::None => data.extend_from_slice(&chunk.data),
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(chunk.data.as_slice());
                let mut inflated = Vec::with_capacity(chunk.original_size as usize);
                decoder
                    .read_to_end(&mut inflated)
                    .map_err(|source| CacheError::Decompress {
                        artifact_id: id.clone(),
                        source,
                    })?;
                data.extend_from_slice(&inflated);
            }
        }

        terminated = chunk.is_last;
    }

    let artifact_id = artifact_id.ok_or(CacheError::EmptyStream)?;
    if !terminated {
        return Err(CacheError::UnterminatedStream { artifact_id });
    }

    let actual = compute_artifact_id(&data);
    if actual != artifact_id {
        return Err(CacheError::CorruptArtifact {
            artifact_id,
            actual,
        });
    }

    Ok((artifact_id, data))
}

fn gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(raw)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks_for(data: &[u8], chunk_size: usize, compression: Compression) -> Vec<ArtifactChunk> {
        let id = compute_artifact_id(data);
        ChunkStream::new(id, data.to_vec(), chunk_size, compression)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_chunk_sizes_clamped() {
        assert_eq!(clamp_chunk_size(0), MIN_ARTIFACT_CHUNK_BYTES);
        assert_eq!(clamp_chunk_size(64 * 1024), 64 * 1024);
        assert_eq!(clamp_chunk_size(usize::MAX), MAX_ARTIFACT_CHUNK_BYTES);
    }

    #[test]
    fn test_stream_and_assemble_plain() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let chunks = chunks_for(&data, 1024, Compression::None);
        assert_eq!(chunks.len(), 10);
        assert!(chunks.last().unwrap().is_last);
        assert_eq!(chunks[0].seq, 0);

        let (id, assembled) = assemble_from_chunks(chunks).unwrap();
        assert_eq!(id, compute_artifact_id(&data));
        assert_eq!(assembled, data);
    }

    #[test]
    fn test_stream_and_assemble_gzip() {
        let data = vec![42u8; 100_000];
        let chunks = chunks_for(&data, 16 * 1024, Compression::Gzip);
        // Highly repetitive input compresses well below the chunk size.
        assert!(chunks.iter().all(|c| c.data.len() < 16 * 1024));
        assert_eq!(chunks[0].original_size, 16 * 1024);

        let (_, assembled) = assemble_from_chunks(chunks).unwrap();
        assert_eq!(assembled, data);
    }

    #[test]
    fn test_empty_artifact_single_chunk() {
        let chunks = chunks_for(b"", 1024, Compression::None);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_last);
        assert!(chunks[0].data.is_empty());

        let (id, assembled) = assemble_from_chunks(chunks).unwrap();
        assert_eq!(id, compute_artifact_id(b""));
        assert!(assembled.is_empty());
    }

    #[test]
    fn test_corrupt_chunk_detected() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut chunks = chunks_for(&data, 1024, Compression::None);
        chunks[2].data[0] ^= 0xFF;

        let result = assemble_from_chunks(chunks);
        assert!(matches!(result, Err(CacheError::CorruptArtifact { .. })));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let data = vec![7u8; 5000];
        let mut chunks = chunks_for(&data, 1024, Compression::None);
        chunks.swap(1, 2);

        let result = assemble_from_chunks(chunks);
        assert!(matches!(result, Err(CacheError::ChunkOutOfOrder { .. })));
    }

    #[test]
    fn test_unterminated_stream_rejected() {
        let data = vec![7u8; 5000];
        let mut chunks = chunks_for(&data, 1024, Compression::None);
        chunks.pop();

        let result = assemble_from_chunks(chunks);
        assert!(matches!(result, Err(CacheError::UnterminatedStream { .. })));
    }

    #[test]
    fn test_empty_stream_rejected() {
        let result = assemble_from_chunks(Vec::new());
        assert!(matches!(result, Err(CacheError::EmptyStream)));
    }
}
