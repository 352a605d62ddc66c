//! Binary codec for artifact chunk payloads.
//!
//! Chunk payloads carry bulk bytes, so unlike the JSON control payloads they
//! are hand-packed with `byteorder` (network byte order), the same way the
//! frame header is:
//!
//! ```text
//! [ID_LEN:2][ID:n][SEQ:4][IS_LAST:1][COMPRESSION:1][ORIGINAL_SIZE:8][DATA_LEN:4][DATA:m]
//! ```
//!
//! `ORIGINAL_SIZE` is the uncompressed byte count of this chunk's span; when
//! compression is GZIP, `DATA` holds the compressed bytes.

use crate::error::{ProtocolError, Result};
use crate::types::Compression;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// One ordered slice of an artifact in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactChunk {
    /// Lowercase hex SHA-256 of the whole (uncompressed) artifact
    pub artifact_id: String,
    /// 0-based position within the transfer
    pub seq: u32,
    pub is_last: bool,
    pub compression: Compression,
    /// Uncompressed length of this chunk's data
    pub original_size: u64,
    pub data: Vec<u8>,
}

impl ArtifactChunk {
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(20 + self.artifact_id.len() + self.data.len());

        let id_bytes = self.artifact_id.as_bytes();
        if id_bytes.len() > u16::MAX as usize {
            return Err(ProtocolError::BadChunkId);
        }
        buf.write_u16::<BigEndian>(id_bytes.len() as u16)?;
        buf.write_all(id_bytes)?;
        buf.write_u32::<BigEndian>(self.seq)?;
        buf.write_u8(self.is_last as u8)?;
        buf.write_u8(self.compression.as_u8())?;
        buf.write_u64::<BigEndian>(self.original_size)?;
        buf.write_u32::<BigEndian>(self.data.len() as u32)?;
        buf.write_all(&self.data)?;

        Ok(buf)
    }

    pub fn unpack(payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);

        let id_len = cursor.read_u16::<BigEndian>().map_err(|_| truncated(&cursor))? as usize;
        let mut id_bytes = vec![0u8; id_len];
        cursor
            .read_exact(&mut id_bytes)
            .map_err(|_| truncated(&cursor))?;
        let artifact_id =
            String::from_utf8(id_bytes).map_err(|_| ProtocolError::BadChunkId)?;

        let seq = cursor.read_u32::<BigEndian>().map_err(|_| truncated(&cursor))?;
        let is_last = cursor.read_u8().map_err(|_| truncated(&cursor))? != 0;
        let compression_raw = cursor.read_u8().map_err(|_| truncated(&cursor))?;
        let compression = Compression::from_u8(compression_raw)
            .ok_or(ProtocolError::UnknownCompression(compression_raw))?;
        let original_size = cursor.read_u64::<BigEndian>().map_err(|_| truncated(&cursor))?;

        let data_len = cursor.read_u32::<BigEndian>().map_err(|_| truncated(&cursor))? as usize;
        let mut data = vec![0u8; data_len];
        cursor
            .read_exact(&mut data)
            .map_err(|_| truncated(&cursor))?;

        Ok(Self {
            artifact_id,
            seq,
            is_last,
            compression,
            original_size,
            data,
        })
    }
}

fn truncated(cursor: &Cursor<&[u8]>) -> ProtocolError {
    ProtocolError::TruncatedChunk {
        offset: cursor.position() as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> ArtifactChunk {
        ArtifactChunk {
            artifact_id: "ab".repeat(32),
            seq: 7,
            is_last: true,
            compression: Compression::Gzip,
            original_size: 65_536,
            data: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn test_chunk_round_trip() {
        let chunk = sample_chunk();
        let packed = chunk.pack().unwrap();
        let unpacked = ArtifactChunk::unpack(&packed).unwrap();
        assert_eq!(chunk, unpacked);
    }

    #[test]
    fn test_chunk_empty_data() {
        let mut chunk = sample_chunk();
        chunk.data = vec![];
        chunk.compression = Compression::None;
        let packed = chunk.pack().unwrap();
        assert_eq!(ArtifactChunk::unpack(&packed).unwrap(), chunk);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let packed = sample_chunk().pack().unwrap();
        let result = ArtifactChunk::unpack(&packed[..packed.len() - 2]);
        assert!(matches!(result, Err(ProtocolError::TruncatedChunk { .. })));
    }

    #[test]
    fn test_invalid_compression_rejected() {
        let mut packed = sample_chunk().pack().unwrap();
        // Compression byte sits after the 2-byte id length, 64-byte id,
        // 4-byte seq and 1-byte is_last flag.
        let compression_offset = 2 + 64 + 4 + 1;
        packed[compression_offset] = 0xFF;
        let result = ArtifactChunk::unpack(&packed);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownCompression(0xFF))
        ));
    }
}
