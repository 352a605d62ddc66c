//! Binary Protocol v1: the Hodei control-plane wire format.
//!
//! Orchestrator <-> Worker communication over a single bidirectional stream.
//! Control plane only: artifact bytes ride the same stream as length-prefixed
//! binary chunk payloads, everything else is JSON.
//!
//! # Frame format
//!
//! Header: 16 bytes, network byte order (big endian)
//! ```text
//! [VER:1][OP:1][FLAGS:2][SEQ:8][LEN:4]
//! ```
//!
//! - VER (u8): protocol version (0x01)
//! - OP (u8): opcode
//! - FLAGS (u16): reserved, zero
//! - SEQ (u64): per-connection monotone frame sequence (FIFO check)
//! - LEN (u32): payload length in bytes
//!
//! IDs travel as opaque strings inside payloads, never in the header.

pub mod chunk;
pub mod defaults;
pub mod error;
pub mod types;

pub use chunk::ArtifactChunk;
pub use error::{ProtocolError, Result};
pub use types::{
    validate_artifact_id,
    ArtifactAckPayload,
    ArtifactIdError,
    ArtifactRef,
    CacheEntry,
    CacheQueryPayload,
    CacheResponsePayload,
    CancelJobPayload,
    Compression,
    ExecutionStatus,
    HeartbeatPayload,
    JobContent,
    JobPriority,
    JobRequestPayload,
    JobStatus,
    LogChunkPayload,
    LogStream,
    PoolKind,
    PoolStatus,
    QuotaPolicyMode,
    RegisterPayload,
    RegisteredPayload,
    ResourceSpec,
    RetryPolicy,
    ShutdownPayload,
    StatusUpdatePayload,
    WireTimestamp,
    WorkerStatus,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (largest chunk plus codec overhead, rounded up)
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

/// Control-plane opcodes. Worker -> server in the low range, server -> worker
/// above 0x10 so a dump of raw frames reads unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Worker -> Server
    Register = 1,      // "I am worker W in pool P with these resources."
    Heartbeat = 2,     // "Still alive; here is my status and load."
    StatusUpdate = 3,  // "Execution X changed phase."
    LogChunk = 4,      // "Execution X wrote this log line."
    ArtifactAck = 5,   // "Artifact transfer for X succeeded/failed."
    CacheResponse = 6, // "Of the ids you asked about, these are cached."

    // Server -> Worker
    Registered = 0x11,    // Handshake result with session token
    JobRequest = 0x12,    // "Run this job as execution X."
    ArtifactChunk = 0x13, // One slice of artifact bytes
    CacheQuery = 0x14,    // "Which of these artifacts do you hold?"
    CancelJob = 0x15,     // "Stop execution X."
    Shutdown = 0x16,      // "Drain and exit."
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::Register),
            2 => Ok(OpCode::Heartbeat),
            3 => Ok(OpCode::StatusUpdate),
            4 => Ok(OpCode::LogChunk),
            5 => Ok(OpCode::ArtifactAck),
            6 => Ok(OpCode::CacheResponse),
            0x11 => Ok(OpCode::Registered),
            0x12 => Ok(OpCode::JobRequest),
            0x13 => Ok(OpCode::ArtifactChunk),
            0x14 => Ok(OpCode::CacheQuery),
            0x15 => Ok(OpCode::CancelJob),
            0x16 => Ok(OpCode::Shutdown),
            _ => Err(ProtocolError::UnknownOpCode(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    pub flags: u16,
    pub seq: u64,
    pub payload_len: u32,
}

impl Header {
    pub fn new(opcode: OpCode, seq: u64, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            flags: 0,
            seq,
            payload_len,
        }
    }

    /// Pack header into a 16-byte buffer (network byte order).
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.flags)?;
        cursor.write_u64::<BigEndian>(self.seq)?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from a 16-byte buffer.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::ShortHeader { found: data.len() });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let flags = cursor.read_u16::<BigEndian>()?;
        let seq = cursor.read_u64::<BigEndian>()?;
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionSkew {
                ours: PROTOCOL_VERSION,
                peer: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            flags,
            seq,
            payload_len,
        })
    }
}

/// Protocol frame (header + payload)
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame. Errors if the payload exceeds MAX_PAYLOAD_SIZE.
    pub fn new(opcode: OpCode, seq: u64, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPayload {
                size: payload.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }
        let header = Header::new(opcode, seq, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Create a frame carrying a JSON control payload.
    pub fn json<T: Serialize>(opcode: OpCode, seq: u64, payload: &T) -> Result<Self> {
        Self::new(opcode, seq, serde_json::to_vec(payload)?)
    }

    /// Create a frame carrying a binary artifact chunk payload.
    pub fn chunk(seq: u64, chunk: &ArtifactChunk) -> Result<Self> {
        Self::new(OpCode::ArtifactChunk, seq, chunk.pack()?)
    }

    /// Decode this frame's JSON control payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decode this frame's binary chunk payload.
    pub fn decode_chunk(&self) -> Result<ArtifactChunk> {
        ArtifactChunk::unpack(&self.payload)
    }

    /// Pack into transport frames (header, payload).
    pub fn pack(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let header_bytes = self.header.pack()?.to_vec();
        Ok((header_bytes, self.payload.clone()))
    }

    /// Unpack from transport frames.
    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() < 2 {
            return Err(ProtocolError::FrameCount {
                wanted: 2,
                found: frames.len(),
            });
        }

        let header = Header::unpack(&frames[0])?;
        let payload = frames[1].clone();

        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::PayloadSize {
                declared: header.payload_len as usize,
                found: payload.len(),
            });
        }

        Ok(Self { header, payload })
    }
}
