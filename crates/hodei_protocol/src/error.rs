//! Wire-protocol fault taxonomy.
//!
//! Faults split into two families: frame faults (the bytes cannot be a frame
//! at all) and content faults (a well-formed frame carrying something this
//! build cannot accept). The receiving side drops the message either way;
//! retries are always the sender's job, per the transport's
//! recover-once-per-operation policy.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    // Frame faults
    #[error("frame header truncated at {found} of 16 bytes")]
    ShortHeader { found: usize },

    #[error("peer speaks protocol {peer:#04x}, this build speaks {ours:#04x}")]
    VersionSkew { ours: u8, peer: u8 },

    #[error("unknown opcode byte {0:#04x} on the wire")]
    UnknownOpCode(u8),

    #[error("multipart message carried {found} frames, expected {wanted}")]
    FrameCount { wanted: usize, found: usize },

    #[error("header declares a {declared}-byte payload, {found} bytes arrived")]
    PayloadSize { declared: usize, found: usize },

    #[error("payload of {size} bytes exceeds the {limit}-byte frame cap")]
    OversizedPayload { size: usize, limit: usize },

    // Content faults
    #[error("chunk payload ends mid-field at byte {offset}")]
    TruncatedChunk { offset: usize },

    #[error("chunk carries unknown compression tag {0}")]
    UnknownCompression(u8),

    #[error("chunk artifact id is not valid UTF-8 of sane length")]
    BadChunkId,

    #[error("payload does not decode as JSON for its opcode: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Whether the peer sent something structurally unframeable, as opposed
    /// to a well-formed frame with bad content. Transports count the former
    /// against the connection, the latter against the message.
    pub fn is_frame_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::ShortHeader { .. }
                | ProtocolError::VersionSkew { .. }
                | ProtocolError::UnknownOpCode(_)
                | ProtocolError::FrameCount { .. }
                | ProtocolError::PayloadSize { .. }
                | ProtocolError::OversizedPayload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_families() {
        assert!(ProtocolError::UnknownOpCode(0x7F).is_frame_fault());
        assert!(ProtocolError::ShortHeader { found: 3 }.is_frame_fault());
        assert!(!ProtocolError::UnknownCompression(9).is_frame_fault());
        assert!(!ProtocolError::BadChunkId.is_frame_fault());
    }

    #[test]
    fn test_messages_carry_both_sides() {
        let err = ProtocolError::VersionSkew { ours: 1, peer: 4 };
        let text = err.to_string();
        assert!(text.contains("0x04"));
        assert!(text.contains("0x01"));
    }
}
