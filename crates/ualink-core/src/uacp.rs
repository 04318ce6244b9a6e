// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! uacp chunk framing.
//!
//! Every unit on the wire is a chunk: an 8-byte header (three ASCII bytes
//! of message type, one chunk-type byte, and the total chunk size) followed
//! by the type-specific payload. The Hello/Acknowledge exchange negotiates
//! the buffer, message-size, and chunk-count limits that bind the secure
//! channel's chunking; an Error chunk carries a status code and terminates
//! the connection.

use bytes::{Bytes, BytesMut};

use crate::codec::{self, BinaryDecode, BinaryEncode, CodecError};
use crate::status::StatusCode;

/// Size of the chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// The single wire protocol version this stack speaks.
pub const PROTOCOL_VERSION: u32 = 0;

// =============================================================================
// Message and chunk types
// =============================================================================

/// The message type carried in the first three header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client hello.
    Hello,
    /// Server acknowledge.
    Acknowledge,
    /// Reverse hello (server-initiated connections).
    ReverseHello,
    /// Fatal error notification.
    Error,
    /// OpenSecureChannel exchange.
    Open,
    /// Secured service message.
    Message,
    /// CloseSecureChannel notification.
    Close,
}

impl MessageType {
    /// The three ASCII bytes for this message type.
    pub const fn as_bytes(self) -> [u8; 3] {
        match self {
            Self::Hello => *b"HEL",
            Self::Acknowledge => *b"ACK",
            Self::ReverseHello => *b"RHE",
            Self::Error => *b"ERR",
            Self::Open => *b"OPN",
            Self::Message => *b"MSG",
            Self::Close => *b"CLO",
        }
    }

    /// Parses the three ASCII bytes of a chunk header.
    pub fn from_bytes(bytes: [u8; 3]) -> Option<Self> {
        match &bytes {
            b"HEL" => Some(Self::Hello),
            b"ACK" => Some(Self::Acknowledge),
            b"RHE" => Some(Self::ReverseHello),
            b"ERR" => Some(Self::Error),
            b"OPN" => Some(Self::Open),
            b"MSG" => Some(Self::Message),
            b"CLO" => Some(Self::Close),
            _ => None,
        }
    }
}

/// The chunk continuation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// An intermediate chunk of a multi-chunk message.
    Intermediate,
    /// The final (or only) chunk of a message.
    Final,
    /// Abort: discard all buffered chunks of this request.
    Abort,
}

impl ChunkType {
    /// The ASCII byte for this chunk type.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Intermediate => b'C',
            Self::Final => b'F',
            Self::Abort => b'A',
        }
    }

    /// Parses the chunk-type byte of a chunk header.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'C' => Some(Self::Intermediate),
            b'F' => Some(Self::Final),
            b'A' => Some(Self::Abort),
            _ => None,
        }
    }
}

// =============================================================================
// Chunk header
// =============================================================================

/// The 8-byte header present on every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Message type.
    pub message_type: MessageType,
    /// Continuation marker.
    pub chunk_type: ChunkType,
    /// Total chunk size including this header.
    pub size: u32,
}

impl ChunkHeader {
    /// Encodes the header into an 8-byte array.
    pub fn to_bytes(self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out[..3].copy_from_slice(&self.message_type.as_bytes());
        out[3] = self.chunk_type.as_byte();
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decodes a header from 8 raw bytes.
    pub fn from_bytes(raw: [u8; CHUNK_HEADER_SIZE]) -> Result<Self, CodecError> {
        let message_type = MessageType::from_bytes([raw[0], raw[1], raw[2]]).ok_or(
            CodecError::InvalidDiscriminant {
                what: "message type",
                value: raw[0],
            },
        )?;
        let chunk_type =
            ChunkType::from_byte(raw[3]).ok_or(CodecError::InvalidDiscriminant {
                what: "chunk type",
                value: raw[3],
            })?;
        let size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(Self {
            message_type,
            chunk_type,
            size,
        })
    }
}

// =============================================================================
// Handshake payloads
// =============================================================================

/// Client hello: advertises the client's limits and target endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Wire protocol version.
    pub protocol_version: u32,
    /// Largest chunk the client will accept.
    pub receive_buffer_size: u32,
    /// Largest chunk the client will send.
    pub send_buffer_size: u32,
    /// Largest reassembled message the client will accept (0 = no limit).
    pub max_message_size: u32,
    /// Largest chunk count per message the client will accept (0 = no limit).
    pub max_chunk_count: u32,
    /// The endpoint url the client is connecting to.
    pub endpoint_url: String,
}

impl BinaryEncode for Hello {
    fn encode(&self, buf: &mut BytesMut) {
        self.protocol_version.encode(buf);
        self.receive_buffer_size.encode(buf);
        self.send_buffer_size.encode(buf);
        self.max_message_size.encode(buf);
        self.max_chunk_count.encode(buf);
        codec::write_string(buf, Some(&self.endpoint_url));
    }
}

impl BinaryDecode for Hello {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: codec::read_u32(buf)?,
            receive_buffer_size: codec::read_u32(buf)?,
            send_buffer_size: codec::read_u32(buf)?,
            max_message_size: codec::read_u32(buf)?,
            max_chunk_count: codec::read_u32(buf)?,
            endpoint_url: codec::read_string(buf)?.unwrap_or_default(),
        })
    }
}

/// Server acknowledge: the limits both sides must honor from now on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge {
    /// Wire protocol version.
    pub protocol_version: u32,
    /// Largest chunk the server will accept (binds the client's sends).
    pub receive_buffer_size: u32,
    /// Largest chunk the server will send.
    pub send_buffer_size: u32,
    /// Largest reassembled message (0 = no limit).
    pub max_message_size: u32,
    /// Largest chunk count per message (0 = no limit).
    pub max_chunk_count: u32,
}

impl BinaryEncode for Acknowledge {
    fn encode(&self, buf: &mut BytesMut) {
        self.protocol_version.encode(buf);
        self.receive_buffer_size.encode(buf);
        self.send_buffer_size.encode(buf);
        self.max_message_size.encode(buf);
        self.max_chunk_count.encode(buf);
    }
}

impl BinaryDecode for Acknowledge {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: codec::read_u32(buf)?,
            receive_buffer_size: codec::read_u32(buf)?,
            send_buffer_size: codec::read_u32(buf)?,
            max_message_size: codec::read_u32(buf)?,
            max_chunk_count: codec::read_u32(buf)?,
        })
    }
}

/// Error chunk payload: a status code and an optional reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// The status code describing the failure.
    pub error: StatusCode,
    /// Human-readable detail, possibly empty.
    pub reason: String,
}

impl BinaryEncode for ErrorMessage {
    fn encode(&self, buf: &mut BytesMut) {
        self.error.encode(buf);
        codec::write_string(buf, Some(&self.reason));
    }
}

impl BinaryDecode for ErrorMessage {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            error: StatusCode::decode(buf)?,
            reason: codec::read_string(buf)?.unwrap_or_default(),
        })
    }
}

// =============================================================================
// Secure channel headers
// =============================================================================

/// Security header on OPN chunks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AsymmetricSecurityHeader {
    /// The negotiated security policy uri.
    pub security_policy_uri: String,
    /// The sender's certificate, when the policy requires one.
    pub sender_certificate: Option<Vec<u8>>,
    /// Thumbprint of the receiver's certificate.
    pub receiver_certificate_thumbprint: Option<Vec<u8>>,
}

impl BinaryEncode for AsymmetricSecurityHeader {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.security_policy_uri));
        codec::write_bytes(buf, self.sender_certificate.as_deref());
        codec::write_bytes(buf, self.receiver_certificate_thumbprint.as_deref());
    }
}

impl BinaryDecode for AsymmetricSecurityHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            security_policy_uri: codec::read_string(buf)?.unwrap_or_default(),
            sender_certificate: codec::read_bytes(buf)?,
            receiver_certificate_thumbprint: codec::read_bytes(buf)?,
        })
    }
}

/// Security header on MSG/CLO chunks: the active token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricSecurityHeader {
    /// The channel token securing this chunk.
    pub token_id: u32,
}

impl BinaryEncode for SymmetricSecurityHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.token_id.encode(buf);
    }
}

impl BinaryDecode for SymmetricSecurityHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            token_id: codec::read_u32(buf)?,
        })
    }
}

/// Sequence header: per-chunk sequence number and the request id that
/// correlates chunks of the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Monotonically increasing per-channel sequence number.
    pub sequence_number: u32,
    /// Request id shared by all chunks of one message.
    pub request_id: u32,
}

impl BinaryEncode for SequenceHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.sequence_number.encode(buf);
        self.request_id.encode(buf);
    }
}

impl BinaryDecode for SequenceHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            sequence_number: codec::read_u32(buf)?,
            request_id: codec::read_u32(buf)?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_header_roundtrip() {
        let header = ChunkHeader {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            size: 512,
        };
        let raw = header.to_bytes();
        assert_eq!(&raw[..4], b"MSGF");
        assert_eq!(ChunkHeader::from_bytes(raw).unwrap(), header);
    }

    #[test]
    fn test_chunk_header_rejects_garbage() {
        let mut raw = [0u8; CHUNK_HEADER_SIZE];
        raw[..4].copy_from_slice(b"XXXF");
        assert!(ChunkHeader::from_bytes(raw).is_err());

        raw[..4].copy_from_slice(b"MSGZ");
        assert!(ChunkHeader::from_bytes(raw).is_err());
    }

    #[test]
    fn test_hello_roundtrip() {
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 4096,
            endpoint_url: "opc.tcp://localhost:4840".to_string(),
        };
        let mut buf = BytesMut::new();
        hello.encode(&mut buf);
        assert_eq!(Hello::decode(&mut buf.freeze()).unwrap(), hello);
    }

    #[test]
    fn test_error_message_roundtrip() {
        let err = ErrorMessage {
            error: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            reason: "chunk exceeds negotiated limit".to_string(),
        };
        let mut buf = BytesMut::new();
        err.encode(&mut buf);
        assert_eq!(ErrorMessage::decode(&mut buf.freeze()).unwrap(), err);
    }

    #[test]
    fn test_sequence_header_roundtrip() {
        let seq = SequenceHeader {
            sequence_number: 51,
            request_id: 7,
        };
        let mut buf = BytesMut::new();
        seq.encode(&mut buf);
        assert_eq!(SequenceHeader::decode(&mut buf.freeze()).unwrap(), seq);
    }
}
