// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA node identifiers.
//!
//! A [`NodeId`] is a (namespace, identifier) pair. On the wire it uses
//! one of six encodings selected by the first byte: the compact TwoByte
//! and FourByte forms for small numeric ids, and the full Numeric,
//! String, Guid, and ByteString forms. Encoding always picks the most
//! compact form that can represent the value; decoding accepts all six.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{
    self, BinaryDecode, BinaryEncode, CodecError,
};

const ENCODING_TWO_BYTE: u8 = 0x00;
const ENCODING_FOUR_BYTE: u8 = 0x01;
const ENCODING_NUMERIC: u8 = 0x02;
const ENCODING_STRING: u8 = 0x03;
const ENCODING_GUID: u8 = 0x04;
const ENCODING_BYTE_STRING: u8 = 0x05;

// =============================================================================
// Identifier
// =============================================================================

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Identifier {
    /// Numeric identifier (standard nodes, most compact).
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque byte-string identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={v}"),
            Self::String(v) => write!(f, "s={v}"),
            Self::Guid(v) => write!(f, "g={v}"),
            Self::Opaque(v) => {
                write!(f, "b=")?;
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// NodeId
// =============================================================================

/// An OPC UA node identifier.
///
/// # Examples
///
/// ```
/// use ualink_core::node_id::NodeId;
///
/// let server_state = NodeId::numeric(0, 2256);
/// let tag: NodeId = "ns=2;s=Line1.Motor.Speed".parse().unwrap();
/// assert_eq!(tag.namespace(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    namespace: u16,
    identifier: Identifier,
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub const fn guid(namespace: u16, value: Uuid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node id.
    #[inline]
    pub fn opaque(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(value),
        }
    }

    /// The null node id (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Returns `true` if this is the null node id.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && matches!(self.identifier, Identifier::Numeric(0))
    }

    /// Returns the namespace index.
    #[inline]
    pub const fn namespace(&self) -> u16 {
        self.namespace
    }

    /// Returns the identifier.
    #[inline]
    pub const fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        }
    }
}

/// Error returned when parsing a node id from its text form fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id '{input}': {reason}")]
pub struct ParseNodeIdError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &'static str| ParseNodeIdError {
            input: s.to_string(),
            reason,
        };
        let s = s.trim();

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| fail("missing identifier after namespace"))?;
                let ns = ns.parse().map_err(|_| fail("invalid namespace index"))?;
                (ns, rest)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = rest.strip_prefix("i=") {
            Identifier::Numeric(id.parse().map_err(|_| fail("invalid numeric identifier"))?)
        } else if let Some(id) = rest.strip_prefix("s=") {
            Identifier::String(id.to_string())
        } else if let Some(id) = rest.strip_prefix("g=") {
            Identifier::Guid(Uuid::parse_str(id).map_err(|_| fail("invalid guid identifier"))?)
        } else if let Some(id) = rest.strip_prefix("b=") {
            if id.len() % 2 != 0 {
                return Err(fail("invalid hex identifier"));
            }
            let bytes = (0..id.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&id[i..i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| fail("invalid hex identifier"))?;
            Identifier::Opaque(bytes)
        } else {
            return Err(fail("expected i=, s=, g= or b= identifier"));
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

// =============================================================================
// Wire encoding
// =============================================================================

impl BinaryEncode for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        match &self.identifier {
            Identifier::Numeric(v) => {
                if self.namespace == 0 && *v <= u32::from(u8::MAX) {
                    buf.extend_from_slice(&[ENCODING_TWO_BYTE, *v as u8]);
                } else if self.namespace <= u16::from(u8::MAX) && *v <= u32::from(u16::MAX) {
                    buf.extend_from_slice(&[ENCODING_FOUR_BYTE, self.namespace as u8]);
                    buf.extend_from_slice(&(*v as u16).to_le_bytes());
                } else {
                    buf.extend_from_slice(&[ENCODING_NUMERIC]);
                    buf.extend_from_slice(&self.namespace.to_le_bytes());
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            Identifier::String(v) => {
                buf.extend_from_slice(&[ENCODING_STRING]);
                buf.extend_from_slice(&self.namespace.to_le_bytes());
                codec::write_string(buf, Some(v));
            }
            Identifier::Guid(v) => {
                buf.extend_from_slice(&[ENCODING_GUID]);
                buf.extend_from_slice(&self.namespace.to_le_bytes());
                codec::write_guid(buf, v);
            }
            Identifier::Opaque(v) => {
                buf.extend_from_slice(&[ENCODING_BYTE_STRING]);
                buf.extend_from_slice(&self.namespace.to_le_bytes());
                codec::write_bytes(buf, Some(v));
            }
        }
    }
}

impl BinaryDecode for NodeId {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        // The upper bits of the encoding byte carry namespace-uri/server-index
        // flags for expanded node ids; plain node ids keep them clear.
        let encoding = codec::read_u8(buf)? & 0x0F;
        match encoding {
            ENCODING_TWO_BYTE => Ok(Self::numeric(0, u32::from(codec::read_u8(buf)?))),
            ENCODING_FOUR_BYTE => {
                let ns = u16::from(codec::read_u8(buf)?);
                let id = u32::from(codec::read_u16(buf)?);
                Ok(Self::numeric(ns, id))
            }
            ENCODING_NUMERIC => {
                let ns = codec::read_u16(buf)?;
                let id = codec::read_u32(buf)?;
                Ok(Self::numeric(ns, id))
            }
            ENCODING_STRING => {
                let ns = codec::read_u16(buf)?;
                let id = codec::read_string(buf)?.unwrap_or_default();
                Ok(Self::string(ns, id))
            }
            ENCODING_GUID => {
                let ns = codec::read_u16(buf)?;
                let id = codec::read_guid(buf)?;
                Ok(Self::guid(ns, id))
            }
            ENCODING_BYTE_STRING => {
                let ns = codec::read_u16(buf)?;
                let id = codec::read_bytes(buf)?.unwrap_or_default();
                Ok(Self::opaque(ns, id))
            }
            other => Err(CodecError::InvalidDiscriminant {
                what: "node id encoding",
                value: other,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(id: &NodeId) -> NodeId {
        let mut buf = BytesMut::new();
        id.encode(&mut buf);
        let mut bytes = buf.freeze();
        let decoded = NodeId::decode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 0, "decoder left trailing bytes");
        decoded
    }

    #[test]
    fn test_two_byte_form() {
        let id = NodeId::numeric(0, 84);
        let mut buf = BytesMut::new();
        id.encode(&mut buf);
        assert_eq!(&buf[..], &[0x00, 84]);
        assert_eq!(roundtrip(&id), id);
    }

    #[test]
    fn test_four_byte_form() {
        let id = NodeId::numeric(3, 2256);
        let mut buf = BytesMut::new();
        id.encode(&mut buf);
        assert_eq!(buf[0], 0x01);
        assert_eq!(buf.len(), 4);
        assert_eq!(roundtrip(&id), id);
    }

    #[test]
    fn test_full_numeric_form() {
        let id = NodeId::numeric(300, 0x0010_0000);
        let mut buf = BytesMut::new();
        id.encode(&mut buf);
        assert_eq!(buf[0], 0x02);
        assert_eq!(roundtrip(&id), id);
    }

    #[test]
    fn test_string_guid_opaque_roundtrip() {
        let ids = [
            NodeId::string(2, "Line1.Motor.Speed"),
            NodeId::guid(5, Uuid::new_v4()),
            NodeId::opaque(9, vec![0xDE, 0xAD, 0xBE, 0xEF]),
        ];
        for id in &ids {
            assert_eq!(&roundtrip(id), id);
        }
    }

    #[test]
    fn test_parse_and_display() {
        let id: NodeId = "ns=2;s=Tank.Level".parse().unwrap();
        assert_eq!(id, NodeId::string(2, "Tank.Level"));
        assert_eq!(id.to_string(), "ns=2;s=Tank.Level");

        let id: NodeId = "i=2256".parse().unwrap();
        assert_eq!(id, NodeId::numeric(0, 2256));
        assert_eq!(id.to_string(), "i=2256");

        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("ns=2;x=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_invalid_encoding_byte() {
        let mut bytes = Bytes::from_static(&[0x0E, 0x00]);
        assert!(matches!(
            NodeId::decode(&mut bytes),
            Err(CodecError::InvalidDiscriminant { .. })
        ));
    }

    #[test]
    fn test_null() {
        assert!(NodeId::null().is_null());
        assert!(!NodeId::numeric(0, 1).is_null());
        assert_eq!(NodeId::default(), NodeId::null());
    }
}
