// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Variant values and data values.
//!
//! [`Variant`] carries the scalar built-in types the connection core
//! needs plus homogeneous arrays of them. [`DataValue`] pairs a variant
//! with a status code and timestamps under the usual encoding mask.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::codec::{self, BinaryDecode, BinaryEncode, CodecError};
use crate::node_id::NodeId;
use crate::status::StatusCode;

const ARRAY_FLAG: u8 = 0x80;

// =============================================================================
// Variant
// =============================================================================

/// An OPC UA variant value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// The empty variant.
    #[default]
    Null,
    /// Boolean.
    Boolean(bool),
    /// Signed 8-bit integer.
    SByte(i8),
    /// Unsigned 8-bit integer.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit IEEE 754 float.
    Float(f32),
    /// 64-bit IEEE 754 double.
    Double(f64),
    /// UTF-8 string (null distinct from empty).
    String(Option<String>),
    /// Date and time.
    DateTime(DateTime<Utc>),
    /// GUID.
    Guid(Uuid),
    /// Byte string.
    ByteString(Option<Vec<u8>>),
    /// Node id.
    NodeId(NodeId),
    /// Status code.
    StatusCode(StatusCode),
    /// Homogeneous array of scalar variants.
    Array(Vec<Variant>),
}

impl Variant {
    /// Returns the built-in type id of this value (0 for null).
    ///
    /// Arrays report the type id of their elements.
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::SByte(_) => 2,
            Self::Byte(_) => 3,
            Self::Int16(_) => 4,
            Self::UInt16(_) => 5,
            Self::Int32(_) => 6,
            Self::UInt32(_) => 7,
            Self::Int64(_) => 8,
            Self::UInt64(_) => 9,
            Self::Float(_) => 10,
            Self::Double(_) => 11,
            Self::String(_) => 12,
            Self::DateTime(_) => 13,
            Self::Guid(_) => 14,
            Self::ByteString(_) => 15,
            Self::NodeId(_) => 17,
            Self::StatusCode(_) => 19,
            Self::Array(values) => values.first().map_or(0, Variant::type_id),
        }
    }

    /// Returns `true` if this is the null variant.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to interpret the value as an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Boolean(v) => Some(i64::from(*v)),
            Self::SByte(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Attempts to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Attempts to interpret the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(Some(v)) => Some(v),
            _ => None,
        }
    }

    fn encode_scalar(&self, buf: &mut BytesMut) {
        match self {
            Self::Null => {}
            Self::Boolean(v) => codec::write_bool(buf, *v),
            Self::SByte(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Byte(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::UInt16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::UInt32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::UInt64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::String(v) => codec::write_string(buf, v.as_deref()),
            Self::DateTime(v) => codec::write_datetime(buf, *v),
            Self::Guid(v) => codec::write_guid(buf, v),
            Self::ByteString(v) => codec::write_bytes(buf, v.as_deref()),
            Self::NodeId(v) => v.encode(buf),
            Self::StatusCode(v) => v.encode(buf),
            Self::Array(_) => {}
        }
    }

    fn decode_scalar(type_id: u8, buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(match type_id {
            1 => Self::Boolean(codec::read_bool(buf)?),
            2 => Self::SByte(codec::read_u8(buf)? as i8),
            3 => Self::Byte(codec::read_u8(buf)?),
            4 => Self::Int16(codec::read_u16(buf)? as i16),
            5 => Self::UInt16(codec::read_u16(buf)?),
            6 => Self::Int32(codec::read_i32(buf)?),
            7 => Self::UInt32(codec::read_u32(buf)?),
            8 => Self::Int64(codec::read_i64(buf)?),
            9 => Self::UInt64(codec::read_u64(buf)?),
            10 => Self::Float(codec::read_f32(buf)?),
            11 => Self::Double(codec::read_f64(buf)?),
            12 => Self::String(codec::read_string(buf)?),
            13 => Self::DateTime(codec::read_datetime(buf)?),
            14 => Self::Guid(codec::read_guid(buf)?),
            15 => Self::ByteString(codec::read_bytes(buf)?),
            17 => Self::NodeId(NodeId::decode(buf)?),
            19 => Self::StatusCode(StatusCode::decode(buf)?),
            other => {
                return Err(CodecError::InvalidDiscriminant {
                    what: "variant type",
                    value: other,
                })
            }
        })
    }
}

impl BinaryEncode for Variant {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Array(values) => {
                buf.extend_from_slice(&[self.type_id() | ARRAY_FLAG]);
                buf.extend_from_slice(&(values.len() as i32).to_le_bytes());
                for value in values {
                    value.encode_scalar(buf);
                }
            }
            scalar => {
                buf.extend_from_slice(&[scalar.type_id()]);
                scalar.encode_scalar(buf);
            }
        }
    }
}

impl BinaryDecode for Variant {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mask = codec::read_u8(buf)?;
        let type_id = mask & 0x3F;
        if type_id == 0 {
            return Ok(Self::Null);
        }
        if mask & ARRAY_FLAG != 0 {
            let len = codec::read_i32(buf)?;
            if len < 0 {
                return Ok(Self::Array(Vec::new()));
            }
            let len = len as usize;
            if len > buf.len() {
                return Err(CodecError::InvalidLength {
                    what: "variant array",
                    length: len as i64,
                });
            }
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(Self::decode_scalar(type_id, buf)?);
            }
            Ok(Self::Array(values))
        } else {
            Self::decode_scalar(type_id, buf)
        }
    }
}

// =============================================================================
// DataValue
// =============================================================================

const DV_HAS_VALUE: u8 = 0x01;
const DV_HAS_STATUS: u8 = 0x02;
const DV_HAS_SOURCE_TS: u8 = 0x04;
const DV_HAS_SERVER_TS: u8 = 0x08;

/// A value with quality and timing information.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value itself, absent when only status is reported.
    pub value: Option<Variant>,
    /// Status of the value; absent means Good.
    pub status: Option<StatusCode>,
    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Timestamp assigned by the server.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a data value holding `value` with Good status.
    pub fn new(value: Variant) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Returns the effective status (Good when unset).
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }
}

impl BinaryEncode for DataValue {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= DV_HAS_VALUE;
        }
        if self.status.is_some() {
            mask |= DV_HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= DV_HAS_SOURCE_TS;
        }
        if self.server_timestamp.is_some() {
            mask |= DV_HAS_SERVER_TS;
        }
        buf.extend_from_slice(&[mask]);
        if let Some(value) = &self.value {
            value.encode(buf);
        }
        if let Some(status) = self.status {
            status.encode(buf);
        }
        if let Some(ts) = self.source_timestamp {
            codec::write_datetime(buf, ts);
        }
        if let Some(ts) = self.server_timestamp {
            codec::write_datetime(buf, ts);
        }
    }
}

impl BinaryDecode for DataValue {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mask = codec::read_u8(buf)?;
        let value = if mask & DV_HAS_VALUE != 0 {
            Some(Variant::decode(buf)?)
        } else {
            None
        };
        let status = if mask & DV_HAS_STATUS != 0 {
            Some(StatusCode::decode(buf)?)
        } else {
            None
        };
        let source_timestamp = if mask & DV_HAS_SOURCE_TS != 0 {
            Some(codec::read_datetime(buf)?)
        } else {
            None
        };
        let server_timestamp = if mask & DV_HAS_SERVER_TS != 0 {
            Some(codec::read_datetime(buf)?)
        } else {
            None
        };
        Ok(Self {
            value,
            status,
            source_timestamp,
            server_timestamp,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
