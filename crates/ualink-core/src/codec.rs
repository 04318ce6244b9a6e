// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary encoding primitives.
//!
//! All integers are little-endian. Strings and byte strings are
//! length-prefixed with an `i32`; a length of `-1` denotes a null value.
//! DateTime values are 100-nanosecond ticks since 1601-01-01 UTC.
//!
//! Structures implement [`BinaryEncode`] and [`BinaryDecode`]; decoding
//! never panics on truncated input and reports [`CodecError`] instead.

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Offset between the OPC UA epoch (1601-01-01) and the Unix epoch, in seconds.
const EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Ticks per second (one tick is 100 ns).
const TICKS_PER_SEC: i64 = 10_000_000;

// =============================================================================
// CodecError
// =============================================================================

/// Errors produced while decoding OPC UA binary data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before the value was complete.
    #[error("unexpected end of stream while decoding {0}")]
    UnexpectedEof(&'static str),

    /// A length prefix was negative (and not the null sentinel) or too large.
    #[error("invalid length {length} while decoding {what}")]
    InvalidLength {
        /// What was being decoded.
        what: &'static str,
        /// The offending length value.
        length: i64,
    },

    /// A discriminant byte had no known mapping.
    #[error("invalid {what} discriminant {value:#04x}")]
    InvalidDiscriminant {
        /// What was being decoded.
        what: &'static str,
        /// The offending byte.
        value: u8,
    },

    /// A string field contained invalid UTF-8.
    #[error("invalid utf-8 while decoding {0}")]
    InvalidUtf8(&'static str),

    /// The message body's type id is not one the core understands.
    #[error("unknown message type id {0}")]
    UnknownTypeId(u32),
}

// =============================================================================
// Traits
// =============================================================================

/// A value that can be written in OPC UA binary form.
pub trait BinaryEncode {
    /// Appends the binary form of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// A value that can be read from OPC UA binary form.
pub trait BinaryDecode: Sized {
    /// Consumes the binary form of `Self` from the front of `buf`.
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError>;
}

// =============================================================================
// Primitive helpers
// =============================================================================

fn ensure(buf: &Bytes, n: usize, what: &'static str) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::UnexpectedEof(what))
    } else {
        Ok(())
    }
}

/// Reads a single byte.
pub fn read_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    ensure(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

/// Reads a boolean encoded as a single byte.
pub fn read_bool(buf: &mut Bytes) -> Result<bool, CodecError> {
    Ok(read_u8(buf)? != 0)
}

/// Reads a little-endian `u16`.
pub fn read_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    ensure(buf, 2, "u16")?;
    Ok(buf.get_u16_le())
}

/// Reads a little-endian `i32`.
pub fn read_i32(buf: &mut Bytes) -> Result<i32, CodecError> {
    ensure(buf, 4, "i32")?;
    Ok(buf.get_i32_le())
}

/// Reads a little-endian `u32`.
pub fn read_u32(buf: &mut Bytes) -> Result<u32, CodecError> {
    ensure(buf, 4, "u32")?;
    Ok(buf.get_u32_le())
}

/// Reads a little-endian `i64`.
pub fn read_i64(buf: &mut Bytes) -> Result<i64, CodecError> {
    ensure(buf, 8, "i64")?;
    Ok(buf.get_i64_le())
}

/// Reads a little-endian `u64`.
pub fn read_u64(buf: &mut Bytes) -> Result<u64, CodecError> {
    ensure(buf, 8, "u64")?;
    Ok(buf.get_u64_le())
}

/// Reads a little-endian `f32`.
pub fn read_f32(buf: &mut Bytes) -> Result<f32, CodecError> {
    ensure(buf, 4, "f32")?;
    Ok(buf.get_f32_le())
}

/// Reads a little-endian `f64`.
pub fn read_f64(buf: &mut Bytes) -> Result<f64, CodecError> {
    ensure(buf, 8, "f64")?;
    Ok(buf.get_f64_le())
}

/// Writes a boolean as a single byte.
pub fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.extend_from_slice(&[u8::from(value)]);
}

/// Writes a UA string (`-1` length for null).
pub fn write_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(s) => {
            buf.extend_from_slice(&(s.len() as i32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        None => buf.extend_from_slice(&(-1i32).to_le_bytes()),
    }
}

/// Reads a UA string.
pub fn read_string(buf: &mut Bytes) -> Result<Option<String>, CodecError> {
    match read_bytes(buf)? {
        Some(raw) => String::from_utf8(raw)
            .map(Some)
            .map_err(|_| CodecError::InvalidUtf8("string")),
        None => Ok(None),
    }
}

/// Writes a UA byte string (`-1` length for null).
pub fn write_bytes(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(b) => {
            buf.extend_from_slice(&(b.len() as i32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        None => buf.extend_from_slice(&(-1i32).to_le_bytes()),
    }
}

/// Reads a UA byte string.
pub fn read_bytes(buf: &mut Bytes) -> Result<Option<Vec<u8>>, CodecError> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(buf, len, "byte string")?;
    Ok(Some(buf.copy_to_bytes(len).to_vec()))
}

/// Writes a UA DateTime as 100 ns ticks since 1601-01-01.
pub fn write_datetime(buf: &mut BytesMut, value: DateTime<Utc>) {
    buf.extend_from_slice(&datetime_to_ticks(value).to_le_bytes());
}

/// Reads a UA DateTime.
pub fn read_datetime(buf: &mut Bytes) -> Result<DateTime<Utc>, CodecError> {
    Ok(ticks_to_datetime(read_i64(buf)?))
}

/// Writes an optional UA DateTime; `None` becomes the null value (tick 0).
pub fn write_datetime_opt(buf: &mut BytesMut, value: Option<DateTime<Utc>>) {
    match value {
        Some(value) => write_datetime(buf, value),
        None => buf.extend_from_slice(&0i64.to_le_bytes()),
    }
}

/// Reads an optional UA DateTime; the null value (tick 0) becomes `None`.
pub fn read_datetime_opt(buf: &mut Bytes) -> Result<Option<DateTime<Utc>>, CodecError> {
    let ticks = read_i64(buf)?;
    if ticks == 0 {
        Ok(None)
    } else {
        Ok(Some(ticks_to_datetime(ticks)))
    }
}

/// Writes a GUID in the OPC UA field layout.
pub fn write_guid(buf: &mut BytesMut, value: &Uuid) {
    let (d1, d2, d3, d4) = value.as_fields();
    buf.extend_from_slice(&d1.to_le_bytes());
    buf.extend_from_slice(&d2.to_le_bytes());
    buf.extend_from_slice(&d3.to_le_bytes());
    buf.extend_from_slice(d4);
}

/// Reads a GUID in the OPC UA field layout.
pub fn read_guid(buf: &mut Bytes) -> Result<Uuid, CodecError> {
    let d1 = read_u32(buf)?;
    let d2 = read_u16(buf)?;
    let d3 = read_u16(buf)?;
    ensure(buf, 8, "guid")?;
    let mut d4 = [0u8; 8];
    buf.copy_to_slice(&mut d4);
    Ok(Uuid::from_fields(d1, d2, d3, &d4))
}

/// Writes a length-prefixed array (`-1` length for null, which the core
/// never produces; empty arrays encode as length 0).
pub fn write_array<T: BinaryEncode>(buf: &mut BytesMut, values: &[T]) {
    buf.extend_from_slice(&(values.len() as i32).to_le_bytes());
    for value in values {
        value.encode(buf);
    }
}

/// Reads a length-prefixed array; a null array decodes as empty.
pub fn read_array<T: BinaryDecode>(buf: &mut Bytes) -> Result<Vec<T>, CodecError> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    // Each element takes at least one byte; reject lengths the buffer
    // cannot possibly satisfy before allocating.
    if len > buf.remaining() {
        return Err(CodecError::InvalidLength {
            what: "array",
            length: len as i64,
        });
    }
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(T::decode(buf)?);
    }
    Ok(values)
}

/// Writes a length-prefixed string array.
pub fn write_string_array(buf: &mut BytesMut, values: &[String]) {
    buf.extend_from_slice(&(values.len() as i32).to_le_bytes());
    for value in values {
        write_string(buf, Some(value));
    }
}

/// Reads a length-prefixed string array; null entries decode as empty strings.
pub fn read_string_array(buf: &mut Bytes) -> Result<Vec<String>, CodecError> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    if len > buf.remaining() {
        return Err(CodecError::InvalidLength {
            what: "string array",
            length: len as i64,
        });
    }
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(read_string(buf)?.unwrap_or_default());
    }
    Ok(values)
}

fn datetime_to_ticks(value: DateTime<Utc>) -> i64 {
    let secs = value.timestamp().saturating_add(EPOCH_OFFSET_SECS);
    let sub_ticks = i64::from(value.timestamp_subsec_nanos()) / 100;
    secs.saturating_mul(TICKS_PER_SEC).saturating_add(sub_ticks)
}

fn ticks_to_datetime(ticks: i64) -> DateTime<Utc> {
    let unix_ticks = ticks.saturating_sub(EPOCH_OFFSET_SECS * TICKS_PER_SEC);
    let secs = unix_ticks.div_euclid(TICKS_PER_SEC);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SEC) * 100) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// =============================================================================
// Primitive trait impls
// =============================================================================

impl BinaryEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl BinaryDecode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        read_u32(buf)
    }
}

impl BinaryEncode for crate::status::StatusCode {
    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.0.to_le_bytes());
    }
}

impl BinaryDecode for crate::status::StatusCode {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self(read_u32(buf)?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn freeze(buf: BytesMut) -> Bytes {
        buf.freeze()
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, Some("opc.tcp://localhost:4840"));
        write_string(&mut buf, None);
        write_string(&mut buf, Some(""));

        let mut bytes = freeze(buf);
        assert_eq!(
            read_string(&mut bytes).unwrap().as_deref(),
            Some("opc.tcp://localhost:4840")
        );
        assert_eq!(read_string(&mut bytes).unwrap(), None);
        assert_eq!(read_string(&mut bytes).unwrap().as_deref(), Some(""));
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut buf = BytesMut::new();
        write_bytes(&mut buf, Some(&[1, 2, 3]));
        write_bytes(&mut buf, None);

        let mut bytes = freeze(buf);
        assert_eq!(read_bytes(&mut bytes).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_bytes(&mut bytes).unwrap(), None);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let now = Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap();
        let mut buf = BytesMut::new();
        write_datetime(&mut buf, now);
        let mut bytes = freeze(buf);
        assert_eq!(read_datetime(&mut bytes).unwrap(), now);
    }

    #[test]
    fn test_datetime_ua_epoch() {
        // Tick zero is the UA epoch, which predates Unix time.
        let dt = ticks_to_datetime(0);
        assert_eq!(dt.timestamp(), -EPOCH_OFFSET_SECS);
        assert_eq!(datetime_to_ticks(dt), 0);
    }

    #[test]
    fn test_guid_roundtrip() {
        let id = Uuid::new_v4();
        let mut buf = BytesMut::new();
        write_guid(&mut buf, &id);
        let mut bytes = freeze(buf);
        assert_eq!(read_guid(&mut bytes).unwrap(), id);
    }

    #[test]
    fn test_truncated_input() {
        let mut bytes = Bytes::from_static(&[0x01, 0x02]);
        assert_eq!(read_u32(&mut bytes), Err(CodecError::UnexpectedEof("u32")));
    }

    #[test]
    fn test_array_rejects_absurd_length() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(1_000_000i32).to_le_bytes());
        let mut bytes = freeze(buf);
        let err = read_array::<u32>(&mut bytes).unwrap_err();
        assert!(matches!(err, CodecError::InvalidLength { .. }));
    }

    #[test]
    fn test_null_array_decodes_empty() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        let mut bytes = freeze(buf);
        assert_eq!(read_array::<u32>(&mut bytes).unwrap(), Vec::<u32>::new());
    }
}
