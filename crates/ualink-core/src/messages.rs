// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA service messages.
//!
//! The request and response structures exchanged by the connection core,
//! together with the strongly typed [`Request`] and [`Response`] enums
//! that replace runtime reflection with compile-time dispatch: a message
//! body on the wire is a node id naming the concrete type followed by the
//! structure itself, and [`Response::decode`] turns that back into the
//! matching enum variant. Callers that expect a specific response type use
//! the `into_*` accessors, which report an [`InvalidResponse`] carrying
//! the got/want type names on mismatch.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::codec::{self, BinaryDecode, BinaryEncode, CodecError};
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::variant::{DataValue, Variant};

// =============================================================================
// Constants
// =============================================================================

/// The Value attribute id.
pub const ATTRIBUTE_VALUE: u32 = 13;

/// TimestampsToReturn: source only.
pub const TIMESTAMPS_SOURCE: u32 = 0;
/// TimestampsToReturn: server only.
pub const TIMESTAMPS_SERVER: u32 = 1;
/// TimestampsToReturn: both.
pub const TIMESTAMPS_BOTH: u32 = 2;
/// TimestampsToReturn: neither.
pub const TIMESTAMPS_NEITHER: u32 = 3;

/// MonitoringMode: reporting.
pub const MONITORING_REPORTING: u32 = 2;

/// SecurityTokenRequestType: issue a new token.
pub const TOKEN_REQUEST_ISSUE: u32 = 0;
/// SecurityTokenRequestType: renew the current token.
pub const TOKEN_REQUEST_RENEW: u32 = 1;

/// MessageSecurityMode wire value for None.
pub const SECURITY_MODE_NONE: u32 = 1;
/// MessageSecurityMode wire value for Sign.
pub const SECURITY_MODE_SIGN: u32 = 2;
/// MessageSecurityMode wire value for SignAndEncrypt.
pub const SECURITY_MODE_SIGN_AND_ENCRYPT: u32 = 3;

/// UserTokenType: anonymous.
pub const USER_TOKEN_ANONYMOUS: u32 = 0;
/// UserTokenType: user name and password.
pub const USER_TOKEN_USER_NAME: u32 = 1;
/// UserTokenType: X.509 certificate.
pub const USER_TOKEN_CERTIFICATE: u32 = 2;
/// UserTokenType: externally issued token.
pub const USER_TOKEN_ISSUED: u32 = 3;

// =============================================================================
// Support structures
// =============================================================================

/// A locale/text pair with presence mask.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalizedText {
    /// Locale id, e.g. `en-US`.
    pub locale: Option<String>,
    /// The text itself.
    pub text: Option<String>,
}

impl LocalizedText {
    /// Creates a localized text with only the text field set.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: Some(text.into()),
        }
    }
}

impl BinaryEncode for LocalizedText {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= 0x01;
        }
        if self.text.is_some() {
            mask |= 0x02;
        }
        buf.extend_from_slice(&[mask]);
        if let Some(locale) = &self.locale {
            codec::write_string(buf, Some(locale));
        }
        if let Some(text) = &self.text {
            codec::write_string(buf, Some(text));
        }
    }
}

impl BinaryDecode for LocalizedText {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mask = codec::read_u8(buf)?;
        let locale = if mask & 0x01 != 0 {
            codec::read_string(buf)?
        } else {
            None
        };
        let text = if mask & 0x02 != 0 {
            codec::read_string(buf)?
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// The name, null when unset.
    pub name: Option<String>,
}

impl BinaryEncode for QualifiedName {
    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.namespace_index.to_le_bytes());
        codec::write_string(buf, self.name.as_deref());
    }
}

impl BinaryDecode for QualifiedName {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            namespace_index: codec::read_u16(buf)?,
            name: codec::read_string(buf)?,
        })
    }
}

/// Diagnostic information attached to response headers and results.
///
/// The core never fills these in; it decodes whatever the server sends
/// so the surrounding message stays aligned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    /// Index into the string table for the symbolic id.
    pub symbolic_id: Option<i32>,
    /// Index into the string table for the namespace uri.
    pub namespace_uri: Option<i32>,
    /// Index into the string table for the localized text.
    pub localized_text: Option<i32>,
    /// Index into the string table for the locale.
    pub locale: Option<i32>,
    /// Vendor-specific detail.
    pub additional_info: Option<String>,
    /// Status code of a nested operation.
    pub inner_status_code: Option<StatusCode>,
    /// Nested diagnostic info.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncode for DiagnosticInfo {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= 0x01;
        }
        if self.namespace_uri.is_some() {
            mask |= 0x02;
        }
        if self.localized_text.is_some() {
            mask |= 0x04;
        }
        if self.locale.is_some() {
            mask |= 0x08;
        }
        if self.additional_info.is_some() {
            mask |= 0x10;
        }
        if self.inner_status_code.is_some() {
            mask |= 0x20;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= 0x40;
        }
        buf.extend_from_slice(&[mask]);
        if let Some(v) = self.symbolic_id {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.namespace_uri {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.localized_text {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.locale {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = &self.additional_info {
            codec::write_string(buf, Some(v));
        }
        if let Some(v) = self.inner_status_code {
            v.encode(buf);
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(buf);
        }
    }
}

impl BinaryDecode for DiagnosticInfo {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mask = codec::read_u8(buf)?;
        let mut info = Self::default();
        if mask & 0x01 != 0 {
            info.symbolic_id = Some(codec::read_i32(buf)?);
        }
        if mask & 0x02 != 0 {
            info.namespace_uri = Some(codec::read_i32(buf)?);
        }
        if mask & 0x04 != 0 {
            info.localized_text = Some(codec::read_i32(buf)?);
        }
        if mask & 0x08 != 0 {
            info.locale = Some(codec::read_i32(buf)?);
        }
        if mask & 0x10 != 0 {
            info.additional_info = codec::read_string(buf)?;
        }
        if mask & 0x20 != 0 {
            info.inner_status_code = Some(StatusCode::decode(buf)?);
        }
        if mask & 0x40 != 0 {
            info.inner_diagnostic_info = Some(Box::new(DiagnosticInfo::decode(buf)?));
        }
        Ok(info)
    }
}

/// An encoded value together with the node id naming its type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionObject {
    /// Binary-encoding node id of the carried type; null when empty.
    pub type_id: NodeId,
    /// The encoded body, absent for the empty extension object.
    pub body: Option<Vec<u8>>,
}

impl ExtensionObject {
    /// Wraps an encodable value under its binary-encoding type id.
    pub fn from_encodable(type_id: u32, value: &impl BinaryEncode) -> Self {
        let mut body = BytesMut::new();
        value.encode(&mut body);
        Self {
            type_id: NodeId::numeric(0, type_id),
            body: Some(body.to_vec()),
        }
    }

    /// Returns the numeric type id, or 0 for non-numeric/null ids.
    pub fn numeric_type_id(&self) -> u32 {
        self.type_id.as_numeric().unwrap_or(0)
    }

    /// Decodes the body as `T`, failing when the body is absent.
    pub fn decode_body_as<T: BinaryDecode>(&self) -> Result<T, CodecError> {
        let body = self.body.as_ref().ok_or(CodecError::UnexpectedEof(
            "extension object body",
        ))?;
        T::decode(&mut Bytes::from(body.clone()))
    }
}

impl BinaryEncode for ExtensionObject {
    fn encode(&self, buf: &mut BytesMut) {
        self.type_id.encode(buf);
        match &self.body {
            Some(body) => {
                buf.extend_from_slice(&[0x01]);
                codec::write_bytes(buf, Some(body));
            }
            None => buf.extend_from_slice(&[0x00]),
        }
    }
}

impl BinaryDecode for ExtensionObject {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let type_id = NodeId::decode(buf)?;
        let encoding = codec::read_u8(buf)?;
        let body = match encoding {
            0x00 => None,
            // XML bodies are opaque to this stack; keep the raw bytes.
            0x01 | 0x02 => codec::read_bytes(buf)?,
            other => {
                return Err(CodecError::InvalidDiscriminant {
                    what: "extension object encoding",
                    value: other,
                })
            }
        };
        Ok(Self { type_id, body })
    }
}

/// An algorithm/signature pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureData {
    /// Uri of the signature algorithm.
    pub algorithm: Option<String>,
    /// The signature bytes.
    pub signature: Option<Vec<u8>>,
}

impl BinaryEncode for SignatureData {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, self.algorithm.as_deref());
        codec::write_bytes(buf, self.signature.as_deref());
    }
}

impl BinaryDecode for SignatureData {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            algorithm: codec::read_string(buf)?,
            signature: codec::read_bytes(buf)?,
        })
    }
}

/// A software certificate with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignedSoftwareCertificate {
    /// DER certificate bytes.
    pub certificate_data: Option<Vec<u8>>,
    /// Signature over the certificate.
    pub signature: Option<Vec<u8>>,
}

impl BinaryEncode for SignedSoftwareCertificate {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_bytes(buf, self.certificate_data.as_deref());
        codec::write_bytes(buf, self.signature.as_deref());
    }
}

impl BinaryDecode for SignedSoftwareCertificate {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            certificate_data: codec::read_bytes(buf)?,
            signature: codec::read_bytes(buf)?,
        })
    }
}

/// Description of an application (client or server).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationDescription {
    /// Globally unique application uri.
    pub application_uri: String,
    /// Product uri.
    pub product_uri: String,
    /// Human-readable name.
    pub application_name: LocalizedText,
    /// ApplicationType (0 = server, 1 = client, 2 = both, 3 = discovery).
    pub application_type: u32,
    /// Gateway server uri.
    pub gateway_server_uri: Option<String>,
    /// Discovery profile uri.
    pub discovery_profile_uri: Option<String>,
    /// Discovery urls.
    pub discovery_urls: Vec<String>,
}

impl BinaryEncode for ApplicationDescription {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.application_uri));
        codec::write_string(buf, Some(&self.product_uri));
        self.application_name.encode(buf);
        self.application_type.encode(buf);
        codec::write_string(buf, self.gateway_server_uri.as_deref());
        codec::write_string(buf, self.discovery_profile_uri.as_deref());
        codec::write_string_array(buf, &self.discovery_urls);
    }
}

impl BinaryDecode for ApplicationDescription {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            application_uri: codec::read_string(buf)?.unwrap_or_default(),
            product_uri: codec::read_string(buf)?.unwrap_or_default(),
            application_name: LocalizedText::decode(buf)?,
            application_type: codec::read_u32(buf)?,
            gateway_server_uri: codec::read_string(buf)?,
            discovery_profile_uri: codec::read_string(buf)?,
            discovery_urls: codec::read_string_array(buf)?,
        })
    }
}

/// A user-token policy advertised by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserTokenPolicy {
    /// Server-assigned policy id, echoed in identity tokens.
    pub policy_id: String,
    /// UserTokenType wire value.
    pub token_type: u32,
    /// Issued token type uri.
    pub issued_token_type: Option<String>,
    /// Issuer endpoint url.
    pub issuer_endpoint_url: Option<String>,
    /// Security policy uri for the token, when it differs from the channel's.
    pub security_policy_uri: Option<String>,
}

impl BinaryEncode for UserTokenPolicy {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.policy_id));
        self.token_type.encode(buf);
        codec::write_string(buf, self.issued_token_type.as_deref());
        codec::write_string(buf, self.issuer_endpoint_url.as_deref());
        codec::write_string(buf, self.security_policy_uri.as_deref());
    }
}

impl BinaryDecode for UserTokenPolicy {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            policy_id: codec::read_string(buf)?.unwrap_or_default(),
            token_type: codec::read_u32(buf)?,
            issued_token_type: codec::read_string(buf)?,
            issuer_endpoint_url: codec::read_string(buf)?,
            security_policy_uri: codec::read_string(buf)?,
        })
    }
}

/// An endpoint advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointDescription {
    /// The endpoint url.
    pub endpoint_url: String,
    /// The server behind the endpoint.
    pub server: ApplicationDescription,
    /// DER certificate of the server.
    pub server_certificate: Option<Vec<u8>>,
    /// MessageSecurityMode wire value.
    pub security_mode: u32,
    /// Security policy uri.
    pub security_policy_uri: String,
    /// Accepted user token policies.
    pub user_identity_tokens: Vec<UserTokenPolicy>,
    /// Transport profile uri.
    pub transport_profile_uri: String,
    /// Relative security strength used for endpoint selection.
    pub security_level: u8,
}

impl BinaryEncode for EndpointDescription {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.endpoint_url));
        self.server.encode(buf);
        codec::write_bytes(buf, self.server_certificate.as_deref());
        self.security_mode.encode(buf);
        codec::write_string(buf, Some(&self.security_policy_uri));
        codec::write_array(buf, &self.user_identity_tokens);
        codec::write_string(buf, Some(&self.transport_profile_uri));
        buf.extend_from_slice(&[self.security_level]);
    }
}

impl BinaryDecode for EndpointDescription {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            endpoint_url: codec::read_string(buf)?.unwrap_or_default(),
            server: ApplicationDescription::decode(buf)?,
            server_certificate: codec::read_bytes(buf)?,
            security_mode: codec::read_u32(buf)?,
            security_policy_uri: codec::read_string(buf)?.unwrap_or_default(),
            user_identity_tokens: codec::read_array(buf)?,
            transport_profile_uri: codec::read_string(buf)?.unwrap_or_default(),
            security_level: codec::read_u8(buf)?,
        })
    }
}

// =============================================================================
// Headers
// =============================================================================

/// The common request header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestHeader {
    /// The session authentication token; null before a session exists.
    pub authentication_token: NodeId,
    /// Time the request was sent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Client-assigned handle echoed in the response header.
    pub request_handle: u32,
    /// Diagnostics verbosity requested from the server.
    pub return_diagnostics: u32,
    /// Audit entry id.
    pub audit_entry_id: Option<String>,
    /// Suggested processing timeout in milliseconds.
    pub timeout_hint: u32,
    /// Reserved extension point.
    pub additional_header: ExtensionObject,
}

impl BinaryEncode for RequestHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.authentication_token.encode(buf);
        codec::write_datetime_opt(buf, self.timestamp);
        self.request_handle.encode(buf);
        self.return_diagnostics.encode(buf);
        codec::write_string(buf, self.audit_entry_id.as_deref());
        self.timeout_hint.encode(buf);
        self.additional_header.encode(buf);
    }
}

impl BinaryDecode for RequestHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            authentication_token: NodeId::decode(buf)?,
            timestamp: codec::read_datetime_opt(buf)?,
            request_handle: codec::read_u32(buf)?,
            return_diagnostics: codec::read_u32(buf)?,
            audit_entry_id: codec::read_string(buf)?,
            timeout_hint: codec::read_u32(buf)?,
            additional_header: ExtensionObject::decode(buf)?,
        })
    }
}

/// The common response header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseHeader {
    /// Time the response was produced.
    pub timestamp: Option<DateTime<Utc>>,
    /// The handle of the request this response answers.
    pub request_handle: u32,
    /// Overall service result.
    pub service_result: StatusCode,
    /// Service-level diagnostics.
    pub service_diagnostics: DiagnosticInfo,
    /// String table referenced by the diagnostics.
    pub string_table: Vec<String>,
    /// Reserved extension point.
    pub additional_header: ExtensionObject,
}

impl BinaryEncode for ResponseHeader {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_datetime_opt(buf, self.timestamp);
        self.request_handle.encode(buf);
        self.service_result.encode(buf);
        self.service_diagnostics.encode(buf);
        codec::write_string_array(buf, &self.string_table);
        self.additional_header.encode(buf);
    }
}

impl BinaryDecode for ResponseHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp: codec::read_datetime_opt(buf)?,
            request_handle: codec::read_u32(buf)?,
            service_result: StatusCode::decode(buf)?,
            service_diagnostics: DiagnosticInfo::decode(buf)?,
            string_table: codec::read_string_array(buf)?,
            additional_header: ExtensionObject::decode(buf)?,
        })
    }
}

// =============================================================================
// Secure channel services
// =============================================================================

/// OpenSecureChannel request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenSecureChannelRequest {
    /// Common header.
    pub header: RequestHeader,
    /// Client wire protocol version.
    pub client_protocol_version: u32,
    /// Issue or renew.
    pub request_type: u32,
    /// Requested message security mode.
    pub security_mode: u32,
    /// Fresh 32-byte client nonce.
    pub client_nonce: Option<Vec<u8>>,
    /// Requested token lifetime in milliseconds.
    pub requested_lifetime: u32,
}

impl BinaryEncode for OpenSecureChannelRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.client_protocol_version.encode(buf);
        self.request_type.encode(buf);
        self.security_mode.encode(buf);
        codec::write_bytes(buf, self.client_nonce.as_deref());
        self.requested_lifetime.encode(buf);
    }
}

impl BinaryDecode for OpenSecureChannelRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            client_protocol_version: codec::read_u32(buf)?,
            request_type: codec::read_u32(buf)?,
            security_mode: codec::read_u32(buf)?,
            client_nonce: codec::read_bytes(buf)?,
            requested_lifetime: codec::read_u32(buf)?,
        })
    }
}

/// The server-assigned channel token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSecurityToken {
    /// Secure channel id.
    pub channel_id: u32,
    /// Token id; rotates on renewal.
    pub token_id: u32,
    /// Token creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Granted lifetime in milliseconds.
    pub revised_lifetime: u32,
}

impl BinaryEncode for ChannelSecurityToken {
    fn encode(&self, buf: &mut BytesMut) {
        self.channel_id.encode(buf);
        self.token_id.encode(buf);
        codec::write_datetime_opt(buf, self.created_at);
        self.revised_lifetime.encode(buf);
    }
}

impl BinaryDecode for ChannelSecurityToken {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            channel_id: codec::read_u32(buf)?,
            token_id: codec::read_u32(buf)?,
            created_at: codec::read_datetime_opt(buf)?,
            revised_lifetime: codec::read_u32(buf)?,
        })
    }
}

/// OpenSecureChannel response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenSecureChannelResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// Server wire protocol version.
    pub server_protocol_version: u32,
    /// The issued or renewed token.
    pub security_token: ChannelSecurityToken,
    /// Fresh 32-byte server nonce.
    pub server_nonce: Option<Vec<u8>>,
}

impl BinaryEncode for OpenSecureChannelResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.server_protocol_version.encode(buf);
        self.security_token.encode(buf);
        codec::write_bytes(buf, self.server_nonce.as_deref());
    }
}

impl BinaryDecode for OpenSecureChannelResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            server_protocol_version: codec::read_u32(buf)?,
            security_token: ChannelSecurityToken::decode(buf)?,
            server_nonce: codec::read_bytes(buf)?,
        })
    }
}

/// CloseSecureChannel request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSecureChannelRequest {
    /// Common header.
    pub header: RequestHeader,
}

impl BinaryEncode for CloseSecureChannelRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
    }
}

impl BinaryDecode for CloseSecureChannelRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
        })
    }
}

// =============================================================================
// Discovery services
// =============================================================================

/// GetEndpoints request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetEndpointsRequest {
    /// Common header.
    pub header: RequestHeader,
    /// The url the client used to reach the server.
    pub endpoint_url: String,
    /// Preferred locales.
    pub locale_ids: Vec<String>,
    /// Transport profile filter.
    pub profile_uris: Vec<String>,
}

impl BinaryEncode for GetEndpointsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_string(buf, Some(&self.endpoint_url));
        codec::write_string_array(buf, &self.locale_ids);
        codec::write_string_array(buf, &self.profile_uris);
    }
}

impl BinaryDecode for GetEndpointsRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            endpoint_url: codec::read_string(buf)?.unwrap_or_default(),
            locale_ids: codec::read_string_array(buf)?,
            profile_uris: codec::read_string_array(buf)?,
        })
    }
}

/// GetEndpoints response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetEndpointsResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// The advertised endpoints.
    pub endpoints: Vec<EndpointDescription>,
}

impl BinaryEncode for GetEndpointsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.endpoints);
    }
}

impl BinaryDecode for GetEndpointsResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            endpoints: codec::read_array(buf)?,
        })
    }
}

// =============================================================================
// Session services
// =============================================================================

/// CreateSession request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSessionRequest {
    /// Common header; carries no authentication token.
    pub header: RequestHeader,
    /// The client application.
    pub client_description: ApplicationDescription,
    /// Server uri filter.
    pub server_uri: Option<String>,
    /// The endpoint url the client connected to.
    pub endpoint_url: String,
    /// Human-readable session name.
    pub session_name: String,
    /// Fresh 32-byte client nonce.
    pub client_nonce: Option<Vec<u8>>,
    /// DER client certificate.
    pub client_certificate: Option<Vec<u8>>,
    /// Requested session timeout in milliseconds.
    pub requested_session_timeout: f64,
    /// Largest response the client accepts (0 = no limit).
    pub max_response_message_size: u32,
}

impl BinaryEncode for CreateSessionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.client_description.encode(buf);
        codec::write_string(buf, self.server_uri.as_deref());
        codec::write_string(buf, Some(&self.endpoint_url));
        codec::write_string(buf, Some(&self.session_name));
        codec::write_bytes(buf, self.client_nonce.as_deref());
        codec::write_bytes(buf, self.client_certificate.as_deref());
        buf.extend_from_slice(&self.requested_session_timeout.to_le_bytes());
        self.max_response_message_size.encode(buf);
    }
}

impl BinaryDecode for CreateSessionRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            client_description: ApplicationDescription::decode(buf)?,
            server_uri: codec::read_string(buf)?,
            endpoint_url: codec::read_string(buf)?.unwrap_or_default(),
            session_name: codec::read_string(buf)?.unwrap_or_default(),
            client_nonce: codec::read_bytes(buf)?,
            client_certificate: codec::read_bytes(buf)?,
            requested_session_timeout: codec::read_f64(buf)?,
            max_response_message_size: codec::read_u32(buf)?,
        })
    }
}

/// CreateSession response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSessionResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// Server-assigned session id.
    pub session_id: NodeId,
    /// The opaque authentication token for subsequent requests.
    pub authentication_token: NodeId,
    /// Granted session timeout in milliseconds.
    pub revised_session_timeout: f64,
    /// Fresh 32-byte server nonce.
    pub server_nonce: Option<Vec<u8>>,
    /// DER server certificate.
    pub server_certificate: Option<Vec<u8>>,
    /// The server's endpoints, for policy discovery.
    pub server_endpoints: Vec<EndpointDescription>,
    /// Deprecated software certificates.
    pub server_software_certificates: Vec<SignedSoftwareCertificate>,
    /// Server signature over (client certificate ++ client nonce).
    pub server_signature: SignatureData,
    /// Largest request the server accepts (0 = no limit).
    pub max_request_message_size: u32,
}

impl BinaryEncode for CreateSessionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.session_id.encode(buf);
        self.authentication_token.encode(buf);
        buf.extend_from_slice(&self.revised_session_timeout.to_le_bytes());
        codec::write_bytes(buf, self.server_nonce.as_deref());
        codec::write_bytes(buf, self.server_certificate.as_deref());
        codec::write_array(buf, &self.server_endpoints);
        codec::write_array(buf, &self.server_software_certificates);
        self.server_signature.encode(buf);
        self.max_request_message_size.encode(buf);
    }
}

impl BinaryDecode for CreateSessionResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            session_id: NodeId::decode(buf)?,
            authentication_token: NodeId::decode(buf)?,
            revised_session_timeout: codec::read_f64(buf)?,
            server_nonce: codec::read_bytes(buf)?,
            server_certificate: codec::read_bytes(buf)?,
            server_endpoints: codec::read_array(buf)?,
            server_software_certificates: codec::read_array(buf)?,
            server_signature: SignatureData::decode(buf)?,
            max_request_message_size: codec::read_u32(buf)?,
        })
    }
}

/// ActivateSession request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivateSessionRequest {
    /// Common header.
    pub header: RequestHeader,
    /// Client signature over (server certificate ++ server nonce).
    pub client_signature: SignatureData,
    /// Deprecated software certificates.
    pub client_software_certificates: Vec<SignedSoftwareCertificate>,
    /// Preferred locales.
    pub locale_ids: Vec<String>,
    /// The wrapped user identity token.
    pub user_identity_token: ExtensionObject,
    /// Signature proving possession of the user token's key.
    pub user_token_signature: SignatureData,
}

impl BinaryEncode for ActivateSessionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.client_signature.encode(buf);
        codec::write_array(buf, &self.client_software_certificates);
        codec::write_string_array(buf, &self.locale_ids);
        self.user_identity_token.encode(buf);
        self.user_token_signature.encode(buf);
    }
}

impl BinaryDecode for ActivateSessionRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            client_signature: SignatureData::decode(buf)?,
            client_software_certificates: codec::read_array(buf)?,
            locale_ids: codec::read_string_array(buf)?,
            user_identity_token: ExtensionObject::decode(buf)?,
            user_token_signature: SignatureData::decode(buf)?,
        })
    }
}

/// ActivateSession response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivateSessionResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// Rotated 32-byte server nonce for the next activation.
    pub server_nonce: Option<Vec<u8>>,
    /// Per-certificate validation results.
    pub results: Vec<StatusCode>,
    /// Per-certificate diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for ActivateSessionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_bytes(buf, self.server_nonce.as_deref());
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for ActivateSessionResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            server_nonce: codec::read_bytes(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

/// CloseSession request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSessionRequest {
    /// Common header.
    pub header: RequestHeader,
    /// Whether the server should delete the session's subscriptions.
    pub delete_subscriptions: bool,
}

impl BinaryEncode for CloseSessionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_bool(buf, self.delete_subscriptions);
    }
}

impl BinaryDecode for CloseSessionRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            delete_subscriptions: codec::read_bool(buf)?,
        })
    }
}

/// CloseSession response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSessionResponse {
    /// Common header.
    pub header: ResponseHeader,
}

impl BinaryEncode for CloseSessionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
    }
}

impl BinaryDecode for CloseSessionResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
        })
    }
}

// =============================================================================
// Identity tokens
// =============================================================================

/// Anonymous identity token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnonymousIdentityToken {
    /// The policy id advertised by the endpoint.
    pub policy_id: String,
}

impl AnonymousIdentityToken {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 321;
}

impl BinaryEncode for AnonymousIdentityToken {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.policy_id));
    }
}

impl BinaryDecode for AnonymousIdentityToken {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            policy_id: codec::read_string(buf)?.unwrap_or_default(),
        })
    }
}

/// User name and password identity token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserNameIdentityToken {
    /// The policy id advertised by the endpoint.
    pub policy_id: String,
    /// The user name.
    pub user_name: String,
    /// The password, encrypted per the endpoint's token policy.
    pub password: Option<Vec<u8>>,
    /// Uri of the encryption algorithm applied to the password.
    pub encryption_algorithm: Option<String>,
}

impl UserNameIdentityToken {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 324;
}

impl BinaryEncode for UserNameIdentityToken {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.policy_id));
        codec::write_string(buf, Some(&self.user_name));
        codec::write_bytes(buf, self.password.as_deref());
        codec::write_string(buf, self.encryption_algorithm.as_deref());
    }
}

impl BinaryDecode for UserNameIdentityToken {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            policy_id: codec::read_string(buf)?.unwrap_or_default(),
            user_name: codec::read_string(buf)?.unwrap_or_default(),
            password: codec::read_bytes(buf)?,
            encryption_algorithm: codec::read_string(buf)?,
        })
    }
}

/// X.509 certificate identity token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct X509IdentityToken {
    /// The policy id advertised by the endpoint.
    pub policy_id: String,
    /// DER certificate of the user.
    pub certificate_data: Option<Vec<u8>>,
}

impl X509IdentityToken {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 327;
}

impl BinaryEncode for X509IdentityToken {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.policy_id));
        codec::write_bytes(buf, self.certificate_data.as_deref());
    }
}

impl BinaryDecode for X509IdentityToken {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            policy_id: codec::read_string(buf)?.unwrap_or_default(),
            certificate_data: codec::read_bytes(buf)?,
        })
    }
}

/// Externally issued identity token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssuedIdentityToken {
    /// The policy id advertised by the endpoint.
    pub policy_id: String,
    /// The issued token bytes.
    pub token_data: Option<Vec<u8>>,
    /// Encryption algorithm; left empty for server-specific handling.
    pub encryption_algorithm: Option<String>,
}

impl IssuedIdentityToken {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 940;
}

impl BinaryEncode for IssuedIdentityToken {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_string(buf, Some(&self.policy_id));
        codec::write_bytes(buf, self.token_data.as_deref());
        codec::write_string(buf, self.encryption_algorithm.as_deref());
    }
}

impl BinaryDecode for IssuedIdentityToken {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            policy_id: codec::read_string(buf)?.unwrap_or_default(),
            token_data: codec::read_bytes(buf)?,
            encryption_algorithm: codec::read_string(buf)?,
        })
    }
}

// =============================================================================
// Attribute services
// =============================================================================

/// A node/attribute pair to read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadValueId {
    /// The node to read.
    pub node_id: NodeId,
    /// The attribute to read; defaults to Value when zero.
    pub attribute_id: u32,
    /// Array index range.
    pub index_range: Option<String>,
    /// Requested data encoding; null name means server default.
    pub data_encoding: QualifiedName,
}

impl BinaryEncode for ReadValueId {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.attribute_id.encode(buf);
        codec::write_string(buf, self.index_range.as_deref());
        self.data_encoding.encode(buf);
    }
}

impl BinaryDecode for ReadValueId {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            node_id: NodeId::decode(buf)?,
            attribute_id: codec::read_u32(buf)?,
            index_range: codec::read_string(buf)?,
            data_encoding: QualifiedName::decode(buf)?,
        })
    }
}

/// Read request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadRequest {
    /// Common header.
    pub header: RequestHeader,
    /// Oldest acceptable cached value age in milliseconds.
    pub max_age: f64,
    /// Which timestamps to return.
    pub timestamps_to_return: u32,
    /// The nodes to read.
    pub nodes_to_read: Vec<ReadValueId>,
}

impl BinaryEncode for ReadRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.extend_from_slice(&self.max_age.to_le_bytes());
        self.timestamps_to_return.encode(buf);
        codec::write_array(buf, &self.nodes_to_read);
    }
}

impl BinaryDecode for ReadRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            max_age: codec::read_f64(buf)?,
            timestamps_to_return: codec::read_u32(buf)?,
            nodes_to_read: codec::read_array(buf)?,
        })
    }
}

/// Read response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// One data value per requested node, in request order.
    pub results: Vec<DataValue>,
    /// Per-operation diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for ReadResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for ReadResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

/// A node/attribute/value triple to write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteValue {
    /// The node to write.
    pub node_id: NodeId,
    /// The attribute to write.
    pub attribute_id: u32,
    /// Array index range.
    pub index_range: Option<String>,
    /// The value to write.
    pub value: DataValue,
}

impl BinaryEncode for WriteValue {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.attribute_id.encode(buf);
        codec::write_string(buf, self.index_range.as_deref());
        self.value.encode(buf);
    }
}

impl BinaryDecode for WriteValue {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            node_id: NodeId::decode(buf)?,
            attribute_id: codec::read_u32(buf)?,
            index_range: codec::read_string(buf)?,
            value: DataValue::decode(buf)?,
        })
    }
}

/// Write request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    /// Common header.
    pub header: RequestHeader,
    /// The writes to perform.
    pub nodes_to_write: Vec<WriteValue>,
}

impl BinaryEncode for WriteRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.nodes_to_write);
    }
}

impl BinaryDecode for WriteRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            nodes_to_write: codec::read_array(buf)?,
        })
    }
}

/// Write response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// One status per write, in request order.
    pub results: Vec<StatusCode>,
    /// Per-operation diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for WriteResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for WriteResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

// =============================================================================
// Subscription services
// =============================================================================

/// CreateSubscription request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSubscriptionRequest {
    /// Common header.
    pub header: RequestHeader,
    /// Requested publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Requested lifetime in publishing intervals.
    pub requested_lifetime_count: u32,
    /// Requested keep-alive in publishing intervals.
    pub requested_max_keep_alive_count: u32,
    /// Largest notification batch (0 = no limit).
    pub max_notifications_per_publish: u32,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
    /// Relative priority among this session's subscriptions.
    pub priority: u8,
}

impl BinaryEncode for CreateSubscriptionRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.extend_from_slice(&self.requested_publishing_interval.to_le_bytes());
        self.requested_lifetime_count.encode(buf);
        self.requested_max_keep_alive_count.encode(buf);
        self.max_notifications_per_publish.encode(buf);
        codec::write_bool(buf, self.publishing_enabled);
        buf.extend_from_slice(&[self.priority]);
    }
}

impl BinaryDecode for CreateSubscriptionRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            requested_publishing_interval: codec::read_f64(buf)?,
            requested_lifetime_count: codec::read_u32(buf)?,
            requested_max_keep_alive_count: codec::read_u32(buf)?,
            max_notifications_per_publish: codec::read_u32(buf)?,
            publishing_enabled: codec::read_bool(buf)?,
            priority: codec::read_u8(buf)?,
        })
    }
}

/// CreateSubscription response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSubscriptionResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// Server-assigned subscription id, nonzero.
    pub subscription_id: u32,
    /// Granted publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Granted lifetime count.
    pub revised_lifetime_count: u32,
    /// Granted keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

impl BinaryEncode for CreateSubscriptionResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.subscription_id.encode(buf);
        buf.extend_from_slice(&self.revised_publishing_interval.to_le_bytes());
        self.revised_lifetime_count.encode(buf);
        self.revised_max_keep_alive_count.encode(buf);
    }
}

impl BinaryDecode for CreateSubscriptionResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            subscription_id: codec::read_u32(buf)?,
            revised_publishing_interval: codec::read_f64(buf)?,
            revised_lifetime_count: codec::read_u32(buf)?,
            revised_max_keep_alive_count: codec::read_u32(buf)?,
        })
    }
}

/// DeleteSubscriptions request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteSubscriptionsRequest {
    /// Common header.
    pub header: RequestHeader,
    /// The subscriptions to delete.
    pub subscription_ids: Vec<u32>,
}

impl BinaryEncode for DeleteSubscriptionsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.subscription_ids);
    }
}

impl BinaryDecode for DeleteSubscriptionsRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            subscription_ids: codec::read_array(buf)?,
        })
    }
}

/// DeleteSubscriptions response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteSubscriptionsResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// One status per subscription id.
    pub results: Vec<StatusCode>,
    /// Per-operation diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for DeleteSubscriptionsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for DeleteSubscriptionsResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

/// Acknowledgement of a received notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionAcknowledgement {
    /// The subscription the sequence number belongs to.
    pub subscription_id: u32,
    /// The acknowledged sequence number.
    pub sequence_number: u32,
}

impl BinaryEncode for SubscriptionAcknowledgement {
    fn encode(&self, buf: &mut BytesMut) {
        self.subscription_id.encode(buf);
        self.sequence_number.encode(buf);
    }
}

impl BinaryDecode for SubscriptionAcknowledgement {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            subscription_id: codec::read_u32(buf)?,
            sequence_number: codec::read_u32(buf)?,
        })
    }
}

/// Publish request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishRequest {
    /// Common header.
    pub header: RequestHeader,
    /// Acknowledgements for previously delivered sequence numbers.
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl BinaryEncode for PublishRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.subscription_acknowledgements);
    }
}

impl BinaryDecode for PublishRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            subscription_acknowledgements: codec::read_array(buf)?,
        })
    }
}

/// A batch of notifications for one publishing cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationMessage {
    /// Sequence number of this message within the subscription.
    pub sequence_number: u32,
    /// When the message was published.
    pub publish_time: Option<DateTime<Utc>>,
    /// The notification payloads (data changes, events, status changes).
    pub notification_data: Vec<ExtensionObject>,
}

impl BinaryEncode for NotificationMessage {
    fn encode(&self, buf: &mut BytesMut) {
        self.sequence_number.encode(buf);
        codec::write_datetime_opt(buf, self.publish_time);
        codec::write_array(buf, &self.notification_data);
    }
}

impl BinaryDecode for NotificationMessage {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            sequence_number: codec::read_u32(buf)?,
            publish_time: codec::read_datetime_opt(buf)?,
            notification_data: codec::read_array(buf)?,
        })
    }
}

/// Publish response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// The subscription this response belongs to.
    pub subscription_id: u32,
    /// Sequence numbers still available for republish.
    pub available_sequence_numbers: Vec<u32>,
    /// Whether more notifications are queued.
    pub more_notifications: bool,
    /// The notification batch.
    pub notification_message: NotificationMessage,
    /// Results for the acknowledgements of the previous request.
    pub results: Vec<StatusCode>,
    /// Per-acknowledgement diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for PublishResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.subscription_id.encode(buf);
        codec::write_array(buf, &self.available_sequence_numbers);
        codec::write_bool(buf, self.more_notifications);
        self.notification_message.encode(buf);
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for PublishResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            subscription_id: codec::read_u32(buf)?,
            available_sequence_numbers: codec::read_array(buf)?,
            more_notifications: codec::read_bool(buf)?,
            notification_message: NotificationMessage::decode(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

/// Republish request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepublishRequest {
    /// Common header.
    pub header: RequestHeader,
    /// The subscription to replay from.
    pub subscription_id: u32,
    /// The sequence number to retransmit.
    pub retransmit_sequence_number: u32,
}

impl BinaryEncode for RepublishRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.subscription_id.encode(buf);
        self.retransmit_sequence_number.encode(buf);
    }
}

impl BinaryDecode for RepublishRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            subscription_id: codec::read_u32(buf)?,
            retransmit_sequence_number: codec::read_u32(buf)?,
        })
    }
}

/// Republish response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepublishResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// The retransmitted notification message.
    pub notification_message: NotificationMessage,
}

impl BinaryEncode for RepublishResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.notification_message.encode(buf);
    }
}

impl BinaryDecode for RepublishResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            notification_message: NotificationMessage::decode(buf)?,
        })
    }
}

/// Per-subscription result of a transfer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferResult {
    /// StatusOK when the subscription moved to this session.
    pub status_code: StatusCode,
    /// Sequence numbers available for republish after the move.
    pub available_sequence_numbers: Vec<u32>,
}

impl BinaryEncode for TransferResult {
    fn encode(&self, buf: &mut BytesMut) {
        self.status_code.encode(buf);
        codec::write_array(buf, &self.available_sequence_numbers);
    }
}

impl BinaryDecode for TransferResult {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            status_code: StatusCode::decode(buf)?,
            available_sequence_numbers: codec::read_array(buf)?,
        })
    }
}

/// TransferSubscriptions request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferSubscriptionsRequest {
    /// Common header.
    pub header: RequestHeader,
    /// The subscriptions to move to this session.
    pub subscription_ids: Vec<u32>,
    /// Whether the server should resend current values after the move.
    pub send_initial_values: bool,
}

impl BinaryEncode for TransferSubscriptionsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.subscription_ids);
        codec::write_bool(buf, self.send_initial_values);
    }
}

impl BinaryDecode for TransferSubscriptionsRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            subscription_ids: codec::read_array(buf)?,
            send_initial_values: codec::read_bool(buf)?,
        })
    }
}

/// TransferSubscriptions response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferSubscriptionsResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// One result per subscription id, in request order.
    pub results: Vec<TransferResult>,
    /// Per-operation diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for TransferSubscriptionsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for TransferSubscriptionsResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

// =============================================================================
// Monitored items
// =============================================================================

/// Monitoring parameters for one item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoringParameters {
    /// Client-assigned handle echoed in notifications.
    pub client_handle: u32,
    /// Sampling interval in milliseconds; -1 means the publishing interval.
    pub sampling_interval: f64,
    /// Data change filter; empty for none.
    pub filter: ExtensionObject,
    /// Server-side queue depth.
    pub queue_size: u32,
    /// Whether to discard the oldest value on overflow.
    pub discard_oldest: bool,
}

impl BinaryEncode for MonitoringParameters {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_handle.encode(buf);
        buf.extend_from_slice(&self.sampling_interval.to_le_bytes());
        self.filter.encode(buf);
        self.queue_size.encode(buf);
        codec::write_bool(buf, self.discard_oldest);
    }
}

impl BinaryDecode for MonitoringParameters {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            client_handle: codec::read_u32(buf)?,
            sampling_interval: codec::read_f64(buf)?,
            filter: ExtensionObject::decode(buf)?,
            queue_size: codec::read_u32(buf)?,
            discard_oldest: codec::read_bool(buf)?,
        })
    }
}

/// One monitored item to create.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemCreateRequest {
    /// The node/attribute to monitor.
    pub item_to_monitor: ReadValueId,
    /// MonitoringMode wire value.
    pub monitoring_mode: u32,
    /// The requested parameters.
    pub requested_parameters: MonitoringParameters,
}

impl BinaryEncode for MonitoredItemCreateRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.item_to_monitor.encode(buf);
        self.monitoring_mode.encode(buf);
        self.requested_parameters.encode(buf);
    }
}

impl BinaryDecode for MonitoredItemCreateRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            item_to_monitor: ReadValueId::decode(buf)?,
            monitoring_mode: codec::read_u32(buf)?,
            requested_parameters: MonitoringParameters::decode(buf)?,
        })
    }
}

/// Result of creating one monitored item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemCreateResult {
    /// Per-item status.
    pub status_code: StatusCode,
    /// Server-assigned item id.
    pub monitored_item_id: u32,
    /// Granted sampling interval.
    pub revised_sampling_interval: f64,
    /// Granted queue size.
    pub revised_queue_size: u32,
    /// Filter negotiation result.
    pub filter_result: ExtensionObject,
}

impl BinaryEncode for MonitoredItemCreateResult {
    fn encode(&self, buf: &mut BytesMut) {
        self.status_code.encode(buf);
        self.monitored_item_id.encode(buf);
        buf.extend_from_slice(&self.revised_sampling_interval.to_le_bytes());
        self.revised_queue_size.encode(buf);
        self.filter_result.encode(buf);
    }
}

impl BinaryDecode for MonitoredItemCreateResult {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            status_code: StatusCode::decode(buf)?,
            monitored_item_id: codec::read_u32(buf)?,
            revised_sampling_interval: codec::read_f64(buf)?,
            revised_queue_size: codec::read_u32(buf)?,
            filter_result: ExtensionObject::decode(buf)?,
        })
    }
}

/// CreateMonitoredItems request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateMonitoredItemsRequest {
    /// Common header.
    pub header: RequestHeader,
    /// The subscription the items belong to.
    pub subscription_id: u32,
    /// Which timestamps to return in notifications.
    pub timestamps_to_return: u32,
    /// The items to create.
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

impl BinaryEncode for CreateMonitoredItemsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.subscription_id.encode(buf);
        self.timestamps_to_return.encode(buf);
        codec::write_array(buf, &self.items_to_create);
    }
}

impl BinaryDecode for CreateMonitoredItemsRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: RequestHeader::decode(buf)?,
            subscription_id: codec::read_u32(buf)?,
            timestamps_to_return: codec::read_u32(buf)?,
            items_to_create: codec::read_array(buf)?,
        })
    }
}

/// CreateMonitoredItems response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateMonitoredItemsResponse {
    /// Common header.
    pub header: ResponseHeader,
    /// One result per item, in request order.
    pub results: Vec<MonitoredItemCreateResult>,
    /// Per-item diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for CreateMonitoredItemsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        codec::write_array(buf, &self.results);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for CreateMonitoredItemsResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
            results: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

// =============================================================================
// Notification payloads
// =============================================================================

/// A value change for one monitored item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemNotification {
    /// The client handle of the item.
    pub client_handle: u32,
    /// The new value.
    pub value: DataValue,
}

impl BinaryEncode for MonitoredItemNotification {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_handle.encode(buf);
        self.value.encode(buf);
    }
}

impl BinaryDecode for MonitoredItemNotification {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            client_handle: codec::read_u32(buf)?,
            value: DataValue::decode(buf)?,
        })
    }
}

/// Data change notification payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataChangeNotification {
    /// The changed items.
    pub monitored_items: Vec<MonitoredItemNotification>,
    /// Per-item diagnostics.
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl DataChangeNotification {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 811;
}

impl BinaryEncode for DataChangeNotification {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_array(buf, &self.monitored_items);
        codec::write_array(buf, &self.diagnostic_infos);
    }
}

impl BinaryDecode for DataChangeNotification {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            monitored_items: codec::read_array(buf)?,
            diagnostic_infos: codec::read_array(buf)?,
        })
    }
}

/// The fields of one event occurrence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventFieldList {
    /// The client handle of the monitored item.
    pub client_handle: u32,
    /// The selected event fields.
    pub event_fields: Vec<Variant>,
}

impl BinaryEncode for EventFieldList {
    fn encode(&self, buf: &mut BytesMut) {
        self.client_handle.encode(buf);
        codec::write_array(buf, &self.event_fields);
    }
}

impl BinaryDecode for EventFieldList {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            client_handle: codec::read_u32(buf)?,
            event_fields: codec::read_array(buf)?,
        })
    }
}

/// Event notification payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventNotificationList {
    /// The event occurrences.
    pub events: Vec<EventFieldList>,
}

impl EventNotificationList {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 916;
}

impl BinaryEncode for EventNotificationList {
    fn encode(&self, buf: &mut BytesMut) {
        codec::write_array(buf, &self.events);
    }
}

impl BinaryDecode for EventNotificationList {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            events: codec::read_array(buf)?,
        })
    }
}

/// Status change notification payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusChangeNotification {
    /// The new subscription status.
    pub status: StatusCode,
    /// Diagnostics for the change.
    pub diagnostic_info: DiagnosticInfo,
}

impl StatusChangeNotification {
    /// Binary-encoding type id.
    pub const TYPE_ID: u32 = 820;
}

impl BinaryEncode for StatusChangeNotification {
    fn encode(&self, buf: &mut BytesMut) {
        self.status.encode(buf);
        self.diagnostic_info.encode(buf);
    }
}

impl BinaryDecode for StatusChangeNotification {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            status: StatusCode::decode(buf)?,
            diagnostic_info: DiagnosticInfo::decode(buf)?,
        })
    }
}

/// ServiceFault response body: just the header with a bad service result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceFault {
    /// Common header; `service_result` carries the failure.
    pub header: ResponseHeader,
}

impl BinaryEncode for ServiceFault {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
    }
}

impl BinaryDecode for ServiceFault {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            header: ResponseHeader::decode(buf)?,
        })
    }
}

// =============================================================================
// Tagged request/response enums
// =============================================================================

/// Reported when a decoded response is not the type the caller expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid response: got {got}, want {want}")]
pub struct InvalidResponse {
    /// The type that was received.
    pub got: &'static str,
    /// The type that was expected.
    pub want: &'static str,
}

macro_rules! define_request {
    ($($variant:ident($ty:ty) = $id:literal),+ $(,)?) => {
        /// A service request the connection core can send.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $(
                #[doc = concat!("A ", stringify!($variant), " request.")]
                $variant($ty),
            )+
        }

        impl Request {
            /// The binary-encoding type id preceding the body on the wire.
            pub fn type_id(&self) -> u32 {
                match self {
                    $(Self::$variant(_) => $id,)+
                }
            }

            /// The concrete type name, for diagnostics.
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)+
                }
            }

            /// Mutable access to the common request header.
            pub fn header_mut(&mut self) -> &mut RequestHeader {
                match self {
                    $(Self::$variant(body) => &mut body.header,)+
                }
            }

            /// Shared access to the common request header.
            pub fn header(&self) -> &RequestHeader {
                match self {
                    $(Self::$variant(body) => &body.header,)+
                }
            }

            /// Decodes a request from its type id and body.
            pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
                let type_id = NodeId::decode(buf)?;
                match type_id.as_numeric().unwrap_or(0) {
                    $($id => Ok(Self::$variant(<$ty>::decode(buf)?)),)+
                    other => Err(CodecError::UnknownTypeId(other)),
                }
            }
        }

        impl BinaryEncode for Request {
            fn encode(&self, buf: &mut BytesMut) {
                NodeId::numeric(0, self.type_id()).encode(buf);
                match self {
                    $(Self::$variant(body) => body.encode(buf),)+
                }
            }
        }
    };
}

define_request! {
    OpenSecureChannel(OpenSecureChannelRequest) = 446,
    CloseSecureChannel(CloseSecureChannelRequest) = 452,
    GetEndpoints(GetEndpointsRequest) = 428,
    CreateSession(CreateSessionRequest) = 461,
    ActivateSession(ActivateSessionRequest) = 467,
    CloseSession(CloseSessionRequest) = 473,
    Read(ReadRequest) = 631,
    Write(WriteRequest) = 673,
    CreateSubscription(CreateSubscriptionRequest) = 787,
    DeleteSubscriptions(DeleteSubscriptionsRequest) = 847,
    CreateMonitoredItems(CreateMonitoredItemsRequest) = 751,
    Publish(PublishRequest) = 826,
    Republish(RepublishRequest) = 832,
    TransferSubscriptions(TransferSubscriptionsRequest) = 841,
}

impl Request {
    /// Returns `true` for secure-channel control messages, which never
    /// carry a session authentication token.
    pub fn is_channel_control(&self) -> bool {
        matches!(self, Self::OpenSecureChannel(_) | Self::CloseSecureChannel(_))
    }
}

macro_rules! define_response {
    ($($variant:ident($ty:ty) = $id:literal => $into:ident),+ $(,)?) => {
        /// A service response the connection core can receive.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Response {
            $(
                #[doc = concat!("A ", stringify!($variant), " response.")]
                $variant($ty),
            )+
        }

        impl Response {
            /// The binary-encoding type id preceding the body on the wire.
            pub fn type_id(&self) -> u32 {
                match self {
                    $(Self::$variant(_) => $id,)+
                }
            }

            /// The concrete type name, for diagnostics.
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)+
                }
            }

            /// Shared access to the common response header.
            pub fn header(&self) -> &ResponseHeader {
                match self {
                    $(Self::$variant(body) => &body.header,)+
                }
            }

            /// The service result carried in the header.
            pub fn service_result(&self) -> StatusCode {
                self.header().service_result
            }

            /// Decodes a response from its type id and body.
            pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
                let type_id = NodeId::decode(buf)?;
                match type_id.as_numeric().unwrap_or(0) {
                    $($id => Ok(Self::$variant(<$ty>::decode(buf)?)),)+
                    other => Err(CodecError::UnknownTypeId(other)),
                }
            }

            $(
                #[doc = concat!(
                    "Extracts the ", stringify!($variant),
                    " body, reporting got/want names on mismatch."
                )]
                pub fn $into(self) -> Result<$ty, InvalidResponse> {
                    match self {
                        Self::$variant(body) => Ok(body),
                        other => Err(InvalidResponse {
                            got: other.type_name(),
                            want: stringify!($variant),
                        }),
                    }
                }
            )+
        }

        impl BinaryEncode for Response {
            fn encode(&self, buf: &mut BytesMut) {
                NodeId::numeric(0, self.type_id()).encode(buf);
                match self {
                    $(Self::$variant(body) => body.encode(buf),)+
                }
            }
        }
    };
}

define_response! {
    OpenSecureChannel(OpenSecureChannelResponse) = 449 => into_open_secure_channel,
    GetEndpoints(GetEndpointsResponse) = 431 => into_get_endpoints,
    CreateSession(CreateSessionResponse) = 464 => into_create_session,
    ActivateSession(ActivateSessionResponse) = 470 => into_activate_session,
    CloseSession(CloseSessionResponse) = 476 => into_close_session,
    Read(ReadResponse) = 634 => into_read,
    Write(WriteResponse) = 676 => into_write,
    CreateSubscription(CreateSubscriptionResponse) = 790 => into_create_subscription,
    DeleteSubscriptions(DeleteSubscriptionsResponse) = 850 => into_delete_subscriptions,
    CreateMonitoredItems(CreateMonitoredItemsResponse) = 754 => into_create_monitored_items,
    Publish(PublishResponse) = 829 => into_publish,
    Republish(RepublishResponse) = 835 => into_republish,
    TransferSubscriptions(TransferSubscriptionsResponse) = 844 => into_transfer_subscriptions,
    ServiceFault(ServiceFault) = 397 => into_service_fault,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roundtrip_request(req: Request) {
        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        let decoded = Request::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, req);
    }

    fn roundtrip_response(res: Response) {
        let mut buf = BytesMut::new();
        res.encode(&mut buf);
        let decoded = Response::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, res);
    }

    fn header_with_handle(handle: u32) -> RequestHeader {
        RequestHeader {
            request_handle: handle,
            timestamp: Some(Utc.timestamp_opt(1_721_000_000, 0).unwrap()),
            timeout_hint: 10_000,
            ..RequestHeader::default()
        }
    }

    #[test]
    fn test_create_session_roundtrip() {
        roundtrip_request(Request::CreateSession(CreateSessionRequest {
            header: header_with_handle(1),
            client_description: ApplicationDescription {
                application_uri: "urn:ualink:client".into(),
                application_name: LocalizedText::text("ualink"),
                application_type: 1,
                ..ApplicationDescription::default()
            },
            endpoint_url: "opc.tcp://localhost:4840".into(),
            session_name: "ualink-1".into(),
            client_nonce: Some(vec![7u8; 32]),
            requested_session_timeout: 3_600_000.0,
            ..CreateSessionRequest::default()
        }));
    }

    #[test]
    fn test_activate_session_roundtrip() {
        let token = UserNameIdentityToken {
            policy_id: "username".into(),
            user_name: "operator".into(),
            password: Some(vec![1, 2, 3]),
            encryption_algorithm: Some("http://www.w3.org/2001/04/xmlenc#aes256-cbc".into()),
        };
        roundtrip_request(Request::ActivateSession(ActivateSessionRequest {
            header: header_with_handle(2),
            client_signature: SignatureData {
                algorithm: Some("hmac-sha256".into()),
                signature: Some(vec![9u8; 32]),
            },
            user_identity_token: ExtensionObject::from_encodable(
                UserNameIdentityToken::TYPE_ID,
                &token,
            ),
            ..ActivateSessionRequest::default()
        }));
    }

    #[test]
    fn test_publish_response_roundtrip() {
        let change = DataChangeNotification {
            monitored_items: vec![MonitoredItemNotification {
                client_handle: 4,
                value: DataValue::new(Variant::Double(21.5)),
            }],
            diagnostic_infos: Vec::new(),
        };
        roundtrip_response(Response::Publish(PublishResponse {
            subscription_id: 12,
            available_sequence_numbers: vec![41, 42],
            notification_message: NotificationMessage {
                sequence_number: 42,
                publish_time: Some(Utc.timestamp_opt(1_721_000_500, 0).unwrap()),
                notification_data: vec![ExtensionObject::from_encodable(
                    DataChangeNotification::TYPE_ID,
                    &change,
                )],
            },
            ..PublishResponse::default()
        }));
    }

    #[test]
    fn test_transfer_response_roundtrip() {
        roundtrip_response(Response::TransferSubscriptions(
            TransferSubscriptionsResponse {
                results: vec![
                    TransferResult {
                        status_code: StatusCode::GOOD,
                        available_sequence_numbers: vec![7, 8, 9],
                    },
                    TransferResult {
                        status_code: StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                        available_sequence_numbers: Vec::new(),
                    },
                ],
                ..TransferSubscriptionsResponse::default()
            },
        ));
    }

    #[test]
    fn test_notification_body_dispatch() {
        let change = DataChangeNotification::default();
        let wrapped =
            ExtensionObject::from_encodable(DataChangeNotification::TYPE_ID, &change);
        assert_eq!(wrapped.numeric_type_id(), DataChangeNotification::TYPE_ID);
        let decoded: DataChangeNotification = wrapped.decode_body_as().unwrap();
        assert_eq!(decoded, change);
    }

    #[test]
    fn test_invalid_response_reports_got_and_want() {
        let res = Response::ServiceFault(ServiceFault::default());
        let err = res.into_read().unwrap_err();
        assert_eq!(err.got, "ServiceFault");
        assert_eq!(err.want, "Read");
        assert!(err.to_string().contains("got ServiceFault"));
    }

    #[test]
    fn test_unknown_type_id() {
        let mut buf = BytesMut::new();
        NodeId::numeric(0, 99_999).encode(&mut buf);
        assert_eq!(
            Response::decode(&mut buf.freeze()),
            Err(CodecError::UnknownTypeId(99_999))
        );
    }

    #[test]
    fn test_channel_control_classification() {
        let opn = Request::OpenSecureChannel(OpenSecureChannelRequest::default());
        let read = Request::Read(ReadRequest::default());
        assert!(opn.is_channel_control());
        assert!(!read.is_channel_control());
    }
}
