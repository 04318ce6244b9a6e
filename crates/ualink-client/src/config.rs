// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client and session configuration.
//!
//! Both configurations are immutable once built. [`ClientConfig`] governs
//! the transport and secure channel; [`SessionConfig`] governs the
//! authenticated session created on top of it.
//!
//! # Examples
//!
//! ```
//! use ualink_client::config::{ClientConfig, SecurityMode};
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .security_mode(SecurityMode::None)
//!     .build()
//!     .unwrap();
//! assert!(config.auto_reconnect);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Security policy uri for unsecured channels.
pub const SECURITY_POLICY_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

/// Security policy uri for the Basic256Sha256 profile.
pub const SECURITY_POLICY_BASIC256SHA256: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

/// Policy id used when no anonymous endpoint advertises one.
pub const DEFAULT_ANONYMOUS_POLICY_ID: &str = "Anonymous";

/// Signature invoked before redial when the server rejected the client
/// certificate; returns replacement (certificate, private key) DER bytes.
pub type CertificateRefresh = dyn Fn() -> Option<(Vec<u8>, Vec<u8>)> + Send + Sync;

// =============================================================================
// SecurityMode
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Messages are neither signed nor encrypted.
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the wire value for this mode.
    pub const fn wire_value(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Creates a mode from its wire value.
    pub const fn from_wire_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Sign),
            3 => Some(Self::SignAndEncrypt),
            _ => Option::None,
        }
    }

    /// Returns `true` if chunks are signed under this mode.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Sign | Self::SignAndEncrypt)
    }

    /// Returns `true` if chunk bodies are encrypted under this mode.
    #[inline]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::SignAndEncrypt)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" => Ok(Self::SignAndEncrypt),
            _ => Err(ConfigError::InvalidValue {
                field: "security_mode",
                reason: "expected None, Sign or SignAndEncrypt",
            }),
        }
    }
}

// =============================================================================
// IdentityToken
// =============================================================================

/// The user identity presented during session activation.
#[derive(Clone, Default)]
pub enum IdentityToken {
    /// Anonymous access.
    #[default]
    Anonymous,

    /// User name and password.
    UserName {
        /// The user name.
        user: String,
        /// The password; encrypted before it goes on the wire.
        password: String,
    },

    /// X.509 certificate possession proof.
    X509 {
        /// DER certificate of the user.
        certificate: Vec<u8>,
        /// DER private key matching the certificate.
        private_key: Vec<u8>,
    },

    /// Externally issued token (e.g. JWT); handling is server-specific.
    Issued {
        /// The issued token bytes.
        token: Vec<u8>,
    },
}

impl IdentityToken {
    /// Returns the UserTokenType wire value for this identity.
    pub const fn token_type(&self) -> u32 {
        match self {
            Self::Anonymous => ualink_core::messages::USER_TOKEN_ANONYMOUS,
            Self::UserName { .. } => ualink_core::messages::USER_TOKEN_USER_NAME,
            Self::X509 { .. } => ualink_core::messages::USER_TOKEN_CERTIFICATE,
            Self::Issued { .. } => ualink_core::messages::USER_TOKEN_ISSUED,
        }
    }

    /// Returns the variant name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserName { .. } => "UserName",
            Self::X509 { .. } => "X509",
            Self::Issued { .. } => "Issued",
        }
    }
}

// Credentials stay out of debug output.
impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserName { user, .. } => f
                .debug_struct("UserName")
                .field("user", user)
                .finish_non_exhaustive(),
            other => f.write_str(other.name()),
        }
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Connection configuration, immutable once built.
#[derive(Clone)]
pub struct ClientConfig {
    /// Target endpoint url (`opc.tcp://host:port[/path]`).
    pub endpoint: String,
    /// Message security mode.
    pub security_mode: SecurityMode,
    /// Security policy uri.
    pub security_policy_uri: String,
    /// DER client certificate; required for non-None modes.
    pub certificate: Option<Vec<u8>>,
    /// DER private key matching the certificate.
    pub private_key: Option<Vec<u8>>,
    /// Requested secure channel token lifetime.
    pub channel_lifetime: Duration,
    /// Default per-request deadline.
    pub request_timeout: Duration,
    /// Deadline for the TCP dial and handshake.
    pub dial_timeout: Duration,
    /// Whether the supervisor rebuilds failed layers automatically.
    pub auto_reconnect: bool,
    /// Fixed delay between redial attempts during recovery.
    pub reconnect_interval: Duration,
    /// Largest chunk this client accepts.
    pub receive_buffer_size: u32,
    /// Largest reassembled message this client accepts (0 = no limit).
    pub max_message_size: u32,
    /// Largest chunk count per message this client accepts (0 = no limit).
    pub max_chunk_count: u32,
    /// Hook invoked before redial after a certificate rejection.
    pub certificate_refresh: Option<Arc<CertificateRefresh>>,
}

impl ClientConfig {
    /// Returns a builder with defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("security_mode", &self.security_mode)
            .field("security_policy_uri", &self.security_policy_uri)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    endpoint: Option<String>,
    security_mode: SecurityMode,
    security_policy_uri: Option<String>,
    certificate: Option<Vec<u8>>,
    private_key: Option<Vec<u8>>,
    channel_lifetime: Option<Duration>,
    request_timeout: Option<Duration>,
    dial_timeout: Option<Duration>,
    auto_reconnect: Option<bool>,
    reconnect_interval: Option<Duration>,
    receive_buffer_size: Option<u32>,
    max_message_size: Option<u32>,
    max_chunk_count: Option<u32>,
    certificate_refresh: Option<Arc<CertificateRefresh>>,
}

impl ClientConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint url (required).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the message security mode.
    pub fn security_mode(mut self, mode: SecurityMode) -> Self {
        self.security_mode = mode;
        self
    }

    /// Sets the security policy uri.
    pub fn security_policy_uri(mut self, uri: impl Into<String>) -> Self {
        self.security_policy_uri = Some(uri.into());
        self
    }

    /// Sets the DER client certificate.
    pub fn certificate(mut self, certificate: Vec<u8>) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Sets the DER private key.
    pub fn private_key(mut self, private_key: Vec<u8>) -> Self {
        self.private_key = Some(private_key);
        self
    }

    /// Sets the requested secure channel token lifetime.
    pub fn channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.channel_lifetime = Some(lifetime);
        self
    }

    /// Sets the default per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the dial deadline.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Enables or disables automatic reconnection.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    /// Sets the fixed redial interval used during recovery.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = Some(interval);
        self
    }

    /// Sets the largest chunk this client accepts.
    pub fn receive_buffer_size(mut self, size: u32) -> Self {
        self.receive_buffer_size = Some(size);
        self
    }

    /// Sets the largest reassembled message this client accepts.
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Sets the largest per-message chunk count this client accepts.
    pub fn max_chunk_count(mut self, count: u32) -> Self {
        self.max_chunk_count = Some(count);
        self
    }

    /// Installs a hook that can rotate certificate material before a
    /// redial triggered by a certificate rejection.
    pub fn certificate_refresh<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Option<(Vec<u8>, Vec<u8>)> + Send + Sync + 'static,
    {
        self.certificate_refresh = Some(Arc::new(hook));
        self
    }

    /// Validates the configuration and builds it.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let endpoint = self.endpoint.ok_or(ConfigError::MissingEndpoint)?;
        if !endpoint.starts_with("opc.tcp://") {
            return Err(ConfigError::InvalidEndpoint {
                url: endpoint,
                reason: "expected opc.tcp:// scheme",
            });
        }

        let security_mode = self.security_mode;
        if security_mode.is_signed() && (self.certificate.is_none() || self.private_key.is_none())
        {
            return Err(ConfigError::MissingCertificate {
                mode: security_mode.name(),
            });
        }

        let receive_buffer_size = self.receive_buffer_size.unwrap_or(0xFFFF);
        if receive_buffer_size < 8192 {
            return Err(ConfigError::InvalidValue {
                field: "receive_buffer_size",
                reason: "must be at least 8192 bytes",
            });
        }

        Ok(ClientConfig {
            endpoint,
            security_mode,
            security_policy_uri: self
                .security_policy_uri
                .unwrap_or_else(|| SECURITY_POLICY_NONE.to_string()),
            certificate: self.certificate,
            private_key: self.private_key,
            channel_lifetime: self.channel_lifetime.unwrap_or(Duration::from_secs(3600)),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(10)),
            dial_timeout: self.dial_timeout.unwrap_or(Duration::from_secs(10)),
            auto_reconnect: self.auto_reconnect.unwrap_or(true),
            reconnect_interval: self.reconnect_interval.unwrap_or(Duration::from_secs(5)),
            receive_buffer_size,
            max_message_size: self.max_message_size.unwrap_or(16 * 1024 * 1024),
            max_chunk_count: self.max_chunk_count.unwrap_or(4096),
            certificate_refresh: self.certificate_refresh,
        })
    }
}

// =============================================================================
// SessionConfig
// =============================================================================

/// Session configuration, immutable once built.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session name; defaults to `ualink-{timestamp}` when empty.
    pub session_name: Option<String>,
    /// Requested session timeout.
    pub session_timeout: Duration,
    /// The user identity to activate with.
    pub identity: IdentityToken,
    /// Policy id override for the identity token; discovered from the
    /// server's endpoints when unset.
    pub auth_policy_id: Option<String>,
    /// Application name reported to the server.
    pub application_name: String,
    /// Application uri reported to the server.
    pub application_uri: String,
    /// Product uri reported to the server.
    pub product_uri: String,
    /// Preferred locales.
    pub locale_ids: Vec<String>,
}

impl SessionConfig {
    /// Returns a builder with defaults.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfigBuilder::new().build()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    session_name: Option<String>,
    session_timeout: Option<Duration>,
    identity: Option<IdentityToken>,
    auth_policy_id: Option<String>,
    application_name: Option<String>,
    application_uri: Option<String>,
    product_uri: Option<String>,
    locale_ids: Vec<String>,
}

impl SessionConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Activates sessions anonymously (the default).
    pub fn auth_anonymous(mut self) -> Self {
        self.identity = Some(IdentityToken::Anonymous);
        self
    }

    /// Activates sessions with a user name and password.
    pub fn auth_username(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.identity = Some(IdentityToken::UserName {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    /// Activates sessions with an X.509 user certificate.
    pub fn auth_certificate(mut self, certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        self.identity = Some(IdentityToken::X509 {
            certificate,
            private_key,
        });
        self
    }

    /// Activates sessions with an externally issued token.
    pub fn auth_issued(mut self, token: Vec<u8>, policy: Option<String>) -> Self {
        self.identity = Some(IdentityToken::Issued { token });
        self.auth_policy_id = policy;
        self
    }

    /// Overrides the user-token policy id.
    pub fn auth_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.auth_policy_id = Some(policy_id.into());
        self
    }

    /// Sets the application name reported to the server.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the application uri reported to the server.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = Some(uri.into());
        self
    }

    /// Sets the product uri reported to the server.
    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.product_uri = Some(uri.into());
        self
    }

    /// Sets the preferred locales.
    pub fn locale_ids(mut self, locales: Vec<String>) -> Self {
        self.locale_ids = locales;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            session_name: self.session_name,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(30 * 60)),
            identity: self.identity.unwrap_or_default(),
            auth_policy_id: self.auth_policy_id,
            application_name: self
                .application_name
                .unwrap_or_else(|| "ualink client".to_string()),
            application_uri: self
                .application_uri
                .unwrap_or_else(|| "urn:ualink:client".to_string()),
            product_uri: self
                .product_uri
                .unwrap_or_else(|| "urn:ualink".to_string()),
            locale_ids: self.locale_ids,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .build()
            .unwrap();
        assert_eq!(config.security_mode, SecurityMode::None);
        assert_eq!(config.security_policy_uri, SECURITY_POLICY_NONE);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_endpoint_required() {
        assert!(matches!(
            ClientConfig::builder().build(),
            Err(ConfigError::MissingEndpoint)
        ));
        assert!(matches!(
            ClientConfig::builder().endpoint("http://x").build(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_signed_mode_requires_certificate() {
        let err = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security_mode(SecurityMode::Sign)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCertificate { .. }));

        let ok = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security_mode(SecurityMode::SignAndEncrypt)
            .certificate(vec![1])
            .private_key(vec![2])
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_security_mode_parsing() {
        assert_eq!("none".parse::<SecurityMode>().unwrap(), SecurityMode::None);
        assert_eq!(
            "sign-and-encrypt".parse::<SecurityMode>().unwrap(),
            SecurityMode::SignAndEncrypt
        );
        assert!("tls".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn test_identity_debug_hides_password() {
        let identity = IdentityToken::UserName {
            user: "operator".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("operator"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_session_defaults() {
        let session = SessionConfig::default();
        assert!(matches!(session.identity, IdentityToken::Anonymous));
        assert_eq!(session.session_timeout, Duration::from_secs(1800));
        assert_eq!(session.product_uri, "urn:ualink");
    }

    #[test]
    fn test_session_application_identity_overrides() {
        let session = SessionConfig::builder()
            .application_name("line controller")
            .application_uri("urn:factory:line1")
            .product_uri("urn:factory:controller")
            .build();
        assert_eq!(session.application_name, "line controller");
        assert_eq!(session.application_uri, "urn:factory:line1");
        assert_eq!(session.product_uri, "urn:factory:controller");
    }
}
