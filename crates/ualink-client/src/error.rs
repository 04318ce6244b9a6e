// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client error types.
//!
//! Errors are grouped by the layer that produced them:
//!
//! ```text
//! ClientError
//! ├── Transport     - dial, handshake, and socket failures
//! ├── Channel       - secure channel protocol violations
//! ├── Session       - session lifecycle failures
//! ├── Subscription  - subscription registry violations
//! ├── Config        - invalid client configuration
//! ├── Status        - a bad service result returned by the server
//! └── (leaf kinds)  - decode, invalid response type, timeout, cancel
//! ```
//!
//! The reconnection supervisor classifies a terminating error by its
//! [`ClientError::status`] and the transport predicates below; everything
//! else is surfaced to callers unchanged.

use std::io;
use std::time::Duration;

use thiserror::Error;

use ualink_core::messages::InvalidResponse;
use ualink_core::{CodecError, StatusCode};

/// Result alias used throughout the client.
pub type Result<T> = std::result::Result<T, ClientError>;

// =============================================================================
// ClientError
// =============================================================================

/// The top-level error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-layer failure.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Secure-channel failure.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Session lifecycle failure.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Subscription registry failure.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The server returned a bad service result.
    #[error("service result {0}")]
    Status(StatusCode),

    /// A response decoded to a type other than the one expected.
    #[error("{0}")]
    InvalidResponse(#[from] InvalidResponse),

    /// A message failed to decode.
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),

    /// No advertised endpoint matched the configured policy and mode.
    #[error("no endpoint matches policy '{policy}' and mode {mode}")]
    NoMatchingEndpoint {
        /// The requested security policy uri.
        policy: String,
        /// The requested security mode name.
        mode: &'static str,
    },

    /// The request deadline elapsed before a response arrived.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// The elapsed deadline.
        elapsed: Duration,
    },

    /// The surrounding context was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Creates a service-status error.
    #[inline]
    pub fn status(code: StatusCode) -> Self {
        Self::Status(code)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// The status code attached to this error, when there is one.
    ///
    /// Remote ERR chunks and channel terminations carry the code the
    /// supervisor uses to pick its recovery action.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Transport(TransportError::Remote { code, .. }) => Some(*code),
            Self::Channel(ChannelError::Terminated { code, .. }) => Some(*code),
            Self::Timeout { .. } => Some(StatusCode::BAD_TIMEOUT),
            _ => None,
        }
    }

    /// Returns `true` for an orderly end-of-stream with no error payload.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }

    /// Returns `true` when the OS refused the connection outright.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::Transport(TransportError::ConnectionRefused { .. }))
    }

    /// Returns `true` if retrying the operation can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Channel(_) => true,
            Self::Session(_) => true,
            Self::Timeout { .. } => true,
            Self::Status(code) => {
                matches!(
                    *code,
                    StatusCode::BAD_SERVER_NOT_CONNECTED
                        | StatusCode::BAD_SESSION_ID_INVALID
                        | StatusCode::BAD_SECURE_CHANNEL_ID_INVALID
                        | StatusCode::BAD_TIMEOUT
                )
            }
            Self::Subscription(_)
            | Self::Config(_)
            | Self::InvalidResponse(_)
            | Self::Decode(_)
            | Self::NoMatchingEndpoint { .. }
            | Self::Cancelled => false,
        }
    }

    /// The error category, for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Channel(_) => "channel",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Config(_) => "config",
            Self::Status(_) => "status",
            Self::InvalidResponse(_) => "invalid-response",
            Self::Decode(_) => "decode",
            Self::NoMatchingEndpoint { .. } => "endpoint-selection",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<StatusCode> for ClientError {
    fn from(code: StatusCode) -> Self {
        Self::Status(code)
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Failures at the framed-TCP layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The OS refused the connection.
    #[error("connection refused by '{endpoint}'")]
    ConnectionRefused {
        /// The target endpoint.
        endpoint: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The dial deadline elapsed.
    #[error("dial to '{endpoint}' timed out after {timeout:?}")]
    DialTimeout {
        /// The target endpoint.
        endpoint: String,
        /// The configured dial timeout.
        timeout: Duration,
    },

    /// The endpoint url could not be parsed.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint {
        /// The rejected url.
        url: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The Hello/Acknowledge exchange failed.
    #[error("handshake failed: {detail}")]
    Handshake {
        /// What went wrong.
        detail: String,
    },

    /// The peer closed the stream without an error chunk.
    #[error("connection closed")]
    Closed,

    /// The peer sent an Error chunk before closing.
    #[error("remote error {code}: {reason}")]
    Remote {
        /// The status code from the error chunk.
        code: StatusCode,
        /// The reason string from the error chunk.
        reason: String,
    },

    /// An inbound chunk exceeded the negotiated receive limit.
    #[error("chunk of {size} bytes exceeds negotiated limit of {limit}")]
    ChunkTooLarge {
        /// The declared chunk size.
        size: u32,
        /// The negotiated limit.
        limit: u32,
    },

    /// Any other socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Returns `true` if redialing can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionRefused { .. }
            | Self::DialTimeout { .. }
            | Self::Closed
            | Self::Remote { .. } => true,
            Self::Io(source) => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::BrokenPipe
            ),
            Self::InvalidEndpoint { .. } | Self::Handshake { .. } | Self::ChunkTooLarge { .. } => {
                false
            }
        }
    }
}

// =============================================================================
// ChannelError
// =============================================================================

/// Secure-channel protocol violations. All of these are fatal at channel
/// scope: the channel stops accepting sends and signals the supervisor.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The channel is not open.
    #[error("secure channel is not open")]
    NotOpen,

    /// The channel died; pending requests complete with this error.
    #[error("secure channel terminated with {code}: {detail}")]
    Terminated {
        /// The terminating status.
        code: StatusCode,
        /// Human-readable detail.
        detail: String,
    },

    /// An inbound chunk regressed the sequence number.
    #[error("sequence number regressed: last {last}, got {got}")]
    SequenceRegression {
        /// The last accepted sequence number.
        last: u32,
        /// The regressed number received.
        got: u32,
    },

    /// An inbound chunk referenced an unknown channel token.
    #[error("unknown channel token {token_id}")]
    TokenUnknown {
        /// The unrecognized token id.
        token_id: u32,
    },

    /// An inbound chunk carried the wrong secure channel id.
    #[error("secure channel id mismatch: expected {expected}, got {got}")]
    ChannelIdMismatch {
        /// The channel id this channel was issued.
        expected: u32,
        /// The id carried by the chunk.
        got: u32,
    },

    /// An inbound chunk failed signature verification.
    #[error("chunk signature verification failed")]
    SignatureMismatch,

    /// A reassembled message exceeded the negotiated message size.
    #[error("message of {size} bytes exceeds negotiated limit of {limit}")]
    MessageTooLarge {
        /// The reassembled size so far.
        size: usize,
        /// The negotiated limit.
        limit: u32,
    },

    /// A message used more chunks than negotiated.
    #[error("message exceeded the negotiated chunk count of {limit}")]
    TooManyChunks {
        /// The negotiated chunk count.
        limit: u32,
    },
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle failures.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// An operation that needs a session found none.
    #[error("no active session")]
    NoSession,

    /// The configured identity token cannot be prepared.
    #[error("cannot prepare identity token: {reason}")]
    IdentityToken {
        /// Why preparation failed.
        reason: String,
    },
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription registry violations.
#[derive(Debug, Clone, Copy, Error)]
pub enum SubscriptionError {
    /// The server returned id zero or an id already registered.
    ///
    /// Indicative of a server bug; the registry never silently
    /// overwrites an entry.
    #[error("subscription id {0} is invalid or already registered")]
    InvalidId(u32),

    /// The registry has no entry for the id.
    #[error("unknown subscription id {0}")]
    Unknown(u32),
}

// =============================================================================
// ConfigError
// =============================================================================

/// Invalid client configuration, rejected at build time.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No endpoint url was provided.
    #[error("endpoint url is required")]
    MissingEndpoint,

    /// The endpoint url is malformed.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint {
        /// The rejected url.
        url: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A security mode other than None requires certificate material.
    #[error("security mode {mode} requires a certificate and private key")]
    MissingCertificate {
        /// The requested mode name.
        mode: &'static str,
    },

    /// A field holds a value outside its accepted range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_extraction() {
        let err = ClientError::Status(StatusCode::BAD_SESSION_ID_INVALID);
        assert_eq!(err.status_code(), Some(StatusCode::BAD_SESSION_ID_INVALID));

        let err = ClientError::Transport(TransportError::Remote {
            code: StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
            reason: String::new(),
        });
        assert_eq!(
            err.status_code(),
            Some(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID)
        );

        assert_eq!(ClientError::Cancelled.status_code(), None);
    }

    #[test]
    fn test_eof_and_refused_predicates() {
        assert!(ClientError::Transport(TransportError::Closed).is_clean_eof());

        let refused = ClientError::Transport(TransportError::ConnectionRefused {
            endpoint: "opc.tcp://localhost:4840".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        assert!(refused.is_connection_refused());
        assert!(!refused.is_clean_eof());
    }

    #[test]
    fn test_retryability() {
        assert!(ClientError::Transport(TransportError::Closed).is_retryable());
        assert!(ClientError::timeout(Duration::from_secs(5)).is_retryable());
        assert!(!ClientError::Config(ConfigError::MissingEndpoint).is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = ClientError::Channel(ChannelError::SequenceRegression { last: 9, got: 3 });
        assert!(err.to_string().contains("last 9"));
        assert_eq!(err.category(), "channel");
    }
}
