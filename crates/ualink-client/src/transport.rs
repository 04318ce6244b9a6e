// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! uacp transport connection.
//!
//! A [`Transport`] is a framed, full-duplex chunk pipe over TCP. Dialing
//! performs the Hello/Acknowledge exchange; the limits the server grants
//! there bind every later send. A received Error chunk surfaces as
//! [`TransportError::Remote`] and closes the connection.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use ualink_core::uacp::{
    Acknowledge, ChunkHeader, ChunkType, ErrorMessage, Hello, MessageType, CHUNK_HEADER_SIZE,
    PROTOCOL_VERSION,
};
use ualink_core::{BinaryDecode, BinaryEncode};

use crate::config::ClientConfig;
use crate::error::TransportError;

// =============================================================================
// EndpointUrl
// =============================================================================

/// A parsed `opc.tcp://host:port[/path]` url.
///
/// Only host and port are interpreted; the full url is kept verbatim as
/// the identity string sent in requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    raw: String,
    host: String,
    port: u16,
}

impl EndpointUrl {
    /// Default OPC UA TCP port.
    pub const DEFAULT_PORT: u16 = 4840;

    /// Parses an endpoint url.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &'static str| TransportError::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };

        let rest = url
            .strip_prefix("opc.tcp://")
            .ok_or_else(|| invalid("expected opc.tcp:// scheme"))?;
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("invalid port number"))?;
                (host, port)
            }
            None => (authority, Self::DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            raw: url.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// The full url as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` pair for the socket connect.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// =============================================================================
// TransportLimits
// =============================================================================

/// The four limits negotiated by Hello/Acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    /// Largest chunk this side accepts.
    pub receive_buffer_size: u32,
    /// Largest chunk this side may send.
    pub send_buffer_size: u32,
    /// Largest reassembled message (0 = no limit).
    pub max_message_size: u32,
    /// Largest chunk count per message (0 = no limit).
    pub max_chunk_count: u32,
}

// =============================================================================
// Transport
// =============================================================================

/// A raw chunk as read off the wire: the decoded header plus everything
/// after it, including the header bytes for signature computation.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// The chunk header.
    pub header: ChunkHeader,
    /// The chunk payload after the 8-byte header.
    pub body: Bytes,
}

/// A framed connection to an OPC UA server.
pub struct Transport {
    endpoint: EndpointUrl,
    limits: TransportLimits,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl Transport {
    /// Dials the endpoint and performs the Hello/Acknowledge exchange.
    pub async fn dial(config: &ClientConfig) -> Result<Self, TransportError> {
        let endpoint = EndpointUrl::parse(&config.endpoint)?;

        let stream = match timeout(
            config.dial_timeout,
            TcpStream::connect(endpoint.socket_addr()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(TransportError::ConnectionRefused {
                    endpoint: endpoint.raw.clone(),
                    source: err,
                });
            }
            Ok(Err(err)) => return Err(TransportError::Io(err)),
            Err(_) => {
                return Err(TransportError::DialTimeout {
                    endpoint: endpoint.raw.clone(),
                    timeout: config.dial_timeout,
                });
            }
        };
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let transport = Self {
            endpoint,
            // Provisional limits; replaced by the acknowledge below.
            limits: TransportLimits {
                receive_buffer_size: config.receive_buffer_size,
                send_buffer_size: config.receive_buffer_size,
                max_message_size: config.max_message_size,
                max_chunk_count: config.max_chunk_count,
            },
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
        };

        let ack = timeout(config.dial_timeout, transport.handshake(config))
            .await
            .map_err(|_| TransportError::DialTimeout {
                endpoint: transport.endpoint.raw.clone(),
                timeout: config.dial_timeout,
            })??;

        let limits = TransportLimits {
            // The server's receive buffer bounds what we may send and
            // vice versa.
            receive_buffer_size: config.receive_buffer_size.min(ack.send_buffer_size.max(1)),
            send_buffer_size: ack.receive_buffer_size,
            max_message_size: ack.max_message_size,
            max_chunk_count: ack.max_chunk_count,
        };

        tracing::debug!(
            endpoint = %transport.endpoint,
            send_buffer = limits.send_buffer_size,
            recv_buffer = limits.receive_buffer_size,
            max_message = limits.max_message_size,
            max_chunks = limits.max_chunk_count,
            "transport connected"
        );

        Ok(Self { limits, ..transport })
    }

    async fn handshake(&self, config: &ClientConfig) -> Result<Acknowledge, TransportError> {
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: config.receive_buffer_size,
            send_buffer_size: config.receive_buffer_size,
            max_message_size: config.max_message_size,
            max_chunk_count: config.max_chunk_count,
            endpoint_url: self.endpoint.raw.clone(),
        };
        let mut payload = BytesMut::new();
        hello.encode(&mut payload);
        self.send_chunk(MessageType::Hello, ChunkType::Final, &payload)
            .await?;

        let chunk = self.recv_chunk().await?;
        match chunk.header.message_type {
            MessageType::Acknowledge => {
                let mut body = chunk.body;
                let ack = Acknowledge::decode(&mut body).map_err(|err| {
                    TransportError::Handshake {
                        detail: format!("malformed acknowledge: {err}"),
                    }
                })?;
                if ack.protocol_version != PROTOCOL_VERSION {
                    return Err(TransportError::Handshake {
                        detail: format!(
                            "unsupported protocol version {}",
                            ack.protocol_version
                        ),
                    });
                }
                Ok(ack)
            }
            other => Err(TransportError::Handshake {
                detail: format!("expected acknowledge, got {other:?}"),
            }),
        }
    }

    /// The endpoint this transport is connected to.
    pub fn endpoint(&self) -> &EndpointUrl {
        &self.endpoint
    }

    /// The limits negotiated at dial time.
    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    /// Returns `true` once the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends one chunk: header plus payload.
    pub async fn send_chunk(
        &self,
        message_type: MessageType,
        chunk_type: ChunkType,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let size = (CHUNK_HEADER_SIZE + payload.len()) as u32;
        let header = ChunkHeader {
            message_type,
            chunk_type,
            size,
        };

        let mut writer = self.writer.lock().await;
        writer.write_all(&header.to_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Sends a fully assembled chunk, header included. Used by the secure
    /// channel, whose signatures cover the header bytes.
    pub async fn send_raw(&self, chunk: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(chunk).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Receives one chunk, surfacing Error chunks as fatal errors.
    pub async fn recv_chunk(&self) -> Result<RawChunk, TransportError> {
        let mut reader = self.reader.lock().await;

        let mut raw_header = [0u8; CHUNK_HEADER_SIZE];
        if let Err(err) = reader.read_exact(&mut raw_header).await {
            return Err(Self::map_read_error(err));
        }
        let header = ChunkHeader::from_bytes(raw_header)
            .map_err(|_| TransportError::Remote {
                code: ualink_core::StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                reason: "unrecognized chunk header".to_string(),
            })?;

        if header.size < CHUNK_HEADER_SIZE as u32 || header.size > self.limits.receive_buffer_size
        {
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::ChunkTooLarge {
                size: header.size,
                limit: self.limits.receive_buffer_size,
            });
        }

        let mut body = vec![0u8; header.size as usize - CHUNK_HEADER_SIZE];
        if let Err(err) = reader.read_exact(&mut body).await {
            return Err(Self::map_read_error(err));
        }
        drop(reader);

        if header.message_type == MessageType::Error {
            let message = ErrorMessage::decode(&mut Bytes::from(body)).unwrap_or(ErrorMessage {
                error: ualink_core::StatusCode::BAD_UNEXPECTED_ERROR,
                reason: "malformed error chunk".to_string(),
            });
            tracing::warn!(code = %message.error, reason = %message.reason, "received error chunk");
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::Remote {
                code: message.error,
                reason: message.reason,
            });
        }

        Ok(RawChunk {
            header,
            body: Bytes::from(body),
        })
    }

    fn map_read_error(err: std::io::Error) -> TransportError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        tracing::debug!(endpoint = %self.endpoint, "transport closed");
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint.raw)
            .field("limits", &self.limits)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_endpoint_parse() {
        let url = EndpointUrl::parse("opc.tcp://plc.factory.local:4840/line1").unwrap();
        assert_eq!(url.host(), "plc.factory.local");
        assert_eq!(url.port(), 4840);
        assert_eq!(url.socket_addr(), "plc.factory.local:4840");
        assert_eq!(url.as_str(), "opc.tcp://plc.factory.local:4840/line1");
    }

    #[test]
    fn test_endpoint_default_port() {
        let url = EndpointUrl::parse("opc.tcp://localhost").unwrap();
        assert_eq!(url.port(), EndpointUrl::DEFAULT_PORT);
    }

    #[test]
    fn test_endpoint_rejects_bad_urls() {
        assert!(EndpointUrl::parse("http://localhost:4840").is_err());
        assert!(EndpointUrl::parse("opc.tcp://").is_err());
        assert!(EndpointUrl::parse("opc.tcp://host:notaport").is_err());
    }

    #[tokio::test]
    async fn test_dial_connection_refused() {
        // Port 1 is essentially never listening.
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://127.0.0.1:1")
            .dial_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = Transport::dial(&config).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ConnectionRefused { .. } | TransportError::Io(_)
        ));
    }
}
