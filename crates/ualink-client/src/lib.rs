// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client connection core.
//!
//! This crate implements the layered state machine that carries a
//! client's traffic to an OPC UA server:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Client                                │
//! │        (connect/close, RPC dispatch, auth-token injection)      │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                 │                          │
//!        ▼                 ▼                          ▼
//! ┌──────────────┐ ┌─────────────────┐ ┌────────────────────────────┐
//! │   Session    │ │ SubscriptionSet │ │  Reconnection supervisor   │
//! │ (create/     │ │ (publish loops, │ │  (channel → session →      │
//! │  activate)   │ │  pause/resume)  │ │   subscription rebuild)    │
//! └──────────────┘ └─────────────────┘ └────────────────────────────┘
//!        │                 │                          │
//!        └────────────┬────┴──────────────────────────┘
//!                     ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       SecureChannel                             │
//! │   (chunking, sequence numbers, keying, request correlation)     │
//! └─────────────────────────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Transport                                │
//! │            (uacp framing, Hello/Acknowledge limits)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Faults at any layer funnel into a single error signal consumed by the
//! supervisor, which decides from the error's status code which layers
//! to rebuild and which to salvage; subscriptions survive recovery via
//! transfer or republish, or are recreated with their original
//! parameters.
//!
//! # Example
//!
//! ```rust,ignore
//! use ualink_client::{Client, ClientConfig, SessionConfig};
//! use ualink_core::node_id::NodeId;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .endpoint("opc.tcp://localhost:4840")
//!         .build()?;
//!     let client = Client::new(config, SessionConfig::default());
//!     client.connect().await?;
//!
//!     // Server_ServerStatus_State
//!     let response = client.read_value(NodeId::numeric(0, 2256)).await?;
//!     println!("{:?}", response.results[0]);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

mod channel;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod session;
pub mod subscription;
mod supervisor;
pub mod transport;

pub use client::{select_endpoint, Client, ConnectionState};
pub use config::{
    ClientConfig, ClientConfigBuilder, IdentityToken, SecurityMode, SessionConfig,
    SessionConfigBuilder, DEFAULT_ANONYMOUS_POLICY_ID, SECURITY_POLICY_BASIC256SHA256,
    SECURITY_POLICY_NONE,
};
pub use error::{
    ChannelError, ClientError, ConfigError, Result, SessionError, SubscriptionError,
    TransportError,
};
pub use session::Session;
pub use subscription::{
    NotificationPayload, PublishNotification, Subscription, SubscriptionParameters,
};
pub use transport::{EndpointUrl, TransportLimits};
