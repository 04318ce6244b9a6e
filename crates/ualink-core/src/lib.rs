// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary protocol layer for the ualink client stack.
//!
//! This crate provides the wire-level building blocks the connection core
//! is built on:
//!
//! - **Status codes**: 32-bit OPC UA status codes with severity
//!   classification and symbolic names
//! - **Node ids**: all six binary encodings plus the `ns=…;i|s|g|b=…`
//!   text form
//! - **Codec**: little-endian OPC UA binary encoding and decoding over
//!   [`bytes`] buffers
//! - **Variant**: the built-in scalar and array value container
//! - **Service messages**: the request/response structures the connection
//!   core exchanges, dispatched through strongly typed [`messages::Request`]
//!   and [`messages::Response`] enums
//! - **uacp framing**: the Hello/Acknowledge/Error/Open/Message/Close
//!   chunk layout used on the TCP transport
//!
//! # Example
//!
//! ```
//! use ualink_core::node_id::NodeId;
//!
//! let id: NodeId = "ns=2;s=Machine.Temperature".parse().unwrap();
//! assert_eq!(id.namespace(), 2);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod messages;
pub mod node_id;
pub mod status;
pub mod uacp;
pub mod variant;

pub use codec::{BinaryDecode, BinaryEncode, CodecError};
pub use node_id::{Identifier, NodeId};
pub use status::StatusCode;
pub use variant::{DataValue, Variant};
