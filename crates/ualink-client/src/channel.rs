// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The secure channel.
//!
//! A [`SecureChannel`] multiplexes request/response exchanges over one
//! transport connection. Outbound requests receive a fresh handle and
//! monotonic sequence numbers, are chunked to the negotiated limits,
//! signed and encrypted per the security mode, and registered in the
//! pending table; a receiver task reassembles inbound chunks and
//! completes the matching waiter.
//!
//! Any protocol violation is fatal at channel scope: the channel refuses
//! further sends, completes every pending request with the terminating
//! error, and delivers at most one error value on its capacity-1 error
//! signal for the reconnection supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use ualink_core::codec;
use ualink_core::messages::{
    CloseSecureChannelRequest, OpenSecureChannelRequest, Request, RequestHeader, Response,
    TOKEN_REQUEST_ISSUE, TOKEN_REQUEST_RENEW,
};
use ualink_core::node_id::NodeId;
use ualink_core::uacp::{
    AsymmetricSecurityHeader, ChunkHeader, ChunkType, MessageType, SequenceHeader,
    SymmetricSecurityHeader, CHUNK_HEADER_SIZE, PROTOCOL_VERSION,
};
use ualink_core::{BinaryDecode, BinaryEncode, StatusCode};

use crate::config::{ClientConfig, SecurityMode};
use crate::crypto::{self, ChannelCrypto};
use crate::error::{ChannelError, ClientError, Result, TransportError};
use crate::transport::{RawChunk, Transport};

/// Sequence numbers wrap back to 1 once they pass this threshold, which
/// keeps them strictly increasing within any realistic token lifetime.
const SEQUENCE_WRAP: u32 = 4_294_966_271;

/// Fixed bytes before the body of a MSG/CLO chunk: header, channel id,
/// token id, sequence header.
const SYMMETRIC_PREFIX: usize = CHUNK_HEADER_SIZE + 4 + 4 + 8;

/// Deadline for the best-effort CloseSecureChannel notification.
const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

type Waiter = oneshot::Sender<Result<Response>>;

struct PendingRequest {
    handle: u32,
    tx: Waiter,
}

// =============================================================================
// SecureChannel
// =============================================================================

/// A client-side secure channel over one transport connection.
#[derive(Clone)]
pub(crate) struct SecureChannel {
    state: Arc<ChannelState>,
}

pub(crate) struct ChannelState {
    transport: Transport,
    security_mode: SecurityMode,
    security_policy_uri: String,
    certificate: Option<Vec<u8>>,
    requested_lifetime: Duration,
    request_timeout: Duration,

    channel_id: AtomicU32,
    token_id: AtomicU32,
    next_sequence: AtomicU32,
    next_request_id: AtomicU32,
    next_request_handle: AtomicU32,
    last_recv_sequence: AtomicU32,

    pending: Mutex<HashMap<u32, PendingRequest>>,
    crypto: RwLock<ChannelCrypto>,
    previous_crypto: Mutex<Option<(u32, ChannelCrypto)>>,
    revised_lifetime: Mutex<Duration>,

    // Serializes sequence assignment with the writes that carry it.
    send_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    error_tx: mpsc::Sender<ClientError>,
    cancel: CancellationToken,
}

impl SecureChannel {
    /// Opens a secure channel over a freshly dialed transport.
    pub(crate) async fn open(
        transport: Transport,
        config: &ClientConfig,
        error_tx: mpsc::Sender<ClientError>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let state = Arc::new(ChannelState {
            transport,
            security_mode: config.security_mode,
            security_policy_uri: config.security_policy_uri.clone(),
            certificate: config.certificate.clone(),
            requested_lifetime: config.channel_lifetime,
            request_timeout: config.request_timeout,
            channel_id: AtomicU32::new(0),
            token_id: AtomicU32::new(0),
            next_sequence: AtomicU32::new(1),
            next_request_id: AtomicU32::new(1),
            next_request_handle: AtomicU32::new(1),
            last_recv_sequence: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            crypto: RwLock::new(ChannelCrypto::unsecured()),
            previous_crypto: Mutex::new(None),
            revised_lifetime: Mutex::new(config.channel_lifetime),
            send_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            error_tx,
            cancel: parent.child_token(),
        });

        tokio::spawn(run_receiver(state.clone()));

        let channel = Self { state };
        if let Err(err) = channel.open_token(TOKEN_REQUEST_ISSUE).await {
            channel.state.closed.store(true, Ordering::SeqCst);
            channel.state.cancel.cancel();
            channel.state.transport.close().await;
            return Err(err);
        }
        tokio::spawn(run_renewal(channel.state.clone()));

        tracing::info!(
            endpoint = %channel.state.transport.endpoint(),
            channel_id = channel.state.channel_id.load(Ordering::SeqCst),
            mode = %channel.state.security_mode,
            "secure channel open"
        );
        Ok(channel)
    }

    /// The server-assigned channel id (0 before open completes).
    pub(crate) fn channel_id(&self) -> u32 {
        self.state.channel_id.load(Ordering::SeqCst)
    }

    /// Returns `true` once the channel refuses new sends.
    pub(crate) fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Sends a request with the default timeout and awaits its response.
    #[allow(dead_code)]
    pub(crate) async fn send_request(
        &self,
        request: Request,
        auth_token: NodeId,
    ) -> Result<Response> {
        self.send_request_with_timeout(request, auth_token, self.state.request_timeout)
            .await
    }

    /// Sends a request with an explicit timeout and awaits its response.
    ///
    /// The request is stamped with a fresh handle, registered in the
    /// pending table, and transmitted; on deadline the entry is removed
    /// and a late response is dropped.
    pub(crate) async fn send_request_with_timeout(
        &self,
        mut request: Request,
        auth_token: NodeId,
        timeout: Duration,
    ) -> Result<Response> {
        let state = &self.state;
        if state.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Status(StatusCode::BAD_SERVER_NOT_CONNECTED));
        }

        let handle = state.assign_handle();
        {
            let header = request.header_mut();
            header.authentication_token = auth_token;
            header.timestamp = Some(Utc::now());
            header.request_handle = handle;
            header.timeout_hint = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
        }

        let request_id = state.assign_request_id();
        let (tx, rx) = oneshot::channel();
        state
            .pending
            .lock()
            .insert(request_id, PendingRequest { handle, tx });

        if let Err(err) = state.transmit(&request, request_id).await {
            state.pending.lock().remove(&request_id);
            return Err(err);
        }

        tokio::select! {
            _ = state.cancel.cancelled() => {
                state.pending.lock().remove(&request_id);
                Err(ClientError::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ClientError::Channel(ChannelError::Terminated {
                    code: StatusCode::BAD_SECURE_CHANNEL_CLOSED,
                    detail: "channel closed while awaiting response".to_string(),
                })),
                Err(_) => {
                    state.pending.lock().remove(&request_id);
                    Err(ClientError::timeout(timeout))
                }
            },
        }
    }

    /// Issues or renews the channel token and installs the derived keys.
    ///
    /// On renewal the prior keys stay usable until the first inbound
    /// chunk under the new token arrives.
    async fn open_token(&self, request_type: u32) -> Result<()> {
        let state = &self.state;
        let client_nonce = crypto::random_nonce();
        let request = Request::OpenSecureChannel(OpenSecureChannelRequest {
            header: RequestHeader::default(),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: state.security_mode.wire_value(),
            client_nonce: Some(client_nonce.clone()),
            requested_lifetime: state
                .requested_lifetime
                .as_millis()
                .min(u128::from(u32::MAX)) as u32,
        });

        let response = self
            .send_request_with_timeout(request, NodeId::null(), state.request_timeout)
            .await?;
        let open = response.into_open_secure_channel()?;
        if open.header.service_result.is_bad() {
            return Err(ClientError::Status(open.header.service_result));
        }

        let token = open.security_token;
        let server_nonce = open.server_nonce.unwrap_or_default();
        let fresh =
            ChannelCrypto::derive(state.security_mode, &client_nonce, &server_nonce);

        let old_token = state.token_id.swap(token.token_id, Ordering::SeqCst);
        state.channel_id.store(token.channel_id, Ordering::SeqCst);
        let old_crypto = std::mem::replace(&mut *state.crypto.write(), fresh);
        if request_type == TOKEN_REQUEST_RENEW && old_token != 0 {
            *state.previous_crypto.lock() = Some((old_token, old_crypto));
        }
        *state.revised_lifetime.lock() =
            Duration::from_millis(u64::from(token.revised_lifetime.max(1)));

        tracing::debug!(
            channel_id = token.channel_id,
            token_id = token.token_id,
            revised_lifetime_ms = token.revised_lifetime,
            renewal = request_type == TOKEN_REQUEST_RENEW,
            "channel token installed"
        );
        Ok(())
    }

    /// Closes the channel: best-effort CloseSecureChannel, completion of
    /// every pending request, then transport teardown. Idempotent.
    pub(crate) async fn close(&self) {
        let state = &self.state;
        if state.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut request = Request::CloseSecureChannel(CloseSecureChannelRequest::default());
        {
            let header = request.header_mut();
            header.request_handle = state.assign_handle();
            header.timestamp = Some(Utc::now());
        }
        let request_id = state.assign_request_id();
        // The server does not answer CloseSecureChannel.
        let _ = tokio::time::timeout(CLOSE_NOTIFY_TIMEOUT, state.transmit(&request, request_id))
            .await;

        state.fail_pending(|| ClientError::Cancelled);
        state.cancel.cancel();
        state.transport.close().await;
        tracing::debug!(channel_id = self.channel_id(), "secure channel closed");
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("channel_id", &self.channel_id())
            .field("mode", &self.state.security_mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// ChannelState
// =============================================================================

impl ChannelState {
    fn assign_handle(&self) -> u32 {
        loop {
            let handle = self.next_request_handle.fetch_add(1, Ordering::SeqCst);
            if handle != 0 {
                return handle;
            }
        }
    }

    fn assign_request_id(&self) -> u32 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
            if id != 0 {
                return id;
            }
        }
    }

    // Caller must hold `send_lock`; that serialization is what makes the
    // wrap check sound.
    fn assign_sequence(&self) -> u32 {
        let seq = self.next_sequence.load(Ordering::Relaxed);
        let seq = if seq > SEQUENCE_WRAP { 1 } else { seq };
        self.next_sequence.store(seq + 1, Ordering::Relaxed);
        seq
    }

    /// Encodes, chunks, secures, and writes one request.
    async fn transmit(&self, request: &Request, request_id: u32) -> Result<()> {
        let mut message = BytesMut::new();
        request.encode(&mut message);
        let limits = self.transport.limits();

        if limits.max_message_size != 0 && message.len() > limits.max_message_size as usize {
            return Err(ClientError::Channel(ChannelError::MessageTooLarge {
                size: message.len(),
                limit: limits.max_message_size,
            }));
        }

        match request {
            Request::OpenSecureChannel(_) => {
                self.transmit_open(&message, request_id).await
            }
            _ => {
                let message_type = if matches!(request, Request::CloseSecureChannel(_)) {
                    MessageType::Close
                } else {
                    MessageType::Message
                };
                self.transmit_secured(message_type, &message, request_id, limits.send_buffer_size, limits.max_chunk_count)
                    .await
            }
        }
    }

    /// OpenSecureChannel travels in a single OPN chunk with the
    /// asymmetric security header; keys are not yet applicable.
    async fn transmit_open(&self, message: &[u8], request_id: u32) -> Result<()> {
        let security = AsymmetricSecurityHeader {
            security_policy_uri: self.security_policy_uri.clone(),
            sender_certificate: if self.security_mode.is_signed() {
                self.certificate.clone()
            } else {
                None
            },
            receiver_certificate_thumbprint: None,
        };

        let _guard = self.send_lock.lock().await;
        let sequence_number = self.assign_sequence();

        let mut payload = BytesMut::new();
        self.channel_id.load(Ordering::SeqCst).encode(&mut payload);
        security.encode(&mut payload);
        SequenceHeader {
            sequence_number,
            request_id,
        }
        .encode(&mut payload);
        payload.extend_from_slice(message);

        self.transport
            .send_chunk(MessageType::Open, ChunkType::Final, &payload)
            .await
            .map_err(ClientError::from)
    }

    /// MSG and CLO chunks: symmetric header, chunking, encryption, and a
    /// signature over the full chunk including its header.
    async fn transmit_secured(
        &self,
        message_type: MessageType,
        message: &[u8],
        request_id: u32,
        send_buffer_size: u32,
        max_chunk_count: u32,
    ) -> Result<()> {
        let crypto = self.crypto.read().clone();
        let overhead = SYMMETRIC_PREFIX + crypto.signature_size() + crypto.encryption_overhead();
        let max_body = (send_buffer_size as usize)
            .checked_sub(overhead)
            .filter(|n| *n > 0)
            .ok_or(ClientError::Channel(ChannelError::MessageTooLarge {
                size: message.len(),
                limit: send_buffer_size,
            }))?;

        let chunk_total = message.len().div_ceil(max_body).max(1);
        if max_chunk_count != 0 && chunk_total > max_chunk_count as usize {
            return Err(ClientError::Channel(ChannelError::TooManyChunks {
                limit: max_chunk_count,
            }));
        }

        let channel_id = self.channel_id.load(Ordering::SeqCst);
        let token_id = self.token_id.load(Ordering::SeqCst);

        // Sequence assignment and the writes that carry it stay under one
        // lock so the server observes strictly increasing numbers.
        let _guard = self.send_lock.lock().await;
        let mut chunks = message.chunks(max_body);
        for index in 0..chunk_total {
            let plain = chunks.next().unwrap_or(&[]);
            let chunk_type = if index + 1 == chunk_total {
                ChunkType::Final
            } else {
                ChunkType::Intermediate
            };
            let sequence_number = self.assign_sequence();
            let body = crypto.encrypt(plain, sequence_number)?;

            let total = SYMMETRIC_PREFIX + body.len() + crypto.signature_size();
            let mut out = BytesMut::with_capacity(total);
            out.extend_from_slice(
                &ChunkHeader {
                    message_type,
                    chunk_type,
                    size: total as u32,
                }
                .to_bytes(),
            );
            channel_id.encode(&mut out);
            SymmetricSecurityHeader { token_id }.encode(&mut out);
            SequenceHeader {
                sequence_number,
                request_id,
            }
            .encode(&mut out);
            out.extend_from_slice(&body);
            if let Some(signature) = crypto.sign(&out) {
                out.extend_from_slice(&signature);
            }

            self.transport.send_raw(&out).await?;
        }
        Ok(())
    }

    /// Picks the key set for an inbound token id, dropping the prior
    /// token's keys on first sight of the current one.
    fn crypto_for_token(&self, token_id: u32) -> Result<ChannelCrypto> {
        let current = self.token_id.load(Ordering::SeqCst);
        if token_id == current {
            if self.previous_crypto.lock().take().is_some() {
                tracing::trace!(token_id, "previous token keys retired");
            }
            return Ok(self.crypto.read().clone());
        }
        if let Some((previous_token, previous)) = self.previous_crypto.lock().as_ref() {
            if *previous_token == token_id {
                return Ok(previous.clone());
            }
        }
        Err(ClientError::Channel(ChannelError::TokenUnknown { token_id }))
    }

    /// Completes every pending request with an error from `make`.
    fn fail_pending(&self, make: impl Fn() -> ClientError) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(make()));
        }
    }

    /// Terminates the channel: one error value on the signal, every
    /// pending request completed, receiver and renewal stopped.
    fn fatal(&self, err: ClientError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let code = err.status_code().unwrap_or(StatusCode::BAD_CONNECTION_CLOSED);
        let detail = err.to_string();
        tracing::warn!(error = %err, code = %code, "secure channel terminated");

        // Capacity-1 signal: a second error would be redundant, the
        // channel is already dead.
        let _ = self.error_tx.try_send(err);
        self.fail_pending(|| {
            ClientError::Channel(ChannelError::Terminated {
                code,
                detail: detail.clone(),
            })
        });
        self.cancel.cancel();
    }

    fn deliver(&self, request_id: u32, result: Result<Response>) {
        let handle = match &result {
            Ok(response) => Some(response.header().request_handle),
            Err(_) => None,
        };
        let entry = {
            let mut pending = self.pending.lock();
            match (pending.get(&request_id), handle) {
                (Some(waiting), Some(handle)) if waiting.handle != handle => {
                    tracing::warn!(
                        request_id,
                        expected_handle = waiting.handle,
                        got_handle = handle,
                        "response handle mismatch, dropping"
                    );
                    None
                }
                (Some(_), _) => pending.remove(&request_id),
                (None, _) => {
                    tracing::warn!(request_id, "response for unknown request, dropping");
                    None
                }
            }
        };
        if let Some(waiting) = entry {
            let _ = waiting.tx.send(result);
        }
    }
}

// =============================================================================
// Receiver task
// =============================================================================

async fn run_receiver(state: Arc<ChannelState>) {
    let mut partial: HashMap<u32, BytesMut> = HashMap::new();
    let mut chunk_counts: HashMap<u32, u32> = HashMap::new();

    loop {
        let chunk = tokio::select! {
            _ = state.cancel.cancelled() => return,
            chunk = state.transport.recv_chunk() => chunk,
        };
        let raw = match chunk {
            Ok(raw) => raw,
            Err(err) => {
                state.fatal(err.into());
                return;
            }
        };

        match raw.header.message_type {
            MessageType::Message | MessageType::Open => {
                if let Err(err) =
                    handle_chunk(&state, raw, &mut partial, &mut chunk_counts)
                {
                    state.fatal(err);
                    return;
                }
            }
            // A server-side close is an orderly end of stream.
            MessageType::Close => {
                state.fatal(TransportError::Closed.into());
                return;
            }
            other => {
                tracing::warn!(message_type = ?other, "unexpected chunk type");
                state.fatal(ClientError::Status(
                    StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                ));
                return;
            }
        }
    }
}

fn handle_chunk(
    state: &ChannelState,
    raw: RawChunk,
    partial: &mut HashMap<u32, BytesMut>,
    chunk_counts: &mut HashMap<u32, u32>,
) -> Result<()> {
    let limits = state.transport.limits();
    let header_bytes = raw.header.to_bytes();
    let mut body = raw.body.clone();

    let channel_id = codec::read_u32(&mut body)?;
    let expected_channel = state.channel_id.load(Ordering::SeqCst);
    if expected_channel != 0 && channel_id != expected_channel {
        return Err(ClientError::Channel(ChannelError::ChannelIdMismatch {
            expected: expected_channel,
            got: channel_id,
        }));
    }

    let (sequence, payload) = match raw.header.message_type {
        MessageType::Open => {
            let _security = AsymmetricSecurityHeader::decode(&mut body)?;
            let sequence = SequenceHeader::decode(&mut body)?;
            (sequence, body)
        }
        _ => {
            let security = SymmetricSecurityHeader::decode(&mut body)?;
            let crypto = state.crypto_for_token(security.token_id)?;

            let signature_size = crypto.signature_size();
            if signature_size > 0 {
                if raw.body.len() < signature_size + 16 {
                    return Err(ClientError::Decode(
                        ualink_core::CodecError::UnexpectedEof("signed chunk"),
                    ));
                }
                let unsigned_len = raw.body.len() - signature_size;
                let mut signed = Vec::with_capacity(CHUNK_HEADER_SIZE + unsigned_len);
                signed.extend_from_slice(&header_bytes);
                signed.extend_from_slice(&raw.body[..unsigned_len]);
                crypto.verify(&signed, &raw.body[unsigned_len..])?;

                let consumed = raw.body.len() - body.len();
                body.truncate(unsigned_len - consumed);
            }

            let sequence = SequenceHeader::decode(&mut body)?;
            let plain = crypto.decrypt(&body, sequence.sequence_number)?;
            (sequence, Bytes::from(plain))
        }
    };

    let last = state.last_recv_sequence.load(Ordering::SeqCst);
    let seq = sequence.sequence_number;
    let wrapped = last > SEQUENCE_WRAP && seq == 1;
    if last != 0 && seq <= last && !wrapped {
        return Err(ClientError::Channel(ChannelError::SequenceRegression {
            last,
            got: seq,
        }));
    }
    state.last_recv_sequence.store(seq, Ordering::SeqCst);

    let request_id = sequence.request_id;
    match raw.header.chunk_type {
        ChunkType::Abort => {
            partial.remove(&request_id);
            chunk_counts.remove(&request_id);
            tracing::debug!(request_id, "message aborted by server");
            Ok(())
        }
        ChunkType::Intermediate => {
            let count = chunk_counts.entry(request_id).or_insert(0);
            *count += 1;
            if limits.max_chunk_count != 0 && *count >= limits.max_chunk_count {
                return Err(ClientError::Channel(ChannelError::TooManyChunks {
                    limit: limits.max_chunk_count,
                }));
            }
            let buffer = partial.entry(request_id).or_default();
            buffer.extend_from_slice(&payload);
            if limits.max_message_size != 0
                && buffer.len() > limits.max_message_size as usize
            {
                return Err(ClientError::Channel(ChannelError::MessageTooLarge {
                    size: buffer.len(),
                    limit: limits.max_message_size,
                }));
            }
            Ok(())
        }
        ChunkType::Final => {
            let mut full = partial.remove(&request_id).unwrap_or_default();
            chunk_counts.remove(&request_id);
            full.extend_from_slice(&payload);

            let mut message = full.freeze();
            let response = Response::decode(&mut message)?;
            let result = match response {
                Response::ServiceFault(fault) => {
                    // Faults carry their status in the header; the waiter
                    // sees the status directly.
                    let code = fault.header.service_result;
                    let handle = fault.header.request_handle;
                    tracing::debug!(request_id, handle, code = %code, "service fault");
                    state.deliver_fault(request_id, handle, code);
                    return Ok(());
                }
                other => Ok(other),
            };
            state.deliver(request_id, result);
            Ok(())
        }
    }
}

impl ChannelState {
    fn deliver_fault(&self, request_id: u32, handle: u32, code: StatusCode) {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(&request_id) {
                Some(waiting) if waiting.handle == handle => pending.remove(&request_id),
                Some(_) | None => {
                    tracing::warn!(request_id, "fault for unknown request, dropping");
                    None
                }
            }
        };
        if let Some(waiting) = entry {
            let _ = waiting.tx.send(Err(ClientError::Status(code)));
        }
    }
}

// =============================================================================
// Renewal task
// =============================================================================

async fn run_renewal(state: Arc<ChannelState>) {
    loop {
        let lifetime = *state.revised_lifetime.lock();
        // Renew at 75% of the granted lifetime, like the session layer.
        let delay = lifetime.mul_f64(0.75).max(Duration::from_secs(1));
        tokio::select! {
            _ = state.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if state.closed.load(Ordering::SeqCst) {
            return;
        }
        let channel = SecureChannel {
            state: state.clone(),
        };
        match channel.open_token(TOKEN_REQUEST_RENEW).await {
            Ok(()) => tracing::debug!("secure channel token renewed"),
            Err(err) => {
                tracing::warn!(error = %err, "token renewal failed");
                state.fatal(err);
                return;
            }
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
    fn test_sequence_wrap_threshold() {
        // The wrap limit leaves room for 1024 in-flight numbers below u32::MAX.
        assert_eq!(SEQUENCE_WRAP, u32::MAX - 1024);
    }

    #[test]
    fn test_symmetric_prefix_layout() {
        // header(8) + channel id(4) + token id(4) + sequence header(8)
        assert_eq!(SYMMETRIC_PREFIX, 24);
    }
}
