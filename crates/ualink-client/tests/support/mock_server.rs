// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! An in-process OPC UA server for fault-injection tests.
//!
//! Speaks real uacp over a loopback `TcpListener` in security mode None:
//! Hello/Acknowledge, OpenSecureChannel, and the service set the
//! connection core exercises. Behavior is configurable in the style of
//! the test mocks used elsewhere in the workspace: notification queues,
//! swallowed reads, forced error chunks, and session invalidation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use ualink_core::codec;
use ualink_core::messages::{
    ActivateSessionResponse, ApplicationDescription, CloseSessionResponse,
    CreateMonitoredItemsResponse, CreateSessionResponse, CreateSubscriptionResponse,
    DataChangeNotification, EndpointDescription, ExtensionObject, GetEndpointsResponse,
    MonitoredItemCreateResult, MonitoredItemNotification, NotificationMessage,
    PublishResponse, ReadResponse, RepublishResponse, Request, Response, ResponseHeader,
    ServiceFault, TransferResult, TransferSubscriptionsResponse, UserTokenPolicy,
    WriteResponse, SECURITY_MODE_NONE, USER_TOKEN_ANONYMOUS,
};
use ualink_core::variant::DataValue;
use ualink_core::node_id::NodeId;
use ualink_core::uacp::{
    Acknowledge, AsymmetricSecurityHeader, ChunkHeader, ChunkType, ErrorMessage, Hello,
    MessageType, SequenceHeader, CHUNK_HEADER_SIZE, PROTOCOL_VERSION,
};
use ualink_core::variant::Variant;
use ualink_core::{BinaryDecode, BinaryEncode, StatusCode};

const SECURITY_POLICY_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

// =============================================================================
// MockServer
// =============================================================================

/// A configurable in-process OPC UA server.
pub struct MockServer {
    endpoint: String,
    state: Arc<MockState>,
    accept_cancel: CancellationToken,
}

#[derive(Default)]
struct MockState {
    next_session: AtomicU32,
    next_subscription: AtomicU32,
    sessions: Mutex<HashSet<NodeId>>,
    subscriptions: Mutex<HashMap<u32, MockSubscription>>,
    notifications: Mutex<VecDeque<QueuedNotification>>,
    republish_store: Mutex<HashMap<(u32, u32), i32>>,
    read_value: AtomicU32,
    swallow_reads: AtomicBool,
    connections: Mutex<Vec<Connection>>,
}

#[derive(Default)]
struct MockSubscription {
    last_sequence: u32,
}

struct QueuedNotification {
    subscription_id: u32,
    sequence_number: u32,
    value: i32,
}

struct Connection {
    cancel: CancellationToken,
    writer: Arc<tokio::sync::Mutex<ServerWriter>>,
}

struct ServerWriter {
    half: OwnedWriteHalf,
    next_sequence: u32,
}

impl MockServer {
    /// Binds a loopback listener and starts accepting connections.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(MockState {
            next_session: AtomicU32::new(1),
            next_subscription: AtomicU32::new(100),
            read_value: AtomicU32::new(4),
            ..MockState::default()
        });
        let accept_cancel = CancellationToken::new();

        let accept_state = state.clone();
        let cancel = accept_cancel.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = listener.accept() => accepted,
                };
                let Ok((stream, _)) = accepted else { return };
                let conn_cancel = CancellationToken::new();
                tokio::spawn(handle_connection(
                    stream,
                    accept_state.clone(),
                    conn_cancel,
                ));
            }
        });

        Self {
            endpoint: format!("opc.tcp://{addr}"),
            state,
            accept_cancel,
        }
    }

    /// The `opc.tcp://` endpoint url of this server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sets the Int32 value returned for every read.
    pub fn set_read_value(&self, value: i32) {
        self.state.read_value.store(value as u32, Ordering::SeqCst);
    }

    /// Makes the server swallow read requests (never answering them).
    pub fn swallow_reads(&self, enabled: bool) {
        self.state.swallow_reads.store(enabled, Ordering::SeqCst);
    }

    /// Forgets every session, so restored sessions are rejected.
    pub fn forget_sessions(&self) {
        self.state.sessions.lock().clear();
    }

    /// Forgets every subscription, so transfers are rejected.
    pub fn forget_subscriptions(&self) {
        self.state.subscriptions.lock().clear();
    }

    /// Queues a data-change notification for delivery via Publish; the
    /// message is also retained for Republish.
    pub fn queue_notification(&self, subscription_id: u32, value: i32) -> u32 {
        let sequence_number = self.next_sequence(subscription_id);
        self.state.notifications.lock().push_back(QueuedNotification {
            subscription_id,
            sequence_number,
            value,
        });
        self.state
            .republish_store
            .lock()
            .insert((subscription_id, sequence_number), value);
        sequence_number
    }

    /// Retains a notification only for Republish, as if it was published
    /// while the client was away.
    pub fn queue_missed_notification(&self, subscription_id: u32, value: i32) -> u32 {
        let sequence_number = self.next_sequence(subscription_id);
        self.state
            .republish_store
            .lock()
            .insert((subscription_id, sequence_number), value);
        sequence_number
    }

    fn next_sequence(&self, subscription_id: u32) -> u32 {
        let mut subscriptions = self.state.subscriptions.lock();
        let entry = subscriptions.entry(subscription_id).or_default();
        entry.last_sequence += 1;
        entry.last_sequence
    }

    /// Drops every open connection without an error chunk (clean EOF at
    /// the client).
    pub async fn drop_connections(&self) {
        let connections: Vec<Connection> =
            std::mem::take(&mut *self.state.connections.lock());
        for connection in connections {
            connection.cancel.cancel();
        }
        // Give the closed sockets a moment to surface at the client.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    /// Sends an Error chunk on every open connection, then drops them.
    pub async fn kill_with_error(&self, code: StatusCode, reason: &str) {
        let connections: Vec<Connection> =
            std::mem::take(&mut *self.state.connections.lock());
        for connection in connections {
            {
                let mut writer = connection.writer.lock().await;
                let mut payload = BytesMut::new();
                ErrorMessage {
                    error: code,
                    reason: reason.to_string(),
                }
                .encode(&mut payload);
                let _ = write_chunk(&mut writer.half, MessageType::Error, &payload).await;
            }
            connection.cancel.cancel();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    /// Stops accepting new connections and drops the open ones.
    pub async fn shutdown(&self) {
        self.accept_cancel.cancel();
        self.drop_connections().await;
    }
}

// =============================================================================
// Connection handling
// =============================================================================

async fn read_chunk(
    read: &mut (impl AsyncReadExt + Unpin),
) -> std::io::Result<(ChunkHeader, Bytes)> {
    let mut raw_header = [0u8; CHUNK_HEADER_SIZE];
    read.read_exact(&mut raw_header).await?;
    let header = ChunkHeader::from_bytes(raw_header)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))?;
    let mut body = vec![0u8; header.size as usize - CHUNK_HEADER_SIZE];
    read.read_exact(&mut body).await?;
    Ok((header, Bytes::from(body)))
}

async fn write_chunk(
    write: &mut OwnedWriteHalf,
    message_type: MessageType,
    payload: &[u8],
) -> std::io::Result<()> {
    let header = ChunkHeader {
        message_type,
        chunk_type: ChunkType::Final,
        size: (CHUNK_HEADER_SIZE + payload.len()) as u32,
    };
    write.write_all(&header.to_bytes()).await?;
    write.write_all(payload).await?;
    write.flush().await
}

async fn handle_connection(stream: TcpStream, state: Arc<MockState>, cancel: CancellationToken) {
    stream.set_nodelay(true).ok();
    let (mut read, write) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(ServerWriter {
        half: write,
        next_sequence: 1,
    }));

    state.connections.lock().push(Connection {
        cancel: cancel.clone(),
        writer: writer.clone(),
    });

    // Hello / Acknowledge.
    let Ok((header, body)) = read_chunk(&mut read).await else {
        return;
    };
    if header.message_type != MessageType::Hello {
        return;
    }
    let Ok(hello) = Hello::decode(&mut body.clone()) else {
        return;
    };
    {
        let mut payload = BytesMut::new();
        Acknowledge {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: hello.receive_buffer_size,
            send_buffer_size: hello.send_buffer_size,
            max_message_size: hello.max_message_size,
            max_chunk_count: hello.max_chunk_count,
        }
        .encode(&mut payload);
        let mut writer = writer.lock().await;
        if write_chunk(&mut writer.half, MessageType::Acknowledge, &payload)
            .await
            .is_err()
        {
            return;
        }
    }

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = read_chunk(&mut read) => chunk,
        };
        let Ok((header, body)) = chunk else { return };

        match header.message_type {
            MessageType::Open => {
                if handle_open(&state, &writer, body).await.is_err() {
                    return;
                }
            }
            MessageType::Message => {
                let state = state.clone();
                let writer = writer.clone();
                // Requests are served concurrently so a held publish
                // never blocks other RPCs on the same connection.
                tokio::spawn(async move {
                    let _ = handle_message(&state, &writer, body).await;
                });
            }
            MessageType::Close => return,
            _ => return,
        }
    }
}

async fn handle_open(
    state: &Arc<MockState>,
    writer: &Arc<tokio::sync::Mutex<ServerWriter>>,
    body: Bytes,
) -> std::io::Result<()> {
    let mut body = body;
    let _channel_id = codec::read_u32(&mut body).map_err(invalid_data)?;
    let _security = AsymmetricSecurityHeader::decode(&mut body).map_err(invalid_data)?;
    let sequence = SequenceHeader::decode(&mut body).map_err(invalid_data)?;
    let request = Request::decode(&mut body).map_err(invalid_data)?;

    let Request::OpenSecureChannel(open) = request else {
        return Err(std::io::Error::from(std::io::ErrorKind::InvalidData));
    };
    let response = Response::OpenSecureChannel(ualink_core::messages::OpenSecureChannelResponse {
        header: good_header(open.header.request_handle),
        server_protocol_version: PROTOCOL_VERSION,
        security_token: ualink_core::messages::ChannelSecurityToken {
            channel_id: 1,
            token_id: 1,
            created_at: None,
            revised_lifetime: 3_600_000,
        },
        server_nonce: Some(vec![0xAB; 32]),
    });

    let mut response_body = BytesMut::new();
    response.encode(&mut response_body);

    let security = AsymmetricSecurityHeader {
        security_policy_uri: SECURITY_POLICY_NONE.to_string(),
        sender_certificate: None,
        receiver_certificate_thumbprint: None,
    };
    let mut writer = writer.lock().await;
    let sequence_number = writer.next_sequence;
    writer.next_sequence += 1;

    let mut payload = BytesMut::new();
    1u32.encode(&mut payload);
    security.encode(&mut payload);
    SequenceHeader {
        sequence_number,
        request_id: sequence.request_id,
    }
    .encode(&mut payload);
    payload.extend_from_slice(&response_body);

    write_chunk(&mut writer.half, MessageType::Open, &payload).await?;
    let _ = state;
    Ok(())
}

async fn handle_message(
    state: &Arc<MockState>,
    writer: &Arc<tokio::sync::Mutex<ServerWriter>>,
    body: Bytes,
) -> std::io::Result<()> {
    let mut body = body;
    let _channel_id = codec::read_u32(&mut body).map_err(invalid_data)?;
    let _token_id = codec::read_u32(&mut body).map_err(invalid_data)?;
    let sequence = SequenceHeader::decode(&mut body).map_err(invalid_data)?;
    let request = Request::decode(&mut body).map_err(invalid_data)?;

    let Some(response) = handle_request(state, request).await else {
        return Ok(());
    };

    let mut response_body = BytesMut::new();
    response.encode(&mut response_body);

    let mut writer = writer.lock().await;
    let sequence_number = writer.next_sequence;
    writer.next_sequence += 1;

    let total = CHUNK_HEADER_SIZE + 4 + 4 + 8 + response_body.len();
    let mut out = BytesMut::with_capacity(total);
    out.extend_from_slice(
        &ChunkHeader {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            size: total as u32,
        }
        .to_bytes(),
    );
    1u32.encode(&mut out);
    1u32.encode(&mut out);
    SequenceHeader {
        sequence_number,
        request_id: sequence.request_id,
    }
    .encode(&mut out);
    out.extend_from_slice(&response_body);

    writer.half.write_all(&out).await?;
    writer.half.flush().await
}

fn invalid_data(_: ualink_core::CodecError) -> std::io::Error {
    std::io::Error::from(std::io::ErrorKind::InvalidData)
}

fn good_header(request_handle: u32) -> ResponseHeader {
    ResponseHeader {
        request_handle,
        service_result: StatusCode::GOOD,
        ..ResponseHeader::default()
    }
}

fn fault(request_handle: u32, code: StatusCode) -> Response {
    Response::ServiceFault(ServiceFault {
        header: ResponseHeader {
            request_handle,
            service_result: code,
            ..ResponseHeader::default()
        },
    })
}

fn advertised_endpoints(endpoint_url: &str) -> Vec<EndpointDescription> {
    vec![EndpointDescription {
        endpoint_url: endpoint_url.to_string(),
        server: ApplicationDescription::default(),
        server_certificate: None,
        security_mode: SECURITY_MODE_NONE,
        security_policy_uri: SECURITY_POLICY_NONE.to_string(),
        user_identity_tokens: vec![UserTokenPolicy {
            policy_id: "anonymous".to_string(),
            token_type: USER_TOKEN_ANONYMOUS,
            ..UserTokenPolicy::default()
        }],
        transport_profile_uri: String::new(),
        security_level: 0,
    }]
}

async fn handle_request(state: &Arc<MockState>, request: Request) -> Option<Response> {
    let handle = request.header().request_handle;
    match request {
        Request::GetEndpoints(req) => Some(Response::GetEndpoints(GetEndpointsResponse {
            header: good_header(handle),
            endpoints: advertised_endpoints(&req.endpoint_url),
        })),

        Request::CreateSession(req) => {
            let id = state.next_session.fetch_add(1, Ordering::SeqCst);
            let auth_token = NodeId::numeric(0, 20_000 + id);
            state.sessions.lock().insert(auth_token.clone());
            Some(Response::CreateSession(CreateSessionResponse {
                header: good_header(handle),
                session_id: NodeId::numeric(1, id),
                authentication_token: auth_token,
                revised_session_timeout: 600_000.0,
                server_nonce: Some(vec![0x5A; 32]),
                server_certificate: None,
                server_endpoints: advertised_endpoints(&req.endpoint_url),
                ..CreateSessionResponse::default()
            }))
        }

        Request::ActivateSession(req) => {
            if !state
                .sessions
                .lock()
                .contains(&req.header.authentication_token)
            {
                return Some(fault(handle, StatusCode::BAD_SESSION_ID_INVALID));
            }
            Some(Response::ActivateSession(ActivateSessionResponse {
                header: good_header(handle),
                server_nonce: Some(vec![0x6B; 32]),
                ..ActivateSessionResponse::default()
            }))
        }

        Request::CloseSession(req) => {
            state
                .sessions
                .lock()
                .remove(&req.header.authentication_token);
            Some(Response::CloseSession(CloseSessionResponse {
                header: good_header(handle),
            }))
        }

        Request::Read(req) => {
            if state.swallow_reads.load(Ordering::SeqCst) {
                return None;
            }
            if !state.sessions.lock().contains(&req.header.authentication_token) {
                return Some(fault(handle, StatusCode::BAD_SESSION_ID_INVALID));
            }
            let value = state.read_value.load(Ordering::SeqCst) as i32;
            let results = req
                .nodes_to_read
                .iter()
                .map(|_| DataValue {
                    value: Some(Variant::Int32(value)),
                    status: Some(StatusCode::GOOD),
                    ..DataValue::default()
                })
                .collect();
            Some(Response::Read(ReadResponse {
                header: good_header(handle),
                results,
                diagnostic_infos: Vec::new(),
            }))
        }

        Request::Write(req) => {
            let results = req.nodes_to_write.iter().map(|_| StatusCode::GOOD).collect();
            Some(Response::Write(WriteResponse {
                header: good_header(handle),
                results,
                diagnostic_infos: Vec::new(),
            }))
        }

        Request::CreateSubscription(req) => {
            let id = state.next_subscription.fetch_add(1, Ordering::SeqCst);
            state
                .subscriptions
                .lock()
                .insert(id, MockSubscription::default());
            Some(Response::CreateSubscription(CreateSubscriptionResponse {
                header: good_header(handle),
                subscription_id: id,
                revised_publishing_interval: req.requested_publishing_interval,
                revised_lifetime_count: req.requested_lifetime_count,
                revised_max_keep_alive_count: req.requested_max_keep_alive_count,
            }))
        }

        Request::DeleteSubscriptions(req) => {
            let mut subscriptions = state.subscriptions.lock();
            let results = req
                .subscription_ids
                .iter()
                .map(|id| {
                    if subscriptions.remove(id).is_some() {
                        StatusCode::GOOD
                    } else {
                        StatusCode::BAD_SUBSCRIPTION_ID_INVALID
                    }
                })
                .collect();
            Some(Response::DeleteSubscriptions(
                ualink_core::messages::DeleteSubscriptionsResponse {
                    header: good_header(handle),
                    results,
                    diagnostic_infos: Vec::new(),
                },
            ))
        }

        Request::CreateMonitoredItems(req) => {
            let results = req
                .items_to_create
                .iter()
                .enumerate()
                .map(|(index, item)| MonitoredItemCreateResult {
                    status_code: StatusCode::GOOD,
                    monitored_item_id: index as u32 + 1,
                    revised_sampling_interval: item.requested_parameters.sampling_interval,
                    revised_queue_size: item.requested_parameters.queue_size.max(1),
                    ..MonitoredItemCreateResult::default()
                })
                .collect();
            Some(Response::CreateMonitoredItems(CreateMonitoredItemsResponse {
                header: good_header(handle),
                results,
                diagnostic_infos: Vec::new(),
            }))
        }

        Request::Publish(_) => {
            let queued = state.notifications.lock().pop_front();
            match queued {
                Some(notification) => {
                    let change = DataChangeNotification {
                        monitored_items: vec![MonitoredItemNotification {
                            client_handle: 1,
                            value: DataValue::new(Variant::Int32(notification.value)),
                        }],
                        diagnostic_infos: Vec::new(),
                    };
                    Some(Response::Publish(PublishResponse {
                        header: good_header(handle),
                        subscription_id: notification.subscription_id,
                        available_sequence_numbers: vec![notification.sequence_number],
                        more_notifications: false,
                        notification_message: NotificationMessage {
                            sequence_number: notification.sequence_number,
                            publish_time: None,
                            notification_data: vec![ExtensionObject::from_encodable(
                                DataChangeNotification::TYPE_ID,
                                &change,
                            )],
                        },
                        results: Vec::new(),
                        diagnostic_infos: Vec::new(),
                    }))
                }
                None => {
                    // Hold the publish briefly, then answer with a
                    // keep-alive so the loop stays calm.
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    let subscription_id =
                        state.subscriptions.lock().keys().next().copied().unwrap_or(0);
                    Some(Response::Publish(PublishResponse {
                        header: good_header(handle),
                        subscription_id,
                        notification_message: NotificationMessage {
                            sequence_number: 0,
                            publish_time: None,
                            notification_data: Vec::new(),
                        },
                        ..PublishResponse::default()
                    }))
                }
            }
        }

        Request::Republish(req) => {
            if !state
                .subscriptions
                .lock()
                .contains_key(&req.subscription_id)
            {
                return Some(fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID));
            }
            let key = (req.subscription_id, req.retransmit_sequence_number);
            match state.republish_store.lock().get(&key).copied() {
                Some(value) => {
                    let change = DataChangeNotification {
                        monitored_items: vec![MonitoredItemNotification {
                            client_handle: 1,
                            value: DataValue::new(Variant::Int32(value)),
                        }],
                        diagnostic_infos: Vec::new(),
                    };
                    Some(Response::Republish(RepublishResponse {
                        header: good_header(handle),
                        notification_message: NotificationMessage {
                            sequence_number: req.retransmit_sequence_number,
                            publish_time: None,
                            notification_data: vec![ExtensionObject::from_encodable(
                                DataChangeNotification::TYPE_ID,
                                &change,
                            )],
                        },
                    }))
                }
                None => Some(fault(handle, StatusCode::BAD_MESSAGE_NOT_AVAILABLE)),
            }
        }

        Request::TransferSubscriptions(req) => {
            let subscriptions = state.subscriptions.lock();
            let results = req
                .subscription_ids
                .iter()
                .map(|id| match subscriptions.get(id) {
                    Some(subscription) => TransferResult {
                        status_code: StatusCode::GOOD,
                        available_sequence_numbers: vec![subscription.last_sequence],
                    },
                    None => TransferResult {
                        status_code: StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                        available_sequence_numbers: Vec::new(),
                    },
                })
                .collect();
            Some(Response::TransferSubscriptions(TransferSubscriptionsResponse {
                header: good_header(handle),
                results,
                diagnostic_infos: Vec::new(),
            }))
        }

        Request::OpenSecureChannel(_) | Request::CloseSecureChannel(_) => None,
    }
}
