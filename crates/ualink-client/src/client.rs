// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The client façade.
//!
//! [`Client`] owns the layered connection state: one transport, one
//! secure channel, at most one active session, and the subscription
//! registry. `connect` dials, creates and activates a session, and
//! starts the reconnection supervisor exactly once; afterwards RPCs
//! flow through [`Client::send`] with the session's authentication
//! token injected into every request except secure-channel control
//! messages and CreateSession.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as PlMutex;
use parking_lot::RwLock as PlRwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use ualink_core::messages::{
    ApplicationDescription, CloseSessionRequest, CreateMonitoredItemsRequest,
    CreateSessionRequest, CreateSubscriptionRequest, EndpointDescription, GetEndpointsRequest,
    LocalizedText, MonitoredItemCreateResult, PublishResponse, QualifiedName, ReadRequest,
    ReadResponse, RepublishRequest, Request, Response, TransferResult,
    TransferSubscriptionsRequest, WriteRequest, WriteResponse, ATTRIBUTE_VALUE,
    TIMESTAMPS_BOTH,
};
use ualink_core::node_id::NodeId;
use ualink_core::StatusCode;

use crate::channel::SecureChannel;
use crate::config::{ClientConfig, SecurityMode, SessionConfig, SECURITY_POLICY_NONE};
use crate::crypto;
use crate::error::{ClientError, Result, SubscriptionError};
use crate::session::{self, Session};
use crate::subscription::{
    run_publish_loop, PublishNotification, RevisedParameters, Subscription, SubscriptionContext,
    SubscriptionParameters, SubscriptionSet,
};
use crate::supervisor;
use crate::transport::Transport;

// =============================================================================
// ConnectionState
// =============================================================================

/// The externally observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected = 0,
    /// First connection attempt in progress.
    Connecting = 1,
    /// Connected and usable.
    Connected = 2,
    /// Recovering from a fault.
    Reconnecting = 3,
    /// Closed for good.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            4 => Self::Closed,
            _ => Self::Disconnected,
        }
    }

    /// Returns `true` while the client is usable for RPCs.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Endpoint selection
// =============================================================================

/// Returns the advertised endpoint with the highest security level that
/// matches the given policy and mode. An empty policy or `None` mode
/// matches anything; with neither constraint the strongest endpoint wins.
pub fn select_endpoint<'a>(
    endpoints: &'a [EndpointDescription],
    policy: &str,
    mode: Option<SecurityMode>,
) -> Option<&'a EndpointDescription> {
    let mut ordered: Vec<&EndpointDescription> = endpoints.iter().collect();
    ordered.sort_by(|a, b| b.security_level.cmp(&a.security_level));

    ordered.into_iter().find(|endpoint| {
        let policy_matches = policy.is_empty() || endpoint.security_policy_uri == policy;
        let mode_matches =
            mode.is_none() || Some(endpoint.security_mode) == mode.map(|m| m.wire_value());
        policy_matches && mode_matches
    })
}

// =============================================================================
// Client
// =============================================================================

/// A high-level client for an OPC UA server.
///
/// # Examples
///
/// ```rust,ignore
/// use ualink_client::{Client, ClientConfig, SessionConfig};
/// use ualink_core::node_id::NodeId;
///
/// let config = ClientConfig::builder()
///     .endpoint("opc.tcp://localhost:4840")
///     .build()?;
/// let client = Client::new(config, SessionConfig::default());
/// client.connect().await?;
///
/// let response = client.read_value(NodeId::numeric(0, 2256)).await?;
/// println!("server state: {:?}", response.results[0].value);
/// ```
pub struct Client {
    core: Arc<ClientCore>,
}

pub(crate) struct ClientCore {
    config: ClientConfig,
    session_config: SessionConfig,
    credentials: PlMutex<(Option<Vec<u8>>, Option<Vec<u8>>)>,
    channel: RwLock<Option<SecureChannel>>,
    session: PlRwLock<Option<Arc<Session>>>,
    subscriptions: SubscriptionSet,
    state: AtomicU8,
    error_tx: mpsc::Sender<ClientError>,
    error_rx: PlMutex<Option<mpsc::Receiver<ClientError>>>,
    supervisor_started: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Client {
    /// Creates a new client. Nothing is dialed until [`Client::connect`].
    pub fn new(config: ClientConfig, session_config: SessionConfig) -> Self {
        // Capacity 1: the channel is dead after the first error, further
        // values would be redundant and are dropped by the sender.
        let (error_tx, error_rx) = mpsc::channel(1);
        let credentials = (config.certificate.clone(), config.private_key.clone());
        Self {
            core: Arc::new(ClientCore {
                config,
                session_config,
                credentials: PlMutex::new(credentials),
                channel: RwLock::new(None),
                session: PlRwLock::new(None),
                subscriptions: SubscriptionSet::new(),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                error_tx,
                error_rx: PlMutex::new(Some(error_rx)),
                supervisor_started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The externally observable connection state.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Establishes the secure channel, creates and activates a session,
    /// and starts the reconnection supervisor.
    pub async fn connect(&self) -> Result<()> {
        let core = &self.core;
        if core.channel.read().await.is_some() {
            return Err(ClientError::Status(StatusCode::BAD_INVALID_STATE));
        }

        core.set_state(ConnectionState::Connecting);
        if let Err(err) = core.verify_endpoint().await {
            core.set_state(ConnectionState::Disconnected);
            return Err(err);
        }
        if let Err(err) = core.dial().await {
            core.set_state(ConnectionState::Disconnected);
            return Err(err);
        }

        let connected = async {
            let session = core.create_session().await?;
            core.activate_session(session).await
        }
        .await;
        if let Err(err) = connected {
            self.close().await;
            return Err(err);
        }
        core.set_state(ConnectionState::Connected);

        if !core.supervisor_started.swap(true, Ordering::SeqCst) {
            if let Some(errors) = core.error_rx.lock().take() {
                tokio::spawn(supervisor::run(core.clone(), errors));
            }
        }

        tracing::info!(endpoint = %core.config.endpoint, "client connected");
        Ok(())
    }

    /// Dials the transport and opens the secure channel without touching
    /// the session layer.
    pub async fn dial(&self) -> Result<()> {
        self.core.dial().await
    }

    /// Closes the session, the secure channel, and the transport.
    /// Idempotent and safe to race with the supervisor.
    pub async fn close(&self) {
        let core = &self.core;
        if core.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = core.close_session().await;
        core.set_state(ConnectionState::Closed);
        core.subscriptions.clear().await;
        core.teardown_channel().await;
        core.cancel.cancel();
        tracing::info!(endpoint = %core.config.endpoint, "client closed");
    }

    /// Sends an authenticated request with the default timeout.
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.core
            .send_with_timeout(request, self.core.config.request_timeout)
            .await
    }

    /// Sends an authenticated request with an explicit timeout.
    pub async fn send_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        self.core.send_with_timeout(request, timeout).await
    }

    /// Requests the server's advertised endpoints.
    pub async fn get_endpoints(&self) -> Result<Vec<EndpointDescription>> {
        self.core.get_endpoints().await
    }

    /// Executes a synchronous read, defaulting each entry's attribute to
    /// Value and its encoding to the server default.
    pub async fn read(&self, mut request: ReadRequest) -> Result<ReadResponse> {
        for entry in &mut request.nodes_to_read {
            if entry.attribute_id == 0 {
                entry.attribute_id = ATTRIBUTE_VALUE;
            }
            if entry.data_encoding.name.is_none() {
                entry.data_encoding = QualifiedName::default();
            }
        }
        let response = self.send(Request::Read(request)).await?;
        Ok(response.into_read()?)
    }

    /// Reads the Value attribute of a single node.
    pub async fn read_value(&self, node_id: NodeId) -> Result<ReadResponse> {
        self.read(ReadRequest {
            timestamps_to_return: TIMESTAMPS_BOTH,
            nodes_to_read: vec![ualink_core::messages::ReadValueId {
                node_id,
                attribute_id: ATTRIBUTE_VALUE,
                ..Default::default()
            }],
            ..Default::default()
        })
        .await
    }

    /// Executes a synchronous write.
    pub async fn write(&self, request: WriteRequest) -> Result<WriteResponse> {
        let response = self.send(Request::Write(request)).await?;
        Ok(response.into_write()?)
    }

    /// Creates a subscription and starts its publish loop. Zero-valued
    /// parameters are replaced with defaults.
    pub async fn subscribe(
        &self,
        params: SubscriptionParameters,
        notify_tx: mpsc::Sender<PublishNotification>,
    ) -> Result<Arc<Subscription>> {
        self.core.subscribe(params, notify_tx).await
    }

    /// Creates monitored items under a subscription, retaining the
    /// requests so recovery can re-arm them.
    pub async fn create_monitored_items(
        &self,
        subscription: &Subscription,
        items: Vec<ualink_core::messages::MonitoredItemCreateRequest>,
    ) -> Result<Vec<MonitoredItemCreateResult>> {
        self.core
            .create_monitored_items(subscription, items)
            .await
    }

    /// Deletes a subscription server-side and forgets it locally.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        self.core.unsubscribe(subscription).await
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.core.session.read().clone()
    }

    /// The number of subscriptions currently registered.
    pub async fn subscription_count(&self) -> usize {
        self.core.subscriptions.len().await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.core.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ClientCore: connection plumbing
// =============================================================================

impl ClientCore {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            tracing::debug!(from = %ConnectionState::from_u8(previous), to = %state, "state changed");
        }
    }

    pub(crate) fn auto_reconnect(&self) -> bool {
        self.config.auto_reconnect
    }

    pub(crate) fn reconnect_interval(&self) -> Duration {
        self.config.reconnect_interval
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Rotates certificate material through the configured hook.
    pub(crate) fn refresh_certificate(&self) {
        if let Some(hook) = &self.config.certificate_refresh {
            if let Some((certificate, private_key)) = hook() {
                tracing::info!("certificate material refreshed");
                *self.credentials.lock() = (Some(certificate), Some(private_key));
            }
        }
    }

    /// The channel configuration with any refreshed credentials applied.
    fn effective_config(&self) -> ClientConfig {
        let mut config = self.config.clone();
        let credentials = self.credentials.lock().clone();
        config.certificate = credentials.0;
        config.private_key = credentials.1;
        config
    }

    /// Dials the transport and opens a secure channel.
    pub(crate) async fn dial(&self) -> Result<()> {
        {
            let channel = self.channel.read().await;
            if channel.as_ref().is_some_and(|c| !c.is_closed()) {
                return Err(ClientError::Status(StatusCode::BAD_INVALID_STATE));
            }
        }
        let config = self.effective_config();
        let transport = Transport::dial(&config).await?;
        let channel =
            SecureChannel::open(transport, &config, self.error_tx.clone(), &self.cancel).await?;
        *self.channel.write().await = Some(channel);
        Ok(())
    }

    /// Closes and drops the current secure channel.
    pub(crate) async fn teardown_channel(&self) {
        let channel = self.channel.write().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }

    /// Discovers the server's endpoints and checks one matches the
    /// configured policy and mode. Skipped for unsecured configurations,
    /// which need no negotiation.
    async fn verify_endpoint(&self) -> Result<()> {
        if self.config.security_mode == SecurityMode::None
            && self.config.security_policy_uri == SECURITY_POLICY_NONE
        {
            return Ok(());
        }

        let mut discovery_config = self.config.clone();
        discovery_config.security_mode = SecurityMode::None;
        discovery_config.security_policy_uri = SECURITY_POLICY_NONE.to_string();
        discovery_config.auto_reconnect = false;

        let (error_tx, _error_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let transport = Transport::dial(&discovery_config).await?;
        let channel =
            SecureChannel::open(transport, &discovery_config, error_tx, &cancel).await?;

        let request = Request::GetEndpoints(GetEndpointsRequest {
            endpoint_url: self.config.endpoint.clone(),
            locale_ids: self.session_config.locale_ids.clone(),
            ..Default::default()
        });
        let outcome = channel
            .send_request_with_timeout(request, NodeId::null(), self.config.request_timeout)
            .await;
        channel.close().await;

        let endpoints = outcome?.into_get_endpoints()?.endpoints;
        match select_endpoint(
            &endpoints,
            &self.config.security_policy_uri,
            Some(self.config.security_mode),
        ) {
            Some(_) => Ok(()),
            None => Err(ClientError::NoMatchingEndpoint {
                policy: self.config.security_policy_uri.clone(),
                mode: self.config.security_mode.name(),
            }),
        }
    }

    /// Sends a request with the session's authentication token injected.
    pub(crate) async fn send_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        let channel = {
            let channel = self.channel.read().await;
            channel
                .clone()
                .ok_or(ClientError::Status(StatusCode::BAD_SERVER_NOT_CONNECTED))?
        };
        let auth_token = if request.is_channel_control() {
            NodeId::null()
        } else {
            self.session
                .read()
                .as_ref()
                .map(|session| session.auth_token().clone())
                .unwrap_or_else(NodeId::null)
        };
        channel
            .send_request_with_timeout(request, auth_token, timeout)
            .await
    }

    async fn send(&self, request: Request) -> Result<Response> {
        self.send_with_timeout(request, self.config.request_timeout)
            .await
    }

    pub(crate) async fn get_endpoints(&self) -> Result<Vec<EndpointDescription>> {
        let request = Request::GetEndpoints(GetEndpointsRequest {
            endpoint_url: self.config.endpoint.clone(),
            ..Default::default()
        });
        let response = self.send(request).await?.into_get_endpoints()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }
        Ok(response.endpoints)
    }
}

// =============================================================================
// ClientCore: session lifecycle
// =============================================================================

impl ClientCore {
    pub(crate) fn session_closed(&self) -> bool {
        self.session.read().is_none()
    }

    /// Creates a session without activating or installing it.
    pub(crate) async fn create_session(&self) -> Result<Arc<Session>> {
        if self.channel.read().await.is_none() {
            return Err(ClientError::Status(StatusCode::BAD_SERVER_NOT_CONNECTED));
        }

        let nonce = crypto::random_nonce();
        let name = self
            .session_config
            .session_name
            .clone()
            .unwrap_or_else(session::default_session_name);
        let client_certificate = self.credentials.lock().0.clone();

        let request = Request::CreateSession(CreateSessionRequest {
            client_description: ApplicationDescription {
                application_uri: self.session_config.application_uri.clone(),
                product_uri: self.session_config.product_uri.clone(),
                application_name: LocalizedText::text(&self.session_config.application_name),
                // ApplicationType client.
                application_type: 1,
                ..Default::default()
            },
            endpoint_url: self.config.endpoint.clone(),
            session_name: name.clone(),
            client_nonce: Some(nonce.clone()),
            client_certificate: client_certificate.clone(),
            requested_session_timeout: self.session_config.session_timeout.as_secs_f64()
                * 1000.0,
            ..Default::default()
        });

        let response = self.send(request).await?.into_create_session()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }

        let server_certificate = response.server_certificate.clone().unwrap_or_default();
        let signature = response
            .server_signature
            .signature
            .clone()
            .unwrap_or_default();
        let mut signed = client_certificate.unwrap_or_default();
        signed.extend_from_slice(&nonce);
        if let Err(err) = crypto::verify_session_signature(
            &server_certificate,
            &signed,
            &[],
            &signature,
        ) {
            // Servers under mode None may omit or mis-produce this
            // signature; creation proceeds regardless.
            tracing::warn!(error = %err, "server session signature did not verify");
        }

        let policy_id =
            session::token_policy_id(&self.session_config, &response.server_endpoints);
        let session = Arc::new(Session::new(
            response.session_id,
            response.authentication_token,
            name,
            server_certificate,
            response.server_nonce.unwrap_or_default(),
            Duration::from_millis(response.revised_session_timeout.max(0.0) as u64),
            response.max_request_message_size,
            policy_id,
        ));
        tracing::debug!(session = %session.name(), "session created");
        Ok(session)
    }

    /// Activates a session and installs it as the active one, closing any
    /// previously active session best-effort.
    pub(crate) async fn activate_session(&self, session: Arc<Session>) -> Result<()> {
        if self.channel.read().await.is_none() {
            return Err(ClientError::Status(StatusCode::BAD_SERVER_NOT_CONNECTED));
        }

        let server_nonce = session.server_nonce();
        let client_signature = crypto::session_signature(
            self.credentials.lock().1.as_deref(),
            session.server_certificate(),
            &server_nonce,
        )
        .map(|(signature, algorithm)| ualink_core::messages::SignatureData {
            algorithm: Some(algorithm),
            signature: Some(signature),
        })
        .unwrap_or_default();

        let (user_identity_token, user_token_signature) = session::prepare_identity(
            &self.session_config,
            session.token_policy_id().to_string(),
            session.server_certificate(),
            &server_nonce,
        )?;

        let request = Request::ActivateSession(ualink_core::messages::ActivateSessionRequest {
            client_signature,
            locale_ids: self.session_config.locale_ids.clone(),
            user_identity_token,
            user_token_signature,
            ..Default::default()
        });

        let channel = {
            let channel = self.channel.read().await;
            channel
                .clone()
                .ok_or(ClientError::Status(StatusCode::BAD_SERVER_NOT_CONNECTED))?
        };
        let response = channel
            .send_request_with_timeout(
                request,
                session.auth_token().clone(),
                self.config.request_timeout,
            )
            .await?
            .into_activate_session()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }

        // The rotated nonce feeds the signatures of the next activation.
        session.rotate_server_nonce(response.server_nonce.unwrap_or_default());

        let previous = { self.session.write().take() };
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &session) {
                if let Err(err) = self.close_session_on_server(&previous).await {
                    tracing::debug!(error = %err, "closing replaced session failed");
                }
            }
        }
        *self.session.write() = Some(session.clone());
        tracing::debug!(session = %session.name(), "session active");
        Ok(())
    }

    /// Closes the active session server-side and clears the pointer
    /// regardless of the outcome.
    pub(crate) async fn close_session(&self) -> Result<()> {
        let session = { self.session.write().take() };
        match session {
            Some(session) => self.close_session_on_server(&session).await,
            None => Ok(()),
        }
    }

    async fn close_session_on_server(&self, session: &Session) -> Result<()> {
        let request = Request::CloseSession(CloseSessionRequest {
            delete_subscriptions: true,
            ..Default::default()
        });
        let channel = {
            let channel = self.channel.read().await;
            channel
                .clone()
                .ok_or(ClientError::Status(StatusCode::BAD_SERVER_NOT_CONNECTED))?
        };
        let response = channel
            .send_request_with_timeout(
                request,
                session.auth_token().clone(),
                self.config.request_timeout,
            )
            .await?;
        if response.service_result().is_bad() {
            return Err(ClientError::Status(response.service_result()));
        }
        Ok(())
    }

    /// Removes the active session without closing it server-side, so it
    /// can be reactivated on a rebuilt channel.
    pub(crate) fn detach_session(&self) -> Option<Arc<Session>> {
        self.session.write().take()
    }
}

// =============================================================================
// ClientCore: subscriptions
// =============================================================================

impl ClientCore {
    pub(crate) async fn subscription_ids(&self) -> Vec<u32> {
        self.subscriptions.ids().await
    }

    pub(crate) async fn pause_subscriptions(&self) {
        self.subscriptions.pause_all().await;
    }

    async fn subscribe(
        self: &Arc<Self>,
        params: SubscriptionParameters,
        notify_tx: mpsc::Sender<PublishNotification>,
    ) -> Result<Arc<Subscription>> {
        let params = params.fill_defaults();
        let request = Request::CreateSubscription(CreateSubscriptionRequest {
            requested_publishing_interval: params.publishing_interval.as_secs_f64() * 1000.0,
            requested_lifetime_count: params.lifetime_count,
            requested_max_keep_alive_count: params.max_keep_alive_count,
            max_notifications_per_publish: params.max_notifications_per_publish,
            publishing_enabled: true,
            priority: params.priority,
            ..Default::default()
        });

        let response = self.send(request).await?.into_create_subscription()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }

        let revised = RevisedParameters {
            publishing_interval: Duration::from_secs_f64(
                (response.revised_publishing_interval / 1000.0).max(0.0),
            ),
            lifetime_count: response.revised_lifetime_count,
            max_keep_alive_count: response.revised_max_keep_alive_count,
        };
        let context: Arc<dyn SubscriptionContext> = self.clone();
        let subscription = Arc::new(Subscription::new(
            response.subscription_id,
            params,
            revised,
            notify_tx,
            Arc::downgrade(&context),
            &self.cancel,
        ));
        self.subscriptions.insert(subscription.clone()).await?;
        tokio::spawn(run_publish_loop(subscription.clone()));

        tracing::debug!(
            subscription_id = subscription.id(),
            interval_ms = revised.publishing_interval.as_millis() as u64,
            "subscription created"
        );
        Ok(subscription)
    }

    async fn create_monitored_items(
        &self,
        subscription: &Subscription,
        items: Vec<CreateMonitoredItemsRequestItem>,
    ) -> Result<Vec<MonitoredItemCreateResult>> {
        let request = Request::CreateMonitoredItems(CreateMonitoredItemsRequest {
            subscription_id: subscription.id(),
            timestamps_to_return: TIMESTAMPS_BOTH,
            items_to_create: items.clone(),
            ..Default::default()
        });
        let response = self.send(request).await?.into_create_monitored_items()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }
        subscription.record_items(&items);
        Ok(response.results)
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let id = subscription.id();
        let request = Request::DeleteSubscriptions(
            ualink_core::messages::DeleteSubscriptionsRequest {
                subscription_ids: vec![id],
                ..Default::default()
            },
        );
        let outcome = self.send(request).await;
        if let Some(removed) = self.subscriptions.remove(id).await {
            removed.stop();
        }
        let response = outcome?.into_delete_subscriptions()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }
        Ok(())
    }

    /// Transfers the given subscriptions to the current session.
    pub(crate) async fn transfer_subscriptions(
        &self,
        ids: &[u32],
    ) -> Result<Vec<TransferResult>> {
        let request = Request::TransferSubscriptions(TransferSubscriptionsRequest {
            subscription_ids: ids.to_vec(),
            send_initial_values: false,
            ..Default::default()
        });
        let response = self.send(request).await?.into_transfer_subscriptions()?;
        if response.header.service_result.is_bad() {
            return Err(ClientError::Status(response.header.service_result));
        }
        Ok(response.results)
    }

    /// Replays missed notifications for one subscription until the
    /// server has nothing more to retransmit.
    pub(crate) async fn republish_subscription(&self, id: u32) -> Result<()> {
        let subscription = self
            .subscriptions
            .get(id)
            .await
            .ok_or(ClientError::Subscription(SubscriptionError::Unknown(id)))?;

        let mut sequence = subscription.last_sequence_number();
        loop {
            if self.session_closed() {
                tracing::debug!(subscription_id = id, "republish aborted, session closed");
                return Err(ClientError::Status(StatusCode::BAD_SESSION_CLOSED));
            }

            let request = Request::Republish(RepublishRequest {
                subscription_id: subscription.id(),
                retransmit_sequence_number: sequence + 1,
                ..Default::default()
            });
            tracing::debug!(
                subscription_id = subscription.id(),
                sequence = sequence + 1,
                "republishing"
            );

            let outcome = self
                .send(request)
                .await
                .and_then(|response| response.into_republish().map_err(ClientError::from));
            match outcome {
                Ok(response) if response.header.service_result.is_bad() => {
                    let code = response.header.service_result;
                    if code == StatusCode::BAD_MESSAGE_NOT_AVAILABLE {
                        // Nothing more to retransmit.
                        return Ok(());
                    }
                    return Err(ClientError::Status(code));
                }
                Ok(response) => {
                    sequence += 1;
                    subscription.advance_sequence(sequence);
                    subscription
                        .dispatch_message(response.notification_message)
                        .await;
                }
                Err(ClientError::Status(StatusCode::BAD_MESSAGE_NOT_AVAILABLE)) => {
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Recreates the given subscriptions with their original parameters
    /// and re-arms their monitored items; registry keys are rewritten in
    /// place so caller-held handles stay valid.
    pub(crate) async fn restore_subscriptions(&self, ids: &[u32]) -> Result<()> {
        for &old_id in ids {
            let Some(subscription) = self.subscriptions.get(old_id).await else {
                tracing::debug!(subscription_id = old_id, "cannot restore, not registered");
                continue;
            };
            tracing::debug!(subscription_id = old_id, "restoring subscription");

            let params = subscription.parameters();
            let request = Request::CreateSubscription(CreateSubscriptionRequest {
                requested_publishing_interval: params.publishing_interval.as_secs_f64()
                    * 1000.0,
                requested_lifetime_count: params.lifetime_count,
                requested_max_keep_alive_count: params.max_keep_alive_count,
                max_notifications_per_publish: params.max_notifications_per_publish,
                publishing_enabled: true,
                priority: params.priority,
                ..Default::default()
            });
            let response = self.send(request).await?.into_create_subscription()?;
            if response.header.service_result.is_bad() {
                return Err(ClientError::Status(response.header.service_result));
            }

            subscription.set_revised(RevisedParameters {
                publishing_interval: Duration::from_secs_f64(
                    (response.revised_publishing_interval / 1000.0).max(0.0),
                ),
                lifetime_count: response.revised_lifetime_count,
                max_keep_alive_count: response.revised_max_keep_alive_count,
            });
            self.subscriptions
                .rewrite_id(old_id, response.subscription_id)
                .await?;

            let items = subscription.item_requests();
            if !items.is_empty() {
                let request = Request::CreateMonitoredItems(CreateMonitoredItemsRequest {
                    subscription_id: subscription.id(),
                    timestamps_to_return: TIMESTAMPS_BOTH,
                    items_to_create: items,
                    ..Default::default()
                });
                let response = self.send(request).await?.into_create_monitored_items()?;
                if response.header.service_result.is_bad() {
                    return Err(ClientError::Status(response.header.service_result));
                }
            }
            tracing::debug!(
                old_id,
                new_id = subscription.id(),
                "subscription restored"
            );
        }
        Ok(())
    }

    /// Final step of subscription recovery: resume delivery, then run the
    /// restore fallback for whatever could not be republished. On restore
    /// failure everything is paused again for the next recovery round.
    pub(crate) async fn finish_subscription_recovery(
        &self,
        to_restore: Vec<u32>,
    ) -> Result<()> {
        self.subscriptions.resume_all().await;
        if to_restore.is_empty() {
            return Ok(());
        }
        match self.restore_subscriptions(&to_restore).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::debug!(error = %err, "restoring subscriptions failed");
                self.subscriptions.pause_all().await;
                Err(err)
            }
        }
    }
}

type CreateMonitoredItemsRequestItem = ualink_core::messages::MonitoredItemCreateRequest;

// =============================================================================
// SubscriptionContext
// =============================================================================

#[async_trait]
impl SubscriptionContext for ClientCore {
    async fn send_request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        self.send_with_timeout(request, timeout).await
    }

    fn session_closed(&self) -> bool {
        ClientCore::session_closed(self)
    }

    async fn route_publish(&self, response: PublishResponse) {
        match self.subscriptions.get(response.subscription_id).await {
            Some(subscription) => subscription.dispatch(response).await,
            None => {
                tracing::debug!(
                    subscription_id = response.subscription_id,
                    "publish response for unknown subscription"
                );
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

    fn endpoint(policy: &str, mode: u32, level: u8) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://localhost:4840".into(),
            security_policy_uri: policy.into(),
            security_mode: mode,
            security_level: level,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_endpoint_prefers_strongest() {
        let endpoints = vec![
            endpoint(SECURITY_POLICY_NONE, 1, 0),
            endpoint(crate::config::SECURITY_POLICY_BASIC256SHA256, 3, 10),
        ];
        let chosen = select_endpoint(&endpoints, "", None).unwrap();
        assert_eq!(chosen.security_level, 10);
    }

    #[test]
    fn test_select_endpoint_matches_policy_and_mode() {
        let endpoints = vec![
            endpoint(SECURITY_POLICY_NONE, 1, 0),
            endpoint(crate::config::SECURITY_POLICY_BASIC256SHA256, 3, 10),
        ];
        let chosen = select_endpoint(
            &endpoints,
            SECURITY_POLICY_NONE,
            Some(SecurityMode::None),
        )
        .unwrap();
        assert_eq!(chosen.security_policy_uri, SECURITY_POLICY_NONE);

        assert!(select_endpoint(
            &endpoints,
            crate::config::SECURITY_POLICY_BASIC256SHA256,
            Some(SecurityMode::Sign),
        )
        .is_none());
    }

    #[test]
    fn test_connection_state_mapping() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_channel_fails() {
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .build()
            .unwrap();
        let client = Client::new(config, SessionConfig::default());
        let err = client
            .read_value(NodeId::numeric(0, 2256))
            .await
            .unwrap_err();
        assert_eq!(
            err.status_code(),
            Some(StatusCode::BAD_SERVER_NOT_CONNECTED)
        );
    }
}
