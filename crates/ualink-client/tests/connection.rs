// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection-path integration tests against the in-process server.

mod support;

use std::time::Duration;

use tokio::sync::mpsc;

use support::mock_server::MockServer;
use ualink_client::{
    Client, ClientConfig, ClientError, SecurityMode, SessionConfig, SubscriptionParameters,
    SECURITY_POLICY_BASIC256SHA256,
};
use ualink_core::node_id::NodeId;
use ualink_core::variant::Variant;
use ualink_core::StatusCode;

fn client_for(server: &MockServer) -> Client {
    let config = ClientConfig::builder()
        .endpoint(server.endpoint())
        .request_timeout(Duration::from_secs(2))
        .dial_timeout(Duration::from_secs(2))
        .reconnect_interval(Duration::from_millis(100))
        .build()
        .expect("config");
    Client::new(config, SessionConfig::default())
}

#[tokio::test]
async fn connect_and_read_server_state() {
    support::init_tracing();
    let server = MockServer::start().await;
    server.set_read_value(4);

    let client = client_for(&server);
    client.connect().await.expect("connect");
    assert!(client.state().is_connected());
    assert!(client.session().is_some());

    // Server_ServerStatus_State.
    let response = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect("read");
    assert!(response.header.service_result.is_good());
    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].status().is_good());
    assert_eq!(response.results[0].value, Some(Variant::Int32(4)));

    server.set_read_value(7);
    let response = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect("read");
    assert_eq!(response.results[0].value, Some(Variant::Int32(7)));

    client.close().await;
    assert_eq!(client.state(), ualink_client::ConnectionState::Closed);
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    let err = client.connect().await.expect_err("second connect");
    assert_eq!(err.status_code(), Some(StatusCode::BAD_INVALID_STATE));
    client.close().await;
}

#[tokio::test]
async fn read_timeout_removes_pending_entry() {
    support::init_tracing();
    let server = MockServer::start().await;
    let config = ClientConfig::builder()
        .endpoint(server.endpoint())
        .request_timeout(Duration::from_millis(300))
        .build()
        .expect("config");
    let client = Client::new(config, SessionConfig::default());
    client.connect().await.expect("connect");

    server.swallow_reads(true);
    let err = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect_err("read should time out");
    assert!(matches!(err, ClientError::Timeout { .. }));

    // The channel survives a timeout; a later read succeeds.
    server.swallow_reads(false);
    let response = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect("read after timeout");
    assert!(response.header.service_result.is_good());

    client.close().await;
}

#[tokio::test]
async fn close_completes_pending_requests() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = std::sync::Arc::new(client_for(&server));
    client.connect().await.expect("connect");

    server.swallow_reads(true);
    let reader = client.clone();
    let pending = tokio::spawn(async move {
        reader.read_value(NodeId::numeric(0, 2256)).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close().await;

    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("pending request must complete after close")
        .expect("task");
    assert!(outcome.is_err());
}

#[tokio::test]
async fn subscribe_then_cancel_returns_registry_to_prior_size() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");
    assert_eq!(client.subscription_count().await, 0);

    let (tx, _rx) = mpsc::channel(16);
    let subscription = client
        .subscribe(SubscriptionParameters::default(), tx)
        .await
        .expect("subscribe");
    assert_ne!(subscription.id(), 0);
    assert_eq!(client.subscription_count().await, 1);

    client.unsubscribe(&subscription).await.expect("unsubscribe");
    assert_eq!(client.subscription_count().await, 0);

    client.close().await;
}

#[tokio::test]
async fn get_endpoints_lists_advertised_endpoints() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    let endpoints = client.get_endpoints().await.expect("get endpoints");
    assert_eq!(endpoints.len(), 1);
    assert!(endpoints[0].security_policy_uri.ends_with("#None"));

    client.close().await;
}

#[tokio::test]
async fn connect_fails_without_matching_endpoint() {
    support::init_tracing();
    let server = MockServer::start().await;

    let config = ClientConfig::builder()
        .endpoint(server.endpoint())
        .security_mode(SecurityMode::Sign)
        .security_policy_uri(SECURITY_POLICY_BASIC256SHA256)
        .certificate(vec![1, 2, 3])
        .private_key(vec![4, 5, 6])
        .request_timeout(Duration::from_secs(2))
        .build()
        .expect("config");
    let client = Client::new(config, SessionConfig::default());

    let err = client.connect().await.expect_err("connect must fail");
    assert!(matches!(err, ClientError::NoMatchingEndpoint { .. }));
    assert!(client.session().is_none());
    assert_eq!(
        client.state(),
        ualink_client::ConnectionState::Disconnected
    );
}
