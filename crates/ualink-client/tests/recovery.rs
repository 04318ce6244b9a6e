// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fault-injection tests for the reconnection supervisor.

mod support;

use std::time::Duration;

use tokio::sync::mpsc;

use support::mock_server::MockServer;
use ualink_client::{
    Client, ClientConfig, ConnectionState, NotificationPayload, PublishNotification,
    SessionConfig, SubscriptionParameters,
};
use ualink_core::node_id::NodeId;
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

async fn wait_for_state(client: &Client, wanted: ConnectionState, deadline: Duration) {
    let result = tokio::time::timeout(deadline, async {
        loop {
            if client.state() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "client did not reach {wanted} (currently {})",
        client.state()
    );
}

/// Receives the next data-change value, skipping the error payloads the
/// publish loop emits while the connection is down.
async fn next_data_value(rx: &mut mpsc::Receiver<PublishNotification>) -> i32 {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let notification = rx.recv().await.expect("notification channel open");
            if let NotificationPayload::DataChange(change) = notification.payload {
                let value = change.monitored_items[0]
                    .value
                    .value
                    .as_ref()
                    .and_then(|variant| variant.as_i64())
                    .expect("int value");
                return value as i32;
            }
        }
    })
    .await
    .expect("timed out waiting for data change")
}

#[tokio::test]
async fn reconnect_restores_session_and_republishes() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    let (tx, mut rx) = mpsc::channel(64);
    let subscription = client
        .subscribe(SubscriptionParameters::default(), tx)
        .await
        .expect("subscribe");
    let subscription_id = subscription.id();

    server.queue_notification(subscription_id, 101);
    assert_eq!(next_data_value(&mut rx).await, 101);
    assert_eq!(subscription.last_sequence_number(), 1);

    // The server publishes one more message while the connection is gone.
    server.queue_missed_notification(subscription_id, 102);
    server.drop_connections().await;

    wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(5)).await;

    // The missed message arrives via republish, the next one via publish:
    // no gap, no duplicates.
    assert_eq!(next_data_value(&mut rx).await, 102);
    server.queue_notification(subscription_id, 103);
    assert_eq!(next_data_value(&mut rx).await, 103);
    assert_eq!(subscription.last_sequence_number(), 3);

    // The session survived; the subscription id did not change.
    assert_eq!(subscription.id(), subscription_id);

    // A retried RPC succeeds transparently.
    let response = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect("read after recovery");
    assert!(response.header.service_result.is_good());

    client.close().await;
}

#[tokio::test]
async fn invalid_session_is_recreated_transparently() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    let old_token = client.session().expect("session").auth_token().clone();

    server.forget_sessions();
    server
        .kill_with_error(StatusCode::BAD_SESSION_ID_INVALID, "session rejected")
        .await;

    wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(5)).await;

    let new_token = client.session().expect("session").auth_token().clone();
    assert_ne!(new_token, old_token, "a fresh session must be created");

    let response = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect("read with new session");
    assert!(response.header.service_result.is_good());

    client.close().await;
}

#[tokio::test]
async fn invalid_subscription_is_recreated_with_original_parameters() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    let (tx, mut rx) = mpsc::channel(64);
    let params = SubscriptionParameters {
        publishing_interval: Duration::from_millis(200),
        ..SubscriptionParameters::default()
    };
    let subscription = client.subscribe(params, tx).await.expect("subscribe");
    let old_id = subscription.id();

    // Arm one monitored item so recovery has something to re-create.
    let items = vec![ualink_core::messages::MonitoredItemCreateRequest {
        item_to_monitor: ualink_core::messages::ReadValueId {
            node_id: NodeId::numeric(0, 2256),
            attribute_id: ualink_core::messages::ATTRIBUTE_VALUE,
            ..Default::default()
        },
        monitoring_mode: ualink_core::messages::MONITORING_REPORTING,
        requested_parameters: ualink_core::messages::MonitoringParameters {
            client_handle: 1,
            sampling_interval: 200.0,
            queue_size: 10,
            discard_oldest: true,
            ..Default::default()
        },
    }];
    client
        .create_monitored_items(&subscription, items)
        .await
        .expect("create monitored items");

    server.forget_subscriptions();
    server
        .kill_with_error(StatusCode::BAD_SUBSCRIPTION_ID_INVALID, "subscription gone")
        .await;

    wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(5)).await;

    // The registry still holds exactly one subscription, under a new
    // server id, with the original parameters.
    assert_eq!(client.subscription_count().await, 1);
    assert_ne!(subscription.id(), old_id, "subscription id must change");
    assert_eq!(
        subscription.parameters().publishing_interval,
        Duration::from_millis(200)
    );

    // The re-armed subscription delivers again.
    server.queue_notification(subscription.id(), 55);
    assert_eq!(next_data_value(&mut rx).await, 55);

    client.close().await;
}

#[tokio::test]
async fn no_auto_reconnect_terminates_the_client() {
    support::init_tracing();
    let server = MockServer::start().await;
    let config = ClientConfig::builder()
        .endpoint(server.endpoint())
        .auto_reconnect(false)
        .request_timeout(Duration::from_secs(2))
        .build()
        .expect("config");
    let client = Client::new(config, SessionConfig::default());
    client.connect().await.expect("connect");

    server.drop_connections().await;
    wait_for_state(&client, ConnectionState::Closed, Duration::from_secs(5)).await;

    let err = client
        .read_value(NodeId::numeric(0, 2256))
        .await
        .expect_err("reads must fail after termination");
    assert_eq!(
        err.status_code(),
        Some(StatusCode::BAD_SERVER_NOT_CONNECTED)
    );
}

#[tokio::test]
async fn close_during_recovery_exits_promptly() {
    support::init_tracing();
    let server = MockServer::start().await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    // Take the server away entirely so recovery spins on redial.
    server.shutdown().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(client.state(), ConnectionState::Connected);

    let closed = tokio::time::timeout(Duration::from_secs(2), client.close()).await;
    assert!(closed.is_ok(), "close must not hang during recovery");
    assert_eq!(client.state(), ConnectionState::Closed);

    // Closing again is a no-op.
    client.close().await;
}
