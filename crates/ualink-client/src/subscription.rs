// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions and the subscription registry.
//!
//! Every subscription keeps the parameters it was created with so it can
//! be recreated verbatim after a failed transfer, routes inbound publish
//! notifications to its delivery channel, and exposes idempotent
//! pause/resume used by the reconnection supervisor. The registry never
//! silently overwrites an entry; a zero or duplicate id from the server
//! is rejected.
//!
//! A subscription reaches the client only through the narrow
//! [`SubscriptionContext`] trait and holds it weakly, so subscriptions
//! do not own the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

use ualink_core::messages::{
    DataChangeNotification, EventNotificationList, MonitoredItemCreateRequest, PublishRequest,
    PublishResponse, Request, StatusChangeNotification, SubscriptionAcknowledgement,
};
use ualink_core::StatusCode;

use crate::error::{ClientError, Result, SubscriptionError};

/// Default publishing interval when the caller passes zero.
pub const DEFAULT_PUBLISHING_INTERVAL: Duration = Duration::from_millis(100);
/// Default lifetime count when the caller passes zero.
pub const DEFAULT_LIFETIME_COUNT: u32 = 10_000;
/// Default keep-alive count when the caller passes zero.
pub const DEFAULT_MAX_KEEP_ALIVE_COUNT: u32 = 3_000;
/// Default notification batch limit when the caller passes zero.
pub const DEFAULT_MAX_NOTIFICATIONS_PER_PUBLISH: u32 = 10_000;

/// Upper bound on how long a publish request is left outstanding.
const MAX_PUBLISH_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// Parameters and notifications
// =============================================================================

/// Parameters for creating a subscription. Zero-valued fields are
/// replaced with defaults before the request goes out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionParameters {
    /// Requested publishing interval.
    pub publishing_interval: Duration,
    /// Requested lifetime, in publishing intervals.
    pub lifetime_count: u32,
    /// Requested keep-alive, in publishing intervals.
    pub max_keep_alive_count: u32,
    /// Largest notification batch per publish (0 = server default).
    pub max_notifications_per_publish: u32,
    /// Relative priority among the session's subscriptions.
    pub priority: u8,
}

impl Default for SubscriptionParameters {
    fn default() -> Self {
        Self {
            publishing_interval: Duration::ZERO,
            lifetime_count: 0,
            max_keep_alive_count: 0,
            max_notifications_per_publish: 0,
            priority: 0,
        }
    }
}

impl SubscriptionParameters {
    /// Replaces zero-valued fields with the crate defaults.
    pub fn fill_defaults(mut self) -> Self {
        if self.publishing_interval.is_zero() {
            self.publishing_interval = DEFAULT_PUBLISHING_INTERVAL;
        }
        if self.lifetime_count == 0 {
            self.lifetime_count = DEFAULT_LIFETIME_COUNT;
        }
        if self.max_keep_alive_count == 0 {
            self.max_keep_alive_count = DEFAULT_MAX_KEEP_ALIVE_COUNT;
        }
        if self.max_notifications_per_publish == 0 {
            self.max_notifications_per_publish = DEFAULT_MAX_NOTIFICATIONS_PER_PUBLISH;
        }
        self
    }
}

/// The values the server granted for a subscription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevisedParameters {
    /// Granted publishing interval.
    pub publishing_interval: Duration,
    /// Granted lifetime count.
    pub lifetime_count: u32,
    /// Granted keep-alive count.
    pub max_keep_alive_count: u32,
}

/// One notification delivered on a subscription's channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishNotification {
    /// The subscription this notification belongs to.
    pub subscription_id: u32,
    /// The payload.
    pub payload: NotificationPayload,
}

/// The categorized payload of a publish notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    /// Monitored-item value changes.
    DataChange(DataChangeNotification),
    /// Event occurrences.
    Events(EventNotificationList),
    /// A subscription status change.
    StatusChange(StatusChangeNotification),
    /// An unknown variant, a missing payload, or a publish failure.
    Error(StatusCode),
}

// =============================================================================
// SubscriptionContext
// =============================================================================

/// The narrow interface a subscription uses to reach the client.
///
/// Publish responses are routed back through the registry because the
/// server answers a publish with whichever subscription has data, not
/// necessarily the one whose loop issued the request.
#[async_trait]
pub(crate) trait SubscriptionContext: Send + Sync {
    /// Sends an authenticated request with an explicit timeout.
    async fn send_request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<ualink_core::messages::Response>;

    /// Returns `true` when no session is active.
    fn session_closed(&self) -> bool;

    /// Routes a publish response to the subscription it names.
    async fn route_publish(&self, response: PublishResponse);
}

// =============================================================================
// Subscription
// =============================================================================

/// A server-side subscription tracked by the client.
pub struct Subscription {
    id: AtomicU32,
    params: SubscriptionParameters,
    revised: Mutex<RevisedParameters>,
    last_sequence_number: AtomicU32,
    acks: Mutex<Vec<SubscriptionAcknowledgement>>,
    items: Mutex<Vec<MonitoredItemCreateRequest>>,
    notify_tx: mpsc::Sender<PublishNotification>,
    paused_tx: watch::Sender<bool>,
    context: Weak<dyn SubscriptionContext>,
    cancel: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        id: u32,
        params: SubscriptionParameters,
        revised: RevisedParameters,
        notify_tx: mpsc::Sender<PublishNotification>,
        context: Weak<dyn SubscriptionContext>,
        parent: &CancellationToken,
    ) -> Self {
        let (paused_tx, _) = watch::channel(false);
        Self {
            id: AtomicU32::new(id),
            params,
            revised: Mutex::new(revised),
            last_sequence_number: AtomicU32::new(0),
            acks: Mutex::new(Vec::new()),
            items: Mutex::new(Vec::new()),
            notify_tx,
            paused_tx,
            context,
            cancel: parent.child_token(),
        }
    }

    /// The current server-assigned id. Changes when the subscription is
    /// recreated during recovery; the handle itself stays valid.
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::SeqCst);
    }

    /// The parameters the subscription was created with.
    pub fn parameters(&self) -> SubscriptionParameters {
        self.params
    }

    /// The values the server granted.
    pub fn revised_parameters(&self) -> RevisedParameters {
        *self.revised.lock()
    }

    pub(crate) fn set_revised(&self, revised: RevisedParameters) {
        *self.revised.lock() = revised;
    }

    /// The sequence number of the last notification seen.
    pub fn last_sequence_number(&self) -> u32 {
        self.last_sequence_number.load(Ordering::SeqCst)
    }

    /// Advances the last-seen sequence number; it never decreases.
    pub(crate) fn advance_sequence(&self, sequence: u32) {
        self.last_sequence_number
            .fetch_max(sequence, Ordering::SeqCst);
    }

    /// Pauses the publish loop at its next suspension point. Idempotent.
    pub fn pause(&self) {
        self.paused_tx.send_replace(true);
    }

    /// Resumes a paused publish loop. Idempotent.
    pub fn resume(&self) {
        self.paused_tx.send_replace(false);
    }

    /// Returns `true` while the publish loop is paused.
    pub fn is_paused(&self) -> bool {
        *self.paused_tx.borrow()
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Records monitored-item requests so recovery can re-arm them.
    pub(crate) fn record_items(&self, items: &[MonitoredItemCreateRequest]) {
        self.items.lock().extend_from_slice(items);
    }

    /// The monitored-item requests created under this subscription.
    pub(crate) fn item_requests(&self) -> Vec<MonitoredItemCreateRequest> {
        self.items.lock().clone()
    }

    fn take_acks(&self) -> Vec<SubscriptionAcknowledgement> {
        std::mem::take(&mut *self.acks.lock())
    }

    fn push_ack(&self, sequence_number: u32) {
        self.acks.lock().push(SubscriptionAcknowledgement {
            subscription_id: self.id(),
            sequence_number,
        });
    }

    /// How long a publish may stay outstanding: the keep-alive horizon,
    /// but never less than a second nor more than the cap.
    fn publish_timeout(&self) -> Duration {
        let revised = self.revised_parameters();
        let horizon = revised
            .publishing_interval
            .saturating_mul(revised.max_keep_alive_count.saturating_add(1));
        horizon
            .max(Duration::from_secs(1))
            .min(MAX_PUBLISH_TIMEOUT)
    }

    /// Dispatches a publish response's notifications to the delivery
    /// channel, acknowledging the sequence number it carried.
    pub(crate) async fn dispatch(&self, response: PublishResponse) {
        self.dispatch_message(response.notification_message).await;
    }

    /// Dispatches one notification message; also used when republish
    /// recovers messages missed during an outage.
    pub(crate) async fn dispatch_message(&self, message: ualink_core::messages::NotificationMessage) {
        if message.sequence_number != 0 {
            self.advance_sequence(message.sequence_number);
            self.push_ack(message.sequence_number);
        }

        // An empty batch is a keep-alive.
        for data in &message.notification_data {
            let payload = match data.numeric_type_id() {
                DataChangeNotification::TYPE_ID => data
                    .decode_body_as()
                    .map(NotificationPayload::DataChange)
                    .unwrap_or(NotificationPayload::Error(StatusCode::BAD_DECODING_ERROR)),
                EventNotificationList::TYPE_ID => data
                    .decode_body_as()
                    .map(NotificationPayload::Events)
                    .unwrap_or(NotificationPayload::Error(StatusCode::BAD_DECODING_ERROR)),
                StatusChangeNotification::TYPE_ID => data
                    .decode_body_as()
                    .map(NotificationPayload::StatusChange)
                    .unwrap_or(NotificationPayload::Error(StatusCode::BAD_DECODING_ERROR)),
                _ => NotificationPayload::Error(StatusCode::BAD_DATA_TYPE_ID_UNKNOWN),
            };
            self.notify(payload).await;
        }
    }

    pub(crate) async fn notify(&self, payload: NotificationPayload) {
        let notification = PublishNotification {
            subscription_id: self.id(),
            payload,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.notify_tx.send(notification) => {}
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("last_sequence_number", &self.last_sequence_number())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Publish loop
// =============================================================================

/// Runs one subscription's publish loop until the subscription stops.
///
/// The loop never issues a request while paused; a pause taking effect
/// mid-exchange lets the in-flight response finish delivering first.
pub(crate) async fn run_publish_loop(subscription: Arc<Subscription>) {
    let mut paused_rx = subscription.paused_tx.subscribe();

    loop {
        if subscription.cancel.is_cancelled() {
            return;
        }
        if *paused_rx.borrow() {
            tokio::select! {
                _ = subscription.cancel.cancelled() => return,
                changed = paused_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        }

        let Some(context) = subscription.context.upgrade() else {
            return;
        };
        let interval = subscription.revised_parameters().publishing_interval;
        if context.session_closed() {
            idle(&subscription, interval).await;
            continue;
        }

        let request = Request::Publish(PublishRequest {
            subscription_acknowledgements: subscription.take_acks(),
            ..PublishRequest::default()
        });
        let timeout = subscription.publish_timeout();

        let outcome = tokio::select! {
            _ = subscription.cancel.cancelled() => return,
            outcome = context.send_request_with_timeout(request, timeout) => outcome,
        };

        match outcome.and_then(|response| response.into_publish().map_err(ClientError::from)) {
            Ok(response) if response.header.service_result.is_bad() => {
                let code = response.header.service_result;
                tracing::debug!(subscription_id = subscription.id(), code = %code, "publish rejected");
                subscription.notify(NotificationPayload::Error(code)).await;
                idle(&subscription, interval).await;
            }
            Ok(response) => {
                context.route_publish(response).await;
            }
            Err(ClientError::Cancelled) => return,
            Err(err) => {
                let code = err
                    .status_code()
                    .unwrap_or(StatusCode::BAD_COMMUNICATION_ERROR);
                tracing::debug!(subscription_id = subscription.id(), error = %err, "publish failed");
                subscription.notify(NotificationPayload::Error(code)).await;
                idle(&subscription, interval).await;
            }
        }
    }
}

async fn idle(subscription: &Subscription, interval: Duration) {
    let delay = interval.max(Duration::from_millis(50));
    tokio::select! {
        _ = subscription.cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

// =============================================================================
// SubscriptionSet
// =============================================================================

/// The registry of live subscriptions, keyed by server id.
///
/// Dispatch takes the lock in shared mode; registration, removal, and
/// the id rewrite done by recovery take it exclusively.
#[derive(Default)]
pub(crate) struct SubscriptionSet {
    subs: RwLock<HashMap<u32, Arc<Subscription>>>,
}

impl SubscriptionSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription, rejecting id zero and duplicates.
    pub(crate) async fn insert(&self, subscription: Arc<Subscription>) -> Result<()> {
        let id = subscription.id();
        let mut subs = self.subs.write().await;
        if id == 0 || subs.contains_key(&id) {
            // Indicative of a server bug; never overwrite an entry.
            return Err(ClientError::Subscription(SubscriptionError::InvalidId(id)));
        }
        subs.insert(id, subscription);
        Ok(())
    }

    /// Removes and returns a subscription.
    pub(crate) async fn remove(&self, id: u32) -> Option<Arc<Subscription>> {
        self.subs.write().await.remove(&id)
    }

    /// Looks up a subscription by id.
    pub(crate) async fn get(&self, id: u32) -> Option<Arc<Subscription>> {
        self.subs.read().await.get(&id).cloned()
    }

    /// The ids currently registered.
    pub(crate) async fn ids(&self) -> Vec<u32> {
        self.subs.read().await.keys().copied().collect()
    }

    /// The number of registered subscriptions.
    pub(crate) async fn len(&self) -> usize {
        self.subs.read().await.len()
    }

    /// Pauses every subscription's publish loop.
    pub(crate) async fn pause_all(&self) {
        for subscription in self.subs.read().await.values() {
            subscription.pause();
        }
    }

    /// Resumes every subscription's publish loop.
    pub(crate) async fn resume_all(&self) {
        for subscription in self.subs.read().await.values() {
            subscription.resume();
        }
    }

    /// Rewrites a registry key after recovery recreated a subscription
    /// under a new server id. The `Arc` handle held by callers is
    /// untouched.
    pub(crate) async fn rewrite_id(&self, old_id: u32, new_id: u32) -> Result<()> {
        let mut subs = self.subs.write().await;
        if new_id == 0 || subs.contains_key(&new_id) {
            return Err(ClientError::Subscription(SubscriptionError::InvalidId(
                new_id,
            )));
        }
        match subs.remove(&old_id) {
            Some(subscription) => {
                subscription.set_id(new_id);
                subs.insert(new_id, subscription);
                Ok(())
            }
            None => Err(ClientError::Subscription(SubscriptionError::Unknown(
                old_id,
            ))),
        }
    }

    /// Stops every subscription and clears the registry.
    pub(crate) async fn clear(&self) {
        let mut subs = self.subs.write().await;
        for subscription in subs.values() {
            subscription.stop();
        }
        subs.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
