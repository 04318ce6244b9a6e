// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The reconnection supervisor.
//!
//! A single long-lived task consumes the secure channel's error signal
//! and drives a layered rebuild: recreate the channel, then restore or
//! recreate the session, then republish or recreate the subscriptions.
//! The action graph has no cycles other than the redial retry loop:
//!
//! ```text
//! RecreateChannel  -> RestoreSession
//! RestoreSession   -> RepublishSubscriptions   (session still on server)
//!                  -> RecreateSession          (otherwise)
//! RecreateSession  -> RestoreSubscriptions     (on success)
//!                  -> RecreateChannel          (on failure)
//! RepublishSubscriptions -> Done | RecreateSession
//! RestoreSubscriptions   -> Done | RecreateSession
//! Abort            -> terminal
//! ```
//!
//! Subscriptions are paused on entry to recovery and resumed before the
//! restore fallback runs; residual errors on the signal are drained once
//! recovery ends so the next fault starts from a clean slate.

use std::sync::Arc;

use tokio::sync::mpsc;

use ualink_core::StatusCode;

use crate::client::{ClientCore, ConnectionState};
use crate::error::ClientError;

// =============================================================================
// RecoveryAction
// =============================================================================

/// The supervisor's recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecoveryAction {
    /// Recovery finished; the client is connected again.
    None,
    /// Redial the transport and open a fresh secure channel.
    RecreateChannel,
    /// Reactivate the detached session on the new channel.
    RestoreSession,
    /// Create and activate a replacement session.
    RecreateSession,
    /// Replay missed notifications for every subscription.
    RepublishSubscriptions,
    /// Transfer subscriptions to the new session, recreating the ones
    /// the server no longer knows.
    RestoreSubscriptions,
    /// Recovery is not possible; the client terminates.
    Abort,
}

/// Maps an observed channel error to the first recovery action.
pub(crate) fn initial_action(err: &ClientError, auto_reconnect: bool) -> RecoveryAction {
    if err.is_connection_refused() {
        return RecoveryAction::Abort;
    }
    if !auto_reconnect {
        return RecoveryAction::Abort;
    }
    match err.status_code() {
        Some(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID) => RecoveryAction::RecreateChannel,
        Some(StatusCode::BAD_SESSION_ID_INVALID) => RecoveryAction::RecreateSession,
        Some(StatusCode::BAD_SUBSCRIPTION_ID_INVALID) => RecoveryAction::RestoreSubscriptions,
        // The server rejected our certificate; the refresh hook runs
        // before the redial, then the channel is rebuilt as usual.
        Some(StatusCode::BAD_CERTIFICATE_INVALID) => RecoveryAction::RecreateChannel,
        _ => RecoveryAction::RecreateChannel,
    }
}

// =============================================================================
// Supervisor task
// =============================================================================

/// Runs the supervisor until the client closes or recovery aborts.
pub(crate) async fn run(core: Arc<ClientCore>, mut errors: mpsc::Receiver<ClientError>) {
    loop {
        let err = tokio::select! {
            _ = core.cancelled() => return,
            err = errors.recv() => match err {
                Some(err) => err,
                None => return,
            },
        };

        // An orderly end of stream after the caller closed is the normal
        // shutdown path.
        if err.is_clean_eof() && core.state() == ConnectionState::Closed {
            return;
        }
        core.set_state(ConnectionState::Disconnected);

        let refresh_certificate =
            err.status_code() == Some(StatusCode::BAD_CERTIFICATE_INVALID);
        let mut action = initial_action(&err, core.auto_reconnect());
        tracing::info!(error = %err, initial = ?action, "connection fault observed");

        core.pause_subscriptions().await;

        while action != RecoveryAction::None {
            if core.is_cancelled() {
                return;
            }
            action = match action {
                RecoveryAction::RecreateChannel => {
                    core.teardown_channel().await;
                    core.set_state(ConnectionState::Reconnecting);
                    if refresh_certificate {
                        core.refresh_certificate();
                    }

                    tracing::debug!("recreating secure channel");
                    loop {
                        match core.dial().await {
                            Ok(()) => break,
                            Err(dial_err) => {
                                tracing::debug!(error = %dial_err, "redial failed");
                                tokio::select! {
                                    _ = core.cancelled() => return,
                                    _ = tokio::time::sleep(core.reconnect_interval()) => {}
                                }
                            }
                        }
                    }
                    tracing::debug!("secure channel recreated");
                    RecoveryAction::RestoreSession
                }

                RecoveryAction::RestoreSession => match core.detach_session() {
                    None => RecoveryAction::RecreateSession,
                    Some(session) => {
                        tracing::debug!("restoring session");
                        match core.activate_session(session).await {
                            Ok(()) => {
                                tracing::debug!("session restored");
                                RecoveryAction::RepublishSubscriptions
                            }
                            Err(err) => {
                                tracing::debug!(error = %err, "session restore failed");
                                RecoveryAction::RecreateSession
                            }
                        }
                    }
                },

                RecoveryAction::RecreateSession => {
                    tracing::debug!("recreating session");
                    let activated = match core.create_session().await {
                        Ok(session) => core.activate_session(session).await,
                        Err(err) => Err(err),
                    };
                    match activated {
                        Ok(()) => RecoveryAction::RestoreSubscriptions,
                        Err(err) => {
                            tracing::debug!(error = %err, "session recreation failed");
                            RecoveryAction::RecreateChannel
                        }
                    }
                }

                RecoveryAction::RepublishSubscriptions => {
                    let ids = core.subscription_ids().await;
                    let mut to_restore = Vec::new();
                    for id in ids {
                        if let Err(err) = core.republish_subscription(id).await {
                            tracing::debug!(subscription_id = id, error = %err, "republish failed");
                            to_restore.push(id);
                        }
                    }
                    match core.finish_subscription_recovery(to_restore).await {
                        Ok(()) => {
                            core.set_state(ConnectionState::Connected);
                            RecoveryAction::None
                        }
                        Err(_) => RecoveryAction::RecreateSession,
                    }
                }

                RecoveryAction::RestoreSubscriptions => {
                    let ids = core.subscription_ids().await;
                    let mut to_republish = Vec::new();
                    let mut to_restore = Vec::new();

                    match core.transfer_subscriptions(&ids).await {
                        Err(err) => {
                            tracing::debug!(error = %err, "transfer failed, restoring all");
                            to_restore = ids.clone();
                        }
                        Ok(results) => {
                            for (id, result) in ids.iter().zip(results.iter()) {
                                if result.status_code
                                    == StatusCode::BAD_SUBSCRIPTION_ID_INVALID
                                {
                                    tracing::debug!(
                                        subscription_id = id,
                                        "subscription must be recreated"
                                    );
                                    to_restore.push(*id);
                                } else {
                                    to_republish.push(*id);
                                }
                            }
                        }
                    }

                    // One failed republish sends the whole republish set
                    // to the restore path.
                    let mut republish_failed = false;
                    for id in &to_republish {
                        if let Err(err) = core.republish_subscription(*id).await {
                            tracing::debug!(subscription_id = id, error = %err, "republish failed");
                            republish_failed = true;
                        }
                    }
                    if republish_failed {
                        to_restore.extend(to_republish.iter().copied());
                        to_restore.sort_unstable();
                        to_restore.dedup();
                    }

                    match core.finish_subscription_recovery(to_restore).await {
                        Ok(()) => {
                            core.set_state(ConnectionState::Connected);
                            RecoveryAction::None
                        }
                        Err(_) => RecoveryAction::RecreateSession,
                    }
                }

                RecoveryAction::Abort => {
                    tracing::warn!("reconnection not recoverable");
                    core.set_state(ConnectionState::Closed);
                    return;
                }

                RecoveryAction::None => RecoveryAction::None,
            };
        }

        // Drain residual faults accumulated during recovery.
        while errors.try_recv().is_ok() {}
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn remote(code: StatusCode) -> ClientError {
        ClientError::Transport(TransportError::Remote {
            code,
            reason: String::new(),
        })
    }

    #[test]
    fn test_action_table() {
        assert_eq!(
            initial_action(&remote(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID), true),
            RecoveryAction::RecreateChannel
        );
        assert_eq!(
            initial_action(&remote(StatusCode::BAD_SESSION_ID_INVALID), true),
            RecoveryAction::RecreateSession
        );
        assert_eq!(
            initial_action(&remote(StatusCode::BAD_SUBSCRIPTION_ID_INVALID), true),
            RecoveryAction::RestoreSubscriptions
        );
        assert_eq!(
            initial_action(&remote(StatusCode::BAD_CERTIFICATE_INVALID), true),
            RecoveryAction::RecreateChannel
        );
        // Unknown faults rebuild the channel.
        assert_eq!(
            initial_action(&remote(StatusCode::BAD_INTERNAL_ERROR), true),
            RecoveryAction::RecreateChannel
        );
        // A clean EOF with the client still open rebuilds the channel.
        assert_eq!(
            initial_action(&ClientError::Transport(TransportError::Closed), true),
            RecoveryAction::RecreateChannel
        );
    }

    #[test]
    fn test_connection_refused_aborts() {
        let err = ClientError::Transport(TransportError::ConnectionRefused {
            endpoint: "opc.tcp://localhost:4840".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        });
        assert_eq!(initial_action(&err, true), RecoveryAction::Abort);
    }

    #[test]
    fn test_auto_reconnect_disabled_aborts() {
        assert_eq!(
            initial_action(&ClientError::Transport(TransportError::Closed), false),
            RecoveryAction::Abort
        );
        assert_eq!(
            initial_action(&remote(StatusCode::BAD_SESSION_ID_INVALID), false),
            RecoveryAction::Abort
        );
    }
}
