// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session state and identity-token preparation.
//!
//! A [`Session`] is the authenticated context returned by CreateSession
//! and installed by ActivateSession. The client keeps at most one active
//! session; the reconnection supervisor detaches it across channel
//! rebuilds so the server-side context can be restored without a new
//! CreateSession exchange.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use ualink_core::messages::{
    AnonymousIdentityToken, EndpointDescription, ExtensionObject, IssuedIdentityToken,
    SignatureData, UserNameIdentityToken, UserTokenPolicy, X509IdentityToken,
    USER_TOKEN_ANONYMOUS,
};
use ualink_core::node_id::NodeId;

use crate::config::{
    IdentityToken, SessionConfig, DEFAULT_ANONYMOUS_POLICY_ID, SECURITY_POLICY_NONE,
};
use crate::crypto;
use crate::error::Result;

// =============================================================================
// Session
// =============================================================================

/// An authenticated session context.
///
/// Created by CreateSession, made usable by ActivateSession. The server
/// nonce rotates on every activation response and feeds the signatures
/// of the next activation, so it sits behind a mutex while the rest of
/// the session is immutable.
pub struct Session {
    session_id: NodeId,
    auth_token: NodeId,
    name: String,
    server_certificate: Vec<u8>,
    server_nonce: Mutex<Vec<u8>>,
    revised_timeout: Duration,
    max_request_message_size: u32,
    token_policy_id: String,
}

impl Session {
    pub(crate) fn new(
        session_id: NodeId,
        auth_token: NodeId,
        name: String,
        server_certificate: Vec<u8>,
        server_nonce: Vec<u8>,
        revised_timeout: Duration,
        max_request_message_size: u32,
        token_policy_id: String,
    ) -> Self {
        Self {
            session_id,
            auth_token,
            name,
            server_certificate,
            server_nonce: Mutex::new(server_nonce),
            revised_timeout,
            max_request_message_size,
            token_policy_id,
        }
    }

    /// The server-assigned session id.
    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    /// The opaque authentication token attached to every request.
    pub fn auth_token(&self) -> &NodeId {
        &self.auth_token
    }

    /// The session name sent at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server certificate returned by CreateSession.
    pub fn server_certificate(&self) -> &[u8] {
        &self.server_certificate
    }

    /// The latest server nonce.
    pub fn server_nonce(&self) -> Vec<u8> {
        self.server_nonce.lock().clone()
    }

    /// Rotates the server nonce after an activation response.
    pub(crate) fn rotate_server_nonce(&self, nonce: Vec<u8>) {
        *self.server_nonce.lock() = nonce;
    }

    /// The session timeout granted by the server.
    pub fn revised_timeout(&self) -> Duration {
        self.revised_timeout
    }

    /// The largest request the server accepts (0 = no limit).
    pub fn max_request_message_size(&self) -> u32 {
        self.max_request_message_size
    }

    /// The user-token policy id resolved at creation time and reused on
    /// every activation.
    pub fn token_policy_id(&self) -> &str {
        &self.token_policy_id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("name", &self.name)
            .field("revised_timeout", &self.revised_timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Default session name: a client prefix plus a monotonic timestamp.
pub(crate) fn default_session_name() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("ualink-{nanos}")
}

/// Finds the anonymous user-token policy id advertised by an unsecured
/// endpoint, falling back to the literal `"Anonymous"`.
pub(crate) fn anonymous_policy_id(endpoints: &[EndpointDescription]) -> String {
    for endpoint in endpoints {
        if endpoint.security_mode != ualink_core::messages::SECURITY_MODE_NONE
            || endpoint.security_policy_uri != SECURITY_POLICY_NONE
        {
            continue;
        }
        for policy in &endpoint.user_identity_tokens {
            if policy.token_type == USER_TOKEN_ANONYMOUS && !policy.policy_id.is_empty() {
                return policy.policy_id.clone();
            }
        }
    }
    DEFAULT_ANONYMOUS_POLICY_ID.to_string()
}

/// Picks the policy id for the configured identity: an explicit override
/// wins, then the first matching policy the server advertises, then the
/// identity's variant name as a last resort.
pub(crate) fn token_policy_id(
    config: &SessionConfig,
    endpoints: &[EndpointDescription],
) -> String {
    if let Some(policy_id) = &config.auth_policy_id {
        return policy_id.clone();
    }
    let wanted = config.identity.token_type();
    let advertised = endpoints
        .iter()
        .flat_map(|endpoint| endpoint.user_identity_tokens.iter())
        .find(|policy: &&UserTokenPolicy| policy.token_type == wanted);
    match advertised {
        Some(policy) if !policy.policy_id.is_empty() => policy.policy_id.clone(),
        _ if wanted == USER_TOKEN_ANONYMOUS => anonymous_policy_id(endpoints),
        _ => config.identity.name().to_string(),
    }
}

/// Prepares the wrapped identity token and the optional user-token
/// signature for an ActivateSession request.
///
/// - Anonymous: the bare policy id.
/// - UserName: the password encrypted against the server certificate and
///   current server nonce, with the algorithm recorded on the token.
/// - X509: a possession signature over (server certificate ++ nonce).
/// - Issued: the token bytes with the encryption algorithm left empty.
pub(crate) fn prepare_identity(
    config: &SessionConfig,
    policy_id: String,
    server_certificate: &[u8],
    server_nonce: &[u8],
) -> Result<(ExtensionObject, SignatureData)> {
    match &config.identity {
        IdentityToken::Anonymous => {
            let token = AnonymousIdentityToken { policy_id };
            Ok((
                ExtensionObject::from_encodable(AnonymousIdentityToken::TYPE_ID, &token),
                SignatureData::default(),
            ))
        }
        IdentityToken::UserName { user, password } => {
            let (ciphertext, algorithm) = crypto::encrypt_token_secret(
                server_certificate,
                server_nonce,
                password.as_bytes(),
            )?;
            let token = UserNameIdentityToken {
                policy_id,
                user_name: user.clone(),
                password: Some(ciphertext),
                encryption_algorithm: Some(algorithm),
            };
            Ok((
                ExtensionObject::from_encodable(UserNameIdentityToken::TYPE_ID, &token),
                SignatureData::default(),
            ))
        }
        IdentityToken::X509 {
            certificate,
            private_key,
        } => {
            let token = X509IdentityToken {
                policy_id,
                certificate_data: Some(certificate.clone()),
            };
            let signature = crypto::session_signature(
                Some(private_key),
                server_certificate,
                server_nonce,
            )
            .map(|(signature, algorithm)| SignatureData {
                algorithm: Some(algorithm),
                signature: Some(signature),
            })
            .unwrap_or_default();
            Ok((
                ExtensionObject::from_encodable(X509IdentityToken::TYPE_ID, &token),
                signature,
            ))
        }
        IdentityToken::Issued { token } => {
            let token = IssuedIdentityToken {
                policy_id,
                token_data: Some(token.clone()),
                // Server-specific handling; no algorithm recorded.
                encryption_algorithm: None,
            };
            Ok((
                ExtensionObject::from_encodable(IssuedIdentityToken::TYPE_ID, &token),
                SignatureData::default(),
            ))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ualink_core::messages::{SECURITY_MODE_NONE, USER_TOKEN_USER_NAME};

    fn endpoint_with_tokens(tokens: Vec<UserTokenPolicy>) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://localhost:4840".into(),
            security_mode: SECURITY_MODE_NONE,
            security_policy_uri: SECURITY_POLICY_NONE.into(),
            user_identity_tokens: tokens,
            ..EndpointDescription::default()
        }
    }

    #[test]
    fn test_anonymous_policy_discovery() {
        let endpoints = vec![endpoint_with_tokens(vec![UserTokenPolicy {
            policy_id: "anon-open62541".into(),
            token_type: USER_TOKEN_ANONYMOUS,
            ..UserTokenPolicy::default()
        }])];
        assert_eq!(anonymous_policy_id(&endpoints), "anon-open62541");
    }

    #[test]
    fn test_anonymous_policy_fallback() {
        assert_eq!(anonymous_policy_id(&[]), DEFAULT_ANONYMOUS_POLICY_ID);

        // A secured endpoint does not contribute anonymous policies.
        let mut endpoint = endpoint_with_tokens(vec![UserTokenPolicy {
            policy_id: "anon".into(),
            token_type: USER_TOKEN_ANONYMOUS,
            ..UserTokenPolicy::default()
        }]);
        endpoint.security_policy_uri = "something-else".into();
        assert_eq!(anonymous_policy_id(&[endpoint]), DEFAULT_ANONYMOUS_POLICY_ID);
    }

    #[test]
    fn test_token_policy_override_wins() {
        let config = SessionConfig::builder().auth_policy_id("custom").build();
        assert_eq!(token_policy_id(&config, &[]), "custom");
    }

    #[test]
    fn test_username_token_is_encrypted() {
        let config = SessionConfig::builder()
            .auth_username("operator", "hunter2")
            .build();
        let endpoints = vec![endpoint_with_tokens(vec![UserTokenPolicy {
            policy_id: "user-pass".into(),
            token_type: USER_TOKEN_USER_NAME,
            ..UserTokenPolicy::default()
        }])];
        let policy_id = token_policy_id(&config, &endpoints);
        assert_eq!(policy_id, "user-pass");

        let (wrapped, signature) =
            prepare_identity(&config, policy_id, b"server-cert", b"server-nonce").unwrap();
        assert_eq!(wrapped.numeric_type_id(), UserNameIdentityToken::TYPE_ID);
        let token: UserNameIdentityToken = wrapped.decode_body_as().unwrap();
        assert_eq!(token.user_name, "operator");
        let password = token.password.unwrap();
        assert!(!password.windows(7).any(|window| window == b"hunter2"));
        assert!(token.encryption_algorithm.is_some());
        assert!(signature.signature.is_none());
    }

    #[test]
    fn test_x509_token_carries_possession_signature() {
        let config = SessionConfig::builder()
            .auth_certificate(vec![1, 2, 3], vec![4, 5, 6])
            .build();
        let (wrapped, signature) =
            prepare_identity(&config, "x509".into(), b"server-cert", b"nonce").unwrap();
        assert_eq!(wrapped.numeric_type_id(), X509IdentityToken::TYPE_ID);
        assert!(signature.signature.is_some());
        assert!(signature.algorithm.is_some());
    }

    #[test]
    fn test_issued_token_leaves_algorithm_empty() {
        let config = SessionConfig::builder()
            .auth_issued(vec![9, 9, 9], None)
            .build();
        let (wrapped, _) =
            prepare_identity(&config, "issued".into(), b"server-cert", b"nonce").unwrap();
        let token: IssuedIdentityToken = wrapped.decode_body_as().unwrap();
        assert!(token.encryption_algorithm.is_none());
    }

    #[test]
    fn test_session_nonce_rotation() {
        let session = Session::new(
            NodeId::numeric(1, 42),
            NodeId::opaque(0, vec![1, 2]),
            "ualink-test".into(),
            vec![],
            vec![1; 32],
            Duration::from_secs(60),
            0,
            "Anonymous".into(),
        );
        assert_eq!(session.server_nonce(), vec![1; 32]);
        session.rotate_server_nonce(vec![2; 32]);
        assert_eq!(session.server_nonce(), vec![2; 32]);
    }

    #[test]
    fn test_default_session_name_prefix() {
        let name = default_session_name();
        assert!(name.starts_with("ualink-"));
    }
}
