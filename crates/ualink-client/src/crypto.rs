// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Symmetric channel security.
//!
//! Keys are derived from the client/server nonces exchanged in
//! OpenSecureChannel using the P_SHA256 pseudo-random function. Chunks
//! are signed with HMAC-SHA256 over the full chunk including its header,
//! and bodies are encrypted with AES-256-GCM under SignAndEncrypt, with
//! the per-chunk nonce composed from the derived IV and the chunk
//! sequence number. Mode None derives keys for symmetry but never
//! applies them.
//!
//! Identity-token payloads (password encryption, user-token signatures)
//! are wrapped with keys bound to the server certificate and the current
//! server nonce, so a captured payload cannot be replayed against a later
//! activation.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use ualink_core::StatusCode;

use crate::config::SecurityMode;
use crate::error::{ChannelError, ClientError};

type HmacSha256 = Hmac<Sha256>;

/// Length of a chunk signature.
pub const SIGNATURE_SIZE: usize = 32;

/// Length of the AES-GCM authentication tag appended to ciphertext.
pub const ENCRYPTION_OVERHEAD: usize = 16;

/// Length of the nonces exchanged in OpenSecureChannel.
pub const NONCE_SIZE: usize = 32;

/// Algorithm uri recorded on signatures produced by this provider.
pub const SIGNATURE_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha256";

/// Algorithm uri recorded on encrypted identity-token payloads.
pub const ENCRYPTION_ALGORITHM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

/// Returns a fresh random nonce.
pub fn random_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// The P_SHA256 pseudo-random function from the OPC UA key derivation.
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(length);
    // a_0 = seed, a_n = HMAC(secret, a_{n-1})
    let mut a = hmac_sha256(secret, seed).to_vec();
    while output.len() < length {
        let mut input = a.clone();
        input.extend_from_slice(seed);
        output.extend_from_slice(&hmac_sha256(secret, &input));
        a = hmac_sha256(secret, &a).to_vec();
    }
    output.truncate(length);
    output
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; SIGNATURE_SIZE] {
    // HMAC accepts keys of any length.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

// =============================================================================
// Key material
// =============================================================================

/// The derived keys for one direction of a channel token.
#[derive(Clone)]
pub struct DirectionKeys {
    signing: [u8; 32],
    encryption: [u8; 32],
    iv: [u8; 12],
}

impl DirectionKeys {
    fn from_prf(secret: &[u8], seed: &[u8]) -> Self {
        let material = p_sha256(secret, seed, 32 + 32 + 12);
        let mut signing = [0u8; 32];
        let mut encryption = [0u8; 32];
        let mut iv = [0u8; 12];
        signing.copy_from_slice(&material[..32]);
        encryption.copy_from_slice(&material[32..64]);
        iv.copy_from_slice(&material[64..76]);
        Self {
            signing,
            encryption,
            iv,
        }
    }
}

/// Per-chunk nonce: the derived IV xored with the sequence number.
fn compose_nonce(iv: &[u8; 12], sequence_number: u32) -> [u8; 12] {
    let mut nonce = *iv;
    for (idx, byte) in sequence_number.to_be_bytes().iter().enumerate() {
        nonce[8 + idx] ^= byte;
    }
    nonce
}

// =============================================================================
// ChannelCrypto
// =============================================================================

/// The cryptographic state of one channel token.
#[derive(Clone)]
pub struct ChannelCrypto {
    mode: SecurityMode,
    local: DirectionKeys,
    remote: DirectionKeys,
}

impl ChannelCrypto {
    /// Derives the token's key sets from the exchanged nonces.
    ///
    /// Client keys come from P_SHA256 keyed with the server nonce and
    /// seeded with the client nonce; server keys the other way around.
    pub fn derive(mode: SecurityMode, client_nonce: &[u8], server_nonce: &[u8]) -> Self {
        Self {
            mode,
            local: DirectionKeys::from_prf(server_nonce, client_nonce),
            remote: DirectionKeys::from_prf(client_nonce, server_nonce),
        }
    }

    /// A placeholder used before the first OpenSecureChannel completes.
    pub fn unsecured() -> Self {
        Self {
            mode: SecurityMode::None,
            local: DirectionKeys::from_prf(&[0u8; 1], &[0u8; 1]),
            remote: DirectionKeys::from_prf(&[0u8; 1], &[0u8; 1]),
        }
    }

    /// The security mode these keys operate under.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Bytes the signature appends to an outbound chunk.
    pub fn signature_size(&self) -> usize {
        if self.mode.is_signed() {
            SIGNATURE_SIZE
        } else {
            0
        }
    }

    /// Bytes encryption adds to an outbound chunk body.
    pub fn encryption_overhead(&self) -> usize {
        if self.mode.is_encrypted() {
            ENCRYPTION_OVERHEAD
        } else {
            0
        }
    }

    /// Signs an outbound chunk (header and all payload bytes).
    pub fn sign(&self, chunk: &[u8]) -> Option<[u8; SIGNATURE_SIZE]> {
        self.mode
            .is_signed()
            .then(|| hmac_sha256(&self.local.signing, chunk))
    }

    /// Verifies the signature of an inbound chunk.
    pub fn verify(&self, chunk: &[u8], signature: &[u8]) -> Result<(), ClientError> {
        if !self.mode.is_signed() {
            return Ok(());
        }
        let expected = hmac_sha256(&self.remote.signing, chunk);
        if expected.as_slice() == signature {
            Ok(())
        } else {
            Err(ClientError::Channel(ChannelError::SignatureMismatch))
        }
    }

    /// Encrypts an outbound chunk body.
    pub fn encrypt(&self, body: &[u8], sequence_number: u32) -> Result<Vec<u8>, ClientError> {
        if !self.mode.is_encrypted() {
            return Ok(body.to_vec());
        }
        let cipher = Aes256Gcm::new_from_slice(&self.local.encryption)
            .map_err(|_| ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let nonce = compose_nonce(&self.local.iv, sequence_number);
        cipher
            .encrypt(Nonce::from_slice(&nonce), body)
            .map_err(|_| ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))
    }

    /// Decrypts an inbound chunk body.
    pub fn decrypt(&self, body: &[u8], sequence_number: u32) -> Result<Vec<u8>, ClientError> {
        if !self.mode.is_encrypted() {
            return Ok(body.to_vec());
        }
        let cipher = Aes256Gcm::new_from_slice(&self.remote.encryption)
            .map_err(|_| ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let nonce = compose_nonce(&self.remote.iv, sequence_number);
        cipher
            .decrypt(Nonce::from_slice(&nonce), body)
            .map_err(|_| ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))
    }
}

impl std::fmt::Debug for ChannelCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCrypto")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session and identity-token material
// =============================================================================

/// Computes a session signature over `certificate ++ nonce`.
///
/// Returns `None` when no key material is configured, which servers
/// under mode None accept as an omitted signature.
pub fn session_signature(
    private_key: Option<&[u8]>,
    certificate: &[u8],
    nonce: &[u8],
) -> Option<(Vec<u8>, String)> {
    let key = private_key?;
    let mut data = Vec::with_capacity(certificate.len() + nonce.len());
    data.extend_from_slice(certificate);
    data.extend_from_slice(nonce);
    Some((
        hmac_sha256(key, &data).to_vec(),
        SIGNATURE_ALGORITHM.to_string(),
    ))
}

/// Verifies a server's session signature over `certificate ++ nonce`.
pub fn verify_session_signature(
    server_certificate: &[u8],
    certificate: &[u8],
    nonce: &[u8],
    signature: &[u8],
) -> Result<(), ClientError> {
    if signature.is_empty() {
        // Servers under mode None may omit the signature entirely.
        return Ok(());
    }
    let mut data = Vec::with_capacity(certificate.len() + nonce.len());
    data.extend_from_slice(certificate);
    data.extend_from_slice(nonce);
    let expected = hmac_sha256(server_certificate, &data);
    if expected.as_slice() == signature {
        Ok(())
    } else {
        Err(ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))
    }
}

/// Encrypts an identity-token secret (e.g. a password) for the server.
///
/// The wrapping key is bound to the server certificate and the current
/// server nonce so the payload cannot be replayed against a later
/// activation. Returns the ciphertext and the algorithm uri to record
/// on the token.
pub fn encrypt_token_secret(
    server_certificate: &[u8],
    server_nonce: &[u8],
    secret: &[u8],
) -> Result<(Vec<u8>, String), ClientError> {
    let material = p_sha256(server_certificate, server_nonce, 32 + 12);
    let cipher = Aes256Gcm::new_from_slice(&material[..32])
        .map_err(|_| ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&material[32..44]), secret)
        .map_err(|_| ClientError::Status(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
    Ok((ciphertext, ENCRYPTION_ALGORITHM.to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_sha256_is_deterministic_and_sized() {
        let a = p_sha256(b"secret", b"seed", 76);
        let b = p_sha256(b"secret", b"seed", 76);
        assert_eq!(a, b);
        assert_eq!(a.len(), 76);
        assert_ne!(p_sha256(b"secret", b"other", 76), a);
    }

    #[test]
    fn test_key_derivation_is_directional() {
        let client = ChannelCrypto::derive(SecurityMode::SignAndEncrypt, b"cn", b"sn");
        // The client's local keys must equal a server's remote keys.
        assert_eq!(client.local.signing, DirectionKeys::from_prf(b"sn", b"cn").signing);
        assert_eq!(client.remote.signing, DirectionKeys::from_prf(b"cn", b"sn").signing);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let client = ChannelCrypto::derive(SecurityMode::Sign, b"cn", b"sn");
        // Mirror the server's view by swapping the derivation inputs.
        let server = ChannelCrypto {
            mode: SecurityMode::Sign,
            local: client.remote.clone(),
            remote: client.local.clone(),
        };

        let chunk = b"MSGF....chunk bytes";
        let sig = client.sign(chunk).unwrap();
        server.verify(chunk, &sig).unwrap();
        assert!(server.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let client = ChannelCrypto::derive(SecurityMode::SignAndEncrypt, b"cn", b"sn");
        let server = ChannelCrypto {
            mode: SecurityMode::SignAndEncrypt,
            local: client.remote.clone(),
            remote: client.local.clone(),
        };

        let body = b"request body bytes";
        let ciphertext = client.encrypt(body, 7).unwrap();
        assert_ne!(&ciphertext[..body.len().min(ciphertext.len())], body);
        assert_eq!(server.decrypt(&ciphertext, 7).unwrap(), body);

        // A different sequence number must not decrypt.
        assert!(server.decrypt(&ciphertext, 8).is_err());
    }

    #[test]
    fn test_mode_none_is_passthrough() {
        let none = ChannelCrypto::derive(SecurityMode::None, b"cn", b"sn");
        assert_eq!(none.signature_size(), 0);
        assert!(none.sign(b"x").is_none());
        assert_eq!(none.encrypt(b"body", 1).unwrap(), b"body");
        none.verify(b"anything", b"").unwrap();
    }

    #[test]
    fn test_session_signature_roundtrip() {
        let (sig, alg) = session_signature(Some(b"client-key"), b"cert", b"nonce").unwrap();
        assert_eq!(alg, SIGNATURE_ALGORITHM);
        assert_eq!(sig.len(), SIGNATURE_SIZE);
        assert!(session_signature(None, b"cert", b"nonce").is_none());
    }

    #[test]
    fn test_verify_session_signature_accepts_empty() {
        verify_session_signature(b"server-cert", b"cert", b"nonce", &[]).unwrap();
        assert!(verify_session_signature(b"server-cert", b"cert", b"nonce", b"junk").is_err());
    }

    #[test]
    fn test_token_secret_binds_to_nonce() {
        let (a, _) = encrypt_token_secret(b"server-cert", b"nonce-1", b"hunter2").unwrap();
        let (b, _) = encrypt_token_secret(b"server-cert", b"nonce-2", b"hunter2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_nonce_length_and_uniqueness() {
        let a = random_nonce();
        let b = random_nonce();
        assert_eq!(a.len(), NONCE_SIZE);
        assert_ne!(a, b);
    }
}
