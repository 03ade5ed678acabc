//! Per-transfer key exchange (spec §3, §4.I). Generalized from the
//! teacher's single pre-shared `Encryptor` (`crypto.rs`) into a
//! two-party ECDH handshake: each side derives the same 64 bytes of
//! key material independently rather than one side choosing a key and
//! shipping it over the wire in the clear.

use crate::crypto::{derive_shared_secret, generate_keypair, hkdf_sha256, parse_public_key_base64, KeyPair};
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    KeyExchangePending,
    Ready,
    Failed,
}

#[derive(Error, Debug)]
pub enum EncryptionSessionError {
    #[error("remote public key invalid: {0}")]
    InvalidRemoteKey(#[from] crate::crypto::EcdhError),
    #[error("key derivation failed: {0}")]
    Derivation(#[from] crate::crypto::CryptoError),
}

/// Key material derived for one transfer. `enc_key`/`mac_key` are
/// zeroized on drop; `Drop` runs even if the session never reached
/// `Ready`, since the local private key is also sensitive.
pub struct EncryptionSession {
    pub session_id: String,
    pub remote_endpoint: String,
    local_keys: KeyPair,
    remote_public_b64: Option<String>,
    enc_key: Option<[u8; 32]>,
    mac_key: Option<[u8; 32]>,
    pub status: SessionStatus,
}

impl EncryptionSession {
    pub fn new(session_id: impl Into<String>, remote_endpoint: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            remote_endpoint: remote_endpoint.into(),
            local_keys: generate_keypair(),
            remote_public_b64: None,
            enc_key: None,
            mac_key: None,
            status: SessionStatus::KeyExchangePending,
        }
    }

    /// SPKI-encoded local public key, sent to the peer to start or
    /// answer a handshake.
    pub fn local_public_key_base64(&self) -> Result<String, EncryptionSessionError> {
        Ok(self.local_keys.public_key_base64()?)
    }

    /// Complete the handshake once the peer's public key is known.
    /// Derives `encKey`/`macKey` via `HKDF-SHA256(Z, salt="LocalTalk-<sid>",
    /// info="LocalTalk-FileTransfer-v1", L=64)`.
    pub fn complete_key_exchange(
        &mut self,
        remote_public_b64: &str,
    ) -> Result<(), EncryptionSessionError> {
        let remote_public = parse_public_key_base64(remote_public_b64)?;
        let shared = derive_shared_secret(&self.local_keys, &remote_public);

        let salt = format!("LocalTalk-{}", self.session_id);
        let okm = hkdf_sha256(
            shared.as_bytes(),
            salt.as_bytes(),
            b"LocalTalk-FileTransfer-v1",
            64,
        )?;

        let mut enc_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        enc_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..]);

        self.enc_key = Some(enc_key);
        self.mac_key = Some(mac_key);
        self.remote_public_b64 = Some(remote_public_b64.to_string());
        self.status = SessionStatus::Ready;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.status == SessionStatus::Ready
    }

    pub fn enc_key(&self) -> Option<&[u8; 32]> {
        self.enc_key.as_ref()
    }

    pub fn mac_key(&self) -> Option<&[u8; 32]> {
        self.mac_key.as_ref()
    }

    pub fn key_strength_bits(&self) -> usize {
        self.local_keys.key_strength_bits()
    }
}

impl Drop for EncryptionSession {
    fn drop(&mut self) {
        if let Some(mut key) = self.enc_key.take() {
            key.zeroize();
        }
        if let Some(mut key) = self.mac_key.take() {
            key.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_parties_derive_identical_key_material() {
        let mut alice = EncryptionSession::new("sid-1", "alice.local:53317");
        let mut bob = EncryptionSession::new("sid-1", "bob.local:53317");

        let alice_pub = alice.local_public_key_base64().unwrap();
        let bob_pub = bob.local_public_key_base64().unwrap();

        alice.complete_key_exchange(&bob_pub).unwrap();
        bob.complete_key_exchange(&alice_pub).unwrap();

        assert!(alice.is_ready());
        assert!(bob.is_ready());
        assert_eq!(alice.enc_key(), bob.enc_key());
        assert_eq!(alice.mac_key(), bob.mac_key());
    }

    #[test]
    fn different_session_ids_derive_different_keys() {
        let mut alice = EncryptionSession::new("sid-a", "alice.local:53317");
        let mut bob_for_a = EncryptionSession::new("sid-a", "bob.local:53317");
        let bob_pub = bob_for_a.local_public_key_base64().unwrap();
        alice.complete_key_exchange(&bob_pub).unwrap();

        let mut alice2 = EncryptionSession::new("sid-b", "alice.local:53317");
        alice2.complete_key_exchange(&bob_pub).unwrap();

        assert_ne!(alice.enc_key(), alice2.enc_key());
    }

    #[test]
    fn garbage_remote_key_fails_handshake() {
        let mut alice = EncryptionSession::new("sid-1", "alice.local:53317");
        assert!(alice.complete_key_exchange("not-a-real-key").is_err());
        assert_eq!(alice.status, SessionStatus::KeyExchangePending);
    }
}
