//! P-384 ECDH key agreement (spec §4.A, §4.I). Keypairs are exported
//! as SPKI DER/base64 for the wire; shared secrets feed HKDF-SHA256 in
//! `encryption::session`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p384::ecdh::diffie_hellman;
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use p384::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum EcdhError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("key strength below minimum (256 bits)")]
    WeakKey,
}

/// An ECDH keypair. The private scalar is zeroized on drop.
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh P-384 keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Curve order in bits; P-384 always reports 384, satisfying the
    /// spec's "reject < 256-bit" floor.
    pub fn key_strength_bits(&self) -> usize {
        384
    }

    /// SPKI DER encoding, base64'd for transport in the key-exchange
    /// JSON payload (`{sid, publicKey}`).
    pub fn public_key_base64(&self) -> Result<String, EcdhError> {
        let der = self
            .public
            .to_public_key_der()
            .map_err(|_| EcdhError::InvalidPublicKey)?;
        Ok(BASE64.encode(der.as_bytes()))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

/// Decode a base64 SPKI-encoded remote public key, rejecting anything
/// below the 256-bit floor spec §4.A requires.
pub fn generate_keypair() -> KeyPair {
    KeyPair::generate()
}

pub fn parse_public_key_base64(encoded: &str) -> Result<PublicKey, EcdhError> {
    let der = BASE64
        .decode(encoded)
        .map_err(|_| EcdhError::InvalidPublicKey)?;
    let key = PublicKey::from_public_key_der(&der).map_err(|_| EcdhError::InvalidPublicKey)?;
    // P-384 points are always >= 256 bits; the check exists so a future
    // curve swap can't silently slip under the floor.
    if key.to_encoded_point(false).as_bytes().len() < 1 + 2 * 32 {
        return Err(EcdhError::WeakKey);
    }
    Ok(key)
}

/// A raw ECDH shared secret; zeroized on drop. Never used directly as
/// a symmetric key — always passed through HKDF first.
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Compute `Z = ECDH(local_secret, remote_public)`.
pub fn derive_shared_secret(keypair: &KeyPair, remote_public: &PublicKey) -> SharedSecret {
    let shared = diffie_hellman(keypair.secret.to_nonzero_scalar(), remote_public.as_affine());
    SharedSecret(shared.raw_secret_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_public_key_encoding() {
        let kp = KeyPair::generate();
        let encoded = kp.public_key_base64().unwrap();
        let decoded = parse_public_key_base64(&encoded).unwrap();
        assert_eq!(decoded, *kp.public_key());
    }

    #[test]
    fn two_parties_derive_identical_secret() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let alice_shared = derive_shared_secret(&alice, bob.public_key());
        let bob_shared = derive_shared_secret(&bob, alice.public_key());

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn key_strength_meets_floor() {
        let kp = KeyPair::generate();
        assert!(kp.key_strength_bits() >= 256);
    }

    #[test]
    fn rejects_garbage_public_key() {
        assert!(parse_public_key_base64("not-valid-base64!!").is_err());
    }
}
