//! Hash, HMAC, HKDF, and AEAD primitives shared by every other module
//! that needs cryptography. All comparisons of secrets/tags/MACs route
//! through [`constant_time_eq`].

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("AEAD operation failed")]
    Aead,
    #[error("HKDF expand failed: output too long")]
    HkdfExpand,
    #[error("invalid key length: expected {expected}, got {actual}")]
    KeyLength { expected: usize, actual: usize },
}

/// Hash algorithms the verification manager and crypto primitives
/// support, per spec §4.A.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
    #[serde(rename = "SHA-1")]
    Sha1,
    #[serde(rename = "MD5")]
    Md5,
}

impl DigestAlgorithm {
    pub fn digest_hex(&self, data: &[u8]) -> String {
        match self {
            DigestAlgorithm::Sha256 => sha256_hex(data),
            DigestAlgorithm::Sha384 => sha384_hex(data),
            DigestAlgorithm::Sha512 => sha512_hex(data),
            DigestAlgorithm::Sha1 => sha1_hex(data),
            DigestAlgorithm::Md5 => md5_hex(data),
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn sha384_hex(data: &[u8]) -> String {
    hex::encode(Sha384::digest(data))
}

pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `data` with `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HKDF-SHA256 extract-then-expand, producing `len` bytes of output
/// key material from `ikm` (input key material), `salt`, and `info`.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm).map_err(|_| CryptoError::HkdfExpand)?;
    Ok(okm)
}

/// AES-256-GCM encrypt. `nonce` must be 12 bytes. Returns ciphertext
/// with the 16-byte tag appended, matching the AEAD crate convention.
pub fn aes_gcm_encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .encrypt(
            AesNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Aead)
}

/// AES-256-GCM decrypt; `ciphertext` must include the trailing 16-byte
/// tag as produced by [`aes_gcm_encrypt`].
pub fn aes_gcm_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(
            AesNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Aead)
}

/// Constant-time byte-slice equality for secrets, MACs, and tokens.
/// Short-circuits on length mismatch (length is not secret) but never
/// on content.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
