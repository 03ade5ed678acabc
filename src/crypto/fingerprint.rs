//! Device/certificate fingerprinting (spec §3, §4.A, glossary).

use sha2::{Digest, Sha256};

/// Uppercase hex SHA-256 over a certificate's raw (DER) bytes, used as
/// the device fingerprint once HTTPS/certificates are in play.
pub fn certificate_fingerprint(cert_der: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(cert_der))
}

/// Generate an opaque 30-char base62 identity, used as the device
/// fingerprint when no certificate is available (spec §3: "opaque
/// identity, 30 chars base62").
pub fn generate_device_fingerprint() -> String {
    base62_random(30)
}

const BASE62_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn base62_random(len: usize) -> String {
    use rand::RngCore;
    let mut rng = rand::rngs::OsRng;
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 1];
    while out.len() < len {
        rng.fill_bytes(&mut buf);
        // Reject-and-resample to avoid modulo bias (256 isn't a
        // multiple of 62).
        if (buf[0] as usize) < BASE62_ALPHABET.len() * 4 {
            out.push(BASE62_ALPHABET[(buf[0] as usize) % BASE62_ALPHABET.len()] as char);
        }
    }
    out
}
