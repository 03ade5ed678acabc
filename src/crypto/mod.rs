pub mod ecdh;
pub mod fingerprint;
pub mod primitives;

pub use ecdh::{derive_shared_secret, generate_keypair, parse_public_key_base64, EcdhError, KeyPair};
pub use fingerprint::certificate_fingerprint;
pub use primitives::{
    aes_gcm_decrypt, aes_gcm_encrypt, constant_time_eq, hkdf_sha256, hmac_sha256, md5_hex,
    sha1_hex, sha256_hex, sha384_hex, sha512_hex, CryptoError, DigestAlgorithm,
};
