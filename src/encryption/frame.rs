//! Streaming AEAD chunk framing (spec §4.I):
//! `IV(12B) || TAG(16B) || LEN(4B BE u32) || CIPHERTEXT(LEN) || HMAC(32B)`.
//! Readers and writers are unidirectional and non-seekable, built over
//! length-prefixed framing the way the pack's handshake helpers
//! (`read_lp`/`write_lp`) frame their handshake messages.

use crate::crypto::{aes_gcm_decrypt, aes_gcm_encrypt, constant_time_eq, hmac_sha256};
use crate::error::AppError;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_CHUNK_LEN: usize = 64 * 1024;
const HEADER_LEN: usize = 12 + 16 + 4;

/// Encrypt `plaintext` and write one frame. `plaintext` must not
/// exceed [`MAX_CHUNK_LEN`].
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    enc_key: &[u8; 32],
    mac_key: &[u8; 32],
    plaintext: &[u8],
) -> Result<(), AppError> {
    if plaintext.is_empty() || plaintext.len() > MAX_CHUNK_LEN {
        return Err(AppError::Validation(format!(
            "chunk length {} outside (0, {}]",
            plaintext.len(),
            MAX_CHUNK_LEN
        )));
    }

    let mut iv = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let sealed = aes_gcm_encrypt(enc_key, &iv, &[], plaintext)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("encrypt failed")))?;
    let tag_offset = sealed.len() - 16;
    let (ciphertext, tag) = sealed.split_at(tag_offset);

    let len = ciphertext.len() as u32;
    let mut hmac_input = Vec::with_capacity(12 + 16 + ciphertext.len());
    hmac_input.extend_from_slice(&iv);
    hmac_input.extend_from_slice(tag);
    hmac_input.extend_from_slice(ciphertext);
    let hmac = hmac_sha256(mac_key, &hmac_input);

    writer
        .write_all(&iv)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    writer
        .write_all(tag)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    writer
        .write_all(ciphertext)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    writer
        .write_all(&hmac)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    Ok(())
}

/// Read and decrypt one frame. Any HMAC mismatch or AEAD failure
/// returns [`AppError::Tamper`] and emits no plaintext bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    enc_key: &[u8; 32],
    mac_key: &[u8; 32],
) -> Result<Vec<u8>, AppError> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;

    let iv: [u8; 12] = header[0..12].try_into().unwrap();
    let tag: [u8; 16] = header[12..28].try_into().unwrap();
    let len = u32::from_be_bytes(header[28..32].try_into().unwrap()) as usize;

    if len == 0 || len > MAX_CHUNK_LEN {
        return Err(AppError::Tamper);
    }

    let mut ciphertext = vec![0u8; len];
    reader
        .read_exact(&mut ciphertext)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;

    let mut hmac_received = [0u8; 32];
    reader
        .read_exact(&mut hmac_received)
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;

    let mut hmac_input = Vec::with_capacity(12 + 16 + ciphertext.len());
    hmac_input.extend_from_slice(&iv);
    hmac_input.extend_from_slice(&tag);
    hmac_input.extend_from_slice(&ciphertext);
    let expected = hmac_sha256(mac_key, &hmac_input);

    if !constant_time_eq(&expected, &hmac_received) {
        return Err(AppError::Tamper);
    }

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    aes_gcm_decrypt(enc_key, &iv, &[], &sealed).map_err(|_| AppError::Tamper)
}

/// Read and decrypt every frame back to back until a clean EOF lands
/// exactly on a frame boundary. Used for in-memory bodies that hold
/// several concatenated frames (e.g. a whole-file upload chunked and
/// encrypted frame-by-frame before being sent as one request), where
/// `read_frame`'s `read_exact`-per-call would turn that boundary EOF
/// into a spurious [`AppError::Transport`].
pub async fn read_frames_all<R: AsyncRead + Unpin>(
    reader: &mut R,
    enc_key: &[u8; 32],
    mac_key: &[u8; 32],
) -> Result<Vec<u8>, AppError> {
    let mut plaintext = Vec::new();

    loop {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = reader
                .read(&mut header[filled..])
                .await
                .map_err(|e| AppError::Transport(e.to_string()))?;
            if n == 0 {
                if filled == 0 {
                    return Ok(plaintext);
                }
                return Err(AppError::Transport("truncated frame header".to_string()));
            }
            filled += n;
        }

        let iv: [u8; 12] = header[0..12].try_into().unwrap();
        let tag: [u8; 16] = header[12..28].try_into().unwrap();
        let len = u32::from_be_bytes(header[28..32].try_into().unwrap()) as usize;

        if len == 0 || len > MAX_CHUNK_LEN {
            return Err(AppError::Tamper);
        }

        let mut ciphertext = vec![0u8; len];
        reader
            .read_exact(&mut ciphertext)
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        let mut hmac_received = [0u8; 32];
        reader
            .read_exact(&mut hmac_received)
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        let mut hmac_input = Vec::with_capacity(12 + 16 + ciphertext.len());
        hmac_input.extend_from_slice(&iv);
        hmac_input.extend_from_slice(&tag);
        hmac_input.extend_from_slice(&ciphertext);
        let expected = hmac_sha256(mac_key, &hmac_input);

        if !constant_time_eq(&expected, &hmac_received) {
            return Err(AppError::Tamper);
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let frame_plaintext =
            aes_gcm_decrypt(enc_key, &iv, &[], &sealed).map_err(|_| AppError::Tamper)?;
        plaintext.extend_from_slice(&frame_plaintext);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut buf = Vec::new();

        write_frame(&mut buf, &enc_key, &mac_key, b"hello localtalk")
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let plaintext = read_frame(&mut cursor, &enc_key, &mac_key).await.unwrap();
        assert_eq!(plaintext, b"hello localtalk");
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_rejected() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut buf = Vec::new();
        write_frame(&mut buf, &enc_key, &mac_key, b"hello").await.unwrap();

        let tamper_at = 12 + 16 + 4;
        buf[tamper_at] ^= 0x01;

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, &enc_key, &mac_key).await;
        assert!(matches!(result, Err(AppError::Tamper)));
    }

    #[tokio::test]
    async fn tampered_hmac_is_rejected() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut buf = Vec::new();
        write_frame(&mut buf, &enc_key, &mac_key, b"hello").await.unwrap();

        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, &enc_key, &mac_key).await;
        assert!(matches!(result, Err(AppError::Tamper)));
    }

    #[tokio::test]
    async fn read_frames_all_concatenates_multiple_frames() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut buf = Vec::new();
        write_frame(&mut buf, &enc_key, &mac_key, b"hello ").await.unwrap();
        write_frame(&mut buf, &enc_key, &mac_key, b"localtalk").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let plaintext = read_frames_all(&mut cursor, &enc_key, &mac_key).await.unwrap();
        assert_eq!(plaintext, b"hello localtalk");
    }

    #[tokio::test]
    async fn read_frames_all_on_empty_input_is_empty() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut cursor = std::io::Cursor::new(Vec::new());
        let plaintext = read_frames_all(&mut cursor, &enc_key, &mac_key).await.unwrap();
        assert!(plaintext.is_empty());
    }

    #[tokio::test]
    async fn read_frames_all_rejects_truncated_trailing_frame() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut buf = Vec::new();
        write_frame(&mut buf, &enc_key, &mac_key, b"hello").await.unwrap();
        buf.truncate(buf.len() - 5);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frames_all(&mut cursor, &enc_key, &mac_key).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected_before_encryption() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut buf = Vec::new();
        let oversized = vec![0u8; MAX_CHUNK_LEN + 1];
        let result = write_frame(&mut buf, &enc_key, &mac_key, &oversized).await;
        assert!(result.is_err());
    }
}
