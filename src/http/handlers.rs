//! Route handlers for the LocalSend v2 wire API (spec §4.G). `upload`
//! is the data-flow seam spec §2 describes: it drives the chunk engine
//! (H), which uses the encryption session (I) when one was negotiated,
//! and records into the verification manager (J).

use super::state::AppState;
use crate::chunk::{ChunkManager, ChunkPlan, TransferDirection};
use crate::encryption::{read_frames_all, EncryptionSession};
use crate::error::AppError;
use crate::session::UploadRequest;
use crate::verify::StartRequest;
use axum::extract::{ConnectInfo, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub async fn info(State(state): State<AppState>) -> Json<crate::discovery::Device> {
    Json(state.self_device())
}

pub async fn register(
    State(state): State<AppState>,
    Json(device): Json<crate::discovery::Device>,
) -> Json<crate::discovery::Device> {
    if device.fingerprint != state.fingerprint {
        state
            .registry
            .observe(device, std::net::Ipv4Addr::UNSPECIFIED, Utc::now());
    }
    Json(state.self_device())
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": "2.0",
        "device": state.config.alias,
    }))
}

#[derive(Deserialize)]
pub struct PrepareUploadQuery {
    pub pin: Option<String>,
}

#[derive(serde::Serialize)]
pub struct PrepareUploadResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub files: std::collections::HashMap<String, String>,
    #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Negotiates the session, provisions one chunk-engine (H) and
/// verification-manager (J) session per file, and — if the request
/// carries a `publicKey` — completes the ECDH handshake in this single
/// round trip, since the responder already holds its own keypair.
pub async fn prepare_upload(
    State(state): State<AppState>,
    Query(query): Query<PrepareUploadQuery>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<PrepareUploadResponse>, AppError> {
    if let Some(required) = &state.config.required_pin {
        let supplied = query.pin.unwrap_or_default();
        if !crate::crypto::constant_time_eq(required.as_bytes(), supplied.as_bytes()) {
            return Err(AppError::Auth("invalid pin".to_string()));
        }
    }

    let now = Utc::now();
    let chunk_size = state.config.transfer.chunk_size;
    let files = request.files.clone();
    let public_key = request.public_key.clone();

    let (session_id, file_tokens) =
        state
            .sessions
            .create_upload(request, remote.ip().to_string(), now);

    for (file_id, meta) in &files {
        let total_chunks = ChunkPlan::new(meta.size, chunk_size).total_chunks() as usize;
        let (progress_tx, _progress_rx) = tokio::sync::watch::channel(0.0);
        let chunk_sid = state.chunk_engine.start(
            TransferDirection::Upload,
            meta.size,
            chunk_size,
            progress_tx,
            now,
        );
        let verify_sid = state
            .verify
            .start(StartRequest::new(meta.file_name.clone(), meta.size, total_chunks));
        state
            .sessions
            .attach_transfer_ids(&session_id, file_id, chunk_sid, verify_sid);
    }

    let mut responder_public_key = None;
    if let Some(remote_pub) = public_key {
        let mut enc_session = EncryptionSession::new(session_id.clone(), remote.to_string());
        enc_session
            .complete_key_exchange(&remote_pub)
            .map_err(|e| AppError::Validation(format!("key exchange failed: {e}")))?;
        responder_public_key = Some(
            enc_session
                .local_public_key_base64()
                .map_err(|e| AppError::Internal(e.into()))?,
        );
        state.encryption.insert(session_id.clone(), enc_session);
    }

    Ok(Json(PrepareUploadResponse {
        session_id,
        files: file_tokens,
        public_key: responder_public_key,
    }))
}

#[derive(Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
    pub token: String,
}

/// Decrypts the body (if an encryption session was negotiated for
/// this `sessionId`), chunks the plaintext per the configured
/// `chunk_size`, writes each chunk in place, and drives the chunk
/// engine (H) and verification manager (J) per chunk before marking
/// the file received.
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, AppError> {
    if !state
        .sessions
        .validate_upload_token(&query.session_id, &query.file_id, &query.token)
    {
        return Err(AppError::Auth("session/file/token mismatch".to_string()));
    }

    let (chunk_sid, verify_sid) = state
        .sessions
        .transfer_ids(&query.session_id, &query.file_id)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("missing transfer state for session")))?;

    let plaintext = if let Some(enc) = state.encryption.get(&query.session_id) {
        let (enc_key, mac_key) = {
            let enc = enc.lock().await;
            let enc_key = *enc
                .enc_key()
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("encryption session not ready")))?;
            let mac_key = *enc
                .mac_key()
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("encryption session not ready")))?;
            (enc_key, mac_key)
        };
        let mut cursor = std::io::Cursor::new(body.as_ref());
        read_frames_all(&mut cursor, &enc_key, &mac_key).await?
    } else {
        body.to_vec()
    };

    let chunk_size = state.config.transfer.chunk_size;
    let dest_dir = state.storage_dir.join(&query.session_id);
    std::fs::create_dir_all(&dest_dir).map_err(|e| AppError::Internal(e.into()))?;
    let dest_path = dest_dir.join(&query.file_id);

    let chunk_engine = state.chunk_engine.clone();
    let verify = state.verify.clone();
    let now = Utc::now();

    let join_result = tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let mut file = Arc::new(std::fs::File::create(&dest_path).map_err(|e| AppError::Internal(e.into()))?);
        file.set_len(plaintext.len() as u64)
            .map_err(|e| AppError::Internal(e.into()))?;
        let plan = ChunkPlan::new(plaintext.len() as u64, chunk_size);

        for idx in 0..plan.total_chunks() {
            let (start, len) = plan.bounds(idx).expect("idx within plan range");
            let chunk = ChunkManager::create_chunk(&plaintext, start as usize, len);

            crate::chunk::write_chunk_at_position(&mut file, start, &chunk).map_err(AppError::Internal)?;

            let outcome = chunk_engine.transfer_chunk(&chunk_sid, idx, Some(&chunk), now)?;
            for event in &outcome.events {
                tracing::debug!(chunk = idx, ?event, "chunk transferred");
            }

            verify.verify_chunk(&verify_sid, idx as usize, &chunk, None, now)?;
        }

        verify.complete(&verify_sid, Some(&plaintext), now)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    join_result?;

    state.sessions.mark_file_received(&query.session_id, &query.file_id);

    Ok(Json(json!({"success": true})))
}

#[derive(Deserialize)]
pub struct CancelQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

pub async fn cancel(
    State(state): State<AppState>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<Value>, AppError> {
    let upload_session = state.sessions.get_upload(&query.session_id);
    let download_session = state.sessions.get_download(&query.session_id);
    if upload_session.is_none() && download_session.is_none() {
        return Err(AppError::NotFound("unknown session".to_string()));
    }

    state.sessions.cancel_upload(&query.session_id);
    state.sessions.cancel_download(&query.session_id);

    if let Some(session) = upload_session {
        for chunk_sid in session.chunk_session_ids.values() {
            state.chunk_engine.remove(chunk_sid);
        }
        for verify_sid in session.verify_session_ids.values() {
            state.verify.remove(verify_sid);
        }
    }
    state.encryption.remove(&query.session_id);

    Ok(Json(json!({"success": true})))
}

pub async fn not_implemented() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_IMPLEMENTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_comparison_rejects_wrong_length_without_panicking() {
        assert!(!crate::crypto::constant_time_eq(b"1234", b"12"));
        assert!(crate::crypto::constant_time_eq(b"1234", b"1234"));
    }
}
