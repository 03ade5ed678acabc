//! Security gate: runs the replay detector and security analyzer
//! ahead of every data route, short-circuiting dispatch on a block or
//! a replay (spec §4.F: "`ShouldBlock` or replay-failure results
//! prevent handler dispatch").

use super::state::AppState;
use crate::error::AppError;
use crate::security::{AnalysisRequest, ReplayOutcome};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use std::net::SocketAddr;

pub async fn security_gate(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, 100 * 1024 * 1024)
        .await
        .map_err(|e| AppError::TooLarge(e.to_string()))?;

    let headers: Vec<(&str, &str)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();

    let declared_content_length = parts
        .headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let user_agent = parts
        .headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let remote_key = remote.ip().to_string();
    let now = Utc::now();
    let path = parts.uri.path().to_string();
    let method = parts.method.as_str().to_string();

    let report = state.analyzer.analyze(
        &AnalysisRequest {
            remote: &remote_key,
            path: &path,
            headers: &headers,
            declared_content_length,
            body: &body_bytes,
            user_agent,
        },
        now,
    );
    if report.should_block {
        return Err(AppError::RateLimited(format!(
            "blocked: {:?}",
            report.level
        )));
    }

    match state.replay.validate(&method, &path, &headers, &body_bytes, now) {
        ReplayOutcome::Invalid(reason) => return Err(AppError::Conflict(reason.to_string())),
        ReplayOutcome::Valid | ReplayOutcome::ValidWithWarning(_) => {}
    }

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}
