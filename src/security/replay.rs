//! Replay-attack detection: nonce + timestamp freshness and canonical
//! request-signature deduplication (spec §3, §4.B).

use crate::crypto::sha256_hex;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const FRESHNESS_WINDOW: ChronoDuration = ChronoDuration::minutes(5);
const CACHE_TTL: ChronoDuration = ChronoDuration::minutes(5);
const NONCE_LEN: usize = 32;
const BASE62_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    Valid,
    /// Legacy peer: request lacked timestamp/nonce headers. Accepted,
    /// but callers may want to log the warning.
    ValidWithWarning(&'static str),
    Invalid(&'static str),
}

/// Selected headers (besides timestamp/nonce) that get folded into the
/// canonical signature. Kept narrow and explicit rather than "all
/// headers" so proxies that add/reorder incidental headers don't
/// create spurious cache misses.
const SIGNED_HEADERS: &[&str] = &["content-type", "authorization"];

/// Per-process replay cache. Cheap to clone (shares the underlying map
/// via `Arc`); intended to be a single instance hung off `Runtime`.
#[derive(Clone)]
pub struct ReplayDetector {
    cache: Arc<DashMap<String, DateTime<Utc>>>,
}

impl Default for ReplayDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayDetector {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Generate a fresh 32-char base62 nonce from a CSPRNG.
    pub fn generate_nonce() -> String {
        let mut rng = rand::rngs::OsRng;
        (0..NONCE_LEN)
            .map(|_| BASE62_ALPHABET[rng.gen_range(0..BASE62_ALPHABET.len())] as char)
            .collect()
    }

    /// Canonical signature over (method, path, nonce, timestamp,
    /// selected headers, sha256(body)).
    pub fn canonical_signature(
        method: &str,
        path: &str,
        nonce: &str,
        timestamp: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> String {
        let mut canonical = String::new();
        canonical.push_str(&method.to_ascii_uppercase());
        canonical.push('\n');
        canonical.push_str(path);
        canonical.push('\n');
        canonical.push_str(nonce);
        canonical.push('\n');
        canonical.push_str(timestamp);
        canonical.push('\n');

        for name in SIGNED_HEADERS {
            if let Some((_, value)) = headers
                .iter()
                .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            {
                canonical.push_str(name);
                canonical.push(':');
                canonical.push_str(value);
                canonical.push('\n');
            }
        }

        canonical.push_str(&sha256_hex(body));
        sha256_hex(canonical.as_bytes())
    }

    /// Validate a request for freshness and replay. `headers` must
    /// include `x-timestamp`/`x-nonce` if the peer sent them (case
    /// insensitive names, as delivered).
    pub fn validate(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> ReplayOutcome {
        let timestamp = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(HEADER_TIMESTAMP))
            .map(|(_, v)| *v);
        let nonce = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(HEADER_NONCE))
            .map(|(_, v)| *v);

        let (timestamp, nonce) = match (timestamp, nonce) {
            (Some(t), Some(n)) => (t, n),
            _ => return ReplayOutcome::ValidWithWarning("missing replay-protection headers"),
        };

        let parsed = match DateTime::parse_from_rfc3339(timestamp) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => return ReplayOutcome::Invalid("malformed timestamp"),
        };

        let delta_secs = (now - parsed).num_seconds().abs();
        if delta_secs > FRESHNESS_WINDOW.num_seconds() {
            return ReplayOutcome::Invalid("timestamp outside freshness window");
        }

        let signature = Self::canonical_signature(method, path, nonce, timestamp, headers, body);

        if self.cache.contains_key(&signature) {
            return ReplayOutcome::Invalid("replay");
        }
        self.cache.insert(signature, now + CACHE_TTL);

        ReplayOutcome::Valid
    }

    /// Remove cache entries whose expiry has passed. Call on a timer;
    /// bounds memory for long-running processes (spec §4.B).
    pub fn sweep(&self, now: DateTime<Utc>) {
        self.cache.retain(|_, expiry| *expiry > now);
    }

    /// Spawn the periodic sweep task. The handle is supervised by the
    /// caller (typically `Runtime`); dropping it cancels the sweep.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep(Utc::now());
            }
        })
    }

    /// Write `X-Timestamp`/`X-Nonce` for an outbound request.
    pub fn fresh_headers(now: DateTime<Utc>) -> (String, String) {
        (now.to_rfc3339(), Self::generate_nonce())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers<'a>(timestamp: &'a str, nonce: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![(HEADER_TIMESTAMP, timestamp), (HEADER_NONCE, nonce)]
    }

    #[test]
    fn missing_headers_is_valid_with_warning() {
        let detector = ReplayDetector::new();
        let outcome = detector.validate("POST", "/register", &[], b"", Utc::now());
        assert_eq!(
            outcome,
            ReplayOutcome::ValidWithWarning("missing replay-protection headers")
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let detector = ReplayDetector::new();
        let now = Utc::now();
        let stale = now - ChronoDuration::minutes(10);
        let stale_str = stale.to_rfc3339();
        let h = headers(&stale_str, "nonce123");
        let outcome = detector.validate("POST", "/register", &h, b"", now);
        assert!(matches!(outcome, ReplayOutcome::Invalid(_)));
    }

    #[test]
    fn first_request_valid_second_identical_is_replay() {
        let detector = ReplayDetector::new();
        let now = Utc::now();
        let ts = now.to_rfc3339();
        let h = headers(&ts, "identical-nonce");

        let first = detector.validate("POST", "/register", &h, b"body", now);
        assert_eq!(first, ReplayOutcome::Valid);

        let second = detector.validate("POST", "/register", &h, b"body", now);
        assert_eq!(second, ReplayOutcome::Invalid("replay"));
    }

    #[test]
    fn different_nonce_is_not_a_replay() {
        let detector = ReplayDetector::new();
        let now = Utc::now();
        let ts = now.to_rfc3339();

        let h1 = headers(&ts, "nonce-a");
        let h2 = headers(&ts, "nonce-b");

        assert_eq!(
            detector.validate("POST", "/register", &h1, b"body", now),
            ReplayOutcome::Valid
        );
        assert_eq!(
            detector.validate("POST", "/register", &h2, b"body", now),
            ReplayOutcome::Valid
        );
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let detector = ReplayDetector::new();
        let now = Utc::now();
        let ts = now.to_rfc3339();
        let h = headers(&ts, "nonce-sweep");
        detector.validate("POST", "/register", &h, b"body", now);
        assert_eq!(detector.len(), 1);

        detector.sweep(now + CACHE_TTL + ChronoDuration::seconds(1));
        assert_eq!(detector.len(), 0);
    }

    #[test]
    fn generated_nonce_has_expected_length() {
        let nonce = ReplayDetector::generate_nonce();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
