//! Threat screening pipeline: rate limiting, path traversal, header
//! validation, content-length sanity, payload/binary sniffing, and
//! user-agent checks (spec §3, §4.C). Generalized from the teacher's
//! path-component validation (`utils/security.rs`) into a full request
//! analyzer.

use super::rate_limit::RateLimiter;
use crate::crypto::sha256_hex;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

const MAX_PATH_LEN: usize = 2048;
const MAX_HEADER_COUNT: usize = 100;
const MAX_HEADER_VALUE_LEN: usize = 8192;
const MAX_BODY_LEN: usize = 100 * 1024 * 1024;
const CACHE_TTL: Duration = Duration::minutes(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreatType {
    RateLimit,
    PathTraversal,
    HeaderInjection,
    BufferOverflow,
    ContentLengthMismatch,
    ScriptInjection,
    SqlInjection,
    MaliciousExecutable,
    SuspiciousUserAgent,
    ReplayAttack,
}

#[derive(Clone, Debug)]
pub struct SecurityThreat {
    pub threat_type: ThreatType,
    pub level: ThreatLevel,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub count: u32,
    pub description: String,
}

#[derive(Clone, Debug)]
pub struct SecurityReport {
    pub remote: String,
    pub path: String,
    pub level: ThreatLevel,
    pub threats: Vec<SecurityThreat>,
    pub should_block: bool,
    pub is_blocked: bool,
}

/// Inputs to one analysis pass. Borrowed, not owned — the analyzer
/// never needs to retain the request.
pub struct AnalysisRequest<'a> {
    pub remote: &'a str,
    pub path: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub declared_content_length: Option<u64>,
    pub body: &'a [u8],
    pub user_agent: Option<&'a str>,
}

struct CachedResult {
    report_level: ThreatLevel,
    expiry: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SecurityAnalyzer {
    rate_limiter: RateLimiter,
    analysis_cache: Arc<DashMap<String, CachedResult>>,
    threat_table: Arc<DashMap<String, Vec<SecurityThreat>>>,
    enable_sql_detection: bool,
    enable_xss_detection: bool,
    enable_path_detection: bool,
}

const SCRIPT_MARKERS: &[&str] = &[
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "onclick=",
    "eval(",
];

const SQL_MARKERS: &[&str] = &[
    "' or '1'='1",
    "union select",
    "drop table",
    "; --",
    "xp_cmdshell",
];

const SCANNER_USER_AGENTS: &[&str] = &["sqlmap", "nikto", "nmap", "masscan", "metasploit", "zgrab"];

impl SecurityAnalyzer {
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            rate_limiter: RateLimiter::new(max_requests_per_minute),
            analysis_cache: Arc::new(DashMap::new()),
            threat_table: Arc::new(DashMap::new()),
            enable_sql_detection: true,
            enable_xss_detection: true,
            enable_path_detection: true,
        }
    }

    pub fn with_detectors(mut self, sql: bool, xss: bool, path: bool) -> Self {
        self.enable_sql_detection = sql;
        self.enable_xss_detection = xss;
        self.enable_path_detection = path;
        self
    }

    pub fn analyze(&self, req: &AnalysisRequest, now: DateTime<Utc>) -> SecurityReport {
        let mut threats = Vec::new();

        // 1. Rate limit — always checked first, never cached.
        if self.rate_limiter.check(req.remote, now) {
            self.record_threat(
                req.remote,
                &mut threats,
                ThreatType::RateLimit,
                ThreatLevel::Critical,
                "exceeded requests-per-minute limit".to_string(),
                now,
            );
            return self.finish(req, threats, now);
        }

        // 2. Cache lookup — skip if any cacheable field is missing,
        // never trust a cached High/Critical verdict.
        let cache_key = self.cache_key(req);
        if let Some(cached) = self.analysis_cache.get(&cache_key) {
            if cached.expiry > now && cached.report_level < ThreatLevel::High {
                return SecurityReport {
                    remote: req.remote.to_string(),
                    path: req.path.to_string(),
                    level: cached.report_level,
                    threats: Vec::new(),
                    should_block: false,
                    is_blocked: false,
                };
            }
        }

        if self.enable_path_detection {
            if let Some(level) = self.check_path_traversal(req.path) {
                self.record_threat(
                    req.remote,
                    &mut threats,
                    ThreatType::PathTraversal,
                    level,
                    format!("suspicious path: {}", req.path),
                    now,
                );
            }
        }

        if let Some(level) = self.check_headers(req.headers) {
            self.record_threat(
                req.remote,
                &mut threats,
                ThreatType::HeaderInjection,
                level,
                "invalid request headers".to_string(),
                now,
            );
        }

        if let Some(level) = self.check_content_length(req.declared_content_length, req.body.len())
        {
            let threat_type = if req.body.len() > MAX_BODY_LEN {
                ThreatType::BufferOverflow
            } else {
                ThreatType::ContentLengthMismatch
            };
            self.record_threat(
                req.remote,
                &mut threats,
                threat_type,
                level,
                "content-length mismatch or oversized body".to_string(),
                now,
            );
        }

        if let Some((threat_type, level)) = self.check_payload(req.body) {
            self.record_threat(
                req.remote,
                &mut threats,
                threat_type,
                level,
                "payload screening hit".to_string(),
                now,
            );
        }

        if let Some(level) = self.check_user_agent(req.user_agent) {
            self.record_threat(
                req.remote,
                &mut threats,
                ThreatType::SuspiciousUserAgent,
                level,
                "suspicious or missing user agent".to_string(),
                now,
            );
        }

        let report = self.finish(req, threats, now);

        // Never cache High/Critical results.
        if report.level < ThreatLevel::High {
            self.analysis_cache.insert(
                cache_key,
                CachedResult {
                    report_level: report.level,
                    expiry: now + CACHE_TTL,
                },
            );
        }

        report
    }

    fn finish(
        &self,
        req: &AnalysisRequest,
        threats: Vec<SecurityThreat>,
        _now: DateTime<Utc>,
    ) -> SecurityReport {
        let level = threats
            .iter()
            .map(|t| t.level)
            .max()
            .unwrap_or(ThreatLevel::None);
        let should_block = level >= ThreatLevel::High;
        SecurityReport {
            remote: req.remote.to_string(),
            path: req.path.to_string(),
            level,
            should_block,
            is_blocked: should_block,
            threats,
        }
    }

    fn cache_key(&self, req: &AnalysisRequest) -> String {
        let header_digest: String = req
            .headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k.to_ascii_lowercase(), v))
            .collect::<Vec<_>>()
            .join("|");
        sha256_hex(
            format!(
                "{}|{}|{}|{}",
                req.remote,
                req.path,
                header_digest,
                sha256_hex(req.body)
            )
            .as_bytes(),
        )
    }

    fn record_threat(
        &self,
        remote: &str,
        threats: &mut Vec<SecurityThreat>,
        threat_type: ThreatType,
        level: ThreatLevel,
        description: String,
        now: DateTime<Utc>,
    ) {
        let mut entry = self.threat_table.entry(remote.to_string()).or_default();
        if let Some(existing) = entry.iter_mut().find(|t| t.threat_type == threat_type) {
            existing.count += 1;
            existing.last_detected = now;
            existing.level = level;
        } else {
            entry.push(SecurityThreat {
                threat_type,
                level,
                first_detected: now,
                last_detected: now,
                count: 1,
                description: description.clone(),
            });
        }
        threats.push(SecurityThreat {
            threat_type,
            level,
            first_detected: now,
            last_detected: now,
            count: 1,
            description,
        });
    }

    fn check_path_traversal(&self, path: &str) -> Option<ThreatLevel> {
        if path.len() > MAX_PATH_LEN {
            return Some(ThreatLevel::High);
        }
        if path.contains('\r') || path.contains('\n') || path.contains('\0') {
            return Some(ThreatLevel::High);
        }

        let decoded = percent_decode(path);
        let lower = decoded.to_ascii_lowercase();
        if lower.contains("../") || lower.contains("..\\") || decoded.contains("..") {
            return Some(ThreatLevel::High);
        }
        if lower.contains("%2e%2e%2f") || lower.contains("%2e%2e/") || lower.contains("..%2f") {
            return Some(ThreatLevel::High);
        }
        None
    }

    fn check_headers(&self, headers: &[(&str, &str)]) -> Option<ThreatLevel> {
        if headers.len() > MAX_HEADER_COUNT {
            return Some(ThreatLevel::Medium);
        }
        for (name, value) in headers {
            if name.contains(':') || !name.bytes().all(|b| (0x20..0x7f).contains(&b)) {
                return Some(ThreatLevel::High);
            }
            if value.len() > MAX_HEADER_VALUE_LEN {
                return Some(ThreatLevel::Medium);
            }
            if value.contains('\r') || value.contains('\n') || value.contains('\0') {
                return Some(ThreatLevel::High);
            }
        }
        None
    }

    fn check_content_length(&self, declared: Option<u64>, actual: usize) -> Option<ThreatLevel> {
        if actual > MAX_BODY_LEN {
            return Some(ThreatLevel::High);
        }
        if let Some(declared) = declared {
            if declared as usize != actual {
                return Some(ThreatLevel::Medium);
            }
        }
        None
    }

    fn check_payload(&self, body: &[u8]) -> Option<(ThreatType, ThreatLevel)> {
        if body.starts_with(&[0x4D, 0x5A])
            || body.starts_with(&[0x7F, 0x45, 0x4C, 0x46])
            || body.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
            || body.starts_with(&[0xCA, 0xFE, 0xBA, 0xBE])
        {
            return Some((ThreatType::MaliciousExecutable, ThreatLevel::Critical));
        }

        let text = match std::str::from_utf8(body) {
            Ok(t) => t,
            Err(_) => return None,
        };
        let lower = text.to_ascii_lowercase();

        if self.enable_xss_detection {
            if SCRIPT_MARKERS.iter().any(|m| lower.contains(m)) {
                return Some((ThreatType::ScriptInjection, ThreatLevel::High));
            }
        }
        if self.enable_sql_detection {
            if SQL_MARKERS.iter().any(|m| lower.contains(m)) {
                return Some((ThreatType::SqlInjection, ThreatLevel::High));
            }
        }
        None
    }

    fn check_user_agent(&self, user_agent: Option<&str>) -> Option<ThreatLevel> {
        match user_agent {
            None => Some(ThreatLevel::Low),
            Some(ua) => {
                let lower = ua.to_ascii_lowercase();
                if SCANNER_USER_AGENTS.iter().any(|s| lower.contains(s)) {
                    Some(ThreatLevel::Medium)
                } else {
                    None
                }
            }
        }
    }

    /// Periodic sweep of caches and the threat table; cadence is
    /// `threat_expiry / 12` per spec §4.C.
    pub fn sweep(&self, now: DateTime<Utc>, threat_expiry: Duration) {
        self.analysis_cache.retain(|_, v| v.expiry > now);
        self.threat_table
            .retain(|_, threats| !threats.is_empty() && now - threats[0].last_detected < threat_expiry);
    }

    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: std::time::Duration,
        threat_expiry: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep(Utc::now(), threat_expiry);
            }
        })
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
