use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A client endpoint tracked across its lifetime of flows. Created on first
/// sight of a client address, refreshed on every subsequent flow, and
/// expired by C6 after a period of inactivity (§3, `capture.session.timeout_seconds`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub client_addr: String,
    /// Link-layer (MAC) address of the client, when observable on the
    /// capture interface.
    pub link_addr: Option<String>,
    /// `User-Agent` header of the client's first request, if present.
    pub user_agent: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub flow_count: u64,
}

impl Session {
    pub fn new(client_addr: impl Into<String>, link_addr: Option<String>, user_agent: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_addr: client_addr.into(),
            link_addr,
            user_agent,
            first_seen: now,
            last_seen: now,
            flow_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
        self.flow_count += 1;
    }

    pub fn is_expired(&self, timeout_seconds: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_seen);
        age.num_seconds() >= timeout_seconds as i64
    }
}

/// How a request authenticated, if at all. `Other` preserves schemes the
/// interceptor recognizes as present but doesn't specifically parse (Digest,
/// AWS SigV4, custom headers), rather than losing the information.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    Basic,
    Bearer,
    OAuth,
    Other,
}

/// Case-insensitive HTTP header container. Lookups normalize to lowercase;
/// insertion order and original-case values are preserved for export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// X.509 fields extracted from the server certificate. Every field is
/// optional: the interceptor populates each only if the underlying TLS
/// library exposes it for the observed handshake, never inventing a value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub chain_length: Option<usize>,
}

/// TLS session metadata, present only for HTTPS flows that completed a
/// handshake the interceptor could observe (§9 Open Question: TLS fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsMetadata {
    pub version: Option<String>,
    pub cipher: Option<String>,
    pub certificate: Option<CertificateInfo>,
}

/// One intercepted request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub client_addr: String,
    pub method: String,
    pub url: String,
    pub request_headers: Headers,
    pub response_status: Option<u16>,
    pub response_headers: Headers,
    pub auth_kind: AuthKind,
    pub tls: Option<TlsMetadata>,
    pub request_body_size: u64,
    pub response_body_size: u64,
    /// Response-end minus request-start, non-negative (§3).
    pub duration_ms: u64,
    /// Set by C7 when the URL matched the sensitive-token scan (§4.6.1) at
    /// assembly time, so the HTTP analyzer's finding and this flag agree.
    pub sensitive_data: bool,
}

/// Severity of a single analyzer finding, ordered weakest to strongest for
/// comparisons and aggregate reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A single security or privacy observation raised by an analyzer against a
/// flow — e.g. "credential present in URL" or "missing Secure cookie flag".
/// `flow_id` is absent for findings raised against a DNS query, which has no
/// owning flow (§3, §4.6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub session_id: Uuid,
    pub flow_id: Option<Uuid>,
    pub analyzer: String,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: String,
    pub recommendation: Option<String>,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The outcome of running one analyzer against one flow: either its findings,
/// or the isolated failure that prevented it from producing any (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub analyzer: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub finding_count: usize,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One observed DNS query, captured by the raw packet path rather than the
/// HTTPS interceptor (§4.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsQuery {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub client_addr: String,
    pub query_name: String,
    pub query_type: String,
    pub response_code: Option<u16>,
}

/// The in-memory shape of a cached analyzer verdict, keyed on
/// `(flow_id, analyzer)` by the orchestrator's cache (§4.5) and mirrored to
/// `threat_intel_cache` on disk (SPEC_FULL.md §10.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnalysisDescriptor {
    pub flow_id: Uuid,
    pub analyzer: String,
    pub finding_count: usize,
    pub cached_at: DateTime<Utc>,
}

/// A fixed-size slice of raw packet bytes buffered by C1 before being handed
/// to the PCAP exporter or dropped under backpressure (§3, §4.2).
#[derive(Debug, Clone)]
pub struct RingBufferChunk {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

pub type HeaderMap = HashMap<String, String>;
