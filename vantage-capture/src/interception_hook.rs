use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vantage_analyzer::AnalysisOrchestrator;
use vantage_core::{scan_url, AuthKind, CertificateInfo, Flow, Headers, TlsMetadata};
use vantage_observability::LiveEventBus;
use vantage_store::FlowStore;

use crate::session_tracker::SessionTracker;

/// One completed request/response exchange as handed off by the
/// interceptor subprocess, serialized as a single NDJSON line over the
/// Unix socket named in `capture.mitmproxy.hook_socket` (§6). The hook
/// runs synchronously inside the interceptor only up to this write; every
/// subsequent field in this struct is converted and fanned out here, off
/// the interceptor's own path (§4.3, §5).
#[derive(Debug, Deserialize)]
pub struct RawFlowEvent {
    pub client_addr: String,
    /// Link-layer (MAC) address of the client, when observable on the
    /// capture interface.
    #[serde(default)]
    pub link_addr: Option<String>,
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_size: u64,
    pub response_size: u64,
    pub request_start: DateTime<Utc>,
    pub response_end: Option<DateTime<Utc>>,
    pub tls: Option<RawTlsInfo>,
}

#[derive(Debug, Deserialize)]
pub struct RawTlsInfo {
    pub version: Option<String>,
    pub cipher: Option<String>,
    pub cert_subject: Option<String>,
    pub cert_issuer: Option<String>,
    pub cert_not_before: Option<DateTime<Utc>>,
    pub cert_not_after: Option<DateTime<Utc>>,
    pub chain_length: Option<usize>,
}

/// Converts completed exchanges into canonical [`Flow`] records and fans
/// them out to the store, analyzer, and live event bus without blocking
/// the caller (§4.3).
pub struct InterceptionHook {
    sessions: Arc<SessionTracker>,
    store: Arc<FlowStore>,
    orchestrator: Arc<AnalysisOrchestrator>,
    events: Arc<LiveEventBus>,
}

impl InterceptionHook {
    pub fn new(
        sessions: Arc<SessionTracker>,
        store: Arc<FlowStore>,
        orchestrator: Arc<AnalysisOrchestrator>,
        events: Arc<LiveEventBus>,
    ) -> Self {
        Self {
            sessions,
            store,
            orchestrator,
            events,
        }
    }

    /// Accept connections from the interceptor subprocess on `socket_path`
    /// and process flow events until the listener is dropped.
    pub async fn listen(self: Arc<Self>, socket_path: &std::path::Path) -> std::io::Result<()> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "interception hook listening");

        loop {
            let (stream, _) = listener.accept().await?;
            let hook = self.clone();
            tokio::spawn(async move {
                hook.handle_connection(stream).await;
            });
        }
    }

    async fn handle_connection(&self, stream: UnixStream) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.handle_line(&line).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "interception hook connection read error");
                    break;
                }
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        let raw: RawFlowEvent = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "malformed flow event, dropping");
                return;
            }
        };
        self.handle_event(raw).await;
    }

    /// On response completion: build the canonical Flow and fire off the
    /// three sinks without waiting on any of them. The hook's own work
    /// ends as soon as these tasks are spawned.
    pub async fn handle_event(&self, raw: RawFlowEvent) {
        let user_agent = raw
            .request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
            .map(|(_, v)| v.as_str());
        let session_id = self
            .sessions
            .get_or_create_session(&raw.client_addr, raw.link_addr.as_deref(), user_agent)
            .await;

        let response_end = raw.response_end.unwrap_or_else(Utc::now);
        let duration_ms = (response_end - raw.request_start).num_milliseconds().max(0) as u64;

        let mut request_headers = Headers::new();
        for (k, v) in &raw.request_headers {
            request_headers.insert(k, v);
        }
        let mut response_headers = Headers::new();
        for (k, v) in &raw.response_headers {
            response_headers.insert(k, v);
        }

        let auth_kind = request_headers
            .get("authorization")
            .map(detect_auth_kind)
            .unwrap_or(AuthKind::None);

        let tls = raw.tls.map(|t| TlsMetadata {
            version: t.version,
            cipher: t.cipher,
            certificate: Some(CertificateInfo {
                subject: t.cert_subject,
                issuer: t.cert_issuer,
                not_before: t.cert_not_before,
                not_after: t.cert_not_after,
                chain_length: t.chain_length,
            }),
        });

        let sensitive_data = scan_url(&raw.url.to_lowercase()).is_some();

        let flow = Flow {
            id: Uuid::new_v4(),
            session_id,
            timestamp: raw.request_start,
            client_addr: raw.client_addr,
            method: raw.method,
            url: raw.url,
            request_headers,
            response_status: raw.status_code,
            response_headers,
            auth_kind,
            tls,
            request_body_size: raw.request_size,
            response_body_size: raw.response_size,
            duration_ms,
            sensitive_data,
        };

        debug!(flow_id = %flow.id, duration_ms, "flow assembled, fanning out");

        let store = self.store.clone();
        let flow_for_store = flow.clone();
        tokio::spawn(async move {
            if let Err(e) = store.store(&flow_for_store, &[], &[]).await {
                warn!(flow_id = %flow_for_store.id, error = %e, "flow persistence failed");
            }
        });

        let orchestrator = self.orchestrator.clone();
        let flow_for_analysis = flow.clone();
        tokio::spawn(async move {
            orchestrator.analyze_flow(flow_for_analysis).await;
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            events.publish_flow(&flow).await;
        });
    }
}

/// Classify the `Authorization` header's scheme prefix. Anything else
/// recognized-but-unparsed (Digest, AWS4-HMAC-SHA256, ...) is `Other`
/// rather than silently dropped.
fn detect_auth_kind(header_value: &str) -> AuthKind {
    let trimmed = header_value.trim();
    if trimmed.is_empty() {
        return AuthKind::None;
    }
    if trimmed.starts_with("Basic ") {
        AuthKind::Basic
    } else if trimmed.starts_with("Bearer ") {
        AuthKind::Bearer
    } else if trimmed.starts_with("OAuth ") {
        AuthKind::OAuth
    } else {
        AuthKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_basic_bearer_oauth_and_falls_back_to_other() {
        assert_eq!(detect_auth_kind("Basic dXNlcjpwYXNz"), AuthKind::Basic);
        assert_eq!(detect_auth_kind("Bearer abc123"), AuthKind::Bearer);
        assert_eq!(detect_auth_kind("OAuth token"), AuthKind::OAuth);
        assert_eq!(detect_auth_kind("Digest realm=x"), AuthKind::Other);
        assert_eq!(detect_auth_kind(""), AuthKind::None);
    }
}
