use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;
use vantage_analyzer::AnalysisOrchestrator;
use vantage_core::DnsQuery;
use vantage_store::FlowStore;

/// One DNS record as emitted by the external dissector (§6), already
/// filtered to DNS and projected to just the fields this pipeline needs.
#[derive(Debug, Deserialize)]
struct DissectedDnsRecord {
    query_name: String,
    query_type: u16,
    #[serde(default)]
    response_code: Option<u16>,
    #[serde(default)]
    source_addr: Option<String>,
}

/// Watches rotated packet-capture files and extracts DNS queries from them
/// on roll-over or shutdown, feeding them back into the DNS analyzer
/// through C9 (§4.9).
pub struct PcapMonitor {
    dissector_path: PathBuf,
    store: Arc<FlowStore>,
    orchestrator: Arc<AnalysisOrchestrator>,
    seen: Mutex<HashSet<PathBuf>>,
}

impl PcapMonitor {
    pub fn new(
        dissector_path: impl Into<PathBuf>,
        store: Arc<FlowStore>,
        orchestrator: Arc<AnalysisOrchestrator>,
    ) -> Self {
        Self {
            dissector_path: dissector_path.into(),
            store,
            orchestrator,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Poll `directories` at `interval` for unseen capture files until
    /// cancelled (§4.9, `analysis.pcap_poll_interval`).
    pub async fn run_poll_loop(self: Arc<Self>, directories: Vec<PathBuf>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for dir in &directories {
                self.scan_directory(dir).await;
            }
        }
    }

    async fn scan_directory(&self, dir: &Path) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "pcap monitor failed to read directory");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("pcap") {
                self.process_file(&path).await;
            }
        }
    }

    /// Process `path` unless it has already been processed in this
    /// monitor's lifetime — a file is processed at most once (§4.9).
    pub async fn process_file(&self, path: &Path) {
        {
            let mut seen = self.seen.lock().await;
            if seen.contains(path) {
                return;
            }
            seen.insert(path.to_path_buf());
        }

        let session_label = session_id_from_filename(path);
        let records = match self.run_dissector(path).await {
            Ok(records) => records,
            Err(e) => {
                error!(path = %path.display(), error = %e, "dns dissection failed");
                return;
            }
        };

        if records.is_empty() {
            return;
        }

        let queries: Vec<DnsQuery> = records
            .into_iter()
            .map(|record| DnsQuery {
                id: Uuid::new_v4(),
                session_id: None,
                timestamp: Utc::now(),
                client_addr: record.source_addr.unwrap_or_default(),
                query_name: record.query_name,
                query_type: query_type_symbol(record.query_type),
                response_code: record.response_code,
            })
            .collect();

        info!(
            path = %path.display(),
            session_label,
            count = queries.len(),
            "dns queries extracted from capture file"
        );

        if let Err(e) = self.store.store_dns(&queries).await {
            error!(path = %path.display(), error = %e, "dns query persistence failed");
        }

        for query in queries {
            self.orchestrator.analyze_dns(query).await;
        }
    }

    async fn run_dissector(&self, path: &Path) -> Result<Vec<DissectedDnsRecord>, std::io::Error> {
        let output = Command::new(&self.dissector_path)
            .arg(path)
            .arg("dns")
            .stdout(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "dissector exited with status {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| std::io::Error::other(format!("malformed dissector output: {e}")))
    }
}

/// Derive a session label from a capture file's name (§4.9):
/// `session_<id>.pcap` → `<id>`; `capture_<ts>.pcap` → `<ts>`; otherwise
/// the file stem. Not a tracker-backed session id — DNS queries extracted
/// this way carry no [`uuid::Uuid`] session, per the data model (§3).
fn session_id_from_filename(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if let Some(id) = stem.strip_prefix("session_") {
        id.to_string()
    } else if let Some(ts) = stem.strip_prefix("capture_") {
        ts.to_string()
    } else {
        stem.to_string()
    }
}

/// Map a numeric DNS query type to its symbol (§4.9).
fn query_type_symbol(code: u16) -> String {
    match code {
        1 => "A".to_string(),
        2 => "NS".to_string(),
        5 => "CNAME".to_string(),
        15 => "MX".to_string(),
        16 => "TXT".to_string(),
        28 => "AAAA".to_string(),
        other => format!("TYPE{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_session_label_from_session_prefixed_filename() {
        assert_eq!(
            session_id_from_filename(Path::new("/data/session_abc123.pcap")),
            "abc123"
        );
    }

    #[test]
    fn derives_session_label_from_capture_prefixed_filename() {
        assert_eq!(
            session_id_from_filename(Path::new("/data/capture_1699999999.pcap")),
            "1699999999"
        );
    }

    #[test]
    fn falls_back_to_the_file_stem() {
        assert_eq!(
            session_id_from_filename(Path::new("/data/rotated-0001.pcap")),
            "rotated-0001"
        );
    }

    #[test]
    fn maps_known_query_type_codes_to_symbols() {
        assert_eq!(query_type_symbol(1), "A");
        assert_eq!(query_type_symbol(28), "AAAA");
        assert_eq!(query_type_symbol(16), "TXT");
        assert_eq!(query_type_symbol(999), "TYPE999");
    }
}
