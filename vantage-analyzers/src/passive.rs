use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vantage_analyzer::{Analyzer, AnalyzerInput};
use vantage_core::{Finding, Severity, VantageError};

const DEBUG_HEADERS: &[&str] = &["x-debug", "x-debug-token", "x-debug-token-link"];
const BANNER_HEADERS: &[&str] = &["x-powered-by", "x-aspnet-version", "x-generator"];
const DEBUG_PATHS: &[&str] = &[
    "/debug/",
    "/dev/",
    "/.git/",
    "/.svn/",
    "/test/",
    "/staging/",
    "/admin/phpinfo.php",
    "/phpinfo.php",
    "/info.php",
    "/.env",
];
const VULNERABLE_SOFTWARE: &[(&str, &[&str])] = &[
    ("apache", &["2.4.49", "2.4.50"]),
    ("nginx", &["1.20.0"]),
    ("php", &["7.4.0"]),
    ("openssl", &["1.0.1", "1.0.2"]),
];

/// Passive fingerprinting from response headers and status alone (§4.6.2).
/// Never inspects the request — a response-only view is what makes this
/// analyzer "passive".
pub struct PassiveAnalyzer;

#[async_trait]
impl Analyzer for PassiveAnalyzer {
    fn name(&self) -> &str {
        "passive"
    }

    async fn analyze(&self, input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError> {
        let Some(flow) = input.as_flow() else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();

        if let Some(server) = flow.response_headers.get("server") {
            if server.contains('.') || server.contains('/') || server.contains(' ') {
                findings.push(self.finding(
                    flow,
                    Severity::Low,
                    "information_disclosure",
                    format!("Server header discloses version information: {server}"),
                ));
            }

            let lower = server.to_lowercase();
            for (software, versions) in VULNERABLE_SOFTWARE {
                if lower.contains(software) && versions.iter().any(|v| lower.contains(v)) {
                    findings.push(self.finding(
                        flow,
                        Severity::High,
                        "vulnerable_software",
                        format!("Server header advertises a known-vulnerable version: {server}"),
                    ));
                }
            }
        }

        for header in BANNER_HEADERS {
            if flow.response_headers.get(header).is_some() {
                findings.push(self.finding(
                    flow,
                    Severity::Low,
                    "information_disclosure",
                    format!("{header} header discloses server-side technology"),
                ));
            }
        }

        let lower_path = flow.url.to_lowercase();
        let status = flow.response_status.unwrap_or(0);
        if DEBUG_PATHS.iter().any(|p| lower_path.contains(p)) && (200..400).contains(&status) {
            findings.push(self.finding(
                flow,
                Severity::Medium,
                "debug_exposure",
                "URL path matches a known debug/administrative endpoint pattern".to_string(),
            ));
        }

        if DEBUG_HEADERS.iter().any(|h| flow.response_headers.get(h).is_some()) {
            findings.push(self.finding(
                flow,
                Severity::Medium,
                "debug_exposure",
                "Debug header present in response".to_string(),
            ));
        }

        if status >= 500 {
            let textual = flow
                .response_headers
                .get("content-type")
                .map(|ct| ct.starts_with("text/") || ct.contains("json") || ct.contains("xml"))
                .unwrap_or(false);
            if textual {
                findings.push(self.finding(
                    flow,
                    Severity::Medium,
                    "information_disclosure",
                    format!("Server error ({status}) with textual body may leak a stack trace"),
                ));
            }
        }

        Ok(findings)
    }
}

impl PassiveAnalyzer {
    fn finding(&self, flow: &vantage_core::Flow, severity: Severity, category: &str, title: String) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            session_id: flow.session_id,
            flow_id: Some(flow.id),
            analyzer: self.name().to_string(),
            severity,
            category: category.to_string(),
            description: title.clone(),
            title,
            recommendation: None,
            detected_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vantage_core::{AuthKind, Flow, Headers};

    fn base_flow(url: &str, status: u16) -> Flow {
        Flow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_addr: "10.0.0.5:51000".into(),
            method: "GET".into(),
            url: url.to_string(),
            request_headers: Headers::new(),
            response_status: Some(status),
            response_headers: Headers::new(),
            auth_kind: AuthKind::None,
            tls: None,
            request_body_size: 0,
            response_body_size: 0,
            duration_ms: 10,
            sensitive_data: false,
        }
    }

    #[tokio::test]
    async fn a_clean_response_produces_no_findings() {
        let flow = base_flow("https://example.com/api", 200);
        let findings = PassiveAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn a_vulnerable_apache_version_is_flagged_high() {
        let mut flow = base_flow("https://example.com/", 200);
        flow.response_headers.insert("Server", "Apache/2.4.49 (Unix)");
        let findings = PassiveAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.iter().any(|f| f.category == "vulnerable_software" && f.severity == Severity::High));
    }

    #[tokio::test]
    async fn a_debug_path_with_2xx_status_is_flagged() {
        let flow = base_flow("https://example.com/.git/config", 200);
        let findings = PassiveAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.iter().any(|f| f.category == "debug_exposure"));
    }

    #[tokio::test]
    async fn a_debug_path_with_404_is_not_flagged() {
        let flow = base_flow("https://example.com/.git/config", 404);
        let findings = PassiveAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn a_server_error_with_textual_body_is_flagged() {
        let mut flow = base_flow("https://example.com/api", 500);
        flow.response_headers.insert("Content-Type", "text/plain");
        let findings = PassiveAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.iter().any(|f| f.category == "information_disclosure"));
    }
}
