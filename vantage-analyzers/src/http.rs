use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vantage_analyzer::{Analyzer, AnalyzerInput};
use vantage_core::{scan_url, AuthKind, Finding, Severity, VantageError};

const SECURITY_HEADERS: &[(&str, Severity)] = &[
    ("x-content-type-options", Severity::Medium),
    ("x-frame-options", Severity::Medium),
    ("content-security-policy", Severity::Medium),
    ("strict-transport-security", Severity::High),
];

/// Header/cookie/auth/data hygiene over a single Flow (§4.6.1).
pub struct HttpAnalyzer;

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &str {
        "http"
    }

    async fn analyze(&self, input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError> {
        let Some(flow) = input.as_flow() else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        let is_https = flow.url.to_lowercase().starts_with("https://");

        for (header, severity) in SECURITY_HEADERS {
            if *header == "strict-transport-security" && !is_https {
                continue;
            }
            if flow.response_headers.get(header).is_none() {
                findings.push(self.finding(
                    flow.session_id,
                    Some(flow.id),
                    *severity,
                    "missing_security_header",
                    format!("Missing {header} response header"),
                    format!("Set the {header} header on all responses."),
                ));
            }
        }

        if let Some(cookie) = flow.response_headers.get("set-cookie") {
            let lower = cookie.to_lowercase();
            if is_https && !lower.contains("secure") {
                findings.push(self.finding(
                    flow.session_id,
                    Some(flow.id),
                    Severity::High,
                    "insecure_cookie",
                    "Set-Cookie missing Secure flag on HTTPS response".to_string(),
                    "Add the Secure attribute to every cookie set over HTTPS.".to_string(),
                ));
            }
            if !lower.contains("httponly") {
                findings.push(self.finding(
                    flow.session_id,
                    Some(flow.id),
                    Severity::Medium,
                    "insecure_cookie",
                    "Set-Cookie missing HttpOnly flag".to_string(),
                    "Add the HttpOnly attribute to prevent script access to session cookies.".to_string(),
                ));
            }
            if !lower.contains("samesite") {
                findings.push(self.finding(
                    flow.session_id,
                    Some(flow.id),
                    Severity::Medium,
                    "insecure_cookie",
                    "Set-Cookie missing SameSite attribute".to_string(),
                    "Add an explicit SameSite attribute to every cookie.".to_string(),
                ));
            }
        }

        if let Some((token, class)) = scan_url(&flow.url.to_lowercase()) {
            findings.push(self.finding_with_metadata(
                flow.session_id,
                Some(flow.id),
                Severity::Critical,
                "sensitive_data_exposure",
                format!("Sensitive {class} found in URL ({token})"),
                "Move sensitive values out of the URL and into the request body or headers.".to_string(),
                serde_json::json!({"pattern": token, "data_type": class}),
            ));
        }

        if let Some(auth) = flow.request_headers.get("authorization") {
            if !is_https {
                findings.push(self.finding(
                    flow.session_id,
                    Some(flow.id),
                    Severity::Critical,
                    "credential_exposure",
                    "Authorization header sent over plaintext HTTP".to_string(),
                    "Serve this endpoint over HTTPS before sending credentials.".to_string(),
                ));
            }
            if auth.trim_start().to_lowercase().starts_with("basic ") {
                findings.push(self.finding(
                    flow.session_id,
                    Some(flow.id),
                    Severity::Medium,
                    "weak_authentication",
                    "HTTP Basic authentication detected".to_string(),
                    "Replace Basic authentication with a token- or session-based scheme.".to_string(),
                ));
            }
        }
        // AuthKind::Basic is set from the same header; kept in sync by construction (§3).
        debug_assert!(flow.auth_kind != AuthKind::Basic || flow.request_headers.get("authorization").is_some());

        Ok(findings)
    }
}

impl HttpAnalyzer {
    fn finding(
        &self,
        session_id: Uuid,
        flow_id: Option<Uuid>,
        severity: Severity,
        category: &str,
        title: String,
        recommendation: String,
    ) -> Finding {
        self.finding_with_metadata(session_id, flow_id, severity, category, title, recommendation, serde_json::json!({}))
    }

    #[allow(clippy::too_many_arguments)]
    fn finding_with_metadata(
        &self,
        session_id: Uuid,
        flow_id: Option<Uuid>,
        severity: Severity,
        category: &str,
        title: String,
        recommendation: String,
        metadata: serde_json::Value,
    ) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            session_id,
            flow_id,
            analyzer: self.name().to_string(),
            severity,
            category: category.to_string(),
            description: title.clone(),
            title,
            recommendation: Some(recommendation),
            detected_at: Utc::now(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vantage_core::{Flow, Headers};

    fn base_flow(url: &str, https: bool) -> Flow {
        let mut response_headers = Headers::new();
        if https {
            response_headers.insert("Strict-Transport-Security", "max-age=63072000");
        }
        response_headers.insert("X-Content-Type-Options", "nosniff");
        response_headers.insert("X-Frame-Options", "DENY");
        response_headers.insert("Content-Security-Policy", "default-src 'self'");

        Flow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_addr: "10.0.0.5:51000".into(),
            method: "GET".into(),
            url: url.to_string(),
            request_headers: Headers::new(),
            response_status: Some(200),
            response_headers,
            auth_kind: AuthKind::None,
            tls: None,
            request_body_size: 0,
            response_body_size: 0,
            duration_ms: 10,
            sensitive_data: false,
        }
    }

    #[tokio::test]
    async fn a_compliant_https_get_produces_no_findings() {
        let flow = base_flow("https://example.com/api/resource", true);
        let findings = HttpAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn a_password_in_the_query_string_is_a_critical_finding() {
        let flow = base_flow("https://example.com/login?password=hunter2", true);
        let findings = HttpAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        let hit = findings.iter().find(|f| f.category == "sensitive_data_exposure").unwrap();
        assert_eq!(hit.severity, Severity::Critical);
        assert_eq!(hit.metadata, serde_json::json!({"pattern": "password", "data_type": "password parameter"}));
    }

    #[tokio::test]
    async fn a_cookie_without_secure_over_https_yields_three_findings() {
        let mut flow = base_flow("https://example.com/", true);
        flow.response_headers.insert("Set-Cookie", "session=abc123; HttpOnly");
        let findings = HttpAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        let cookie_findings: Vec<_> = findings.iter().filter(|f| f.category == "insecure_cookie").collect();
        assert_eq!(cookie_findings.len(), 2);
    }

    #[tokio::test]
    async fn authorization_header_over_plaintext_http_is_critical() {
        let mut flow = base_flow("http://example.com/", false);
        flow.request_headers.insert("Authorization", "Bearer abc");
        let findings = HttpAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(flow))).await.unwrap();
        assert!(findings.iter().any(|f| f.category == "credential_exposure" && f.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn a_dns_input_yields_no_findings() {
        use chrono::Utc as ChronoUtc;
        let query = vantage_core::DnsQuery {
            id: Uuid::new_v4(),
            session_id: None,
            timestamp: ChronoUtc::now(),
            client_addr: "10.0.0.5".into(),
            query_name: "example.com".into(),
            query_type: "A".into(),
            response_code: Some(0),
        };
        let findings = HttpAnalyzer.analyze(&AnalyzerInput::Dns(Arc::new(query))).await.unwrap();
        assert!(findings.is_empty());
    }
}
