use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vantage_analyzer::{Analyzer, AnalyzerInput};
use vantage_core::{Finding, Flow, Severity, VantageError};

const WEAK_VERSIONS: &[&str] = &["SSLv2", "SSLv3", "TLSv1.0", "TLSv1.1"];
const WEAK_CIPHER_MARKERS: &[&str] = &["RC4", "DES", "3DES", "MD5", "SHA1", "TLS_RSA_WITH_", "TLS_DHE_RSA_WITH_"];
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Certificate chain, protocol, and cipher hygiene for HTTPS flows with
/// observed TLS metadata (§4.6.3). Flows with no TLS session (plaintext
/// HTTP, or a handshake the interceptor couldn't observe) are skipped —
/// this analyzer never guesses at absent data (§9 Open Question).
pub struct TlsAnalyzer;

#[async_trait]
impl Analyzer for TlsAnalyzer {
    fn name(&self) -> &str {
        "tls"
    }

    async fn analyze(&self, input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError> {
        let Some(flow) = input.as_flow() else {
            return Ok(Vec::new());
        };

        if !flow.url.to_lowercase().starts_with("https://") {
            return Ok(Vec::new());
        }

        let Some(tls) = &flow.tls else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();

        if let Some(version) = &tls.version {
            if WEAK_VERSIONS.iter().any(|weak| version.contains(weak)) {
                findings.push(self.finding(
                    flow,
                    Severity::High,
                    "weak_protocol",
                    format!("Weak TLS protocol version negotiated: {version}"),
                ));
            }
        }

        if let Some(cipher) = &tls.cipher {
            if WEAK_CIPHER_MARKERS.iter().any(|marker| cipher.contains(marker)) {
                findings.push(self.finding(
                    flow,
                    Severity::Medium,
                    "weak_cipher",
                    format!("Weak cipher suite negotiated: {cipher}"),
                ));
            }
        }

        if let Some(cert) = &tls.certificate {
            if let Some(not_after) = cert.not_after {
                let days_remaining = (not_after - Utc::now()).num_days();
                if days_remaining < 0 {
                    findings.push(self.finding(
                        flow,
                        Severity::High,
                        "certificate_expiry",
                        format!("Certificate expired {} days ago", -days_remaining),
                    ));
                } else if days_remaining < EXPIRY_WARNING_DAYS {
                    findings.push(self.finding(
                        flow,
                        Severity::Medium,
                        "certificate_expiry",
                        format!("Certificate expires in {days_remaining} days"),
                    ));
                }
            }

            if let (Some(subject), Some(issuer)) = (&cert.subject, &cert.issuer) {
                if subject == issuer {
                    findings.push(self.finding(
                        flow,
                        Severity::Medium,
                        "self_signed_certificate",
                        "Leaf certificate is self-signed".to_string(),
                    ));
                }
            }

            if cert.chain_length.map(|len| len < 2).unwrap_or(false) {
                findings.push(self.finding(
                    flow,
                    Severity::Low,
                    "incomplete_chain",
                    "Certificate chain is shorter than expected".to_string(),
                ));
            }
        }

        Ok(findings)
    }
}

impl TlsAnalyzer {
    fn finding(&self, flow: &Flow, severity: Severity, category: &str, title: String) -> Finding {
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
    use chrono::Duration;
    use vantage_core::{AuthKind, CertificateInfo, Headers, TlsMetadata};

    fn base_flow(tls: Option<TlsMetadata>) -> Flow {
        Flow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_addr: "10.0.0.5:51000".into(),
            method: "GET".into(),
            url: "https://example.com/".into(),
            request_headers: Headers::new(),
            response_status: Some(200),
            response_headers: Headers::new(),
            auth_kind: AuthKind::None,
            tls,
            request_body_size: 0,
            response_body_size: 0,
            duration_ms: 10,
            sensitive_data: false,
        }
    }

    #[tokio::test]
    async fn a_healthy_modern_handshake_produces_no_findings() {
        let tls = TlsMetadata {
            version: Some("TLSv1.3".into()),
            cipher: Some("TLS_AES_128_GCM_SHA256".into()),
            certificate: Some(CertificateInfo {
                subject: Some("CN=example.com".into()),
                issuer: Some("CN=Example CA".into()),
                not_before: Some(Utc::now() - Duration::days(30)),
                not_after: Some(Utc::now() + Duration::days(300)),
                chain_length: Some(3),
            }),
        };
        let findings = TlsAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(base_flow(Some(tls))))).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn a_weak_handshake_yields_exactly_four_findings() {
        let tls = TlsMetadata {
            version: Some("TLSv1.0".into()),
            cipher: Some("TLS_RSA_WITH_RC4_128_SHA".into()),
            certificate: Some(CertificateInfo {
                subject: Some("CN=example.com".into()),
                issuer: Some("CN=example.com".into()),
                not_before: Some(Utc::now() - Duration::days(300)),
                not_after: Some(Utc::now() + Duration::days(300)),
                chain_length: Some(1),
            }),
        };
        let findings = TlsAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(base_flow(Some(tls))))).await.unwrap();
        assert_eq!(findings.len(), 4);
        assert!(findings.iter().any(|f| f.category == "weak_protocol" && f.severity == Severity::High));
        assert!(findings.iter().any(|f| f.category == "weak_cipher" && f.severity == Severity::Medium));
        assert!(findings.iter().any(|f| f.category == "self_signed_certificate" && f.severity == Severity::Medium));
        assert!(findings.iter().any(|f| f.category == "incomplete_chain" && f.severity == Severity::Low));
    }

    #[tokio::test]
    async fn a_flow_with_no_tls_metadata_is_skipped() {
        let findings = TlsAnalyzer.analyze(&AnalyzerInput::Flow(Arc::new(base_flow(None)))).await.unwrap();
        assert!(findings.is_empty());
    }
}
