use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use uuid::Uuid;
use vantage_analyzer::{Analyzer, AnalyzerInput};
use vantage_core::{DnsQuery, Finding, Severity, VantageError};

const SUSPICIOUS_TLDS: &[&str] = &[".tk", ".ml", ".ga", ".cf", ".gq"];
const TYPOSQUAT_MARKERS: &[&str] = &["paypa1", "goog1e", "faceb00k", "amaz0n", "micr0soft", "appleid-"];
const TUNNELING_LENGTH_THRESHOLD: usize = 100;
const TUNNELING_LABEL_COUNT_THRESHOLD: usize = 5;

/// Lexical and volumetric heuristics over observed DNS queries (§4.6.4).
/// Runs against queries from both live capture and post-capture
/// dissection (C12), since both paths produce the same [`DnsQuery`] shape.
pub struct DnsAnalyzer {
    dga_patterns: Vec<Regex>,
}

impl DnsAnalyzer {
    pub fn new() -> Self {
        Self {
            dga_patterns: vec![
                Regex::new(r"(?i)^[a-z]{10,}").expect("static regex is valid"),
                Regex::new(r"(?i)^[0-9]{5,}").expect("static regex is valid"),
                Regex::new(r"(?i)^[a-z0-9]{20,}").expect("static regex is valid"),
            ],
        }
    }
}

impl Default for DnsAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for DnsAnalyzer {
    fn name(&self) -> &str {
        "dns"
    }

    async fn analyze(&self, input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError> {
        let Some(query) = input.as_dns() else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        let lower_name = query.query_name.to_lowercase();

        if SUSPICIOUS_TLDS.iter().any(|tld| lower_name.ends_with(tld)) {
            findings.push(self.finding(
                query,
                Severity::Medium,
                "suspicious_tld",
                format!("Query to a domain with a suspicious TLD: {}", query.query_name),
            ));
        }

        if let Some(first_label) = lower_name.split('.').next() {
            if let Some(pattern) = self.dga_patterns.iter().find(|p| p.is_match(first_label)) {
                let _ = pattern;
                findings.push(self.finding(
                    query,
                    Severity::High,
                    "dga_like_domain",
                    format!("First label resembles algorithmically generated domain: {first_label}"),
                ));
            }
        }

        if TYPOSQUAT_MARKERS.iter().any(|marker| lower_name.contains(marker)) {
            findings.push(self.finding(
                query,
                Severity::Medium,
                "typosquatting",
                format!("Query name resembles a typosquat of a known brand: {}", query.query_name),
            ));
        }

        if query.query_type.eq_ignore_ascii_case("TXT") && query.query_name.len() > TUNNELING_LENGTH_THRESHOLD {
            findings.push(self.finding(
                query,
                Severity::High,
                "dns_tunneling",
                "TXT query with unusually long name suggests DNS tunneling".to_string(),
            ));
        }

        if lower_name.matches('.').count() > TUNNELING_LABEL_COUNT_THRESHOLD {
            findings.push(self.finding(
                query,
                Severity::Medium,
                "dns_tunneling",
                "Query name has an unusually deep label count".to_string(),
            ));
        }

        Ok(findings)
    }
}

impl DnsAnalyzer {
    fn finding(&self, query: &DnsQuery, severity: Severity, category: &str, title: String) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            session_id: query.session_id.unwrap_or_else(Uuid::nil),
            flow_id: None,
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
