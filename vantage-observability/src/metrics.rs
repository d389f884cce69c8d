use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use vantage_core::{Finding, Severity, VantageError};

const ROLLING_SAMPLE_LIMIT: usize = 1000;
const PER_ANALYZER_SAMPLE_LIMIT: usize = 100;

struct Sample {
    at: DateTime<Utc>,
    duration: Duration,
}

/// Process-lifetime counters and bounded rolling-window samples for the
/// analysis pipeline (§4.11). Exposed two ways: Prometheus text
/// exposition via [`Metrics::gather_text`], and a computed JSON-able
/// snapshot via [`Metrics::get_stats`] for the live event bus / read-side
/// interfaces.
pub struct Metrics {
    registry: Registry,
    flows_analyzed: IntCounter,
    findings_generated: IntCounter,
    errors: IntCounterVec,
    backpressure_rejected: IntCounterVec,

    samples: Mutex<VecDeque<Sample>>,
    per_analyzer_samples: Mutex<HashMap<String, VecDeque<Sample>>>,
    severity_counts: Mutex<HashMap<&'static str, u64>>,
    category_counts: Mutex<HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let flows_analyzed = IntCounter::with_opts(
            Opts::new("vantage_flows_analyzed_total", "Total flows submitted for analysis").namespace("vantage"),
        )?;
        let findings_generated = IntCounter::with_opts(
            Opts::new("vantage_findings_generated_total", "Total findings generated").namespace("vantage"),
        )?;
        let errors = IntCounterVec::new(
            Opts::new("vantage_analyzer_errors_total", "Analyzer errors by analyzer").namespace("vantage"),
            &["analyzer"],
        )?;
        let backpressure_rejected = IntCounterVec::new(
            Opts::new("vantage_backpressure_rejected_total", "Analysis submissions rejected under load").namespace("vantage"),
            &["analyzer"],
        )?;

        registry.register(Box::new(flows_analyzed.clone()))?;
        registry.register(Box::new(findings_generated.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(backpressure_rejected.clone()))?;

        Ok(Self {
            registry,
            flows_analyzed,
            findings_generated,
            errors,
            backpressure_rejected,
            samples: Mutex::new(VecDeque::new()),
            per_analyzer_samples: Mutex::new(HashMap::new()),
            severity_counts: Mutex::new(HashMap::new()),
            category_counts: Mutex::new(HashMap::new()),
        })
    }

    /// Record one completed analyzer invocation: its duration, any
    /// findings it produced, and whether it errored. Each counter group
    /// guards its own critical section (§5, "single critical section per
    /// counter group").
    pub fn record_analysis(
        &self,
        analyzer: &str,
        duration: Duration,
        findings: &[Finding],
        error: Option<&VantageError>,
    ) {
        self.flows_analyzed.inc();

        if let Some(_e) = error {
            self.errors.with_label_values(&[analyzer]).inc();
        }

        if !findings.is_empty() {
            self.findings_generated.inc_by(findings.len() as u64);
        }

        {
            let mut severities = self.severity_counts.lock().unwrap();
            for finding in findings {
                *severities.entry(severity_label(finding.severity)).or_insert(0) += 1;
            }
        }
        {
            let mut categories = self.category_counts.lock().unwrap();
            for finding in findings {
                *categories.entry(finding.category.clone()).or_insert(0) += 1;
            }
        }

        let now = Utc::now();
        {
            let mut samples = self.samples.lock().unwrap();
            samples.push_back(Sample { at: now, duration });
            while samples.len() > ROLLING_SAMPLE_LIMIT {
                samples.pop_front();
            }
        }
        {
            let mut per_analyzer = self.per_analyzer_samples.lock().unwrap();
            let queue = per_analyzer.entry(analyzer.to_string()).or_default();
            queue.push_back(Sample { at: now, duration });
            while queue.len() > PER_ANALYZER_SAMPLE_LIMIT {
                queue.pop_front();
            }
        }
    }

    pub fn record_backpressure_rejected(&self, analyzer: &str) {
        self.backpressure_rejected.with_label_values(&[analyzer]).inc();
    }

    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Compute the derived-query snapshot over the last `window_minutes`.
    pub fn get_stats(&self, window_minutes: i64) -> StatsSnapshot {
        let cutoff = Utc::now() - chrono::Duration::minutes(window_minutes);

        let samples = self.samples.lock().unwrap();
        let windowed: Vec<&Sample> = samples.iter().filter(|s| s.at >= cutoff).collect();

        let throughput = windowed.len() as f64 / (window_minutes.max(1) as f64);
        let mean_duration_ms = mean_ms(&windowed);

        let per_analyzer = self.per_analyzer_samples.lock().unwrap();
        let per_analyzer_stats = per_analyzer
            .iter()
            .map(|(name, samples)| {
                let windowed: Vec<&Sample> = samples.iter().filter(|s| s.at >= cutoff).collect();
                (name.clone(), AnalyzerDurationStats::from_samples(&windowed))
            })
            .collect();

        StatsSnapshot {
            window_minutes,
            throughput_per_minute: throughput,
            mean_duration_ms,
            flows_analyzed: self.flows_analyzed.get(),
            findings_generated: self.findings_generated.get(),
            severity_histogram: self.severity_counts.lock().unwrap().iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            category_histogram: self.category_counts.lock().unwrap().clone(),
            per_analyzer: per_analyzer_stats,
        }
    }
}

fn mean_ms(samples: &[&Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples.iter().map(|s| s.duration.as_secs_f64() * 1000.0).sum();
    total / samples.len() as f64
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerDurationStats {
    pub count: usize,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

impl AnalyzerDurationStats {
    fn from_samples(samples: &[&Sample]) -> Self {
        if samples.is_empty() {
            return Self { count: 0, min_ms: 0.0, mean_ms: 0.0, max_ms: 0.0 };
        }
        let durations_ms: Vec<f64> = samples.iter().map(|s| s.duration.as_secs_f64() * 1000.0).collect();
        let min_ms = durations_ms.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_ms = durations_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean_ms = durations_ms.iter().sum::<f64>() / durations_ms.len() as f64;
        Self { count: samples.len(), min_ms, mean_ms, max_ms }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub window_minutes: i64,
    pub throughput_per_minute: f64,
    pub mean_duration_ms: f64,
    pub flows_analyzed: u64,
    pub findings_generated: u64,
    pub severity_histogram: HashMap<String, u64>,
    pub category_histogram: HashMap<String, u64>,
    pub per_analyzer: HashMap<String, AnalyzerDurationStats>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metrics registry initialization should not fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_finding(severity: Severity, category: &str) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            flow_id: Some(Uuid::new_v4()),
            analyzer: "http".into(),
            severity,
            category: category.into(),
            title: "test finding".into(),
            description: "test".into(),
            recommendation: None,
            detected_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn record_analysis_accumulates_counters_and_histograms() {
        let metrics = Metrics::new().unwrap();
        metrics.record_analysis(
            "http",
            Duration::from_millis(10),
            &[sample_finding(Severity::High, "credential-leak")],
            None,
        );

        let stats = metrics.get_stats(60);
        assert_eq!(stats.flows_analyzed, 1);
        assert_eq!(stats.findings_generated, 1);
        assert_eq!(stats.severity_histogram.get("high"), Some(&1));
        assert_eq!(stats.category_histogram.get("credential-leak"), Some(&1));
    }

    #[test]
    fn backpressure_rejections_are_counted_per_analyzer() {
        let metrics = Metrics::new().unwrap();
        metrics.record_backpressure_rejected("tls");
        metrics.record_backpressure_rejected("tls");
        let text = metrics.gather_text();
        assert!(text.contains("vantage_backpressure_rejected_total"));
    }

    #[test]
    fn rolling_window_caps_sample_count() {
        let metrics = Metrics::new().unwrap();
        for _ in 0..(ROLLING_SAMPLE_LIMIT + 10) {
            metrics.record_analysis("http", Duration::from_millis(1), &[], None);
        }
        assert_eq!(metrics.samples.lock().unwrap().len(), ROLLING_SAMPLE_LIMIT);
    }
}
