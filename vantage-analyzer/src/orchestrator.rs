use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;
use uuid::Uuid;
use vantage_core::{AnalysisRecord, CachedAnalysisDescriptor, DnsQuery, Finding, Flow};
use vantage_observability::Metrics;
use vantage_store::FlowStore;

use crate::analyzer::AnalyzerInput;
use crate::registry::AnalyzerRegistry;

/// Bounded, least-recently-inserted cache of analyzer verdicts keyed by
/// `(input id, analyzer name)`. A metric/dedup hint only — never consulted
/// to skip running an analyzer (§4.5).
struct ResultCache {
    entries: DashMap<(Uuid, String), CachedAnalysisDescriptor>,
    order: Mutex<VecDeque<(Uuid, String)>>,
    max_size: usize,
    ttl: Duration,
}

impl ResultCache {
    fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_size,
            ttl,
        }
    }

    async fn insert(&self, input_id: Uuid, analyzer: &str, finding_count: usize) {
        let key = (input_id, analyzer.to_string());
        self.entries.insert(
            key.clone(),
            CachedAnalysisDescriptor {
                flow_id: input_id,
                analyzer: analyzer.to_string(),
                finding_count,
                cached_at: chrono::Utc::now(),
            },
        );

        let mut order = self.order.lock().await;
        order.push_back(key);
        while order.len() > self.max_size {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn get(&self, input_id: Uuid, analyzer: &str) -> Option<CachedAnalysisDescriptor> {
        let key = (input_id, analyzer.to_string());
        let entry = self.entries.get(&key)?;
        let age = chrono::Utc::now().signed_duration_since(entry.cached_at);
        if age.num_seconds() as u64 >= self.ttl.as_secs() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.clone())
    }
}

/// Fans each input out to every enabled analyzer, under a shared
/// concurrency cap, and batches the resulting findings into one
/// persistence transaction per input (§4.5).
pub struct AnalysisOrchestrator {
    registry: Arc<AnalyzerRegistry>,
    semaphore: Arc<Semaphore>,
    cache: ResultCache,
    store: Arc<FlowStore>,
    metrics: Arc<Metrics>,
    max_analysis_time: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        registry: Arc<AnalyzerRegistry>,
        max_concurrent_analyses: usize,
        cache_max_size: usize,
        cache_ttl: Duration,
        store: Arc<FlowStore>,
        metrics: Arc<Metrics>,
        max_analysis_time: Duration,
    ) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_concurrent_analyses)),
            cache: ResultCache::new(cache_max_size, cache_ttl),
            store,
            metrics,
            max_analysis_time,
        }
    }

    /// Run every registered analyzer against `flow`, each bounded by the
    /// shared semaphore. Analyzers that can't acquire a permit are skipped
    /// immediately rather than queued (§4.5). Findings across all
    /// analyzers are written to the store in a single transaction.
    pub async fn analyze_flow(&self, flow: Flow) {
        let input = AnalyzerInput::Flow(Arc::new(flow));
        let (all_findings, analysis_records) = self.run_all(&input).await;

        if let AnalyzerInput::Flow(flow) = &input {
            if let Err(e) = self.store.store(flow, &all_findings, &analysis_records).await {
                warn!(flow_id = %flow.id, error = %e, "batched analysis persistence failed");
            }
        }
    }

    /// Run every registered analyzer against a DNS query observed by C12,
    /// persisting any resulting findings directly (no owning Flow row to
    /// batch them with; §3, §4.6.4). A DNS query has no flow to tie an
    /// Analysis Record to, so none are produced for this path.
    pub async fn analyze_dns(&self, query: DnsQuery) {
        let input = AnalyzerInput::Dns(Arc::new(query));
        let (all_findings, _analysis_records) = self.run_all(&input).await;

        if !all_findings.is_empty() {
            if let Err(e) = self.store.store_findings(&all_findings).await {
                warn!(input_id = %input.id(), error = %e, "dns finding persistence failed");
            }
        }
    }

    /// Run every registered analyzer against `input`, each bounded by the
    /// shared semaphore, and build one [`AnalysisRecord`] per analyzer run
    /// that has a flow to tie it to (§3, §4.5). Skipped analyzers (no
    /// permit available) produce neither a finding nor a record.
    async fn run_all(&self, input: &AnalyzerInput) -> (Vec<Finding>, Vec<AnalysisRecord>) {
        let mut handles = Vec::new();
        let flow_id = input.as_flow().map(|f| f.id);

        for analyzer in self.registry.all() {
            let analyzer = analyzer.clone();
            let input = input.clone();
            let semaphore = self.semaphore.clone();
            let metrics = self.metrics.clone();
            let max_analysis_time = self.max_analysis_time;

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.try_acquire() else {
                    metrics.record_backpressure_rejected(analyzer.name());
                    return None;
                };

                let started_at = chrono::Utc::now();
                let started = Instant::now();
                let result = analyzer.analyze(&input).await;
                let elapsed = started.elapsed();

                if elapsed > max_analysis_time {
                    warn!(
                        input_id = %input.id(),
                        analyzer = analyzer.name(),
                        elapsed_ms = elapsed.as_millis(),
                        budget_ms = max_analysis_time.as_millis(),
                        "slow_analysis"
                    );
                }

                let (findings, error) = match result {
                    Ok(findings) => {
                        metrics.record_analysis(analyzer.name(), elapsed, &findings, None);
                        (findings, None)
                    }
                    Err(e) => {
                        metrics.record_analysis(analyzer.name(), elapsed, &[], Some(&e));
                        (Vec::new(), Some(e.to_string()))
                    }
                };

                let record = flow_id.map(|flow_id| AnalysisRecord {
                    id: Uuid::new_v4(),
                    flow_id,
                    analyzer: analyzer.name().to_string(),
                    started_at,
                    duration_ms: elapsed.as_millis() as u64,
                    finding_count: findings.len(),
                    error,
                    metadata: serde_json::Value::Null,
                });

                Some((analyzer.name().to_string(), findings, record))
            });

            handles.push(handle);
        }

        let mut all_findings: Vec<Finding> = Vec::new();
        let mut all_records: Vec<AnalysisRecord> = Vec::new();
        for handle in handles {
            if let Ok(Some((analyzer_name, findings, record))) = handle.await {
                self.cache.insert(input.id(), &analyzer_name, findings.len()).await;
                all_findings.extend(findings);
                if let Some(record) = record {
                    all_records.push(record);
                }
            }
        }
        (all_findings, all_records)
    }

    pub fn cached_result(&self, input_id: Uuid, analyzer: &str) -> Option<CachedAnalysisDescriptor> {
        self.cache.get(input_id, analyzer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use vantage_core::{Severity, VantageError};

    struct AlwaysFindsOne;

    #[async_trait]
    impl crate::analyzer::Analyzer for AlwaysFindsOne {
        fn name(&self) -> &str {
            "always-one"
        }

        async fn analyze(&self, input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError> {
            Ok(vec![Finding {
                id: Uuid::new_v4(),
                session_id: input.session_id(),
                flow_id: input.as_flow().map(|f| f.id),
                analyzer: self.name().to_string(),
                severity: Severity::Low,
                category: "test".into(),
                title: "test finding".into(),
                description: "test finding".into(),
                recommendation: None,
                detected_at: chrono::Utc::now(),
                metadata: json!({}),
            }])
        }
    }

    #[tokio::test]
    async fn cache_evicts_oldest_entry_past_max_size() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.insert(Uuid::new_v4(), "a", 1).await;
        let second = Uuid::new_v4();
        cache.insert(second, "a", 1).await;
        let third = Uuid::new_v4();
        cache.insert(third, "a", 1).await;
        assert_eq!(cache.entries.len(), 2);
        assert!(cache.get(third, "a").is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = ResultCache::new(10, Duration::from_secs(0));
        let flow_id = Uuid::new_v4();
        cache.insert(flow_id, "a", 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get(flow_id, "a").is_none());
    }
}
