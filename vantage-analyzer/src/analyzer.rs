use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;
use vantage_core::{DnsQuery, Finding, Flow, VantageError};

/// The two inputs C9 fans out to analyzers (§3, §4.6). A Flow-analyzer
/// receiving a Dns input, or vice versa, simply returns no findings —
/// analyzers declare which shape they care about by matching on this enum.
#[derive(Debug, Clone)]
pub enum AnalyzerInput {
    Flow(Arc<Flow>),
    Dns(Arc<DnsQuery>),
}

impl AnalyzerInput {
    /// Identity used as the orchestrator cache key's first element (§4.5).
    pub fn id(&self) -> Uuid {
        match self {
            AnalyzerInput::Flow(flow) => flow.id,
            AnalyzerInput::Dns(query) => query.id,
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            AnalyzerInput::Flow(flow) => flow.session_id,
            AnalyzerInput::Dns(query) => query.session_id.unwrap_or_else(Uuid::nil),
        }
    }

    pub fn as_flow(&self) -> Option<&Flow> {
        match self {
            AnalyzerInput::Flow(flow) => Some(flow),
            AnalyzerInput::Dns(_) => None,
        }
    }

    pub fn as_dns(&self) -> Option<&DnsQuery> {
        match self {
            AnalyzerInput::Dns(query) => Some(query),
            AnalyzerInput::Flow(_) => None,
        }
    }
}

/// A single security or privacy check run against a completed [`Flow`] or
/// observed [`DnsQuery`].
///
/// Analyzers are pure with respect to their input: they observe it, they
/// never mutate it (§4.5). Implementations run under the orchestrator's
/// concurrency cap, so `analyze` should do bounded, local work — no network
/// calls, no unbounded loops.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Unique, stable name — used as half of the orchestrator's cache key
    /// and as the `analyzer` field on every Finding/AnalysisRecord it
    /// produces.
    fn name(&self) -> &str;

    async fn analyze(&self, input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError>;
}
