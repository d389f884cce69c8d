pub mod analyzer;
pub mod orchestrator;
pub mod registry;

pub use analyzer::{Analyzer, AnalyzerInput};
pub use orchestrator::AnalysisOrchestrator;
pub use registry::AnalyzerRegistry;
