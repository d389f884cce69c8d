use std::collections::HashMap;
use std::sync::Arc;

use crate::analyzer::Analyzer;

/// Thread-safe analyzer registry. Built once at startup from the enabled
/// analyzers in configuration, immutable thereafter (§4.5, §4.6).
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self {
            analyzers: HashMap::new(),
        }
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        let name = analyzer.name().to_string();
        tracing::info!(analyzer = %name, "registered analyzer");
        self.analyzers.insert(name, analyzer);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Analyzer>> {
        self.analyzers.get(name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.analyzers.keys().map(|s| s.as_str()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Analyzer>> {
        self.analyzers.values()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vantage_core::{Finding, VantageError};

    use crate::analyzer::AnalyzerInput;

    struct MockAnalyzer {
        name: String,
    }

    #[async_trait]
    impl Analyzer for MockAnalyzer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn analyze(&self, _input: &AnalyzerInput) -> Result<Vec<Finding>, VantageError> {
            Ok(vec![])
        }
    }

    #[test]
    fn empty_registry_has_no_analyzers() {
        let reg = AnalyzerRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.get("tls").is_none());
    }

    #[test]
    fn register_and_get_round_trips_by_name() {
        let mut reg = AnalyzerRegistry::new();
        reg.register(Arc::new(MockAnalyzer { name: "tls".into() }));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("tls").is_some());
        assert_eq!(reg.get("tls").unwrap().name(), "tls");
    }

    #[test]
    fn re_registering_the_same_name_overwrites() {
        let mut reg = AnalyzerRegistry::new();
        reg.register(Arc::new(MockAnalyzer { name: "http".into() }));
        reg.register(Arc::new(MockAnalyzer { name: "http".into() }));
        assert_eq!(reg.len(), 1);
    }
}
