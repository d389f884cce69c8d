pub mod dns;
pub mod http;
pub mod passive;
pub mod tls;

use std::sync::Arc;

use vantage_analyzer::AnalyzerRegistry;
use vantage_core::AnalysisConfig;

/// Register the built-in analyzers enabled by `config` (§4.6, §6).
pub fn register_all(registry: &mut AnalyzerRegistry, config: &AnalysisConfig) {
    if config.http_analyzer {
        registry.register(Arc::new(http::HttpAnalyzer));
    }
    if config.passive_scanner {
        registry.register(Arc::new(passive::PassiveAnalyzer));
    }
    if config.tls_analyzer {
        registry.register(Arc::new(tls::TlsAnalyzer));
    }
    if config.dns_analyzer {
        registry.register(Arc::new(dns::DnsAnalyzer::new()));
    }
}
