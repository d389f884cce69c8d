pub mod config;
pub mod error;
pub mod model;
pub mod sensitive;

pub use config::{
    AnalysisConfig, CacheConfig, CaptureConfig, DatabaseConfig, MitmproxyConfig, PcapConfig,
    RunMode, SessionConfig, TcpdumpConfig, VantageConfig,
};
pub use error::VantageError;
pub use model::{
    AnalysisRecord, AuthKind, CachedAnalysisDescriptor, CertificateInfo, DnsQuery, Finding,
    Flow, Headers, RingBufferChunk, Session, Severity, TlsMetadata,
};
pub use sensitive::{scan_url, SENSITIVE_TOKENS};
