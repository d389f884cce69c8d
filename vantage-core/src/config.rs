use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the Vantage core.
///
/// The configuration format and its validator are an explicit non-goal: this
/// struct consumes the keys of §6 defensively (via `serde`'s own type
/// coercion and the defaults below), it does not perform schema validation.
/// A malformed file surfaces through `figment`'s error as a
/// `ConfigurationError`, which is fatal at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VantageConfig {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// `dev` enables auto-migration on C8 startup; `production` makes
    /// schema drift a fatal `ConfigurationError` (§4.4, §6).
    #[serde(default = "default_mode")]
    pub mode: RunMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Dev,
    Production,
}

impl RunMode {
    pub fn auto_migrate(self) -> bool {
        self == RunMode::Dev
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mitmproxy: MitmproxyConfig,

    #[serde(default)]
    pub pcap: PcapConfig,

    #[serde(default)]
    pub tcpdump: TcpdumpConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitmproxyConfig {
    #[serde(default = "default_mitmproxy_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcapConfig {
    #[serde(default = "default_pcap_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_buffer_size_mb")]
    pub buffer_size_mb: u64,

    #[serde(default = "default_pcap_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpdumpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tcpdump_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub http_analyzer: bool,

    #[serde(default = "default_true")]
    pub tls_analyzer: bool,

    #[serde(default = "default_true")]
    pub dns_analyzer: bool,

    #[serde(default = "default_true")]
    pub passive_scanner: bool,

    #[serde(default = "default_max_analysis_time_ms")]
    pub max_analysis_time_ms: u64,

    #[serde(default = "default_max_concurrent_analyses")]
    pub max_concurrent_analyses: usize,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_max_overflow")]
    pub max_overflow: u32,
}

impl VantageConfig {
    /// Layered load: YAML file (explicit path, or a search of the default
    /// locations) merged with `VANTAGE_`-prefixed, `__`-split environment
    /// overrides — e.g. `VANTAGE_DATABASE__POOL_SIZE=20`.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["vantage.yaml", "/etc/vantage/vantage.yaml", "config/vantage.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("VANTAGE_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }
}

impl Default for VantageConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            analysis: AnalysisConfig::default(),
            database: DatabaseConfig::default(),
            mode: default_mode(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mitmproxy: MitmproxyConfig::default(),
            pcap: PcapConfig::default(),
            tcpdump: TcpdumpConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for MitmproxyConfig {
    fn default() -> Self {
        Self {
            port: default_mitmproxy_port(),
        }
    }
}

impl Default for PcapConfig {
    fn default() -> Self {
        Self {
            output_dir: default_pcap_output_dir(),
            buffer_size_mb: default_buffer_size_mb(),
            poll_interval_secs: default_pcap_poll_interval(),
        }
    }
}

impl Default for TcpdumpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: default_tcpdump_filter(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_session_timeout_seconds(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_analyzer: true,
            tls_analyzer: true,
            dns_analyzer: true,
            passive_scanner: true,
            max_analysis_time_ms: default_max_analysis_time_ms(),
            max_concurrent_analyses: default_max_concurrent_analyses(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_max_size(),
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mode() -> RunMode {
    RunMode::Dev
}

fn default_mitmproxy_port() -> u16 {
    8080
}

fn default_pcap_output_dir() -> PathBuf {
    PathBuf::from("data/pcap")
}

fn default_buffer_size_mb() -> u64 {
    16
}

fn default_pcap_poll_interval() -> u64 {
    5
}

fn default_tcpdump_filter() -> String {
    "udp or dns".to_string()
}

fn default_session_timeout_seconds() -> u64 {
    3600
}

fn default_max_analysis_time_ms() -> u64 {
    2000
}

fn default_max_concurrent_analyses() -> usize {
    16
}

fn default_cache_max_size() -> usize {
    10_000
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/vantage.db")
}

fn default_pool_size() -> u32 {
    5
}

fn default_max_overflow() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_configuration_table() {
        let cfg = VantageConfig::default();
        assert!(cfg.capture.enabled);
        assert_eq!(cfg.capture.mitmproxy.port, 8080);
        assert_eq!(cfg.capture.session.timeout_seconds, 3600);
        assert_eq!(cfg.analysis.max_concurrent_analyses, 16);
        assert_eq!(cfg.analysis.max_analysis_time_ms, 2000);
        assert!(cfg.analysis.cache.enabled);
        assert_eq!(cfg.mode, RunMode::Dev);
    }

    #[test]
    fn dev_mode_auto_migrates_production_does_not() {
        assert!(RunMode::Dev.auto_migrate());
        assert!(!RunMode::Production.auto_migrate());
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults_plus_env() {
        unsafe {
            std::env::set_var("VANTAGE_ANALYSIS__MAX_CONCURRENT_ANALYSES", "4");
        }
        let cfg = VantageConfig::load(None).expect("env-only load should succeed");
        assert_eq!(cfg.analysis.max_concurrent_analyses, 4);
        unsafe {
            std::env::remove_var("VANTAGE_ANALYSIS__MAX_CONCURRENT_ANALYSES");
        }
    }
}
