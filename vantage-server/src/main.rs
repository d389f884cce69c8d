// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Vantage — transparent gateway traffic interception and
//  security analysis core
//
//  Runtime: single tokio scheduler, cooperative tasks
//  Admin/read-side surfaces: external collaborators (§6 non-goal)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod startup_orchestrator;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use vantage_analyzer::{AnalysisOrchestrator, AnalyzerRegistry};
use vantage_capture::{
    AccessPointManager, CertificateStore, InterceptionHook, PacketRuleManager, PcapExporter,
    PcapMonitor, SessionTracker, SupervisedProcess, WatermarkMonitor,
};
use vantage_core::VantageConfig;
use vantage_observability::{LiveEventBus, Metrics};
use vantage_store::{bootstrap_administrator, FlowStore};

use startup_orchestrator::StartupOrchestrator;

#[derive(Parser, Debug)]
#[command(name = "vantaged", version, about = "Vantage — transparent traffic interception and analysis core")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG if set)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Network interface the managed access point serves
    #[arg(long, default_value = "wlan0")]
    interface: String,

    /// Directory holding the CA certificate the interceptor presents (§6)
    #[arg(long, default_value = "data/certs")]
    cert_dir: PathBuf,

    /// Directory holding rotated raw packet captures (§6, C4)
    #[arg(long, default_value = "data/captures")]
    capture_dir: PathBuf,

    /// Unix socket the interceptor subprocess hands flow events over (§4.3)
    #[arg(long, default_value = "data/vantage-hook.sock")]
    hook_socket: PathBuf,

    /// Path to the DNS dissector binary invoked by C12 (§6)
    #[arg(long, default_value = "dns-dissector")]
    dissector: PathBuf,

    /// Default administrator username, created on first run if no
    /// administrator exists yet (§4.4)
    #[arg(long)]
    admin_username: Option<String>,

    #[arg(long)]
    admin_password: Option<String>,

    /// Bearer token accepted by the live event bus (§4.10). May be given
    /// multiple times; with none given, the live event feed accepts no
    /// subscribers.
    #[arg(long = "event-token")]
    event_tokens: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "vantage core starting");

    let config = VantageConfig::load(cli.config.as_ref().and_then(|p| p.to_str()))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli, config))
}

async fn run(cli: Cli, config: VantageConfig) -> anyhow::Result<()> {
    startup_orchestrator::install_signal_handler();

    let store = Arc::new(
        FlowStore::connect(&config.database.path, config.database.pool_size, config.mode)
            .await
            .map_err(|e| anyhow::anyhow!("database connection failed: {e}"))?,
    );

    bootstrap_administrator(
        &store,
        cli.admin_username.as_deref(),
        cli.admin_password.as_deref(),
    )
    .await?;

    let metrics = Arc::new(Metrics::new()?);
    let events = Arc::new(LiveEventBus::new(cli.event_tokens.clone()));

    let mut registry = AnalyzerRegistry::new();
    vantage_analyzers::register_all(&mut registry, &config.analysis);
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        Arc::new(registry),
        config.analysis.max_concurrent_analyses,
        config.analysis.cache.max_size,
        Duration::from_secs(config.analysis.cache.ttl_seconds),
        Arc::clone(&store),
        Arc::clone(&metrics),
        Duration::from_millis(config.analysis.max_analysis_time_ms),
    ));

    let sessions = Arc::new(SessionTracker::new(config.capture.session.timeout_seconds, Some(Arc::clone(&store))));

    let hook = Arc::new(InterceptionHook::new(
        Arc::clone(&sessions),
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        Arc::clone(&events),
    ));

    let pcap_exporter = Arc::new(PcapExporter::new(
        config.capture.pcap.output_dir.clone(),
        config.capture.pcap.buffer_size_mb,
        5,
    ));
    let pcap_monitor = Arc::new(PcapMonitor::new(cli.dissector.clone(), Arc::clone(&store), Arc::clone(&orchestrator)));

    let cert_store = Arc::new(CertificateStore::new(cli.cert_dir.clone()));
    let packet_rules = Arc::new(tokio::sync::Mutex::new(PacketRuleManager::new(cli.interface.clone(), config.capture.mitmproxy.port)));
    let interceptor_process = Arc::new(tokio::sync::Mutex::new(SupervisedProcess::new(
        "mitmdump",
        "mitmdump",
        vec!["--mode".into(), "transparent".into(), "--listen-port".into(), config.capture.mitmproxy.port.to_string()],
    )));
    let tcpdump_process = Arc::new(tokio::sync::Mutex::new(SupervisedProcess::new(
        "tcpdump",
        "tcpdump",
        vec!["-i".into(), cli.interface.clone(), "-w".into(), capture_output_pattern(&cli.capture_dir), config.capture.tcpdump.filter.clone()],
    )));
    let access_point = Arc::new(tokio::sync::Mutex::new(AccessPointManager::new(None, None)));
    let watermark = Arc::new(tokio::sync::Mutex::new(WatermarkMonitor::new()));

    let mut app = StartupOrchestrator::new();

    {
        let store = Arc::clone(&store);
        app.register("database", move || {
            let store = Arc::clone(&store);
            async move {
                let _ = &store;
                Ok(())
            }
        }, || async {});
    }

    {
        let cert_store = Arc::clone(&cert_store);
        app.register(
            "certificate store",
            move || {
                let cert_store = Arc::clone(&cert_store);
                async move { cert_store.validate().await.map_err(anyhow::Error::from) }
            },
            || async {},
        );
    }

    if config.capture.enabled {
        let packet_rules = Arc::clone(&packet_rules);
        let packet_rules_stop = Arc::clone(&packet_rules);
        app.register(
            "packet-rule manager",
            move || {
                let packet_rules = Arc::clone(&packet_rules);
                async move { packet_rules.lock().await.install().await.map_err(anyhow::Error::from) }
            },
            move || {
                let packet_rules = Arc::clone(&packet_rules_stop);
                async move { packet_rules.lock().await.uninstall().await }
            },
        );
    }

    {
        let sessions = Arc::clone(&sessions);
        app.register(
            "session tracker",
            move || {
                let sessions = Arc::clone(&sessions);
                async move {
                    tokio::spawn(Arc::clone(&sessions).run_cleanup_loop(Duration::from_secs(60)));
                    Ok(())
                }
            },
            || async {},
        );
    }

    if config.capture.enabled {
        let hook = Arc::clone(&hook);
        let hook_socket = cli.hook_socket.clone();
        app.register(
            "interceptor",
            move || {
                let hook = Arc::clone(&hook);
                let hook_socket = hook_socket.clone();
                async move {
                    tokio::spawn(async move {
                        if let Err(e) = hook.listen(&hook_socket).await {
                            error!(error = %e, "interception hook listener exited");
                        }
                    });
                    Ok(())
                }
            },
            || async {},
        );

        if config.capture.tcpdump.enabled {
            let interceptor_process = Arc::clone(&interceptor_process);
            let interceptor_stop = Arc::clone(&interceptor_process);
            app.register(
                "raw-capture",
                move || {
                    let process = Arc::clone(&interceptor_process);
                    async move { process.lock().await.start().await.map_err(anyhow::Error::from) }
                },
                move || {
                    let process = Arc::clone(&interceptor_stop);
                    async move { process.lock().await.stop().await }
                },
            );

            let tcpdump_process = Arc::clone(&tcpdump_process);
            let tcpdump_stop = Arc::clone(&tcpdump_process);
            let capture_dir = cli.capture_dir.clone();
            app.register(
                "raw-capture daemon",
                move || {
                    let process = Arc::clone(&tcpdump_process);
                    let capture_dir = capture_dir.clone();
                    async move {
                        std::fs::create_dir_all(&capture_dir)?;
                        process.lock().await.start().await.map_err(anyhow::Error::from)
                    }
                },
                move || {
                    let process = Arc::clone(&tcpdump_stop);
                    async move { process.lock().await.stop().await }
                },
            );
        }
    }

    {
        let pcap_exporter_start = Arc::clone(&pcap_exporter);
        let pcap_exporter = Arc::clone(&pcap_exporter);
        app.register(
            "pcap exporter",
            move || {
                let pcap_exporter = Arc::clone(&pcap_exporter_start);
                async move {
                    pcap_exporter
                        .start(&format!("capture_{}.pcap", chrono::Utc::now().timestamp()))
                        .await
                        .map_err(anyhow::Error::from)
                }
            },
            {
                let pcap_exporter = Arc::clone(&pcap_exporter);
                let pcap_monitor = Arc::clone(&pcap_monitor);
                move || {
                    let pcap_exporter = Arc::clone(&pcap_exporter);
                    let pcap_monitor = Arc::clone(&pcap_monitor);
                    async move { pcap_exporter.stop(Some(&pcap_monitor)).await }
                }
            },
        );
    }

    {
        let pcap_monitor = Arc::clone(&pcap_monitor);
        let poll_interval = Duration::from_secs(config.capture.pcap.poll_interval_secs);
        let watch_dirs = vec![config.capture.pcap.output_dir.clone(), cli.capture_dir.clone()];
        app.register(
            "pcap monitor",
            move || {
                let pcap_monitor = Arc::clone(&pcap_monitor);
                let watch_dirs = watch_dirs.clone();
                async move {
                    tokio::spawn(pcap_monitor.run_poll_loop(watch_dirs, poll_interval));
                    Ok(())
                }
            },
            || async {},
        );
    }

    {
        let access_point = Arc::clone(&access_point);
        let access_point_stop = Arc::clone(&access_point);
        app.register(
            "access-point manager",
            move || {
                let access_point = Arc::clone(&access_point);
                async move { access_point.lock().await.start().await.map_err(anyhow::Error::from) }
            },
            move || {
                let access_point = Arc::clone(&access_point_stop);
                async move { access_point.lock().await.stop().await }
            },
        );
    }

    {
        let watermark = Arc::clone(&watermark);
        app.register(
            "disk monitor",
            move || {
                let watermark = Arc::clone(&watermark);
                async move {
                    tokio::spawn(run_watermark_loop(watermark, Duration::from_secs(30)));
                    Ok(())
                }
            },
            || async {},
        );
    }

    app.start().await?;

    info!(
        mitmproxy_port = config.capture.mitmproxy.port,
        database = %config.database.path.display(),
        "vantage core ready"
    );

    while !startup_orchestrator::shutdown_requested() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("shutdown signal received");
    app.stop().await;
    info!("vantage core stopped");

    Ok(())
}

fn capture_output_pattern(dir: &std::path::Path) -> String {
    dir.join("session_%Y%m%d%H%M%S.pcap").to_string_lossy().to_string()
}

async fn run_watermark_loop(monitor: Arc<tokio::sync::Mutex<WatermarkMonitor>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = monitor.lock().await.check() {
            warn!(error = %e, "memory watermark check raised an error");
        }
    }
}
