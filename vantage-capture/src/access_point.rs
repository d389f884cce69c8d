use tracing::info;
use vantage_core::VantageError;

use crate::supervised_process::SupervisedProcess;

/// Supervises the wireless access point daemon that endpoint devices
/// attach to. Wi-Fi configuration and client management are peripheral to
/// the interception-and-analysis core (§1) — this component exists only
/// so the startup orchestrator's registration order (§4.1) has a real
/// start/stop pair to hold the AP's place ahead of the disk monitor.
/// When no AP binary is configured, it is a no-op.
pub struct AccessPointManager {
    process: Option<SupervisedProcess>,
}

impl AccessPointManager {
    /// `hostapd_binary` is the path to the access-point daemon, or `None`
    /// to run without managing Wi-Fi (e.g. when traffic is already routed
    /// through an externally managed AP).
    pub fn new(hostapd_binary: Option<&str>, config_path: Option<&str>) -> Self {
        let process = match (hostapd_binary, config_path) {
            (Some(bin), Some(cfg)) => Some(SupervisedProcess::new("hostapd", bin, vec![cfg.to_string()])),
            _ => None,
        };
        Self { process }
    }

    pub async fn start(&mut self) -> Result<(), VantageError> {
        match &mut self.process {
            Some(process) => process.start().await,
            None => {
                info!("access point manager disabled, no hostapd binary configured");
                Ok(())
            }
        }
    }

    pub async fn stop(&mut self) {
        match &mut self.process {
            Some(process) => process.stop().await,
            None => info!("access point manager stop called with nothing running"),
        }
    }
}
