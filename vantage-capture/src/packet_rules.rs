use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info, warn};
use vantage_core::VantageError;

const CHAIN_NAME: &str = "VANTAGE_TRAFFIC_ANALYZER";
const TABLE_NAME: &str = "nat";

/// Installs and tears down the `iptables` redirection rules that route
/// managed-interface traffic into the interceptor (§6's packet-routing
/// contract). Rules are all-or-nothing on install; removal is best-effort
/// and never fails the caller.
pub struct PacketRuleManager {
    interface: String,
    mitmproxy_port: u16,
    rules_applied: bool,
}

impl PacketRuleManager {
    pub fn new(interface: impl Into<String>, mitmproxy_port: u16) -> Self {
        Self {
            interface: interface.into(),
            mitmproxy_port,
            rules_applied: false,
        }
    }

    async fn run_iptables(&self, args: &[&str]) -> Result<std::process::Output, VantageError> {
        let mut full_args = vec!["-t", TABLE_NAME];
        full_args.extend_from_slice(args);
        Command::new("iptables")
            .args(&full_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VantageError::Network(format!("failed to invoke iptables: {e}")))
    }

    async fn chain_exists(&self) -> bool {
        match self.run_iptables(&["-L", CHAIN_NAME]).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn create_chain(&self) -> Result<(), VantageError> {
        if self.chain_exists().await {
            debug!(chain = CHAIN_NAME, "iptables chain already exists");
            return Ok(());
        }
        let output = self.run_iptables(&["-N", CHAIN_NAME]).await?;
        if !output.status.success() {
            return Err(VantageError::Network(format!(
                "failed to create iptables chain: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        info!(chain = CHAIN_NAME, "iptables chain created");
        Ok(())
    }

    /// Install the redirection rules atomically: every rule present, or
    /// none (§6). On any failure, already-applied rules are removed
    /// before the error is returned.
    pub async fn install(&mut self) -> Result<(), VantageError> {
        if self.rules_applied {
            warn!("iptables rules already applied");
            return Ok(());
        }

        if let Err(e) = self.install_inner().await {
            error!(error = %e, "iptables install failed, rolling back partial rules");
            self.uninstall().await;
            return Err(e);
        }

        self.rules_applied = true;
        info!(interface = %self.interface, "packet redirection rules installed");
        Ok(())
    }

    async fn install_inner(&self) -> Result<(), VantageError> {
        self.create_chain().await?;

        for (port, proto) in [(80u16, "tcp"), (443, "tcp"), (53, "udp")] {
            let dport = port.to_string();
            let output = self
                .run_iptables(&[
                    "-A",
                    "PREROUTING",
                    "-i",
                    &self.interface,
                    "-p",
                    proto,
                    "--dport",
                    &dport,
                    "-j",
                    CHAIN_NAME,
                ])
                .await?;
            if !output.status.success() {
                return Err(VantageError::Network(format!(
                    "failed to install PREROUTING rule for port {port}: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
        }

        for port in [80u16, 443] {
            self.add_redirect_rule(port, self.mitmproxy_port).await?;
        }

        Ok(())
    }

    async fn add_redirect_rule(&self, port: u16, redirect_to: u16) -> Result<(), VantageError> {
        let dport = port.to_string();
        let to_port = redirect_to.to_string();
        let output = self
            .run_iptables(&[
                "-A",
                CHAIN_NAME,
                "-i",
                &self.interface,
                "-p",
                "tcp",
                "--dport",
                &dport,
                "-j",
                "REDIRECT",
                "--to-port",
                &to_port,
            ])
            .await?;
        if !output.status.success() {
            return Err(VantageError::Network(format!(
                "failed to install REDIRECT rule for port {port}: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Best-effort removal of every installed rule and the chain itself.
    /// Never raises — teardown is the orchestrator's responsibility and
    /// must not fail the stop sweep (§4.1, §6).
    pub async fn uninstall(&mut self) {
        if !self.rules_applied {
            debug!("iptables rules not applied, nothing to remove");
        }

        for (port, proto) in [(80u16, "tcp"), (443, "tcp"), (53, "udp")] {
            let dport = port.to_string();
            let _ = self
                .run_iptables(&["-D", "PREROUTING", "-i", &self.interface, "-p", proto, "--dport", &dport, "-j", CHAIN_NAME])
                .await;
        }

        let _ = self.run_iptables(&["-F", CHAIN_NAME]).await;
        let _ = self.run_iptables(&["-X", CHAIN_NAME]).await;

        self.rules_applied = false;
        info!("packet redirection rules removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_rules_applied() {
        let manager = PacketRuleManager::new("wlan0", 8080);
        assert!(!manager.rules_applied);
    }
}
