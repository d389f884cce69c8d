use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use vantage_core::VantageError;

/// Manages one externally spawned interception process (mitmdump or
/// tcpdump) that the core supervises but does not terminate traffic
/// through itself (§6). Architecture: a subprocess, not a library
/// embedding, so the core never links against mitmproxy/libpcap directly.
pub struct SupervisedProcess {
    name: String,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl SupervisedProcess {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            child: None,
        }
    }

    /// Start the subprocess in its own process group and confirm it is
    /// still alive after a brief grace period (0.5s) — a process that
    /// exits immediately means a broken invocation, not a running daemon.
    pub async fn start(&mut self) -> Result<(), VantageError> {
        if self.child.is_some() {
            warn!(process = %self.name, "already running");
            return Ok(());
        }

        info!(process = %self.name, program = %self.program, args = ?self.args, "starting supervised process");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|e| {
            VantageError::Network(format!("failed to spawn {}: {e}", self.program))
        })?;

        sleep(Duration::from_millis(500)).await;

        if let Some(status) = child.try_wait().map_err(|e| VantageError::Network(e.to_string()))? {
            return Err(VantageError::Network(format!(
                "{} exited immediately with {status}",
                self.name
            )));
        }

        info!(process = %self.name, pid = child.id(), "supervised process started");
        self.child = Some(child);
        Ok(())
    }

    /// Send SIGTERM to the process group, wait up to 5 seconds, then
    /// SIGKILL if it hasn't exited (§10 two-phase shutdown).
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!(process = %self.name, "not running");
            return;
        };

        let Some(pid) = child.id() else {
            return;
        };

        info!(process = %self.name, pid, "stopping supervised process");

        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }

        let wait = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        match wait {
            Ok(Ok(status)) => info!(process = %self.name, %status, "supervised process stopped"),
            Ok(Err(e)) => error!(process = %self.name, error = %e, "error waiting for process exit"),
            Err(_) => {
                warn!(process = %self.name, pid, "graceful shutdown timed out, sending SIGKILL");
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
                let _ = child.wait().await;
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Validate the CA certificate exists before attempting to start mitmdump
/// in transparent mode — a missing cert means interception cannot begin.
pub fn require_ca_certificate(cert_dir: &PathBuf) -> Result<PathBuf, VantageError> {
    let ca_cert = cert_dir.join("vantage-ca.pem");
    if !ca_cert.exists() {
        return Err(VantageError::Network(format!(
            "CA certificate not found: {}",
            ca_cert.display()
        )));
    }
    Ok(ca_cert)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_nonexistent_binary_fails_to_start() {
        let mut proc = SupervisedProcess::new("fake", "/no/such/binary", vec![]);
        let result = proc.start().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stopping_a_process_never_started_is_a_no_op() {
        let mut proc = SupervisedProcess::new("idle", "true", vec![]);
        proc.stop().await;
    }

    #[test]
    fn missing_ca_certificate_is_a_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = require_ca_certificate(&dir.path().to_path_buf());
        assert!(matches!(result, Err(VantageError::Network(_))));
    }
}
