use sysinfo::System;
use tracing::{error, info, warn};
use vantage_core::VantageError;

const WARNING_THRESHOLD: f64 = 0.80;
const EMERGENCY_THRESHOLD: f64 = 0.95;

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Monitors system memory usage and raises [`VantageError::Resource`] once
/// usage crosses the emergency watermark (§4.2, §7). The warning watermark
/// is logged but non-fatal; both are edge-triggered so repeated polls at
/// the same level don't spam the log.
pub struct WatermarkMonitor {
    system: System,
    warning_triggered: bool,
    emergency_triggered: bool,
}

impl WatermarkMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            warning_triggered: false,
            emergency_triggered: false,
        }
    }

    /// Refresh memory stats and check watermarks. Returns `Ok(())` at or
    /// below the warning threshold, `Err(ResourceError)` at or above the
    /// emergency threshold.
    pub fn check(&mut self) -> Result<(), VantageError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();

        if total == 0 {
            return Ok(());
        }

        let usage = used as f64 / total as f64;

        if usage >= EMERGENCY_THRESHOLD {
            if !self.emergency_triggered {
                self.emergency_triggered = true;
                error!(usage_percent = usage * 100.0, "memory emergency threshold exceeded");
            }
            return Err(VantageError::Resource(format!(
                "system memory usage {:.1}% exceeds emergency threshold {:.1}%",
                usage * 100.0,
                EMERGENCY_THRESHOLD * 100.0
            )));
        }

        if usage >= WARNING_THRESHOLD {
            if !self.warning_triggered {
                self.warning_triggered = true;
                warn!(usage_percent = usage * 100.0, "memory warning threshold exceeded");
            }
        } else {
            if self.warning_triggered {
                self.warning_triggered = false;
                info!(usage_percent = usage * 100.0, "memory warning cleared");
            }
            if self.emergency_triggered {
                self.emergency_triggered = false;
                info!(usage_percent = usage * 100.0, "memory emergency cleared");
            }
        }

        Ok(())
    }
}

impl Default for WatermarkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_mb_converts_correctly() {
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
    }

    #[test]
    fn check_does_not_panic_on_a_fresh_monitor() {
        let mut monitor = WatermarkMonitor::new();
        let _ = monitor.check();
    }
}
