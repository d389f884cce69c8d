use tracing::{error, info, warn};

/// Opens after a run of consecutive PCAP export failures, signalling the
/// capture loop to pause exporting until manually or automatically reset
/// (§4.2).
pub struct CircuitBreaker {
    failure_threshold: u32,
    consecutive_failures: u32,
    is_open: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            consecutive_failures: 0,
            is_open: false,
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        warn!(
            consecutive_failures = self.consecutive_failures,
            threshold = self.failure_threshold,
            "circuit breaker: failure recorded"
        );

        if self.consecutive_failures >= self.failure_threshold {
            self.is_open = true;
            error!(consecutive_failures = self.consecutive_failures, "circuit breaker opened");
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(previous_failures = self.consecutive_failures, "circuit breaker: success recorded");
            self.consecutive_failures = 0;
        }
        if self.is_open {
            self.is_open = false;
            info!("circuit breaker closed");
        }
    }

    pub fn should_open(&self) -> bool {
        self.is_open
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.is_open = false;
        info!("circuit breaker manually reset");
    }
}
