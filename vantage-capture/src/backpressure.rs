use tracing::{info, warn};

use crate::ring_buffer::RingBuffer;

/// Watches a [`RingBuffer`]'s fill level and signals when capture should
/// pause to avoid memory exhaustion (§4.2).
pub struct BackpressureController {
    paused: bool,
}

impl BackpressureController {
    pub fn new() -> Self {
        Self { paused: false }
    }

    /// Re-evaluate pause state against the buffer's current fill level.
    /// Returns `true` while the buffer remains above the backpressure
    /// threshold. Edge-triggered logging: only the transition is logged,
    /// not every poll.
    pub fn should_pause(&mut self, buffer: &RingBuffer) -> bool {
        let is_full = buffer.is_full();

        if is_full && !self.paused {
            self.paused = true;
            warn!(size_mb = buffer.size_mb(), max_size_mb = buffer.max_size_mb(), "backpressure: pausing capture");
        } else if !is_full && self.paused {
            self.paused = false;
            info!(size_mb = buffer.size_mb(), "backpressure: resuming capture");
        }

        is_full
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_once_buffer_crosses_threshold_and_resumes_after_drain() {
        let mut buf = RingBuffer::new(1);
        let mut bp = BackpressureController::new();
        assert!(!bp.should_pause(&buf));

        buf.push(vec![0u8; (0.9 * 1024.0 * 1024.0) as usize]);
        assert!(bp.should_pause(&buf));
        assert!(bp.is_paused());

        buf.clear();
        assert!(!bp.should_pause(&buf));
        assert!(!bp.is_paused());
    }

    /// A 1 MB buffer flooded with 100 pushes of 20 KB each crosses the
    /// backpressure threshold exactly once — no further pause signal fires
    /// on later pushes while still over threshold — and resumes exactly
    /// once after draining below it (§8 scenario 5).
    #[test]
    fn a_flood_of_twenty_kilobyte_pushes_pauses_once_and_resumes_once_after_drain() {
        let mut buf = RingBuffer::new(1);
        let mut bp = BackpressureController::new();
        let chunk = vec![0u8; 20 * 1024];

        let mut pause_transitions = 0;
        for _ in 0..100 {
            let was_paused = bp.is_paused();
            buf.push(chunk.clone());
            if bp.should_pause(&buf) && !was_paused {
                pause_transitions += 1;
            }
        }

        assert_eq!(pause_transitions, 1, "exactly one pause signal across the whole flood");
        assert!(bp.is_paused());

        while buf.size_mb() / buf.max_size_mb() >= 0.80 {
            buf.pop();
        }

        let mut resume_transitions = 0;
        let was_paused = bp.is_paused();
        if !bp.should_pause(&buf) && was_paused {
            resume_transitions += 1;
        }

        assert_eq!(resume_transitions, 1, "exactly one resume signal after draining below threshold");
        assert!(!bp.is_paused());
    }
}
