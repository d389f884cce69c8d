use tracing::{debug, error, warn};

use std::collections::VecDeque;

use crate::watermark::bytes_to_mb;

/// Fixed-size FIFO buffer for raw packet bytes awaiting PCAP export.
///
/// When full, the oldest chunks are dropped to make room for new ones
/// (§3, §4.2). `is_full` reports the 80% backpressure threshold, not
/// hard capacity — [`BackpressureController`](crate::backpressure::BackpressureController)
/// watches that signal to decide when to pause capture.
pub struct RingBuffer {
    max_size_bytes: u64,
    backpressure_threshold: u64,
    current_size: u64,
    chunks: VecDeque<Vec<u8>>,
}

impl RingBuffer {
    pub fn new(max_size_mb: u64) -> Self {
        let max_size_bytes = max_size_mb * 1024 * 1024;
        let backpressure_threshold = (max_size_bytes as f64 * 0.8) as u64;
        debug!(max_size_mb, threshold_mb = bytes_to_mb(backpressure_threshold), "ring buffer initialized");
        Self {
            max_size_bytes,
            backpressure_threshold,
            current_size: 0,
            chunks: VecDeque::new(),
        }
    }

    /// Add data to the buffer, dropping the oldest chunks first if it
    /// doesn't fit. Returns `false` only when the chunk itself exceeds
    /// `max_size_bytes` and can never fit even in an empty buffer.
    pub fn push(&mut self, data: Vec<u8>) -> bool {
        let data_size = data.len() as u64;

        while self.current_size + data_size > self.max_size_bytes {
            match self.chunks.pop_front() {
                Some(dropped) => {
                    self.current_size -= dropped.len() as u64;
                    warn!(dropped_bytes = dropped.len(), "ring buffer overflow, dropping oldest chunk");
                }
                None => break,
            }
        }

        if self.current_size + data_size > self.max_size_bytes {
            error!(data_size, max_size_bytes = self.max_size_bytes, "chunk too large for ring buffer");
            return false;
        }

        self.current_size += data_size;
        self.chunks.push_back(data);
        true
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let data = self.chunks.pop_front()?;
        self.current_size -= data.len() as u64;
        Some(data)
    }

    pub fn is_full(&self) -> bool {
        self.current_size >= self.backpressure_threshold
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.current_size)
    }

    pub fn max_size_mb(&self) -> f64 {
        bytes_to_mb(self.max_size_bytes)
    }

    pub fn clear(&mut self) {
        let dropped = self.chunks.len();
        self.chunks.clear();
        self.current_size = 0;
        debug!(dropped, "ring buffer cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_under_capacity_succeeds_without_dropping() {
        let mut buf = RingBuffer::new(1);
        assert!(buf.push(vec![0u8; 1024]));
        assert!(!buf.is_empty());
    }

    #[test]
    fn push_over_capacity_drops_oldest_first() {
        let mut buf = RingBuffer::new(1);
        let chunk = vec![0u8; 512 * 1024];
        for _ in 0..3 {
            buf.push(chunk.clone());
        }
        assert!(buf.size_mb() <= buf.max_size_mb());
    }

    #[test]
    fn push_larger_than_capacity_is_rejected() {
        let mut buf = RingBuffer::new(1);
        let huge = vec![0u8; 2 * 1024 * 1024];
        assert!(!buf.push(huge));
    }

    #[test]
    fn is_full_reports_the_eighty_percent_threshold() {
        let mut buf = RingBuffer::new(1);
        assert!(!buf.is_full());
        buf.push(vec![0u8; (0.85 * 1024.0 * 1024.0) as usize]);
        assert!(buf.is_full());
    }

    #[test]
    fn pop_returns_chunks_in_fifo_order() {
        let mut buf = RingBuffer::new(1);
        buf.push(vec![1, 2, 3]);
        buf.push(vec![4, 5, 6]);
        assert_eq!(buf.pop(), Some(vec![1, 2, 3]));
        assert_eq!(buf.pop(), Some(vec![4, 5, 6]));
        assert_eq!(buf.pop(), None);
    }
}
