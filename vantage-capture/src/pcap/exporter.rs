use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use vantage_core::VantageError;

use crate::backpressure::BackpressureController;
use crate::circuit_breaker::CircuitBreaker;
use crate::pcap::monitor::PcapMonitor;
use crate::ring_buffer::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcapExporterState {
    Idle,
    Writing,
    Stopped,
}

struct ExporterState {
    state: PcapExporterState,
    buffer: RingBuffer,
    backpressure: BackpressureController,
    breaker: CircuitBreaker,
    writer: Option<std::fs::File>,
    current_path: Option<PathBuf>,
}

/// Drives C1 to an on-disk packet-capture writer, guarded by C3, producing
/// C2 signals (§4.8). A single critical section serializes the ring
/// buffer's one producer (the capture source) against its one consumer
/// (this writer), per §5's shared-resource rule for C1.
pub struct PcapExporter {
    output_dir: PathBuf,
    inner: Mutex<ExporterState>,
}

impl PcapExporter {
    pub fn new(output_dir: impl Into<PathBuf>, buffer_size_mb: u64, failure_threshold: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            inner: Mutex::new(ExporterState {
                state: PcapExporterState::Idle,
                buffer: RingBuffer::new(buffer_size_mb),
                backpressure: BackpressureController::new(),
                breaker: CircuitBreaker::new(failure_threshold),
                writer: None,
                current_path: None,
            }),
        }
    }

    /// Open the writer for `filename` under the configured output
    /// directory, creating it with owner-only permissions if missing, and
    /// transition to Writing (§4.8, §6).
    pub async fn start(&self, filename: &str) -> Result<(), VantageError> {
        std::fs::create_dir_all(&self.output_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.output_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let path = self.output_dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(file);
        inner.current_path = Some(path.clone());
        inner.state = PcapExporterState::Writing;
        info!(path = %path.display(), "pcap exporter writing");
        Ok(())
    }

    /// Push `chunk` into the ring buffer, then drain one chunk out to disk.
    /// Returns `false` (not admitted) when the circuit is open or
    /// backpressure is active — the capture source must observe
    /// `should_pause` itself and suspend admission (§4.8).
    pub async fn export(&self, chunk: Vec<u8>) -> bool {
        let mut inner = self.inner.lock().await;

        let ExporterState { backpressure, buffer, breaker, .. } = &mut *inner;
        if breaker.should_open() || backpressure.should_pause(buffer) {
            return false;
        }

        inner.buffer.push(chunk);

        if let Some(popped) = inner.buffer.pop() {
            let write_result = match inner.writer.as_mut() {
                Some(writer) => writer.write_all(&popped).and_then(|_| writer.flush()),
                None => Err(std::io::Error::other("pcap exporter has no open writer")),
            };

            match write_result {
                Ok(()) => inner.breaker.record_success(),
                Err(e) => {
                    error!(error = %e, "pcap write failed");
                    inner.breaker.record_failure();
                }
            }
        }

        true
    }

    pub async fn should_pause(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let ExporterState { backpressure, buffer, .. } = &mut *inner;
        backpressure.should_pause(buffer)
    }

    /// Drain remaining buffered chunks to disk, close the writer, and
    /// transition to Stopped. If `monitor` is given and the output file
    /// exists, schedules a single post-processing pass over it (§4.8,
    /// §4.9).
    pub async fn stop(&self, monitor: Option<&PcapMonitor>) {
        let path;
        {
            let mut inner = self.inner.lock().await;
            while let Some(chunk) = inner.buffer.pop() {
                if let Some(w) = inner.writer.as_mut() {
                    if let Err(e) = w.write_all(&chunk) {
                        warn!(error = %e, "pcap drain write failed during stop");
                    }
                }
            }
            if let Some(w) = inner.writer.as_mut() {
                let _ = w.flush();
            }
            path = inner.current_path.take();
            inner.writer = None;
            inner.state = PcapExporterState::Stopped;
        }

        info!("pcap exporter stopped");

        if let (Some(monitor), Some(path)) = (monitor, path) {
            if path.exists() {
                monitor.process_file(&path).await;
            }
        }
    }

    pub async fn state(&self) -> PcapExporterState {
        self.inner.lock().await.state
    }
}
