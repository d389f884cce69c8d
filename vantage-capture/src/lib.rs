pub mod access_point;
pub mod backpressure;
pub mod cert_store;
pub mod circuit_breaker;
pub mod interception_hook;
pub mod packet_rules;
pub mod pcap;
pub mod ring_buffer;
pub mod session_tracker;
pub mod supervised_process;
pub mod watermark;

pub use access_point::AccessPointManager;
pub use backpressure::BackpressureController;
pub use cert_store::CertificateStore;
pub use circuit_breaker::CircuitBreaker;
pub use interception_hook::{InterceptionHook, RawFlowEvent, RawTlsInfo};
pub use packet_rules::PacketRuleManager;
pub use pcap::exporter::{PcapExporter, PcapExporterState};
pub use pcap::monitor::PcapMonitor;
pub use ring_buffer::RingBuffer;
pub use session_tracker::SessionTracker;
pub use supervised_process::SupervisedProcess;
pub use watermark::WatermarkMonitor;
