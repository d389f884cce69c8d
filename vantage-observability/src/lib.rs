pub mod live_event_bus;
pub mod metrics;
pub mod pii_scrubber;

pub use live_event_bus::{LiveEvent, LiveEventBus, SubscriberHandle};
pub use metrics::{AnalyzerDurationStats, Metrics, StatsSnapshot};
