use thiserror::Error;

/// The eight error kinds surfaced by the core, each with a fixed propagation
/// policy: fatal at start (rolls the startup orchestrator back and exits),
/// or isolated at runtime (logged, the offending unit is skipped, the rest
/// of the system continues).
#[derive(Error, Debug)]
pub enum VantageError {
    #[error("platform error: {0}")]
    Platform(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("security error: {0}")]
    Security(String),

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("analyzer error in {analyzer}: {message}")]
    Analyzer { analyzer: String, message: String },

    #[error("subscriber error: {0}")]
    Subscriber(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl VantageError {
    /// Whether this error, raised during startup, must abort the orchestrator
    /// and trigger reverse-order rollback (§7). Runtime occurrences of the
    /// same variant are handled per-component instead — this method only
    /// answers the start-time question.
    pub fn fatal_at_start(&self) -> bool {
        matches!(
            self,
            VantageError::Platform(_)
                | VantageError::Resource(_)
                | VantageError::Configuration(_)
                | VantageError::Network(_)
                | VantageError::Security(_)
                | VantageError::Io(_)
                | VantageError::Store(_)
        )
    }

    /// Isolated, runtime-local failures never abort the process: a transient
    /// store failure, a single analyzer raising, or a subscriber send
    /// failing are all absorbed by the component that observed them.
    pub fn isolated_at_runtime(&self) -> bool {
        matches!(
            self,
            VantageError::TransientStore(_)
                | VantageError::Analyzer { .. }
                | VantageError::Subscriber(_)
        )
    }
}
