use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistributorError {
    #[error("packet must contain at least one message")]
    EmptyMessages,

    #[error("packet contains {count} messages, maximum allowed is {max}")]
    TooManyMessages { count: usize, max: usize },

    #[error("message length {len} exceeds maximum {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("packet size {size} bytes exceeds maximum {max} bytes")]
    PacketTooLarge { size: usize, max: usize },

    #[error("submission timeout: queue full")]
    QueueFull,

    #[error("distributor shutting down")]
    ShuttingDown,

    #[error("distributor is already running")]
    AlreadyRunning,

    #[error("distributor is not running")]
    NotRunning,

    #[error("invalid analyzer config {id}: {reason}")]
    InvalidAnalyzerConfig { id: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DistributorError {
    /// True for errors a caller may treat as "no previous state on disk".
    pub fn is_not_found(&self) -> bool {
        matches!(self, DistributorError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, DistributorError>;
