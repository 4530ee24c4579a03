//! Error types for Castwatch

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CastwatchError>;

#[derive(Error, Debug)]
pub enum CastwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watermark store error: {0}")]
    Store(#[from] StoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Process-level I/O failure outside the store (e.g. signal setup)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CastwatchError {
    /// Returns the appropriate exit code for this error
    ///
    /// Only configuration and store failures ever reach the process boundary;
    /// feed, classifier and delivery failures are isolated inside a cycle.
    pub fn exit_code(&self) -> i32 {
        match self {
            CastwatchError::InvalidInput(_) => 3,
            CastwatchError::Config(_) => 2,
            CastwatchError::Store(_) => 1,
            CastwatchError::Feed(_) => 1,
            CastwatchError::Delivery(_) => 1,
            CastwatchError::Classifier(_) => 1,
            CastwatchError::Io(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Persisted state could not be read back; recovered by starting empty
    #[error("Watermark file is corrupt: {0}")]
    Corrupt(String),

    /// Persisting the cycle failed; in-memory progress is discarded
    #[error("Failed to write watermark file: {0}")]
    Write(String),

    #[error("Failed to serialize watermarks: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to parse feed: {0}")]
    Parse(String),

    #[error("Feed not found: {0}")]
    NotFound(String),

    #[error("Fetch timed out after {0}s")]
    Timeout(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("No delivery configured for platform: {0}")]
    NotConfigured(String),

    #[error("Delivery timed out after {0}s")]
    Timeout(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ClassifierError(pub String);
