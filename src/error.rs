//! Error types for the skip detector

/// Result type for detector operations
pub type Result<T> = std::result::Result<T, SkipError>;

/// Error types for detector operations
///
/// None of these reach the host through the detector's public surface: the
/// detector logs them and degrades to "no prediction" / "no action".
#[derive(thiserror::Error, Debug)]
pub enum SkipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sync gateway error: {0}")]
    Gateway(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt learning entry {key}: {reason}")]
    CorruptEntry { key: String, reason: String },
}
