//! Error types for the alarm engine.

use std::path::PathBuf;

/// Code reported to the host bridge for every failed call.
pub const NATIVE_ERR: &str = "NATIVE_ERR";

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// Bridge arguments missing, mistyped or out of range.
    #[error("[Alarm] Arguments are not in the expected format: {0}")]
    MalformedArguments(String),

    #[error("[Alarm] Audio asset not found at {}: {source}", path.display())]
    AssetNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("[Alarm] Audio asset {reference} could not be decoded: {reason}")]
    AssetUndecodable { reference: String, reason: String },

    /// The audio output device or one of its sinks could not be opened.
    #[error("audio output error: {0}")]
    Output(String),

    #[error("the volume cannot be adjusted: {0}")]
    Volume(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("could not schedule app refresh: {0}")]
    Background(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial work queue has shut down.
    #[error("alarm engine is not running")]
    EngineStopped,
}

impl AlarmError {
    /// Bridge error code. Every failure surfaces under the same code; the
    /// message carries the detail.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        NATIVE_ERR
    }
}

impl From<serde_json::Error> for AlarmError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedArguments(err.to_string())
    }
}

impl From<toml::de::Error> for AlarmError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AlarmError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AlarmError>;
