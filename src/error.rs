//! Error taxonomy for the voice core.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Permission denied or no matching hardware.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The channel did not report `setupComplete` inside the bound.
    #[error("connection timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Mid-session network or remote failure.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("malformed audio frame: {len} bytes is not a multiple of {}", .channels * 2)]
    MalformedFrame { len: usize, channels: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("manuscript store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Short text for the status line.
    pub fn diagnostic(&self) -> String {
        match self {
            LinkError::DeviceUnavailable(_) => "Microphone or speaker unavailable".to_string(),
            LinkError::HandshakeTimeout(_) => "Connection timed out, try again".to_string(),
            LinkError::Channel(msg) => format!("Link lost: {}", msg),
            LinkError::MalformedFrame { .. } => "Dropped a corrupted audio chunk".to_string(),
            LinkError::Config(msg) => format!("Setup problem: {}", msg),
            LinkError::Store(_) | LinkError::Io(_) | LinkError::Json(_) => {
                "Could not save the transcript".to_string()
            }
        }
    }
}
