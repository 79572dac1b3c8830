//! Error types for the animatronic voice core

use thiserror::Error;

/// Result type alias for voice core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Input or output device could not be opened, read, or written
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Voice activity detection only accepts 10, 20 or 30 ms frames
    #[error("unsupported frame duration: {0} ms (expected 10, 20 or 30)")]
    UnsupportedFrameDuration(u32),

    /// Remote transcription failed
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Streaming synthesis session failed mid-turn
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Text generation error
    #[error("generation error: {0}")]
    Generation(String),

    /// Actuator error
    #[error("actuator error: {0}")]
    Actuator(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Websocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether the fault is a transient device problem worth retrying in place
    #[must_use]
    pub const fn is_device_fault(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }
}
