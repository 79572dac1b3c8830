//! TOML configuration file loading
//!
//! Supports `~/.config/animatronic/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::actuator::MouthMode;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Microphone capture and segmentation
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Barge-in detection while speaking
    #[serde(default)]
    pub interrupt: InterruptFileConfig,

    /// Speaker output and mouth actuation
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Streaming speech synthesis
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Remote transcription
    #[serde(default)]
    pub transcription: TranscriptionFileConfig,

    /// Text generation
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Motor animation timing
    #[serde(default)]
    pub actuators: ActuatorFileConfig,

    /// Pause between conversational turns, in milliseconds
    pub turn_settle_ms: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub chunk_duration_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    /// RMS gate on the 16-bit sample scale
    pub threshold: Option<f32>,
    /// WebRTC VAD aggressiveness (0-3)
    pub vad_mode: Option<u8>,
    pub listen_timeout_secs: Option<u64>,
    pub max_read_retries: Option<u32>,
}

/// Interrupt listener configuration
#[derive(Debug, Default, Deserialize)]
pub struct InterruptFileConfig {
    pub threshold: Option<f32>,
    pub settle_delay_ms: Option<u64>,
    pub grace_chunks: Option<usize>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub sample_rate: Option<u32>,
    pub mouth_mode: Option<MouthMode>,
    pub mouth_threshold: Option<f32>,
    pub channel_capacity: Option<usize>,
}

/// Synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    pub output_format: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub chunk_length_schedule: Option<Vec<u32>>,
    pub base_url: Option<String>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionFileConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub base_url: Option<String>,
}

/// Text generation configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Actuator timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct ActuatorFileConfig {
    pub tail_swap_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Read and parse a config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/animatronic/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("animatronic").join("config.toml"))
}
