//! Configuration management for the voice core
//!
//! Values are layered: built-in defaults, then the TOML file, then
//! environment variables (a `.env` file is honoured).

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::actuator::MouthMode;
use crate::voice::FrameFormat;
use crate::{Error, Result};

use self::file::ConfigFile;

/// Default system prompt for text generation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a wall-mounted talking fish. \
Speak in short, punchy lines and keep replies under 30 words. \
Only output what you would say out loud: no stage directions, no asterisks, no parentheses.";

/// Voice core configuration
#[derive(Debug)]
pub struct Config {
    /// Microphone capture and segmentation
    pub audio: AudioConfig,

    /// Barge-in detection while speaking
    pub interrupt: InterruptConfig,

    /// Speaker output and mouth actuation
    pub playback: PlaybackConfig,

    /// Streaming speech synthesis
    pub synthesis: SynthesisConfig,

    /// Remote transcription
    pub transcription: TranscriptionConfig,

    /// Text generation
    pub llm: LlmConfig,

    /// Motor animation timing
    pub actuators: ActuatorConfig,

    /// Pause between turns so devices released by the previous turn settle
    pub turn_settle: Duration,
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Duration of one captured frame
    pub chunk_duration_ms: u32,

    /// Silence that ends an utterance
    pub silence_duration_ms: u32,

    /// RMS gate applied on top of the VAD (16-bit sample scale)
    pub threshold: f32,

    /// WebRTC VAD aggressiveness (0-3)
    pub vad_mode: u8,

    /// How long to wait for speech to start before timing out
    pub listen_timeout: Duration,

    /// Consecutive device read failures tolerated before giving up
    pub max_read_retries: u32,
}

/// Interrupt listener configuration
#[derive(Debug, Clone)]
pub struct InterruptConfig {
    /// Stricter RMS gate used while the speaker is playing
    pub threshold: f32,

    /// Delay after playback starts before listening for barge-in
    pub settle_delay: Duration,

    /// Chunks that must play before an interrupt is honoured
    pub grace_chunks: usize,
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Output sample rate, must match the synthesis output format
    pub sample_rate: u32,

    /// How the mouth is driven while speaking
    pub mouth_mode: MouthMode,

    /// RMS level that opens the mouth in amplitude mode
    pub mouth_threshold: f32,

    /// Synthesized chunks buffered between the session and the speaker
    pub channel_capacity: usize,
}

/// Streaming synthesis configuration
#[derive(Debug)]
pub struct SynthesisConfig {
    /// `ElevenLabs` API key
    pub api_key: Option<SecretString>,

    /// Voice identifier
    pub voice_id: String,

    /// Synthesis model
    pub model_id: String,

    /// Output format requested from the service (raw PCM)
    pub output_format: String,

    /// Voice stability
    pub stability: f32,

    /// Voice similarity boost
    pub similarity_boost: f32,

    /// Character thresholds at which the service starts generating
    pub chunk_length_schedule: Vec<u32>,

    /// Websocket base URL
    pub base_url: String,
}

/// Transcription configuration
#[derive(Debug)]
pub struct TranscriptionConfig {
    /// `OpenAI` API key
    pub api_key: Option<SecretString>,

    /// Transcription model
    pub model: String,

    /// Spoken language hint
    pub language: Option<String>,

    /// API base URL
    pub base_url: String,
}

/// Text generation configuration
#[derive(Debug)]
pub struct LlmConfig {
    /// API key for the chat completion endpoint
    pub api_key: Option<SecretString>,

    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// System prompt sent with every request
    pub system_prompt: String,

    /// Optional response length cap
    pub max_tokens: Option<u32>,
}

/// Actuator animation configuration
#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    /// How often the tail changes direction
    pub tail_swap_interval: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_duration_ms: 10,
            silence_duration_ms: 1_200,
            threshold: 800.0,
            vad_mode: 1,
            listen_timeout: Duration::from_secs(20),
            max_read_retries: 5,
        }
    }
}

impl AudioConfig {
    /// Frame layout used by capture and detection
    #[must_use]
    pub const fn frame_format(&self) -> FrameFormat {
        FrameFormat::new(self.sample_rate, self.chunk_duration_ms)
    }
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            threshold: 1_500.0,
            settle_delay: Duration::from_millis(1_200),
            grace_chunks: 10,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            mouth_mode: MouthMode::default(),
            mouth_threshold: 1_000.0,
            channel_capacity: 64,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: "n2bKrLSWHzSMKmSqczm1".to_string(),
            model_id: "eleven_turbo_v2".to_string(),
            output_format: "pcm_22050".to_string(),
            stability: 0.5,
            similarity_boost: 0.5,
            chunk_length_schedule: vec![50],
            base_url: "wss://api.elevenlabs.io".to_string(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: None,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            tail_swap_interval: Duration::from_secs(2),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            interrupt: InterruptConfig::default(),
            playback: PlaybackConfig::default(),
            synthesis: SynthesisConfig::default(),
            transcription: TranscriptionConfig::default(),
            llm: LlmConfig::default(),
            actuators: ActuatorConfig::default(),
            turn_settle: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; otherwise the standard location is
    /// used when present.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be read or the
    /// resulting configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::trace!(error = %e, "no .env file loaded");
        }

        let file = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let config = Self::from_sources(file, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    #[must_use]
    pub fn from_sources(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(env);
        config
    }

    fn apply_file(&mut self, file: ConfigFile) {
        let audio = file.audio;
        set(&mut self.audio.sample_rate, audio.sample_rate);
        set(&mut self.audio.chunk_duration_ms, audio.chunk_duration_ms);
        set(&mut self.audio.silence_duration_ms, audio.silence_duration_ms);
        set(&mut self.audio.threshold, audio.threshold);
        set(&mut self.audio.vad_mode, audio.vad_mode);
        set(
            &mut self.audio.listen_timeout,
            audio.listen_timeout_secs.map(Duration::from_secs),
        );
        set(&mut self.audio.max_read_retries, audio.max_read_retries);

        let interrupt = file.interrupt;
        set(&mut self.interrupt.threshold, interrupt.threshold);
        set(
            &mut self.interrupt.settle_delay,
            interrupt.settle_delay_ms.map(Duration::from_millis),
        );
        set(&mut self.interrupt.grace_chunks, interrupt.grace_chunks);

        let playback = file.playback;
        set(&mut self.playback.sample_rate, playback.sample_rate);
        set(&mut self.playback.mouth_mode, playback.mouth_mode);
        set(&mut self.playback.mouth_threshold, playback.mouth_threshold);
        set(&mut self.playback.channel_capacity, playback.channel_capacity);

        let synthesis = file.synthesis;
        if let Some(key) = synthesis.api_key {
            self.synthesis.api_key = Some(SecretString::from(key));
        }
        set(&mut self.synthesis.voice_id, synthesis.voice_id);
        set(&mut self.synthesis.model_id, synthesis.model_id);
        set(&mut self.synthesis.output_format, synthesis.output_format);
        set(&mut self.synthesis.stability, synthesis.stability);
        set(&mut self.synthesis.similarity_boost, synthesis.similarity_boost);
        set(
            &mut self.synthesis.chunk_length_schedule,
            synthesis.chunk_length_schedule,
        );
        set(&mut self.synthesis.base_url, synthesis.base_url);

        let transcription = file.transcription;
        if let Some(key) = transcription.api_key {
            self.transcription.api_key = Some(SecretString::from(key));
        }
        set(&mut self.transcription.model, transcription.model);
        if transcription.language.is_some() {
            self.transcription.language = transcription.language;
        }
        set(&mut self.transcription.base_url, transcription.base_url);

        let llm = file.llm;
        if let Some(key) = llm.api_key {
            self.llm.api_key = Some(SecretString::from(key));
        }
        set(&mut self.llm.base_url, llm.base_url);
        set(&mut self.llm.model, llm.model);
        set(&mut self.llm.system_prompt, llm.system_prompt);
        if llm.max_tokens.is_some() {
            self.llm.max_tokens = llm.max_tokens;
        }

        set(
            &mut self.actuators.tail_swap_interval,
            file.actuators.tail_swap_ms.map(Duration::from_millis),
        );
        set(
            &mut self.turn_settle,
            file.turn_settle_ms.map(Duration::from_millis),
        );
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(key) = env("ELEVENLABS_API_KEY") {
            self.synthesis.api_key = Some(SecretString::from(key));
        }
        set(&mut self.synthesis.voice_id, env("ELEVENLABS_VOICE_ID"));
        if let Some(key) = env("OPENAI_API_KEY") {
            self.transcription.api_key = Some(SecretString::from(key));
        }
        if let Some(key) = env("GROQ_API_KEY") {
            self.llm.api_key = Some(SecretString::from(key));
        }
        set(&mut self.llm.model, env("GROQ_MODEL"));
        set(
            &mut self.audio.sample_rate,
            env("ANIMATRONIC_SAMPLE_RATE").and_then(|s| s.parse().ok()),
        );
        set(
            &mut self.audio.threshold,
            env("ANIMATRONIC_THRESHOLD").and_then(|s| s.parse().ok()),
        );
        set(
            &mut self.interrupt.threshold,
            env("ANIMATRONIC_INTERRUPT_THRESHOLD").and_then(|s| s.parse().ok()),
        );
    }

    /// Reject settings the voice core cannot run with
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFrameDuration` for frame sizes the VAD cannot
    /// classify, or `Config` for other invalid values
    pub fn validate(&self) -> Result<()> {
        self.audio.frame_format().validate()?;

        if self.audio.vad_mode > 3 {
            return Err(Error::Config(format!(
                "vad_mode must be 0-3, got {}",
                self.audio.vad_mode
            )));
        }

        if self.audio.silence_duration_ms < self.audio.chunk_duration_ms {
            return Err(Error::Config(
                "silence_duration_ms must cover at least one frame".to_string(),
            ));
        }

        if self.interrupt.threshold < self.audio.threshold {
            return Err(Error::Config(format!(
                "interrupt threshold ({}) must not be below the capture threshold ({})",
                self.interrupt.threshold, self.audio.threshold
            )));
        }

        if self.playback.sample_rate == 0 || self.playback.channel_capacity == 0 {
            return Err(Error::Config(
                "playback sample_rate and channel_capacity must be non-zero".to_string(),
            ));
        }

        if self.synthesis.chunk_length_schedule.is_empty() {
            return Err(Error::Config(
                "synthesis chunk_length_schedule must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
