//! Animatronic Voice - real-time voice I/O for a talking animatronic
//!
//! This library provides the voice core of an interruptible animatronic:
//! - Microphone capture with voice-activity segmentation
//! - Remote transcription and streamed text generation
//! - Streaming speech synthesis with synchronized motor animation
//! - Barge-in detection that cuts playback short when the user talks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Microphone → Segmenter → Transcriber → Generator    │
//! └────────────────────────┬─────────────────────────────┘
//!                          │ text fragments
//! ┌────────────────────────▼─────────────────────────────┐
//! │  Chunker → Synthesis session → Playback engine       │
//! │                     ▲                 │  actuators   │
//! │                     └── interrupt ────┘              │
//! │                        monitor                       │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod actuator;
pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod voice;

pub use actuator::{ActuatorBus, ActuatorGuard, ActuatorId, LogActuators, MouthMode};
pub use config::Config;
pub use daemon::{Daemon, SessionState, SessionStates, Speaker, SpeechOutcome};
pub use error::{Error, Result};
pub use llm::{ChatCompletionClient, TextGenerator};
