//! Voice processing module
//!
//! Handles capture and segmentation of the user's speech, streaming
//! synthesis of replies, and interruptible playback.

mod activity;
mod capture;
mod chunker;
mod device;
mod engine;
mod frame;
mod interrupt;
mod monitor;
mod playback;
mod segmenter;
mod stt;
mod tts;

pub use activity::{ActivityDetector, VoiceClassifier, WebRtcClassifier};
pub use capture::CpalInput;
pub use chunker::{SPLITTERS, TextChunker, chunk_text};
pub use device::{AudioDevices, CpalDevices, FrameSource, PcmSink};
pub use engine::{PlaybackEngine, PlaybackReport};
pub use frame::{
    AudioFrame, FrameFormat, SUPPORTED_FRAME_DURATIONS_MS, Utterance, rms, rms_le_bytes,
    samples_to_wav,
};
pub use interrupt::InterruptFlag;
pub use monitor::{InterruptMonitor, MonitorExit};
pub use playback::{CpalOutput, tone};
pub use segmenter::{SegmentOutcome, SegmenterState, SpeechSegmenter, Step};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{
    IncomingMessages, OutgoingMessages, SpeechSynthesizer, SynthesisSummary, SynthesisTransport,
};
