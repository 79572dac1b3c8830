//! Voice activity detection
//!
//! A frame counts as speech only when the WebRTC classifier and an RMS
//! amplitude gate both agree. The gate rejects low-energy triggers such as
//! wind noise or line hum that the classifier alone lets through.

use webrtc_vad::{SampleRate, Vad, VadMode};

use super::frame::{AudioFrame, FrameFormat, SUPPORTED_FRAME_DURATIONS_MS};
use crate::{Error, Result};

/// Per-frame voice/non-voice classifier
pub trait VoiceClassifier {
    /// Classify one frame of samples
    ///
    /// # Errors
    ///
    /// Returns error if the classifier rejects the frame
    fn is_voice(&mut self, samples: &[i16]) -> Result<bool>;
}

/// WebRTC VAD classifier
pub struct WebRtcClassifier {
    vad: Vad,
}

impl WebRtcClassifier {
    /// Create a classifier for `sample_rate` with aggressiveness `mode` (0-3)
    ///
    /// # Errors
    ///
    /// Returns `Config` if the sample rate or mode is unsupported
    pub fn new(sample_rate: u32, mode: u8) -> Result<Self> {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            other => {
                return Err(Error::Config(format!(
                    "VAD supports 8000, 16000, 32000 or 48000 Hz, got {other}"
                )));
            }
        };

        let mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => return Err(Error::Config(format!("VAD mode must be 0-3, got {other}"))),
        };

        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, mode),
        })
    }
}

impl VoiceClassifier for WebRtcClassifier {
    fn is_voice(&mut self, samples: &[i16]) -> Result<bool> {
        self.vad
            .is_voice_segment(samples)
            .map_err(|()| Error::Config(format!("VAD rejected a {} sample frame", samples.len())))
    }
}

/// Stateless speech decision over classifier and amplitude gate
pub struct ActivityDetector {
    classifier: Box<dyn VoiceClassifier>,
    format: FrameFormat,
    threshold: f32,
}

impl ActivityDetector {
    /// Create a detector backed by the WebRTC VAD
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFrameDuration` if the frame duration is not
    /// 10, 20 or 30 ms, or `Config` for an unsupported rate or mode
    pub fn new(format: FrameFormat, vad_mode: u8, threshold: f32) -> Result<Self> {
        let classifier = WebRtcClassifier::new(format.sample_rate, vad_mode)?;
        Self::with_classifier(format, threshold, Box::new(classifier))
    }

    /// Create a detector with a custom classifier
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFrameDuration` if the frame duration is not
    /// 10, 20 or 30 ms
    pub fn with_classifier(
        format: FrameFormat,
        threshold: f32,
        classifier: Box<dyn VoiceClassifier>,
    ) -> Result<Self> {
        format.validate()?;
        Ok(Self {
            classifier,
            format,
            threshold,
        })
    }

    /// Decide whether `frame` contains speech
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFrameDuration` if the frame is not exactly
    /// 10, 20 or 30 ms long at the configured rate
    pub fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool> {
        let samples = frame.samples();
        let duration_ms = self.format.duration_ms_of(samples.len());
        let exact = FrameFormat::new(self.format.sample_rate, duration_ms).samples_per_frame()
            == samples.len();

        if !exact || !SUPPORTED_FRAME_DURATIONS_MS.contains(&duration_ms) {
            return Err(Error::UnsupportedFrameDuration(duration_ms));
        }

        let loud = frame.rms() > self.threshold;
        let voiced = self.classifier.is_voice(samples)?;
        Ok(voiced && loud)
    }

    /// Amplitude gate in effect
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Frame layout this detector accepts
    #[must_use]
    pub const fn format(&self) -> FrameFormat {
        self.format
    }
}
