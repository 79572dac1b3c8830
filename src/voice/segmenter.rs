//! Speech segmentation
//!
//! Turns a stream of frames into one bounded utterance. The segmenter waits
//! in `Idle` until a frame is classified as speech, then records every frame
//! until the run of silent frames exceeds the configured silence duration.
//! The listen timeout only applies while idle, so long replies from the user
//! are never cut short by it.

use std::time::Duration;

use tokio::time::Instant;

use super::activity::ActivityDetector;
use super::device::FrameSource;
use super::frame::{AudioFrame, FrameFormat, Utterance};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Upper bound on the pause between device recovery attempts
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// How a capture attempt ended
#[derive(Debug)]
pub enum SegmentOutcome {
    /// Speech followed by enough silence
    Finished(Utterance),
    /// No speech started before the deadline
    TimedOut,
}

/// Result of feeding one frame to the state machine
#[derive(Debug)]
pub enum Step {
    /// Still idle, frame discarded
    Waiting,
    /// This frame started the utterance
    Started,
    /// Frame appended to the utterance
    Recording,
    /// Silence ran long enough; the utterance is complete
    Finished(Utterance),
}

/// Frame-level segmentation state machine
#[derive(Debug)]
pub struct SegmenterState {
    format: FrameFormat,
    max_silent_frames: usize,
    utterance: Option<Utterance>,
    silent_run: usize,
}

impl SegmenterState {
    /// Create an idle state machine
    #[must_use]
    pub const fn new(format: FrameFormat, silence_duration_ms: u32) -> Self {
        let max_silent_frames = if format.chunk_duration_ms == 0 {
            0
        } else {
            (silence_duration_ms / format.chunk_duration_ms) as usize
        };

        Self {
            format,
            max_silent_frames,
            utterance: None,
            silent_run: 0,
        }
    }

    /// Whether an utterance is being recorded
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.utterance.is_some()
    }

    /// Silent frames tolerated before the utterance ends
    #[must_use]
    pub const fn max_silent_frames(&self) -> usize {
        self.max_silent_frames
    }

    /// Feed one classified frame
    pub fn advance(&mut self, frame: AudioFrame, is_speech: bool) -> Step {
        let Some(utterance) = self.utterance.as_mut() else {
            if is_speech {
                self.utterance = Some(Utterance::start(self.format, frame));
                self.silent_run = 0;
                return Step::Started;
            }
            return Step::Waiting;
        };

        utterance.push(frame);

        if is_speech {
            self.silent_run = 0;
            return Step::Recording;
        }

        self.silent_run += 1;
        if self.silent_run > self.max_silent_frames {
            self.silent_run = 0;
            return self
                .utterance
                .take()
                .map_or(Step::Waiting, Step::Finished);
        }

        Step::Recording
    }
}

/// Captures one utterance from a frame source
pub struct SpeechSegmenter {
    detector: ActivityDetector,
    silence_duration_ms: u32,
    timeout: Duration,
    max_read_retries: u32,
    retry_backoff: Duration,
}

impl SpeechSegmenter {
    /// Create a segmenter from capture settings
    #[must_use]
    pub const fn new(detector: ActivityDetector, config: &AudioConfig) -> Self {
        Self {
            detector,
            silence_duration_ms: config.silence_duration_ms,
            timeout: config.listen_timeout,
            max_read_retries: config.max_read_retries,
            retry_backoff: Duration::from_millis(50),
        }
    }

    /// Listen on `source` until an utterance completes or the idle deadline passes
    ///
    /// Transient read failures reopen the stream and resume without losing
    /// frames already recorded.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device cannot be recovered, or
    /// `UnsupportedFrameDuration` if the source yields malformed frames
    pub async fn capture(&mut self, source: &mut dyn FrameSource) -> Result<SegmentOutcome> {
        let mut state = SegmenterState::new(self.detector.format(), self.silence_duration_ms);
        let deadline = Instant::now() + self.timeout;
        let mut failures: u32 = 0;
        let mut frames_seen: usize = 0;

        tracing::info!(
            timeout_secs = self.timeout.as_secs_f32(),
            max_silent_frames = state.max_silent_frames(),
            "listening for speech"
        );

        loop {
            if !state.is_speaking() && Instant::now() >= deadline {
                tracing::info!(frames_seen, "no speech before deadline");
                return Ok(SegmentOutcome::TimedOut);
            }

            let frame = match source.read_frame().await {
                Ok(frame) => {
                    failures = 0;
                    frame
                }
                Err(e) if e.is_device_fault() => {
                    failures += 1;
                    if failures > self.max_read_retries {
                        tracing::error!(error = %e, failures, "input device did not recover");
                        return Err(Error::DeviceUnavailable(format!(
                            "input failed {failures} times in a row: {e}"
                        )));
                    }

                    tracing::warn!(error = %e, failures, "input read failed, reopening stream");
                    source.reopen().await?;
                    tokio::time::sleep(self.backoff(failures)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            frames_seen += 1;
            let is_speech = self.detector.is_speech(&frame)?;

            match state.advance(frame, is_speech) {
                Step::Started => tracing::debug!(frame = frames_seen, "speech started"),
                Step::Finished(utterance) => {
                    tracing::info!(
                        frames = utterance.len(),
                        duration_ms = utterance.duration().as_millis(),
                        "utterance complete"
                    );
                    return Ok(SegmentOutcome::Finished(utterance));
                }
                Step::Waiting | Step::Recording => {}
            }
        }
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}
