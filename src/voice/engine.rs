//! Playback of synthesized audio with synchronized animation
//!
//! The engine drains audio chunks to the speaker in receipt order while
//! the actuators animate. It stops early on an interrupt (once the grace
//! window has passed) or when the turn is cancelled. However it stops, the
//! speaker is closed, the animation task is stopped and awaited, and every
//! actuator is returned to neutral.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::device::PcmSink;
use super::frame::rms_le_bytes;
use super::interrupt::InterruptFlag;
use crate::Result;
use crate::actuator::{self, ActuatorBus, ActuatorId, MouthMode};
use crate::config::Config;

/// How a playback run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Chunks written to the speaker
    pub played: usize,
    /// Stopped because the user spoke
    pub interrupted: bool,
    /// Stopped because the turn was cancelled
    pub cancelled: bool,
}

/// Drains audio chunks to a speaker while animating
pub struct PlaybackEngine {
    actuators: Arc<dyn ActuatorBus>,
    mouth_mode: MouthMode,
    mouth_threshold: f32,
    grace_chunks: usize,
    tail_swap_interval: Duration,
}

impl PlaybackEngine {
    /// Create an engine driving `actuators`
    #[must_use]
    pub fn new(actuators: Arc<dyn ActuatorBus>, config: &Config) -> Self {
        Self {
            actuators,
            mouth_mode: config.playback.mouth_mode,
            mouth_threshold: config.playback.mouth_threshold,
            grace_chunks: config.interrupt.grace_chunks,
            tail_swap_interval: config.actuators.tail_swap_interval,
        }
    }

    /// Chunks that must play before an interrupt is honoured
    #[must_use]
    pub const fn grace_chunks(&self) -> usize {
        self.grace_chunks
    }

    /// Play every chunk from `audio` on `sink`
    ///
    /// `done` is cancelled once playback has stopped and cleanup finished.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the speaker fails; cleanup still runs
    pub async fn play(
        &self,
        sink: Box<dyn PcmSink>,
        audio: mpsc::Receiver<Vec<u8>>,
        interrupt: &InterruptFlag,
        cancel: &CancellationToken,
        done: &CancellationToken,
    ) -> Result<PlaybackReport> {
        let animation_token = cancel.child_token();
        let animation = tokio::spawn(actuator::animate(
            Arc::clone(&self.actuators),
            self.mouth_mode,
            self.tail_swap_interval,
            animation_token.clone(),
        ));

        let mut cleanup = PlaybackCleanup {
            sink,
            actuators: Arc::clone(&self.actuators),
            animation_token,
            animation: Some(animation),
            done: done.clone(),
            finished: false,
        };

        tracing::debug!(grace_chunks = self.grace_chunks, "playback started");
        let outcome = self
            .drain(cleanup.sink.as_mut(), audio, interrupt, cancel)
            .await;
        cleanup.finish().await;

        match &outcome {
            Ok(report) => tracing::info!(
                played = report.played,
                interrupted = report.interrupted,
                cancelled = report.cancelled,
                "playback finished"
            ),
            Err(e) => tracing::error!(error = %e, "playback failed"),
        }
        outcome
    }

    async fn drain(
        &self,
        sink: &mut dyn PcmSink,
        mut audio: mpsc::Receiver<Vec<u8>>,
        interrupt: &InterruptFlag,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport> {
        let mut report = PlaybackReport::default();

        loop {
            let in_grace = report.played < self.grace_chunks;

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                () = interrupt.raised(), if !in_grace => {
                    report.interrupted = true;
                    break;
                }
                next = audio.recv() => next,
            };

            let Some(pcm) = next else {
                break;
            };

            if self.mouth_mode == MouthMode::Amplitude {
                let open = rms_le_bytes(&pcm) > self.mouth_threshold;
                actuator::drive(self.actuators.as_ref(), ActuatorId::Mouth, open);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                written = sink.write(&pcm) => written?,
            }
            report.played += 1;
            tracing::trace!(played = report.played, bytes = pcm.len(), "chunk played");
        }

        if report.interrupted {
            tracing::info!(played = report.played, "playback interrupted");
        } else if !report.cancelled {
            sink.drain().await?;
        }

        Ok(report)
    }
}

/// Releases playback resources exactly once
///
/// `finish` does the full cleanup including waiting for the animation task.
/// If the playback future is dropped first, `Drop` does everything that
/// does not need to wait.
struct PlaybackCleanup {
    sink: Box<dyn PcmSink>,
    actuators: Arc<dyn ActuatorBus>,
    animation_token: CancellationToken,
    animation: Option<JoinHandle<()>>,
    done: CancellationToken,
    finished: bool,
}

impl PlaybackCleanup {
    async fn finish(&mut self) {
        if self.finished {
            return;
        }

        self.sink.close();
        self.animation_token.cancel();
        if let Some(animation) = self.animation.take() {
            if let Err(e) = animation.await {
                tracing::warn!(error = %e, "animation task failed");
            }
        }
        self.release();
    }

    fn release(&mut self) {
        self.finished = true;
        if let Err(e) = self.actuators.reset() {
            tracing::warn!(error = %e, "failed to reset actuators");
        }
        self.done.cancel();
        tracing::debug!("playback resources released");
    }
}

impl Drop for PlaybackCleanup {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        self.sink.close();
        self.animation_token.cancel();
        self.release();
    }
}
