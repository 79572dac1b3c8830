//! Barge-in detection while the animatronic is talking
//!
//! The monitor waits for the speaker to settle, then listens on its own
//! input stream with a stricter amplitude gate so the animatronic's own
//! voice does not trigger it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::activity::ActivityDetector;
use super::device::{AudioDevices, FrameSource};
use super::interrupt::InterruptFlag;

/// Why the monitor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Speech was heard and the interrupt raised
    Interrupted,
    /// Playback finished or the flag was raised elsewhere
    PlaybackDone,
    /// The input device failed; listening stopped without interrupting
    InputFailed,
}

/// Listens for the user talking over playback
pub struct InterruptMonitor {
    detector: ActivityDetector,
    settle_delay: Duration,
}

impl InterruptMonitor {
    /// Create a monitor using `detector` after `settle_delay`
    #[must_use]
    pub const fn new(detector: ActivityDetector, settle_delay: Duration) -> Self {
        Self {
            detector,
            settle_delay,
        }
    }

    /// Watch for speech until `done` fires or the flag is raised
    pub async fn watch(
        &mut self,
        devices: &dyn AudioDevices,
        interrupt: &InterruptFlag,
        done: &CancellationToken,
    ) -> MonitorExit {
        tokio::select! {
            biased;
            () = done.cancelled() => return MonitorExit::PlaybackDone,
            () = interrupt.raised() => return MonitorExit::PlaybackDone,
            () = tokio::time::sleep(self.settle_delay) => {}
        }

        let mut source = match devices.open_input(self.detector.format()) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "interrupt listener could not open input");
                return MonitorExit::InputFailed;
            }
        };

        tracing::debug!(threshold = self.detector.threshold(), "listening for interruptions");
        let exit = self.listen(source.as_mut(), interrupt, done).await;
        source.close();

        tracing::debug!(?exit, "interrupt listener stopped");
        exit
    }

    async fn listen(
        &mut self,
        source: &mut dyn FrameSource,
        interrupt: &InterruptFlag,
        done: &CancellationToken,
    ) -> MonitorExit {
        let mut reopened = false;

        loop {
            let read = tokio::select! {
                biased;
                () = done.cancelled() => return MonitorExit::PlaybackDone,
                () = interrupt.raised() => return MonitorExit::PlaybackDone,
                read = source.read_frame() => read,
            };

            match read {
                Ok(frame) => match self.detector.is_speech(&frame) {
                    Ok(true) => {
                        tracing::info!(rms = frame.rms(), "speech detected during playback");
                        interrupt.raise();
                        return MonitorExit::Interrupted;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "interrupt detection failed");
                        return MonitorExit::InputFailed;
                    }
                },
                Err(e) if !reopened => {
                    tracing::warn!(error = %e, "interrupt input failed, reopening");
                    reopened = true;
                    if let Err(e) = source.reopen().await {
                        tracing::warn!(error = %e, "interrupt input did not reopen");
                        return MonitorExit::InputFailed;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "interrupt input failed again, giving up");
                    return MonitorExit::InputFailed;
                }
            }
        }
    }
}
