//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::device::FrameSource;
use super::frame::{AudioFrame, FrameFormat};
use crate::{Error, Result};

/// Callback batches buffered between the audio thread and the reader
const CAPTURE_QUEUE: usize = 512;

/// How long a read waits for the device before declaring it stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

enum CaptureEvent {
    Samples(Vec<i16>),
    Failed(String),
}

/// Captures frames from the default input device
pub struct CpalInput {
    format: FrameFormat,
    config: StreamConfig,
    stream: Option<Stream>,
    events: Option<mpsc::Receiver<CaptureEvent>>,
    overflowed: Arc<AtomicBool>,
    pending: Vec<i16>,
}

impl CpalInput {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device cannot be opened
    pub fn open(format: FrameFormat) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let rate = SampleRate(format.sample_rate);
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!(
                    "no input config supports {} Hz",
                    format.sample_rate
                ))
            })?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = config.channels,
            frame_ms = format.chunk_duration_ms,
            "audio capture initialized"
        );

        let mut input = Self {
            format,
            config,
            stream: None,
            events: None,
            overflowed: Arc::new(AtomicBool::new(false)),
            pending: Vec::with_capacity(format.samples_per_frame() * 2),
        };
        input.start()?;
        Ok(input)
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
        let error_tx = tx.clone();
        let overflowed = Arc::clone(&self.overflowed);
        let channels = usize::from(self.config.channels.max(1));

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Keep the first channel only
                    #[allow(clippy::cast_possible_truncation)]
                    let samples: Vec<i16> = data
                        .iter()
                        .step_by(channels)
                        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                        .collect();
                    if tx.try_send(CaptureEvent::Samples(samples)).is_err() {
                        overflowed.store(true, Ordering::Release);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let _ = error_tx.try_send(CaptureEvent::Failed(err.to_string()));
                },
                None,
            )
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        self.overflowed.store(false, Ordering::Release);
        self.pending.clear();
        self.events = Some(rx);
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }
}

#[async_trait(?Send)]
impl FrameSource for CpalInput {
    fn format(&self) -> FrameFormat {
        self.format
    }

    async fn read_frame(&mut self) -> Result<AudioFrame> {
        let frame_len = self.format.samples_per_frame();

        if self.overflowed.swap(false, Ordering::AcqRel) {
            self.pending.clear();
            return Err(Error::DeviceUnavailable("input overflowed".to_string()));
        }

        let events = self
            .events
            .as_mut()
            .ok_or_else(|| Error::DeviceUnavailable("input stream is closed".to_string()))?;

        while self.pending.len() < frame_len {
            match tokio::time::timeout(STALL_TIMEOUT, events.recv()).await {
                Ok(Some(CaptureEvent::Samples(samples))) => self.pending.extend(samples),
                Ok(Some(CaptureEvent::Failed(message))) => {
                    return Err(Error::DeviceUnavailable(message));
                }
                Ok(None) => {
                    return Err(Error::DeviceUnavailable("input stream ended".to_string()));
                }
                Err(_) => {
                    return Err(Error::DeviceUnavailable("input stream stalled".to_string()));
                }
            }
        }

        let samples: Vec<i16> = self.pending.drain(..frame_len).collect();
        Ok(AudioFrame::new(samples, self.format.sample_rate))
    }

    async fn reopen(&mut self) -> Result<()> {
        self.close();
        self.start()
    }

    fn close(&mut self) {
        self.events = None;
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}
