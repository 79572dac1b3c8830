//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::device::PcmSink;
use crate::{Error, Result};

/// Poll interval while waiting on the output ring
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Ring {
    samples: VecDeque<f32>,
    failure: Option<String>,
}

/// Streams PCM chunks to the default output device
pub struct CpalOutput {
    sample_rate: u32,
    ring: Arc<Mutex<Ring>>,
    stream: Option<Stream>,
    high_water: usize,
}

impl CpalOutput {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device cannot be opened
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!("no output config supports {sample_rate} Hz"))
            })?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        let ring = Arc::new(Mutex::new(Ring::default()));
        let stream = build_stream(&device, &config, Arc::clone(&ring))?;

        Ok(Self {
            sample_rate,
            ring,
            stream: Some(stream),
            // Roughly 100ms of audio ahead of the device
            high_water: (sample_rate / 10) as usize,
        })
    }

    fn queued(&self) -> Result<usize> {
        let ring = self
            .ring
            .lock()
            .map_err(|_| Error::DeviceUnavailable("output ring poisoned".to_string()))?;
        if let Some(message) = &ring.failure {
            return Err(Error::DeviceUnavailable(message.clone()));
        }
        Ok(ring.samples.len())
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: Arc<Mutex<Ring>>,
) -> Result<Stream> {
    let channels = usize::from(config.channels.max(1));
    let error_ring = Arc::clone(&ring);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut ring) = ring.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = ring.samples.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                if let Ok(mut ring) = error_ring.lock() {
                    ring.failure = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

#[async_trait(?Send)]
impl PcmSink for CpalOutput {
    async fn write(&mut self, pcm: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::DeviceUnavailable("output stream is closed".to_string()));
        }

        {
            let mut ring = self
                .ring
                .lock()
                .map_err(|_| Error::DeviceUnavailable("output ring poisoned".to_string()))?;
            ring.samples.extend(
                pcm.chunks_exact(2)
                    .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0),
            );
        }

        while self.queued()? > self.high_water {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        let queued = self.queued()?;
        let expected = Duration::from_millis(queued as u64 * 1000 / u64::from(self.sample_rate));
        let deadline = tokio::time::Instant::now() + expected + Duration::from_millis(500);

        while self.queued()? > 0 {
            if tokio::time::Instant::now() > deadline {
                tracing::warn!("output did not drain in time");
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.samples.clear();
        }
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio playback stopped");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Generate a sine tone as little-endian 16-bit PCM
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn tone(frequency: f32, duration: Duration, sample_rate: u32, amplitude: f32) -> Vec<u8> {
    let count = (duration.as_secs_f32() * sample_rate as f32) as usize;
    (0..count)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let sample = amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin();
            ((sample * 32767.0).clamp(-32768.0, 32767.0) as i16).to_le_bytes()
        })
        .collect()
}
