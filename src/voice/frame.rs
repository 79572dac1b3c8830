//! PCM frames, their layout, and captured utterances

use std::time::Duration;

use crate::{Error, Result};

/// Frame durations the voice activity classifier accepts
pub const SUPPORTED_FRAME_DURATIONS_MS: [u32; 3] = [10, 20, 30];

/// Layout of a mono 16-bit PCM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Duration of one frame
    pub chunk_duration_ms: u32,
}

impl FrameFormat {
    /// Create a frame format
    #[must_use]
    pub const fn new(sample_rate: u32, chunk_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            chunk_duration_ms,
        }
    }

    /// Number of samples in one frame
    #[must_use]
    pub const fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.chunk_duration_ms as usize) / 1000
    }

    /// Wall-clock duration of one frame
    #[must_use]
    pub const fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms as u64)
    }

    /// Check the frame duration is one the classifier accepts
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFrameDuration` for anything other than 10, 20 or 30 ms
    pub fn validate(&self) -> Result<()> {
        if SUPPORTED_FRAME_DURATIONS_MS.contains(&self.chunk_duration_ms) {
            Ok(())
        } else {
            Err(Error::UnsupportedFrameDuration(self.chunk_duration_ms))
        }
    }

    /// Duration in milliseconds of a buffer holding `samples` samples
    #[must_use]
    pub const fn duration_ms_of(&self, samples: usize) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let ms = (samples as u64 * 1000 / self.sample_rate as u64) as u32;
        ms
    }
}

/// One fixed-duration frame of mono 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Wrap captured samples
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build a frame from little-endian 16-bit PCM bytes
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Sample rate the frame was captured at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of the frame in whole milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u32 {
        FrameFormat::new(self.sample_rate, 0).duration_ms_of(self.samples.len())
    }

    /// Little-endian PCM bytes
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Root-mean-square amplitude on the 16-bit scale
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Root-mean-square amplitude of 16-bit samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Root-mean-square amplitude of little-endian 16-bit PCM bytes
#[must_use]
pub fn rms_le_bytes(bytes: &[u8]) -> f32 {
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    rms(&samples)
}

/// A complete spoken segment bounded by silence
#[derive(Debug, Clone)]
pub struct Utterance {
    format: FrameFormat,
    frames: Vec<AudioFrame>,
}

impl Utterance {
    /// Start an utterance with the frame that triggered speech
    #[must_use]
    pub fn start(format: FrameFormat, first: AudioFrame) -> Self {
        Self {
            format,
            frames: vec![first],
        }
    }

    /// Append a frame
    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    /// Frames in capture order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the utterance holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total captured duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.format.frame_duration() * u32::try_from(self.frames.len()).unwrap_or(u32::MAX)
    }

    /// Encode as a single-channel 16-bit WAV buffer
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let samples: Vec<i16> = self
            .frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect();
        samples_to_wav(&samples, self.format.sample_rate)
    }
}

/// Encode 16-bit samples as WAV bytes for transcription APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }

    Ok(cursor.into_inner())
}

fn wav_error(e: hound::Error) -> Error {
    match e {
        hound::Error::IoError(e) => Error::Io(e),
        other => Error::Io(std::io::Error::other(format!("wav encoding failed: {other}"))),
    }
}
