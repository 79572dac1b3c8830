//! Device layer seams
//!
//! Capture and playback are reached only through these traits so that each
//! component owns the handle it opened and releases it when done. cpal
//! streams are not `Send`, so the async methods are `?Send` and run inside
//! the turn's task.

use async_trait::async_trait;

use super::capture::CpalInput;
use super::frame::{AudioFrame, FrameFormat};
use super::playback::CpalOutput;
use crate::Result;

/// A microphone stream yielding fixed-duration frames
#[async_trait(?Send)]
pub trait FrameSource {
    /// Layout of the frames this source yields
    fn format(&self) -> FrameFormat;

    /// Read the next frame, waiting for the device if needed
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` on overflow, device error, or a stalled stream
    async fn read_frame(&mut self) -> Result<AudioFrame>;

    /// Close and reopen the underlying stream
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device cannot be reopened
    async fn reopen(&mut self) -> Result<()>;

    /// Release the device; safe to call more than once
    fn close(&mut self);
}

/// A speaker accepting 16-bit little-endian mono PCM
#[async_trait(?Send)]
pub trait PcmSink {
    /// Queue a chunk, waiting while the device is saturated
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the output device failed
    async fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Wait until queued audio has been played
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the output device failed
    async fn drain(&mut self) -> Result<()>;

    /// Stop output and release the device; safe to call more than once
    fn close(&mut self);
}

/// Opens input and output handles
pub trait AudioDevices {
    /// Open a capture stream
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no suitable input device exists
    fn open_input(&self, format: FrameFormat) -> Result<Box<dyn FrameSource>>;

    /// Open a playback stream
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no suitable output device exists
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn PcmSink>>;
}

/// Default host devices through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_input(&self, format: FrameFormat) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CpalInput::open(format)?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn PcmSink>> {
        Ok(Box::new(CpalOutput::open(sample_rate)?))
    }
}
