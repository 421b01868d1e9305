//! Audio format configuration
//!
//! An [`AudioConfig`] describes the canonical PCM format of a mixer subtree:
//! every voice converts its decoded audio to this rate and channel layout,
//! and the master casts to the configured sample format at the output edge.
//!
//! The configuration is an explicit value passed down the tree; there is no
//! process-wide default beyond [`AudioConfig::default`].

use crate::error::{Error, Result};

/// Output sample encoding for the PCM stream handed to the device.
///
/// Mixing itself happens in `f32`; the format only matters at the output
/// edge where samples are clipped and cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM
    Int16,
    /// Signed 32-bit little-endian PCM
    Int32,
    /// 32-bit float little-endian PCM
    Float32,
}

impl SampleFormat {
    /// Size of one sample on the wire, in bytes.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int32 | SampleFormat::Float32 => 4,
        }
    }

    /// Peak amplitude of the integer encoding (1.0 for float).
    ///
    /// A normalized sample is multiplied by this value when cast.
    pub fn max_amplitude(&self) -> f32 {
        match self {
            SampleFormat::Int16 => i16::MAX as f32,
            SampleFormat::Int32 => i32::MAX as f32,
            SampleFormat::Float32 => 1.0,
        }
    }
}

/// Immutable audio format configuration for a mixer subtree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioConfig {
    sample_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
    buffer_frames: usize,
}

impl AudioConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    /// - `sample_rate` of zero
    /// - `channels` outside {1, 2}
    /// - `buffer_frames` of zero
    pub fn new(
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
        buffer_frames: usize,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if channels == 0 || channels > 2 {
            return Err(Error::Config(format!(
                "channels must be 1 or 2, got {}",
                channels
            )));
        }
        if buffer_frames == 0 {
            return Err(Error::Config("buffer_frames must be positive".to_string()));
        }

        Ok(Self {
            sample_rate,
            channels,
            sample_format,
            buffer_frames,
        })
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count (1 = mono, 2 = stereo).
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Output sample encoding.
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Frames requested per pull by the device bridge.
    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    /// Size of one interleaved frame on the wire, in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }

    /// Interleaved sample count for `frames` frames.
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }
}

impl Default for AudioConfig {
    /// 44.1 kHz, stereo, 16-bit, 1024 frames per pull.
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            sample_format: SampleFormat::Int16,
            buffer_frames: 1024,
        }
    }
}
