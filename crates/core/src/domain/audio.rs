//! Block geometry, sample buffers and the processing error taxonomy
//!
//! Everything in here is shared by the stages and the pipeline runner.
//! Allocation only happens through [`SampleBuffer::resize`] and
//! [`alloc_zeroed`], both of which are called from `configure()` and never
//! from the real-time path.

use crate::domain::config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of channels a pipeline can carry
pub const MAX_CHANNELS: usize = 8;

/// Maximum number of frames in one block
pub const MAX_FRAMES: usize = 8192;

/// Errors raised while building or configuring a pipeline
///
/// Per-block processing has no error channel; every variant here is
/// produced before the first block runs.
#[derive(Debug, Error)]
pub enum DspError {
    /// Malformed stage parameters or coefficient data
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Block geometry outside the supported range
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Buffer (re)allocation failed
    #[error("Allocation failed: {0}")]
    Allocation(String),
}

pub type Result<T> = std::result::Result<T, DspError>;

/// Block geometry shared by every stage of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
}

impl Geometry {
    /// Create a validated geometry
    pub fn new(sample_rate: u32, channels: usize, frames: usize) -> Result<Self> {
        let geometry = Self {
            sample_rate,
            channels,
            frames,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check channel count, frame count and sample rate bounds
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(DspError::Geometry(format!(
                "channel count {} outside [1, {}]",
                self.channels, MAX_CHANNELS
            )));
        }
        if self.frames == 0 || self.frames > MAX_FRAMES {
            return Err(DspError::Geometry(format!(
                "frame count {} outside [1, {}]",
                self.frames, MAX_FRAMES
            )));
        }
        if self.sample_rate == 0 {
            return Err(DspError::Geometry("sample rate must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Reject frame counts that are not a power of two
    ///
    /// The file driver needs this; live callbacks accept any size.
    pub fn require_power_of_two(&self) -> Result<()> {
        if !self.frames.is_power_of_two() {
            return Err(DspError::Geometry(format!(
                "frame size {} must be a power of two",
                self.frames
            )));
        }
        Ok(())
    }

    /// Duration of one full block in seconds
    pub fn block_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Convert decibels to a linear amplitude factor
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels
#[inline]
pub fn linear_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

/// Allocate a zero-filled sample vector, reporting failure instead of aborting
pub fn alloc_zeroed(len: usize, what: &str) -> Result<Vec<f32>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        DspError::Allocation(format!("{} ({} samples): {}", what, len, e))
    })?;
    data.resize(len, 0.0);
    Ok(data)
}

/// Planar multi-channel sample storage
///
/// One flat region of `channels × stride` samples; channel `c` occupies
/// `[c * stride, (c + 1) * stride)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    data: Vec<f32>,
    channels: usize,
    stride: usize,
}

impl SampleBuffer {
    /// Create an empty buffer with no storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed buffer
    pub fn with_geometry(channels: usize, stride: usize) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.resize(channels, stride)?;
        Ok(buffer)
    }

    /// Reshape and zero the buffer, growing storage only when needed
    pub fn resize(&mut self, channels: usize, stride: usize) -> Result<()> {
        let total = channels * stride;
        self.data.clear();
        if total > self.data.capacity() {
            self.data.try_reserve_exact(total).map_err(|e| {
                DspError::Allocation(format!(
                    "sample buffer {}x{}: {}",
                    channels, stride, e
                ))
            })?;
        }
        self.data.resize(total, 0.0);
        self.channels = channels;
        self.stride = stride;
        Ok(())
    }

    /// Drop the storage
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.channels = 0;
        self.stride = 0;
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.stride;
        &self.data[start..start + self.stride]
    }

    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.stride;
        &mut self.data[start..start + self.stride]
    }

    /// Iterate channels in order
    pub fn iter_channels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks(self.stride.max(1)).take(self.channels)
    }

    /// The whole flat region, channel after channel
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }
}
