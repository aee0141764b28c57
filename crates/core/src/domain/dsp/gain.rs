//! Gain/delay stage
//!
//! `output = clamp(gain × input delayed by d seconds, -t, +t)`.

use super::{Block, Stage, StageKind};
use crate::domain::audio::{alloc_zeroed, DspError, Geometry, Result};
use crate::domain::config::ConfigError;
use crate::domain::diagnostics::DiagnosticSink;

/// Gain with an optional per-channel delay line and output clip
#[derive(Debug, Clone)]
pub struct GainStage {
    gain: f32,
    delay_secs: f32,
    clip: f32,
    // Flat delay line: channels × delay_len
    delay: Vec<f32>,
    delay_len: usize,
    offset: usize,
}

impl GainStage {
    /// Create a gain stage
    ///
    /// `clip` is a linear threshold; `None` disables clipping.
    pub fn new(gain: f32, delay_secs: f32, clip: Option<f32>) -> std::result::Result<Self, ConfigError> {
        if !gain.is_finite() {
            return Err(ConfigError::Invalid(format!("gain: gain {} is not finite", gain)));
        }
        if !delay_secs.is_finite() || delay_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "gain: delay {} must be a non-negative number of seconds",
                delay_secs
            )));
        }
        let clip = match clip {
            Some(t) if t.is_nan() || t <= 0.0 => {
                return Err(ConfigError::Invalid(format!(
                    "gain: clip threshold {} must be positive",
                    t
                )))
            }
            Some(t) => t,
            None => f32::INFINITY,
        };

        Ok(Self {
            gain,
            delay_secs,
            clip,
            delay: Vec::new(),
            delay_len: 0,
            offset: 0,
        })
    }

    /// Unity gain, no delay, no clipping
    pub fn unity() -> Self {
        Self {
            gain: 1.0,
            delay_secs: 0.0,
            clip: f32::INFINITY,
            delay: Vec::new(),
            delay_len: 0,
            offset: 0,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Delay in samples for the current geometry
    pub fn delay_len(&self) -> usize {
        self.delay_len
    }

    /// Linear clip threshold, `None` when unclipped
    pub fn clip(&self) -> Option<f32> {
        self.clip.is_finite().then_some(self.clip)
    }
}

impl Stage for GainStage {
    fn kind(&self) -> StageKind {
        StageKind::Gain
    }

    fn init(&mut self, geometry: &Geometry, sink: &dyn DiagnosticSink) -> Result<()> {
        let delay_len = (self.delay_secs as f64 * geometry.sample_rate as f64).round() as usize;
        let total = geometry.channels.checked_mul(delay_len).ok_or_else(|| {
            DspError::Allocation(format!(
                "gain delay line: {} channel(s) of {} samples",
                geometry.channels, delay_len
            ))
        })?;
        self.delay = alloc_zeroed(total, "gain delay line")?;
        self.delay_len = delay_len;
        self.offset = 0;

        sink.debug(format_args!(
            "gain: gain={} delay={} samples clip={}",
            self.gain, self.delay_len, self.clip
        ));
        Ok(())
    }

    fn process(&mut self, block: &mut Block<'_>) {
        let (gain, clip) = (self.gain, self.clip);
        let len = self.delay_len;
        let mut offset = self.offset;

        for c in 0..block.channels() {
            let (input, output) = block.io(c);
            if len == 0 {
                for (out, &x) in output.iter_mut().zip(input) {
                    *out = (gain * x).clamp(-clip, clip);
                }
                continue;
            }

            offset = self.offset;
            let line = &mut self.delay[c * len..(c + 1) * len];
            for (out, &x) in output.iter_mut().zip(input) {
                let delayed = line[offset];
                line[offset] = x;
                *out = (gain * delayed).clamp(-clip, clip);
                offset += 1;
                if offset == len {
                    offset = 0;
                }
            }
        }

        if len > 0 {
            self.offset = offset;
        }
    }

    fn release(&mut self) {
        self.delay = Vec::new();
        self.delay_len = 0;
        self.offset = 0;
    }
}
