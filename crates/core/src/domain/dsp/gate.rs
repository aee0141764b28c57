//! Noise gate
//!
//! Each channel runs its own four-state machine, advanced once per block:
//!
//! ```text
//!   Open ──(quiet for hold blocks)──▶ Attack ──▶ Closed ──(loud)──▶ Release ──▶ Open
//! ```
//!
//! Attack and Release each occupy exactly one block and apply a linear ramp
//! spanning the block end to end. Closed outputs the shared zero buffer.

use super::{Block, Stage, StageKind};
use crate::domain::audio::{db_to_linear, Geometry, Result, MAX_CHANNELS};
use crate::domain::config::ConfigError;
use crate::domain::diagnostics::DiagnosticSink;

/// Per-channel gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateStatus {
    #[default]
    Open,
    Attack,
    Closed,
    Release,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelGate {
    status: GateStatus,
    hold_count: usize,
}

/// Block-based noise gate with hold time
#[derive(Debug, Clone)]
pub struct GateStage {
    threshold_db: f32,
    threshold: f32,
    hold_secs: f32,
    hold_blocks: usize,
    channels: [ChannelGate; MAX_CHANNELS],
}

impl GateStage {
    /// Create a gate from a dBFS threshold and a hold time in seconds
    pub fn new(threshold_db: f32, hold_secs: f32) -> std::result::Result<Self, ConfigError> {
        let threshold = db_to_linear(threshold_db);
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "gate: threshold {} dBFS does not give a positive linear level",
                threshold_db
            )));
        }
        if !hold_secs.is_finite() || hold_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "gate: hold time {} must be a non-negative number of seconds",
                hold_secs
            )));
        }

        Ok(Self {
            threshold_db,
            threshold,
            hold_secs,
            hold_blocks: 0,
            channels: [ChannelGate::default(); MAX_CHANNELS],
        })
    }

    /// Linear threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Quiet blocks tolerated before closing
    pub fn hold_blocks(&self) -> usize {
        self.hold_blocks
    }

    /// State the channel will be in for the next block
    pub fn status(&self, channel: usize) -> GateStatus {
        self.channels[channel].status
    }

    fn is_loud(&self, samples: &[f32]) -> bool {
        let mut max = 0.0f32;
        for &s in samples {
            max = max.max(s.abs());
            if max > self.threshold {
                return true;
            }
        }
        false
    }
}

/// Write `input × ramp` where the ramp runs from `from` to `to` inclusive
#[inline]
fn apply_ramp(input: &[f32], output: &mut [f32], from: f32, to: f32) {
    let n = input.len();
    if n == 0 {
        return;
    }
    if n == 1 {
        output[0] = from * input[0];
        return;
    }
    let step = (to - from) / (n - 1) as f32;
    for (i, (out, &x)) in output.iter_mut().zip(input).enumerate() {
        *out = (from + step * i as f32) * x;
    }
}

impl Stage for GateStage {
    fn kind(&self) -> StageKind {
        StageKind::Gate
    }

    fn init(&mut self, geometry: &Geometry, sink: &dyn DiagnosticSink) -> Result<()> {
        self.hold_blocks =
            (self.hold_secs as f64 * geometry.sample_rate as f64 / geometry.frames as f64) as usize;
        self.channels = [ChannelGate::default(); MAX_CHANNELS];

        sink.debug(format_args!(
            "gate: threshold={} dBFS ({}) hold={} blocks",
            self.threshold_db, self.threshold, self.hold_blocks
        ));
        Ok(())
    }

    fn process(&mut self, block: &mut Block<'_>) {
        // An empty block carries no level information
        if block.frames() == 0 {
            return;
        }

        for c in 0..block.channels() {
            let loud = self.is_loud(block.input(c));
            let hold_blocks = self.hold_blocks;
            let gate = &mut self.channels[c];

            match gate.status {
                GateStatus::Open => {
                    let (input, output) = block.io(c);
                    output.copy_from_slice(input);
                    if loud {
                        gate.hold_count = 0;
                    } else {
                        gate.hold_count += 1;
                        if gate.hold_count >= hold_blocks {
                            gate.status = GateStatus::Attack;
                        }
                    }
                }
                GateStatus::Attack => {
                    let (input, output) = block.io(c);
                    apply_ramp(input, output, 1.0, 0.0);
                    gate.status = GateStatus::Closed;
                    gate.hold_count = 0;
                }
                GateStatus::Closed => {
                    let (zeros, output) = block.zeros_and_output(c);
                    output.copy_from_slice(zeros);
                    if loud {
                        gate.status = GateStatus::Release;
                    }
                }
                GateStatus::Release => {
                    let (input, output) = block.io(c);
                    apply_ramp(input, output, 0.0, 1.0);
                    gate.status = GateStatus::Open;
                    gate.hold_count = 0;
                }
            }
        }
    }
}
