//! Processing stages for the block pipeline
//!
//! This module provides the stage variants the pipeline can chain:
//! - Gain/Delay (linear or dB gain, circular delay line, output clip)
//! - Clip (symmetric hard clipper)
//! - Noise Gate (per-channel open/attack/closed/release state machine)
//! - FIR (circular delay line convolved against mirrored coefficients)
//! - IIR biquad (transposed direct form II, double precision state)
//!
//! All stages are designed for:
//! - Zero allocations in `process`
//! - No locks and no blocking in `process`
//! - Deterministic, bounded per-block cost

pub mod clip;
pub mod fir;
pub mod gain;
pub mod gate;
pub mod iir;
pub mod kernel;

pub use clip::ClipStage;
pub use fir::FirStage;
pub use gain::GainStage;
pub use gate::{GateStage, GateStatus};
pub use iir::{BiquadCoeffs, BiquadDesign, FilterType, IirStage};
pub use kernel::{dotp, dotp2, dotp_scalar};

use crate::domain::audio::{Geometry, Result, SampleBuffer};
use crate::domain::diagnostics::DiagnosticSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Core trait for all pipeline stages
///
/// A stage reads the previous stage's output and writes its own output
/// buffer; it never sees buffers outside the [`Block`] it is handed.
pub trait Stage: Send {
    /// Variant tag
    fn kind(&self) -> StageKind;

    /// (Re)initialize for a block geometry
    ///
    /// Delay lines are reallocated and zeroed here. Runs outside the
    /// real-time path, so it may allocate.
    fn init(&mut self, geometry: &Geometry, sink: &dyn DiagnosticSink) -> Result<()>;

    /// Process one block
    ///
    /// # Requirements
    /// - No allocations, locks or blocking
    /// - Handle any frame count up to the configured one
    fn process(&mut self, block: &mut Block<'_>);

    /// Free delay lines and other per-geometry storage
    fn release(&mut self) {}

    /// Get stage name for debugging/display
    fn name(&self) -> &str {
        self.kind().name()
    }
}

/// Borrowed view of one stage invocation
///
/// Input and output are distinct buffers (ping/pong), so a stage can read
/// its whole input while writing its output.
pub struct Block<'a> {
    input: &'a SampleBuffer,
    output: &'a mut SampleBuffer,
    zeros: &'a [f32],
    frames: usize,
}

impl<'a> Block<'a> {
    /// `frames` must not exceed the stride of either buffer or the zero buffer
    pub fn new(
        input: &'a SampleBuffer,
        output: &'a mut SampleBuffer,
        zeros: &'a [f32],
        frames: usize,
    ) -> Self {
        debug_assert_eq!(input.channels(), output.channels());
        debug_assert!(frames <= input.stride() && frames <= output.stride());
        debug_assert!(frames <= zeros.len());
        Self {
            input,
            output,
            zeros,
            frames,
        }
    }

    /// Frames in this call (may be short for a final block)
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.input.channels()
    }

    #[inline]
    pub fn input(&self, channel: usize) -> &[f32] {
        &self.input.channel(channel)[..self.frames]
    }

    #[inline]
    pub fn output(&mut self, channel: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.output.channel_mut(channel)[..frames]
    }

    /// Input and output of one channel at once
    #[inline]
    pub fn io(&mut self, channel: usize) -> (&[f32], &mut [f32]) {
        let frames = self.frames;
        let input: &'a SampleBuffer = self.input;
        (
            &input.channel(channel)[..frames],
            &mut self.output.channel_mut(channel)[..frames],
        )
    }

    /// Shared silence, `frames` long
    #[inline]
    pub fn zeros(&self) -> &[f32] {
        &self.zeros[..self.frames]
    }

    /// Shared silence and the output of one channel
    #[inline]
    pub fn zeros_and_output(&mut self, channel: usize) -> (&[f32], &mut [f32]) {
        let frames = self.frames;
        let zeros: &'a [f32] = self.zeros;
        (
            &zeros[..frames],
            &mut self.output.channel_mut(channel)[..frames],
        )
    }

    /// Whole buffers, for stages that split work across channels
    pub fn buffers(&mut self) -> (&SampleBuffer, &mut SampleBuffer) {
        (self.input, &mut *self.output)
    }
}

/// Closed set of stage variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Gain,
    Clip,
    Gate,
    Fir,
    Iir,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Gain,
        StageKind::Clip,
        StageKind::Gate,
        StageKind::Fir,
        StageKind::Iir,
    ];

    /// Name used on the command line and in presets
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Gain => "gain",
            StageKind::Clip => "clip",
            StageKind::Gate => "gate",
            StageKind::Fir => "fir",
            StageKind::Iir => "iir",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether `keys` is one of this variant's valid parameter combinations
    ///
    /// Keys are the parameter names as written on the command line; for
    /// `iir` the bare filter type (`lp2`, `direct`, ...) counts as a key.
    pub fn accepts<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        let keys: BTreeSet<&str> = keys.iter().map(AsRef::as_ref).collect();
        let only = |allowed: &[&str]| keys.iter().all(|k| allowed.contains(k));

        match self {
            StageKind::Gain => {
                !keys.is_empty()
                    && only(&["g", "gl", "d", "t"])
                    && !(keys.contains("g") && keys.contains("gl"))
            }
            StageKind::Clip => keys.len() == 1 && keys.contains("t"),
            StageKind::Gate => keys.contains("t") && only(&["t", "h"]),
            StageKind::Fir => keys.len() == 1 && keys.contains("h"),
            StageKind::Iir => {
                let types: Vec<FilterType> = keys
                    .iter()
                    .filter_map(|k| FilterType::from_name(k))
                    .collect();
                let [filter] = types.as_slice() else {
                    return false;
                };
                let params: BTreeSet<&str> = keys
                    .iter()
                    .copied()
                    .filter(|k| *k != filter.name())
                    .collect();
                let required: BTreeSet<&str> = filter.required_keys().iter().copied().collect();
                let optional = filter.optional_keys();
                required.is_subset(&params)
                    && params
                        .iter()
                        .all(|k| required.contains(k) || optional.contains(k))
            }
        }
    }

    /// Usage text for this variant
    pub fn help(&self) -> &'static str {
        match self {
            StageKind::Gain => concat!(
                "  Gain options\n",
                "    Name: gain\n",
                "    g=gain (dB)\n",
                "    gl=gain (linear)\n",
                "    d=delay (seconds)\n",
                "    t=clip threshold (dBFS)\n",
                "    Example: -p gain,g=-6,d=0.001\n",
            ),
            StageKind::Clip => concat!(
                "  Clip options\n",
                "    Name: clip\n",
                "    t=clip threshold (linear)\n",
                "    Example: -p clip,t=1.0\n",
            ),
            StageKind::Gate => concat!(
                "  Gate options\n",
                "    Name: gate\n",
                "    t=threshold (dBFS)\n",
                "    h=holdtime (seconds)\n",
                "    Example: -p gate,t=-80,h=30\n",
            ),
            StageKind::Fir => concat!(
                "  FIR filter options\n",
                "    Name: fir\n",
                "    h=coefficient filename\n",
                "    Example: -p fir,h=coeffs.txt\n",
                "    Note: Coefficient file should contain one coefficient per line\n",
            ),
            StageKind::Iir => concat!(
                "  IIR options\n",
                "    Name: iir\n",
                "    type: lp2, hp2, ap2 (f=, q=, optional g=)\n",
                "          ls2, hs2, peq (f=, q=, g=)\n",
                "          direct (b0=, b1=, b2=, a1=, a2=)\n",
                "    f=frequency (Hz), q=quality factor, g=gain (dB)\n",
                "    Example: -p iir,lp2,f=100,q=0.7071\n",
                "    Example: -p iir,direct,a1=1,a2=0,b0=1,b1=2,b2=1\n",
            ),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// TESTS
// ============================================================================
