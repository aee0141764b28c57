//! Symmetric hard clipper

use super::{Block, Stage, StageKind};
use crate::domain::audio::{Geometry, Result};
use crate::domain::config::ConfigError;
use crate::domain::diagnostics::DiagnosticSink;

/// Clamps every sample to `[-threshold, threshold]`
#[derive(Debug, Clone, Copy)]
pub struct ClipStage {
    threshold: f32,
}

impl ClipStage {
    pub fn new(threshold: f32) -> std::result::Result<Self, ConfigError> {
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "clip: threshold {} must be positive",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Stage for ClipStage {
    fn kind(&self) -> StageKind {
        StageKind::Clip
    }

    fn init(&mut self, _geometry: &Geometry, sink: &dyn DiagnosticSink) -> Result<()> {
        sink.debug(format_args!("clip: threshold={}", self.threshold));
        Ok(())
    }

    fn process(&mut self, block: &mut Block<'_>) {
        let t = self.threshold;
        for c in 0..block.channels() {
            let (input, output) = block.io(c);
            for (out, &x) in output.iter_mut().zip(input) {
                *out = x.clamp(-t, t);
            }
        }
    }
}
