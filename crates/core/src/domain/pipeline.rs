//! Pipeline runner
//!
//! Owns an ordered stage list and the ping/pong buffers between them.
//! Stage `i` reads ping and writes pong when `i` is even, and the reverse
//! when `i` is odd, so the final output sits in ping for an even number of
//! stages (including none) and in pong otherwise.

use crate::domain::audio::{alloc_zeroed, DspError, Geometry, Result, SampleBuffer};
use crate::domain::diagnostics::{DiagnosticSink, TracingSink};
use crate::domain::dsp::{Block, Stage};
use std::fmt;
use std::sync::Arc;

struct StageSlot {
    stage: Box<dyn Stage>,
    // Diagnostic only
    sequence: u64,
}

/// Ordered chain of stages sharing one block geometry
pub struct Pipeline {
    stages: Vec<StageSlot>,
    ping: SampleBuffer,
    pong: SampleBuffer,
    zeros: Vec<f32>,
    geometry: Option<Geometry>,
    sink: Arc<dyn DiagnosticSink>,
}

impl Pipeline {
    /// Create an unconfigured pipeline; call [`configure`](Self::configure)
    /// before processing
    pub fn new(stages: Vec<Box<dyn Stage>>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            stages: stages
                .into_iter()
                .map(|stage| StageSlot { stage, sequence: 0 })
                .collect(),
            ping: SampleBuffer::new(),
            pong: SampleBuffer::new(),
            zeros: Vec::new(),
            geometry: None,
            sink,
        }
    }

    /// Pipeline reporting through `tracing`
    pub fn with_tracing(stages: Vec<Box<dyn Stage>>) -> Self {
        Self::new(stages, Arc::new(TracingSink))
    }

    /// (Re)allocate buffers and initialize every stage for `geometry`
    ///
    /// Must run again whenever sample rate, channel count or frame count
    /// changes. Delay lines come back zeroed, so configuring twice with the
    /// same geometry is the same as configuring once.
    pub fn configure(&mut self, geometry: Geometry) -> Result<()> {
        geometry.validate()?;
        self.geometry = None;

        self.ping.resize(geometry.channels, geometry.frames)?;
        self.pong.resize(geometry.channels, geometry.frames)?;
        self.zeros = alloc_zeroed(geometry.frames, "zero buffer")?;

        for slot in &mut self.stages {
            slot.stage.init(&geometry, self.sink.as_ref())?;
            slot.sequence = 0;
        }

        self.geometry = Some(geometry);
        self.sink.info(format_args!(
            "pipeline configured: {} stage(s), {} Hz, {} channel(s), {} frames",
            self.stages.len(),
            geometry.sample_rate,
            geometry.channels,
            geometry.frames
        ));
        Ok(())
    }

    /// Current geometry, `None` until configured
    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    /// Buffer the driver fills before [`process_block`](Self::process_block)
    pub fn input_mut(&mut self) -> &mut SampleBuffer {
        &mut self.ping
    }

    /// Buffer holding the last stage's output
    pub fn output(&self) -> &SampleBuffer {
        if self.stages.len() % 2 == 0 {
            &self.ping
        } else {
            &self.pong
        }
    }

    /// Run one block of `frames` frames through every stage
    ///
    /// `frames` may be shorter than the configured block (a final partial
    /// block); it is clamped to the configured size. The pipeline must have
    /// been configured; otherwise nothing runs and the empty input buffer is
    /// returned.
    pub fn process_block(&mut self, frames: usize) -> &SampleBuffer {
        let Some(geometry) = self.geometry else {
            return &self.ping;
        };
        let frames = frames.min(geometry.frames);

        for (i, slot) in self.stages.iter_mut().enumerate() {
            slot.sequence += 1;
            let (input, output) = if i % 2 == 0 {
                (&self.ping, &mut self.pong)
            } else {
                (&self.pong, &mut self.ping)
            };
            let mut block = Block::new(input, output, &self.zeros, frames);
            slot.stage.process(&mut block);
        }

        self.output()
    }

    /// Process driver-owned per-channel slices
    ///
    /// The frame count is the length of the output slices. Inputs shorter
    /// than that are padded with silence. Returns the frames processed.
    pub fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> Result<usize> {
        let Some(geometry) = self.geometry else {
            return Err(DspError::Geometry("pipeline is not configured".to_string()));
        };
        if inputs.len() != geometry.channels || outputs.len() != geometry.channels {
            return Err(DspError::Geometry(format!(
                "expected {} channel(s), got {} in / {} out",
                geometry.channels,
                inputs.len(),
                outputs.len()
            )));
        }
        let frames = outputs.iter().map(|o| o.len()).min().unwrap_or(0);
        if frames > geometry.frames {
            return Err(DspError::Geometry(format!(
                "block of {} frames exceeds configured {}",
                frames, geometry.frames
            )));
        }

        for (c, input) in inputs.iter().enumerate() {
            let n = input.len().min(frames);
            let channel = self.ping.channel_mut(c);
            channel[..n].copy_from_slice(&input[..n]);
            channel[n..frames].copy_from_slice(&self.zeros[n..frames]);
        }

        let result = self.process_block(frames);
        for (c, output) in outputs.iter_mut().enumerate() {
            output[..frames].copy_from_slice(&result.channel(c)[..frames]);
        }
        Ok(frames)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Blocks processed by stage `index` since the last configure
    pub fn sequence(&self, index: usize) -> Option<u64> {
        self.stages.get(index).map(|slot| slot.sequence)
    }

    pub fn stage(&self, index: usize) -> Option<&dyn Stage> {
        self.stages.get(index).map(|slot| slot.stage.as_ref())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|slot| slot.stage.name()).collect()
    }

    /// Release stage storage in list order, then the shared buffers
    ///
    /// The pipeline can be configured again afterwards.
    pub fn release(&mut self) {
        for slot in &mut self.stages {
            slot.stage.release();
        }
        self.ping.release();
        self.pong.release();
        self.zeros = Vec::new();
        if self.geometry.take().is_some() {
            self.sink.debug(format_args!("pipeline released"));
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("geometry", &self.geometry)
            .finish()
    }
}
