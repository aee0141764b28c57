//! WAV file driver
//!
//! Reads the input file one block at a time, runs each block through the
//! pipeline and writes the result with the input's sample rate, channel
//! count and sample format. Only the time spent inside the pipeline is
//! counted as processing time.

use super::interleave::{deinterleave, interleave};
use crate::error::{DriverError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use qdsp_core::{Geometry, Pipeline};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Summary of one file run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStats {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames read and written
    pub frames: u64,
    /// Blocks handed to the pipeline, including a final partial one
    pub blocks: u64,
    /// Wall-clock time spent in the pipeline
    pub processing: Duration,
}

impl FileStats {
    fn new(geometry: &Geometry) -> Self {
        Self {
            sample_rate: geometry.sample_rate,
            channels: geometry.channels,
            frames: 0,
            blocks: 0,
            processing: Duration::ZERO,
        }
    }

    /// Length of the processed audio
    pub fn audio_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }

    /// Audio duration divided by processing time
    pub fn realtime_factor(&self) -> f64 {
        let processing = self.processing.as_secs_f64();
        if processing > 0.0 {
            self.audio_duration().as_secs_f64() / processing
        } else {
            f64::INFINITY
        }
    }
}

/// Drives a pipeline over whole files
pub struct FileProcessor {
    pipeline: Pipeline,
    frames: usize,
}

impl FileProcessor {
    /// `frames` is the block size and must be a power of two
    pub fn new(pipeline: Pipeline, frames: usize) -> Self {
        Self { pipeline, frames }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn into_pipeline(self) -> Pipeline {
        self.pipeline
    }

    /// Process `input` into `output`, overwriting it
    pub fn process_file(&mut self, input: &Path, output: &Path) -> Result<FileStats> {
        let mut reader = WavReader::open(input)?;
        let spec = reader.spec();
        check_format(&spec)?;
        info!(
            "Processing {}: {} Hz, {} channel(s), {}-bit {:?}",
            input.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        );

        let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
        let samples: Box<dyn Iterator<Item = hound::Result<f32>> + '_> = match spec.sample_format
        {
            SampleFormat::Float => Box::new(reader.samples::<f32>()),
            SampleFormat::Int => Box::new(
                reader
                    .samples::<i32>()
                    .map(move |s| s.map(|v| v as f32 / scale)),
            ),
        };

        let mut writer = WavWriter::create(output, spec)?;
        let stats = self.run(
            spec.sample_rate,
            spec.channels as usize,
            samples,
            |s| match spec.sample_format {
                SampleFormat::Float => writer.write_sample(s),
                SampleFormat::Int => writer.write_sample((s * scale).clamp(-scale, scale - 1.0) as i32),
            },
        )?;
        writer.finalize()?;

        info!(
            "Wrote {}: {} frames in {:?} ({:.1}x real time)",
            output.display(),
            stats.frames,
            stats.processing,
            stats.realtime_factor()
        );
        Ok(stats)
    }

    /// Process an in-memory interleaved signal
    pub fn process_interleaved(
        &mut self,
        sample_rate: u32,
        channels: usize,
        input: &[f32],
    ) -> Result<(Vec<f32>, FileStats)> {
        let mut output = Vec::with_capacity(input.len());
        let stats = self.run(sample_rate, channels, input.iter().map(|&s| Ok(s)), |s| {
            output.push(s);
            Ok(())
        })?;
        Ok((output, stats))
    }

    fn run<I, W>(&mut self, sample_rate: u32, channels: usize, mut samples: I, mut write: W) -> Result<FileStats>
    where
        I: Iterator<Item = hound::Result<f32>>,
        W: FnMut(f32) -> hound::Result<()>,
    {
        let geometry = Geometry::new(sample_rate, channels, self.frames)?;
        geometry.require_power_of_two()?;
        self.pipeline.configure(geometry)?;

        let mut stats = FileStats::new(&geometry);
        let mut interleaved = vec![0.0f32; geometry.frames * channels];

        loop {
            let mut filled = 0;
            while filled < interleaved.len() {
                match samples.next() {
                    Some(sample) => {
                        interleaved[filled] = sample?;
                        filled += 1;
                    }
                    None => break,
                }
            }

            // A trailing partial frame is dropped
            let frames = filled / channels;
            if frames == 0 {
                break;
            }

            deinterleave(&interleaved, self.pipeline.input_mut(), frames);
            let start = Instant::now();
            let output = self.pipeline.process_block(frames);
            stats.processing += start.elapsed();
            interleave(output, frames, &mut interleaved);

            for &sample in &interleaved[..frames * channels] {
                write(sample)?;
            }
            stats.frames += frames as u64;
            stats.blocks += 1;

            if frames < geometry.frames {
                break;
            }
        }

        debug!(
            "{} block(s), {} frames, {:?} in pipeline",
            stats.blocks, stats.frames, stats.processing
        );
        Ok(stats)
    }
}

fn check_format(spec: &WavSpec) -> Result<()> {
    let supported = match spec.sample_format {
        SampleFormat::Float => spec.bits_per_sample == 32,
        SampleFormat::Int => (8..=32).contains(&spec.bits_per_sample),
    };
    if !supported {
        return Err(DriverError::Format(format!(
            "{}-bit {:?} samples",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels == 0 {
        return Err(DriverError::Format("file has no channels".to_string()));
    }
    Ok(())
}
