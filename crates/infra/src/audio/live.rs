//! Real-time driver over the default capture and playback devices
//!
//! The capture callback pushes interleaved samples into a lock-free queue.
//! The playback callback owns the pipeline: it pops one block's worth of
//! frames, runs the pipeline and writes the result back interleaved. When
//! capture falls behind the missing samples are silence.
//!
//! Callbacks are split into chunks of at most the configured frame count
//! and the pipeline is not reconfigured for shorter chunks. Stages that
//! count in blocks (the gate's hold time) therefore assume full-size
//! blocks; when the host delivers smaller callbacks the hold elapses
//! sooner in wall-clock time than requested.

use super::interleave::interleave;
use crate::error::{DriverError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use qdsp_core::{Geometry, Pipeline};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Blocks of capture data the queue can hold before dropping samples
const QUEUE_BLOCKS: usize = 8;

/// Live stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    pub channels: usize,
    /// Requested callback size in frames
    pub frames: usize,
    /// `None` uses the output device's default rate
    pub sample_rate: Option<u32>,
}

/// Counters updated from the audio callbacks
#[derive(Debug, Default)]
pub struct LiveStats {
    blocks: CachePadded<AtomicU64>,
    underruns: CachePadded<AtomicU64>,
    overruns: CachePadded<AtomicU64>,
}

impl LiveStats {
    /// Pipeline blocks rendered
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Playback callbacks that ran out of captured samples
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Capture callbacks that found the queue full
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Capture side: interleaved samples into the queue
struct Capture {
    queue: Arc<ArrayQueue<f32>>,
    stats: Arc<LiveStats>,
}

impl Capture {
    fn push(&self, data: &[f32]) {
        for &sample in data {
            if self.queue.push(sample).is_err() {
                self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}

/// Playback side: owns the pipeline
struct Renderer {
    pipeline: Pipeline,
    queue: Arc<ArrayQueue<f32>>,
    stats: Arc<LiveStats>,
    channels: usize,
    frames: usize,
}

impl Renderer {
    /// Fill an interleaved playback buffer of any length
    fn render(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        let mut starved = false;

        for chunk in data.chunks_mut(self.frames * channels) {
            let frames = chunk.len() / channels;
            if frames == 0 {
                chunk.fill(0.0);
                continue;
            }

            let input = self.pipeline.input_mut();
            for n in 0..frames {
                for c in 0..channels {
                    input.channel_mut(c)[n] = match self.queue.pop() {
                        Some(sample) => sample,
                        None => {
                            starved = true;
                            0.0
                        }
                    };
                }
            }

            let output = self.pipeline.process_block(frames);
            interleave(output, frames, chunk);
            chunk[frames * channels..].fill(0.0);
            self.stats.blocks.fetch_add(1, Ordering::Relaxed);
        }

        if starved {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Running capture and playback streams
///
/// Dropping the engine stops both streams and releases the pipeline.
pub struct LiveEngine {
    _input: Stream,
    _output: Stream,
    geometry: Geometry,
    stats: Arc<LiveStats>,
}

impl LiveEngine {
    /// Configure `pipeline` and start streaming through it
    pub fn start(mut pipeline: Pipeline, config: LiveConfig) -> Result<Self> {
        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or_else(|| DriverError::Device("no default input device".to_string()))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| DriverError::Device("no default output device".to_string()))?;

        #[allow(deprecated)]
        let input_name = input_device.name().unwrap_or_else(|_| "unknown".to_string());
        #[allow(deprecated)]
        let output_name = output_device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("Live streaming: {} -> {}", input_name, output_name);

        let sample_rate = match config.sample_rate {
            Some(rate) => rate,
            None => output_device
                .default_output_config()
                .map_err(|e| DriverError::Device(e.to_string()))?
                .sample_rate(),
        };

        let geometry = Geometry::new(sample_rate, config.channels, config.frames)?;
        pipeline.configure(geometry)?;

        let cpal_config = CpalStreamConfig {
            channels: geometry.channels as u16,
            sample_rate: geometry.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(geometry.frames as u32),
        };

        let queue = Arc::new(ArrayQueue::new(
            QUEUE_BLOCKS * geometry.frames * geometry.channels,
        ));
        let stats = Arc::new(LiveStats::default());

        let capture = Capture {
            queue: Arc::clone(&queue),
            stats: Arc::clone(&stats),
        };
        let mut renderer = Renderer {
            pipeline,
            queue,
            stats: Arc::clone(&stats),
            channels: geometry.channels,
            frames: geometry.frames,
        };

        let input = input_device
            .build_input_stream(
                &cpal_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| capture.push(data),
                |err| error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| DriverError::Stream(format!("Failed to build input stream: {}", e)))?;

        let output = output_device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data),
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| DriverError::Stream(format!("Failed to build output stream: {}", e)))?;

        output
            .play()
            .map_err(|e| DriverError::Stream(format!("Failed to start output stream: {}", e)))?;
        input
            .play()
            .map_err(|e| DriverError::Stream(format!("Failed to start input stream: {}", e)))?;

        info!(
            "Streams running: {} Hz, {} channel(s), {} frames ({:.1} ms)",
            geometry.sample_rate,
            geometry.channels,
            geometry.frames,
            geometry.block_secs() * 1000.0
        );

        Ok(Self {
            _input: input,
            _output: output,
            geometry,
            stats,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn stats(&self) -> Arc<LiveStats> {
        Arc::clone(&self.stats)
    }

    /// Stop both streams, logging the callback counters
    pub fn stop(self) {
        let stats = &self.stats;
        if stats.underruns() > 0 || stats.overruns() > 0 {
            warn!(
                "{} underrun(s), {} overrun(s)",
                stats.underruns(),
                stats.overruns()
            );
        }
        info!("Stopped after {} block(s)", stats.blocks());
    }
}
