//! FIR filter stage
//!
//! Each channel keeps a circular delay line of `hlen` samples. Coefficients
//! are stored reversed and duplicated (`2 × hlen`), so the taps aligned with
//! any write offset form one contiguous slice:
//!
//! ```text
//! mirrored = [c[h-1] .. c[0], c[h-1] .. c[0]]
//! y[n]     = dotp(mirrored[h-1-offset .. 2h-1-offset], delay[0 .. h])
//! ```
//!
//! The write offset is shared by all channels. With several channels and a
//! large enough per-block cost, channels are convolved on a rayon pool.

use super::kernel::{dotp, dotp2};
use super::{Block, Stage, StageKind};
use crate::domain::audio::{alloc_zeroed, Geometry, Result};
use crate::domain::config::ConfigError;
use crate::domain::diagnostics::DiagnosticSink;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Per-block cost (`hlen × frames`) above which channels run in parallel
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// Read a coefficient file: one decimal value per line, blank lines skipped
pub fn load_coefficients(path: &Path) -> std::result::Result<Vec<f32>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::CoefficientOpen {
        path: path.to_path_buf(),
        source,
    })?;
    parse_coefficients(BufReader::new(file), path)
}

/// Parse coefficients from any line source; `path` is only used in errors
pub fn parse_coefficients<R: BufRead>(
    reader: R,
    path: &Path,
) -> std::result::Result<Vec<f32>, ConfigError> {
    let mut coeffs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ConfigError::CoefficientOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let value = line.trim();
        if value.is_empty() {
            continue;
        }
        let coeff = value
            .parse::<f32>()
            .map_err(|_| ConfigError::CoefficientParse {
                path: path.to_path_buf(),
                line: index + 1,
                value: value.to_string(),
            })?;
        coeffs.push(coeff);
    }

    if coeffs.is_empty() {
        return Err(ConfigError::CoefficientEmpty {
            path: path.to_path_buf(),
        });
    }
    Ok(coeffs)
}

/// Reverse and duplicate `coeffs` into a `2 × len` vector
fn mirror(coeffs: &[f32]) -> Vec<f32> {
    let reversed = coeffs.iter().rev().copied();
    reversed.clone().chain(reversed).collect()
}

/// Convolve one channel from `offset`, returning the offset after the block
#[inline]
fn convolve(
    mirrored: &[f32],
    line: &mut [f32],
    input: &[f32],
    output: &mut [f32],
    offset: usize,
) -> usize {
    let hlen = line.len();
    let mut offset = offset;
    for (out, &x) in output.iter_mut().zip(input) {
        line[offset] = x;
        let start = hlen - 1 - offset;
        *out = dotp(&mirrored[start..start + hlen], line);
        offset += 1;
        if offset == hlen {
            offset = 0;
        }
    }
    offset
}

/// Finite impulse response filter
#[derive(Debug)]
pub struct FirStage {
    source: Option<PathBuf>,
    hlen: usize,
    mirrored: Vec<f32>,
    // Flat delay line: channels × hlen
    delay: Vec<f32>,
    channels: usize,
    offset: usize,
    pool: Option<ThreadPool>,
}

impl FirStage {
    /// Build from coefficients in time order (`c[0]` applies to the newest sample)
    pub fn new(coeffs: Vec<f32>) -> std::result::Result<Self, ConfigError> {
        if coeffs.is_empty() {
            return Err(ConfigError::Invalid(
                "fir: at least one coefficient is required".to_string(),
            ));
        }
        Ok(Self {
            source: None,
            hlen: coeffs.len(),
            mirrored: mirror(&coeffs),
            delay: Vec::new(),
            channels: 0,
            offset: 0,
            pool: None,
        })
    }

    /// Build from a coefficient file
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut stage = Self::new(load_coefficients(path)?)?;
        stage.source = Some(path.to_path_buf());
        Ok(stage)
    }

    /// Filter length
    pub fn len(&self) -> usize {
        self.hlen
    }

    pub fn is_empty(&self) -> bool {
        self.hlen == 0
    }

    /// Coefficients in time order
    pub fn coefficients(&self) -> Vec<f32> {
        self.mirrored[..self.hlen].iter().rev().copied().collect()
    }

    /// Whether blocks are split across a worker pool
    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    fn process_serial(&mut self, block: &mut Block<'_>) {
        let hlen = self.hlen;
        let start = self.offset;
        let mut end = start;
        for c in 0..block.channels() {
            let (input, output) = block.io(c);
            let line = &mut self.delay[c * hlen..(c + 1) * hlen];
            end = convolve(&self.mirrored, line, input, output, start);
        }
        self.offset = end;
    }

    fn process_stereo(&mut self, block: &mut Block<'_>) {
        let hlen = self.hlen;
        let frames = block.frames();
        let (input, output) = block.buffers();
        let (in0, in1) = (&input.channel(0)[..frames], &input.channel(1)[..frames]);
        let (line0, line1) = self.delay.split_at_mut(hlen);

        let mut offset = self.offset;
        for n in 0..frames {
            line0[offset] = in0[n];
            line1[offset] = in1[n];
            let start = hlen - 1 - offset;
            let (y0, y1) = dotp2(&self.mirrored[start..start + hlen], line0, line1);
            output.channel_mut(0)[n] = y0;
            output.channel_mut(1)[n] = y1;
            offset += 1;
            if offset == hlen {
                offset = 0;
            }
        }
        self.offset = offset;
    }

    fn process_parallel(&mut self, block: &mut Block<'_>) {
        let Some(pool) = &self.pool else {
            return;
        };
        let hlen = self.hlen;
        let frames = block.frames();
        let start = self.offset;
        let mirrored = &self.mirrored;
        let delay = &mut self.delay;
        let (input, output) = block.buffers();
        let stride = input.stride();

        pool.install(|| {
            output
                .as_mut_slice()
                .par_chunks_mut(stride)
                .zip(input.as_slice().par_chunks(stride))
                .zip(delay.par_chunks_mut(hlen))
                .for_each(|((out, inp), line)| {
                    convolve(mirrored, line, &inp[..frames], &mut out[..frames], start);
                });
        });
        self.offset = (start + frames) % hlen;
    }
}

impl Stage for FirStage {
    fn kind(&self) -> StageKind {
        StageKind::Fir
    }

    fn init(&mut self, geometry: &Geometry, sink: &dyn DiagnosticSink) -> Result<()> {
        self.channels = geometry.channels;
        self.delay = alloc_zeroed(geometry.channels * self.hlen, "fir delay line")?;
        self.offset = 0;

        let parallel = geometry.channels > 1 && self.hlen * geometry.frames > PARALLEL_THRESHOLD;
        self.pool = if parallel {
            match ThreadPoolBuilder::new()
                .num_threads(geometry.channels)
                .thread_name(|i| format!("qdsp-fir-{}", i))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    sink.warn(format_args!(
                        "fir: worker pool unavailable, processing serially: {}",
                        e
                    ));
                    None
                }
            }
        } else {
            None
        };

        match &self.source {
            Some(path) => sink.info(format_args!(
                "fir: {} taps from {}",
                self.hlen,
                path.display()
            )),
            None => sink.info(format_args!("fir: {} taps", self.hlen)),
        }
        sink.debug(format_args!(
            "fir: {} channel(s), {}",
            self.channels,
            if self.pool.is_some() {
                "parallel"
            } else {
                "serial"
            }
        ));
        Ok(())
    }

    fn process(&mut self, block: &mut Block<'_>) {
        // Requires init for this channel count
        if self.delay.len() < block.channels() * self.hlen {
            return;
        }
        if self.pool.is_some() {
            self.process_parallel(block);
        } else if block.channels() == 2 {
            self.process_stereo(block);
        } else {
            self.process_serial(block);
        }
    }

    fn release(&mut self) {
        self.delay = Vec::new();
        self.pool = None;
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::SampleBuffer;
    use crate::domain::diagnostics::{CollectingSink, NullSink};
    use proptest::prelude::*;
    use std::io::{Cursor, Write};

    const SAMPLE_RATE: u32 = 48000;

    fn signal(channels: usize, frames: usize, seed: u32) -> SampleBuffer {
        let mut buffer = SampleBuffer::with_geometry(channels, frames).unwrap();
        for c in 0..channels {
            for (n, s) in buffer.channel_mut(c).iter_mut().enumerate() {
                *s = ((n as u32 * 31 + c as u32 * 7 + seed) % 17) as f32 / 8.0 - 1.0;
            }
        }
        buffer
    }

    fn run_blocks(stage: &mut FirStage, input: &SampleBuffer, frames: usize) -> SampleBuffer {
        let channels = input.channels();
        let total = input.stride();
        let mut out = SampleBuffer::with_geometry(channels, total).unwrap();
        let zeros = vec![0.0; frames];

        let mut pos = 0;
        while pos < total {
            let n = frames.min(total - pos);
            let mut block_in = SampleBuffer::with_geometry(channels, frames).unwrap();
            let mut block_out = SampleBuffer::with_geometry(channels, frames).unwrap();
            for c in 0..channels {
                block_in.channel_mut(c)[..n].copy_from_slice(&input.channel(c)[pos..pos + n]);
            }
            stage.process(&mut Block::new(&block_in, &mut block_out, &zeros, n));
            for c in 0..channels {
                out.channel_mut(c)[pos..pos + n].copy_from_slice(&block_out.channel(c)[..n]);
            }
            pos += n;
        }
        out
    }

    #[test]
    fn test_process_without_init_leaves_output() {
        let mut stage = FirStage::new(vec![0.5, 0.5]).unwrap();
        let out = run_blocks(&mut stage, &signal(2, 16, 3), 16);
        assert!(out.as_slice().iter().all(|&s| s == 0.0));
    }

    fn direct_convolution(coeffs: &[f32], x: &[f32]) -> Vec<f32> {
        (0..x.len())
            .map(|n| {
                coeffs
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n)
                    .map(|(k, c)| c * x[n - k])
                    .sum()
            })
            .collect()
    }

    fn init(stage: &mut FirStage, channels: usize, frames: usize) {
        stage
            .init(&Geometry::new(SAMPLE_RATE, channels, frames).unwrap(), &NullSink)
            .unwrap();
    }

    #[test]
    fn test_mirror_layout() {
        assert_eq!(mirror(&[1.0, 2.0, 3.0]), vec![3.0, 2.0, 1.0, 3.0, 2.0, 1.0]);
        let stage = FirStage::new(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(stage.coefficients(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_identity_filter() {
        for channels in [1, 2, 3] {
            for frames in [1, 7, 64] {
                let mut stage = FirStage::new(vec![1.0]).unwrap();
                init(&mut stage, channels, frames);
                let input = signal(channels, 200, 3);
                let output = run_blocks(&mut stage, &input, frames);
                assert_eq!(output.as_slice(), input.as_slice());
            }
        }
    }

    #[test]
    fn test_matches_direct_convolution() {
        let coeffs = vec![0.5, -0.25, 0.125, 1.0, 0.0, -0.75, 0.3];
        for channels in [1, 2, 4] {
            let mut stage = FirStage::new(coeffs.clone()).unwrap();
            init(&mut stage, channels, 16);
            let input = signal(channels, 100, 11);
            let output = run_blocks(&mut stage, &input, 16);
            for c in 0..channels {
                let expected = direct_convolution(&coeffs, input.channel(c));
                for (y, e) in output.channel(c).iter().zip(&expected) {
                    assert!((y - e).abs() < 1e-5, "channel {}: {} vs {}", c, y, e);
                }
            }
        }
    }

    #[test]
    fn test_parallel_matches_serial() {
        let coeffs: Vec<f32> = (0..200).map(|i| ((i * 13) % 11) as f32 / 11.0 - 0.5).collect();
        let frames = 128;
        let input = signal(4, 512, 5);

        let mut parallel = FirStage::new(coeffs.clone()).unwrap();
        init(&mut parallel, 4, frames);
        assert!(parallel.is_parallel());

        let mut serial = FirStage::new(coeffs).unwrap();
        init(&mut serial, 4, frames);
        serial.pool = None;

        assert_eq!(
            run_blocks(&mut parallel, &input, frames).as_slice(),
            run_blocks(&mut serial, &input, frames).as_slice()
        );
    }

    #[test]
    fn test_small_filters_stay_serial() {
        let mut stage = FirStage::new(vec![0.5; 16]).unwrap();
        init(&mut stage, 2, 64);
        assert!(!stage.is_parallel());
        init(&mut stage, 1, 8192);
        assert!(!stage.is_parallel());
    }

    #[test]
    fn test_init_resets_delay_line() {
        let mut stage = FirStage::new(vec![0.0, 1.0]).unwrap();
        init(&mut stage, 1, 4);
        run_blocks(&mut stage, &signal(1, 4, 1), 4);

        init(&mut stage, 1, 4);
        let out = run_blocks(&mut stage, &signal(1, 4, 1), 4);
        // one-sample delay: first output comes from the zeroed line
        assert_eq!(out.channel(0)[0], 0.0);
    }

    #[test]
    fn test_parse_coefficients() {
        let text = "0.5\n\n-1.25e-1\n  3 \n";
        let coeffs = parse_coefficients(Cursor::new(text), Path::new("mem")).unwrap();
        assert_eq!(coeffs, vec![0.5, -0.125, 3.0]);

        let err = parse_coefficients(Cursor::new("1.0\nabc\n"), Path::new("mem")).unwrap_err();
        assert!(matches!(err, ConfigError::CoefficientParse { line: 2, .. }));

        let err = parse_coefficients(Cursor::new("\n\n"), Path::new("mem")).unwrap_err();
        assert!(matches!(err, ConfigError::CoefficientEmpty { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.25").unwrap();
        writeln!(file, "0.75").unwrap();

        let mut stage = FirStage::from_file(file.path()).unwrap();
        assert_eq!(stage.len(), 2);

        let sink = CollectingSink::new();
        stage
            .init(&Geometry::new(SAMPLE_RATE, 1, 64).unwrap(), &*sink)
            .unwrap();
        assert!(sink.contains("2 taps"));

        let missing = FirStage::from_file("/nonexistent/coeffs.txt");
        assert!(matches!(missing, Err(ConfigError::CoefficientOpen { .. })));
    }

    proptest! {
        #[test]
        fn prop_fir_linearity(
            coeffs in prop::collection::vec(-1.0f32..1.0, 1..24),
            pairs in prop::collection::vec((-1.0f32..1.0, -1.0f32..1.0), 1..96),
            frames in 1usize..40,
        ) {
            let len = pairs.len();
            let mut x1 = SampleBuffer::with_geometry(1, len).unwrap();
            let mut x2 = SampleBuffer::with_geometry(1, len).unwrap();
            let mut sum = SampleBuffer::with_geometry(1, len).unwrap();
            for (n, (a, b)) in pairs.iter().enumerate() {
                x1.channel_mut(0)[n] = *a;
                x2.channel_mut(0)[n] = *b;
                sum.channel_mut(0)[n] = a + b;
            }

            let run = |x: &SampleBuffer| {
                let mut stage = FirStage::new(coeffs.clone()).unwrap();
                init(&mut stage, 1, frames);
                run_blocks(&mut stage, x, frames)
            };
            let (y1, y2, y12) = (run(&x1), run(&x2), run(&sum));

            let bound = 1e-4 * coeffs.len() as f32;
            for n in 0..len {
                let lhs = y12.channel(0)[n];
                let rhs = y1.channel(0)[n] + y2.channel(0)[n];
                prop_assert!((lhs - rhs).abs() <= bound, "{} vs {}", lhs, rhs);
            }
        }
    }
}
