//! Signal generators and block drivers shared by the integration tests

use qdsp_core::{DspError, Pipeline};
use std::f32::consts::PI;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sine wave of `len` samples
pub fn sine(frequency: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|n| amplitude * (2.0 * PI * frequency * n as f32 / sample_rate as f32).sin())
        .collect()
}

/// Unit impulse at sample 0
pub fn impulse(len: usize) -> Vec<f32> {
    let mut signal = vec![0.0; len];
    if let Some(first) = signal.first_mut() {
        *first = 1.0;
    }
    signal
}

/// Deterministic white noise in [-amplitude, amplitude)
pub fn noise(seed: u64, len: usize, amplitude: f32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            amplitude * (2.0 * unit - 1.0)
        })
        .collect()
}

/// `n` evenly spaced values from `from` to `to` inclusive
pub fn linspace(from: f32, to: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![from],
        _ => {
            let step = (to - from) / (n - 1) as f32;
            (0..n).map(|i| from + step * i as f32).collect()
        }
    }
}

/// Feed planar `inputs` through a configured pipeline in blocks of `frames`
pub fn run_planar(
    pipeline: &mut Pipeline,
    inputs: &[Vec<f32>],
    frames: usize,
) -> Result<Vec<Vec<f32>>, DspError> {
    let len = inputs.first().map_or(0, Vec::len);
    let mut outputs = vec![vec![0.0; len]; inputs.len()];

    let mut start = 0;
    while start < len {
        let end = (start + frames).min(len);
        let ins: Vec<&[f32]> = inputs.iter().map(|c| &c[start..end]).collect();
        let mut outs: Vec<&mut [f32]> = outputs.iter_mut().map(|c| &mut c[start..end]).collect();
        pipeline.process(&ins, &mut outs)?;
        start = end;
    }
    Ok(outputs)
}

/// Single-channel form of [`run_planar`]
pub fn run_mono(pipeline: &mut Pipeline, input: &[f32], frames: usize) -> Result<Vec<f32>, DspError> {
    let mut outputs = run_planar(pipeline, &[input.to_vec()], frames)?;
    Ok(outputs.pop().unwrap_or_default())
}

/// Write a one-coefficient-per-line file
pub fn write_coefficients(dir: &Path, name: &str, coefficients: &[f32]) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path)?;
    for c in coefficients {
        writeln!(file, "{}", c)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_deterministic_and_bounded() {
        let a = noise(7, 1000, 0.5);
        assert_eq!(a, noise(7, 1000, 0.5));
        assert_ne!(a, noise(8, 1000, 0.5));
        assert!(a.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_linspace_endpoints() {
        let ramp = linspace(1.0, 0.0, 5);
        assert_eq!(ramp, vec![1.0, 0.75, 0.5, 0.25, 0.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
    }
}
