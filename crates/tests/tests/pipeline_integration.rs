//! End-to-end tests driving complete pipelines built from stage tokens and
//! presets, through the in-memory block driver and the WAV file driver.

use proptest::prelude::*;
use qdsp_core::{ConfigError, DspError, Geometry, NullSink, Pipeline, PipelineConfig};
use qdsp_infra::audio::FileProcessor;
use qdsp_tests::{impulse, linspace, noise, run_mono, run_planar, sine, write_coefficients};
use std::sync::Arc;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 48000;

fn build(frames: usize, tokens: &[String]) -> Pipeline {
    PipelineConfig::from_tokens(frames, tokens)
        .unwrap()
        .build(Arc::new(NullSink))
        .unwrap()
}

fn configured(tokens: &[String], sample_rate: u32, channels: usize, frames: usize) -> Pipeline {
    let mut pipeline = build(frames, tokens);
    pipeline
        .configure(Geometry::new(sample_rate, channels, frames).unwrap())
        .unwrap();
    pipeline
}

fn tokens(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// FIR
// ============================================================================

#[test]
fn test_fir_identity_any_geometry() {
    let dir = TempDir::new().unwrap();
    let path = write_coefficients(dir.path(), "identity.txt", &[1.0]).unwrap();
    let stage = format!("fir,h={}", path.display());

    for channels in [1, 2, 3, 8] {
        for frames in [1, 7, 64, 256] {
            let mut pipeline = configured(&[stage.clone()], SAMPLE_RATE, channels, frames);
            let inputs: Vec<Vec<f32>> = (0..channels)
                .map(|c| noise(c as u64, 300, 1.0))
                .collect();

            let outputs = run_planar(&mut pipeline, &inputs, frames).unwrap();
            assert_eq!(outputs, inputs, "{} channel(s), {} frames", channels, frames);
        }
    }
}

#[test]
fn test_fir_parallel_matches_serial() {
    let dir = TempDir::new().unwrap();
    let coefficients = noise(99, 200, 0.1);
    let path = write_coefficients(dir.path(), "long.txt", &coefficients).unwrap();
    let stage = vec![format!("fir,h={}", path.display())];

    // 200 taps × 256 frames crosses the worker-pool threshold with 4 channels
    let inputs: Vec<Vec<f32>> = (0..4).map(|c| noise(10 + c, 1024, 0.5)).collect();
    let mut parallel = configured(&stage, SAMPLE_RATE, 4, 256);
    let together = run_planar(&mut parallel, &inputs, 256).unwrap();

    for (c, input) in inputs.iter().enumerate() {
        let mut mono = configured(&stage, SAMPLE_RATE, 1, 256);
        let alone = run_mono(&mut mono, input, 256).unwrap();
        for (a, b) in alone.iter().zip(&together[c]) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fir_linearity(
        coefficients in prop::collection::vec(-1.0f32..1.0, 1..24),
        frames in 1usize..64,
        seed in any::<u64>(),
    ) {
        let dir = TempDir::new().unwrap();
        let path = write_coefficients(dir.path(), "c.txt", &coefficients).unwrap();
        let stage = vec![format!("fir,h={}", path.display())];

        let x1 = noise(seed, 200, 1.0);
        let x2 = noise(seed ^ 0x5555, 200, 1.0);
        let sum: Vec<f32> = x1.iter().zip(&x2).map(|(a, b)| a + b).collect();

        let run = |x: &[f32]| {
            let mut p = configured(&stage, SAMPLE_RATE, 1, frames);
            run_mono(&mut p, x, frames).unwrap()
        };
        let y1 = run(&x1);
        let y2 = run(&x2);
        let y = run(&sum);

        for n in 0..y.len() {
            prop_assert!((y[n] - (y1[n] + y2[n])).abs() < 1e-3);
        }
    }
}

#[test]
fn test_fir_missing_coefficient_file() {
    let config = PipelineConfig::from_tokens(64, &["fir,h=/nonexistent/coefficients.txt"]).unwrap();
    assert!(matches!(
        config.build(Arc::new(NullSink)),
        Err(ConfigError::CoefficientOpen { .. })
    ));
}

// ============================================================================
// IIR
// ============================================================================

#[test]
fn test_lowpass_impulse_settles() {
    let fs = 48000;
    let stage = tokens(&["iir,lp2,f=6000,q=0.707"]);
    let mut pipeline = configured(&stage, fs, 1, 128);

    let response = run_mono(&mut pipeline, &impulse(10_000), 128).unwrap();
    assert!(response.iter().all(|s| s.is_finite() && s.abs() < 1.0));

    let head: f32 = response[..100].iter().map(|s| s.abs()).sum();
    let tail: f32 = response[9_000..].iter().map(|s| s.abs()).sum();
    assert!(head > 0.1);
    assert!(tail < 1e-6);
}

#[test]
fn test_iir_frequency_checked_at_configure() {
    let mut pipeline = build(64, &tokens(&["iir,hp2,f=30000,q=0.7"]));
    let result = pipeline.configure(Geometry::new(48000, 1, 64).unwrap());
    assert!(matches!(result, Err(DspError::Config(ConfigError::Invalid(_)))));

    // the same stage is fine once Nyquist is above 30 kHz
    assert!(pipeline
        .configure(Geometry::new(96000, 1, 64).unwrap())
        .is_ok());
}

#[test]
fn test_lowpass_attenuates_high_tone() {
    let stage = tokens(&["iir,lp2,f=500,q=0.7071"]);
    let mut low = configured(&stage, SAMPLE_RATE, 1, 256);
    let mut high = configured(&stage, SAMPLE_RATE, 1, 256);

    let peak = |signal: &[f32]| signal[4800..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    let passed = run_mono(&mut low, &sine(100.0, SAMPLE_RATE, 9600, 0.5), 256).unwrap();
    let stopped = run_mono(&mut high, &sine(10_000.0, SAMPLE_RATE, 9600, 0.5), 256).unwrap();

    assert!(peak(&passed) > 0.45);
    assert!(peak(&stopped) < 0.01);
}

// ============================================================================
// Gate
// ============================================================================

#[test]
fn test_gate_hysteresis_through_pipeline() {
    const FRAMES: usize = 32;
    let mut pipeline = configured(&tokens(&["gate,t=-20"]), SAMPLE_RATE, 1, FRAMES);

    let mut input = Vec::new();
    for level in [0.5, 0.05, 0.05, 0.05, 0.5, 0.5, 0.5] {
        input.extend(std::iter::repeat(level).take(FRAMES));
    }
    let output = run_mono(&mut pipeline, &input, FRAMES).unwrap();
    let block = |i: usize| &output[i * FRAMES..(i + 1) * FRAMES];

    assert!(block(0).iter().all(|&s| s == 0.5));
    assert!(block(1).iter().all(|&s| s == 0.05));
    let attack: Vec<f32> = linspace(1.0, 0.0, FRAMES).iter().map(|g| g * 0.05).collect();
    for (a, e) in block(2).iter().zip(&attack) {
        assert!((a - e).abs() < 1e-6);
    }
    assert!(block(3).iter().all(|&s| s == 0.0));
    assert!(block(4).iter().all(|&s| s == 0.0));
    let release: Vec<f32> = linspace(0.0, 1.0, FRAMES).iter().map(|g| g * 0.5).collect();
    for (a, e) in block(5).iter().zip(&release) {
        assert!((a - e).abs() < 1e-6);
    }
    assert!(block(6).iter().all(|&s| s == 0.5));
}

// ============================================================================
// Gain / delay / clip
// ============================================================================

#[test]
fn test_delay_round_trip_one_block() {
    // 64 frames at 64 kHz is 1 ms
    const FRAMES: usize = 64;
    let mut pipeline = configured(&tokens(&["gain,d=0.001"]), 64000, 2, FRAMES);

    let inputs = vec![noise(1, FRAMES * 6, 0.9), noise(2, FRAMES * 6, 0.9)];
    let outputs = run_planar(&mut pipeline, &inputs, FRAMES).unwrap();

    for c in 0..2 {
        assert!(outputs[c][..FRAMES].iter().all(|&s| s == 0.0));
        assert_eq!(outputs[c][FRAMES..], inputs[c][..FRAMES * 5]);
    }
}

#[test]
fn test_clip_boundary() {
    let t = 0.3;
    let mut pipeline = configured(&tokens(&["clip,t=0.3"]), SAMPLE_RATE, 1, 128);
    let input = noise(5, 2048, 1.0);
    let output = run_mono(&mut pipeline, &input, 128).unwrap();

    for (x, y) in input.iter().zip(&output) {
        assert!(y.abs() <= t);
        if x.abs() <= t {
            assert_eq!(x, y);
        }
    }
}

#[test]
fn test_gain_clip_threshold_in_dbfs() {
    // -6 dBFS ceiling with +12 dB of gain
    let mut pipeline = configured(&tokens(&["gain,g=12,t=-6"]), SAMPLE_RATE, 1, 64);
    let output = run_mono(&mut pipeline, &sine(1000.0, SAMPLE_RATE, 512, 0.5), 64).unwrap();
    let ceiling = 10f32.powf(-6.0 / 20.0);
    assert!(output.iter().all(|s| s.abs() <= ceiling + 1e-6));
}

// ============================================================================
// Pipeline behaviour
// ============================================================================

fn chain(dir: &TempDir) -> Vec<String> {
    let path = write_coefficients(dir.path(), "smooth.txt", &[0.25, 0.5, 0.25]).unwrap();
    vec![
        "gain,g=-3,d=0.0005".to_string(),
        format!("fir,h={}", path.display()),
        "iir,peq,f=2000,q=1,g=6".to_string(),
        "gate,t=-60,h=0.01".to_string(),
        "clip,t=0.8".to_string(),
    ]
}

#[test]
fn test_reconfigure_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let stages = chain(&dir);
    let geometry = Geometry::new(SAMPLE_RATE, 2, 128).unwrap();
    let inputs = vec![noise(3, 1000, 0.7), sine(440.0, SAMPLE_RATE, 1000, 0.7)];

    let mut once = build(128, &stages);
    once.configure(geometry).unwrap();
    let expected = run_planar(&mut once, &inputs, 128).unwrap();

    let mut twice = build(128, &stages);
    twice.configure(geometry).unwrap();
    twice.configure(geometry).unwrap();
    assert_eq!(run_planar(&mut twice, &inputs, 128).unwrap(), expected);
}

#[test]
fn test_variable_final_block() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = configured(&chain(&dir), SAMPLE_RATE, 1, 256);

    // 1000 = 3 full blocks + 232
    let output = run_mono(&mut pipeline, &noise(4, 1000, 0.5), 256).unwrap();
    assert_eq!(output.len(), 1000);
    for i in 0..pipeline.len() {
        assert_eq!(pipeline.sequence(i), Some(4));
    }
}

#[tokio::test]
async fn test_preset_resolves_coefficients_relative_to_preset() {
    let dir = TempDir::new().unwrap();
    write_coefficients(dir.path(), "taps.txt", &[0.5, 0.5]).unwrap();
    let preset = dir.path().join("chain.toml");
    std::fs::write(
        &preset,
        concat!(
            "frames = 16\n",
            "\n",
            "[[stage]]\n",
            "type = \"fir\"\n",
            "h = \"taps.txt\"\n",
            "\n",
            "[[stage]]\n",
            "type = \"gain\"\n",
            "gl = 2.0\n",
        ),
    )
    .unwrap();

    let config = PipelineConfig::load_from_file(&preset).await.unwrap();
    assert_eq!(config.frames, 16);

    let mut pipeline = config.build(Arc::new(NullSink)).unwrap();
    pipeline
        .configure(config.geometry(SAMPLE_RATE, 1).unwrap())
        .unwrap();
    let output = run_mono(&mut pipeline, &impulse(8), 16).unwrap();
    assert_eq!(output, vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_preset_save_and_reload_produces_same_output() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::from_tokens(64, &chain(&dir)).unwrap();
    let path = dir.path().join("presets").join("saved.toml");
    config.save_to_file(&path).await.unwrap();
    let reloaded = PipelineConfig::load_from_file(&path).await.unwrap();

    let input = noise(6, 500, 0.6);
    let mut a = config.build(Arc::new(NullSink)).unwrap();
    let mut b = reloaded.build(Arc::new(NullSink)).unwrap();
    a.configure(config.geometry(SAMPLE_RATE, 1).unwrap()).unwrap();
    b.configure(reloaded.geometry(SAMPLE_RATE, 1).unwrap()).unwrap();

    assert_eq!(
        run_mono(&mut a, &input, 64).unwrap(),
        run_mono(&mut b, &input, 64).unwrap()
    );
}

// ============================================================================
// File driver
// ============================================================================

#[test]
fn test_wav_file_through_chain() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("in.wav");
    let output_path = dir.path().join("out.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let left = sine(220.0, SAMPLE_RATE, 3000, 0.5);
    let right = noise(11, 3000, 0.5);
    let mut writer = hound::WavWriter::create(&input_path, spec).unwrap();
    for (l, r) in left.iter().zip(&right) {
        writer.write_sample(*l).unwrap();
        writer.write_sample(*r).unwrap();
    }
    writer.finalize().unwrap();

    let stages = chain(&dir);
    let mut processor = FileProcessor::new(build(512, &stages), 512);
    let stats = processor.process_file(&input_path, &output_path).unwrap();
    assert_eq!(stats.frames, 3000);
    assert_eq!(stats.blocks, 6);

    // same chain driven block by block in memory
    let mut reference = configured(&stages, SAMPLE_RATE, 2, 512);
    let expected = run_planar(&mut reference, &[left, right], 512).unwrap();

    let mut reader = hound::WavReader::open(&output_path).unwrap();
    assert_eq!(reader.spec(), spec);
    let written: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    for (n, frame) in written.chunks(2).enumerate() {
        assert_eq!(frame[0], expected[0][n]);
        assert_eq!(frame[1], expected[1][n]);
    }
}
