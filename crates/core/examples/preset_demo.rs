//! Build a pipeline from suboption strings, save it as a preset, load it
//! back and push a few blocks through it
//!
//! Run with: cargo run --package qdsp-core --example preset_demo

use qdsp_core::{PipelineConfig, TracingSink};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("qdsp=debug,qdsp_core=debug,info")
        .init();

    let config = PipelineConfig::from_tokens(
        64,
        &["gate,t=-40,h=0.01", "iir,lp2,f=2000,q=0.7071", "gain,g=-6,t=-1"],
    )?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("demo.toml");
    config.save_to_file(&path).await?;
    println!("{}", std::fs::read_to_string(&path)?);

    let loaded = PipelineConfig::load_from_file(&path).await?;
    let mut pipeline = loaded.build(Arc::new(TracingSink))?;
    pipeline.configure(loaded.geometry(48000, 1)?)?;

    let tone: Vec<f32> = (0..64)
        .map(|n| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 48000.0).sin())
        .collect();
    let silence = vec![0.0; 64];
    let mut out = vec![0.0; 64];

    for (i, input) in [&tone, &tone, &silence, &silence, &silence, &tone]
        .into_iter()
        .enumerate()
    {
        pipeline.process(&[input.as_slice()], &mut [out.as_mut_slice()])?;
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        println!("block {}: peak {:.4}", i, peak);
    }

    Ok(())
}
