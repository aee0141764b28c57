//! qdsp command-line front end

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use qdsp_core::{PipelineConfig, StageConfig, StageKind, TracingSink};
use qdsp_infra::audio::{FileProcessor, LiveConfig, LiveEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qdsp")]
#[command(about = "Block-based audio processing pipeline", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a WAV file
    File(FileArgs),
    /// Process the default input device into the default output device
    Live(LiveArgs),
    /// Print the options of every stage type
    Stages,
}

#[derive(Args, Debug)]
struct FileArgs {
    /// Input WAV file
    #[arg(short, long)]
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// Channel count
    #[arg(short, long)]
    channels: usize,

    /// Sample rate, defaults to the output device's rate
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug, Default)]
struct PipelineArgs {
    /// Frames per block
    #[arg(short = 'n', long)]
    frames: Option<usize>,

    /// Stage, e.g. `gain,g=-6` (repeatable, applied in order)
    #[arg(short = 'p', long = "stage", value_name = "STAGE")]
    stages: Vec<String>,

    /// TOML preset; `-p` stages are appended after its stages
    #[arg(long)]
    preset: Option<PathBuf>,

    /// Write the resulting pipeline to a TOML preset
    #[arg(long, value_name = "FILE")]
    save_preset: Option<PathBuf>,
}

impl PipelineArgs {
    /// Combine preset, `-n` and `-p` into one pipeline description
    async fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.preset {
            Some(path) => PipelineConfig::load_from_file(path)
                .await
                .with_context(|| format!("loading preset {}", path.display()))?,
            None => PipelineConfig {
                frames: PipelineConfig::DEFAULT_FRAMES,
                stages: Vec::new(),
            },
        };

        for token in &self.stages {
            let stage = StageConfig::parse(token).with_context(|| format!("stage `{}`", token))?;
            config.stages.push(stage);
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if config.stages.is_empty() {
            warn!("No stages given, audio passes through unchanged");
        }

        if let Some(path) = &self.save_preset {
            config
                .save_to_file(path)
                .await
                .with_context(|| format!("saving preset {}", path.display()))?;
        }
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_file(args: FileArgs) -> anyhow::Result<()> {
    let config = args.pipeline.resolve().await?;
    let pipeline = config
        .build(Arc::new(TracingSink))
        .context("building pipeline")?;
    let frames = config.frames;
    let FileArgs { input, output, .. } = args;

    let stats = tokio::task::spawn_blocking(move || {
        let mut processor = FileProcessor::new(pipeline, frames);
        processor
            .process_file(&input, &output)
            .with_context(|| format!("processing {} into {}", input.display(), output.display()))
    })
    .await
    .context("file processing task failed")??;

    info!(
        "{} frames ({:.2} s of audio) processed in {:?}",
        stats.frames,
        stats.audio_duration().as_secs_f64(),
        stats.processing
    );
    Ok(())
}

async fn run_live(args: LiveArgs) -> anyhow::Result<()> {
    if args.channels == 0 {
        bail!("channel count must be at least 1");
    }
    let config = args.pipeline.resolve().await?;
    let pipeline = config
        .build(Arc::new(TracingSink))
        .context("building pipeline")?;

    let engine = LiveEngine::start(
        pipeline,
        LiveConfig {
            channels: args.channels,
            frames: config.frames,
            sample_rate: args.sample_rate,
        },
    )
    .context("starting live streams")?;

    info!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    engine.stop();
    Ok(())
}

fn print_stages() {
    println!("Stages (-p NAME,KEY=VALUE,...):");
    for kind in StageKind::ALL {
        println!();
        print!("{}", kind.help());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::File(args) => run_file(args).await,
        Command::Live(args) => run_live(args).await,
        Command::Stages => {
            print_stages();
            Ok(())
        }
    }
}
