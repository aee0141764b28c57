//! Domain entities and processing rules

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod dsp;
pub mod pipeline;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    db_to_linear, linear_to_db, DspError, Geometry, SampleBuffer, MAX_CHANNELS, MAX_FRAMES,
};
pub use config::{ConfigError, PipelineConfig, StageConfig};
pub use diagnostics::{CollectingSink, DiagnosticSink, NullSink, TracingSink};
pub use dsp::{Block, Stage, StageKind};
pub use pipeline::Pipeline;
