use qdsp_core::{ConfigError, DspError};
use thiserror::Error;

/// Errors raised by the file and live drivers
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Dsp(#[from] DspError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Unsupported format: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
