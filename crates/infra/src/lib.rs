//! Drivers that move audio in and out of a `qdsp-core` pipeline
//!
//! - [`audio::file`]: WAV file loop
//! - [`audio::live`]: real-time callback driver over the default host API
//! - [`audio::interleave`]: frame layout conversion

pub mod audio;
pub mod error;

pub use error::{DriverError, Result};
