//! Block-based real-time audio effects pipeline
//!
//! The core owns the stage execution engine: gain/delay, clip, noise gate,
//! FIR and biquad stages chained through ping/pong buffers. Drivers that move
//! samples in and out of the pipeline live in `qdsp-infra`.

pub mod domain;

pub use domain::*;
