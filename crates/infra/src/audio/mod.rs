//! Audio drivers
//!
//! The file driver reads and writes WAV through hound. The live driver uses
//! CPAL, which abstracts platform-specific APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod file;
pub mod interleave;
pub mod live;

pub use file::{FileProcessor, FileStats};
pub use interleave::{deinterleave, interleave};
pub use live::{LiveConfig, LiveEngine, LiveStats};
