//! Leveled diagnostic sink
//!
//! The core reports what it does at configuration time through a sink chosen
//! by the driver instead of writing to a global logger. The default sink
//! forwards to `tracing`.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::Level;

/// Destination for diagnostic messages emitted by the core
pub trait DiagnosticSink: Send + Sync {
    /// Deliver one formatted message at the given level
    fn emit(&self, level: Level, args: fmt::Arguments<'_>);

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::WARN, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::INFO, args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::DEBUG, args);
    }
}

/// Forwards every message to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        match level {
            Level::ERROR => tracing::error!(target: "qdsp", "{}", args),
            Level::WARN => tracing::warn!(target: "qdsp", "{}", args),
            Level::INFO => tracing::info!(target: "qdsp", "{}", args),
            Level::DEBUG => tracing::debug!(target: "qdsp", "{}", args),
            _ => tracing::trace!(target: "qdsp", "{}", args),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _level: Level, _args: fmt::Arguments<'_>) {}
}

/// Keeps messages in memory so callers can inspect them
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<(Level, String)>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything received so far
    pub fn messages(&self) -> Vec<(Level, String)> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True when any message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|(_, m)| m.contains(needle))
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        let message = args.to_string();
        match self.messages.lock() {
            Ok(mut messages) => messages.push((level, message)),
            Err(poisoned) => poisoned.into_inner().push((level, message)),
        }
    }
}
