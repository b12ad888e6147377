//! Error type shared by every engine operation.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors surfaced by the engine to its caller.
///
/// Nothing in the engine retries; every failure is handed back to the UI layer
/// so it can be reported to the user.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A file could not be opened, read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a canonical 16-bit PCM WAV file.
    #[error("unsupported WAV format: {0}")]
    Format(String),

    /// A working buffer could not be allocated.
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// The request does not make sense in the engine's current state.
    #[error("invalid engine state: {0}")]
    State(String),

    /// The audio output device could not be opened or started.
    #[error("audio device error: {0}")]
    Device(String),

    /// The configuration file could not be parsed or serialized.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        EngineError::Format(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        EngineError::State(msg.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
