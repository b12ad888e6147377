//! tastewarp - A looping audio mixer with destructive effects.
//!
//! This library provides the audio core of the TasteWarp app: loading WAV
//! sources, mixing them into a single loop, mangling the loop with effects,
//! playing it, and exporting the most recently played minute.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;

// Re-export commonly used types
pub use audio::{AudioBuffer, Effect, MixEngine, Mood, PlaybackCursor, Preset, SourceId};
pub use config::EngineConfig;
pub use engine::{Engine, PlaybackState};
pub use error::{EngineError, Result};
