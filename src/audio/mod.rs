//! Audio buffers, mixing, effects, playback and export.
//!
//! Everything here works on interleaved 16-bit PCM:
//! - WAV decoding and encoding for the canonical 44-byte header
//! - Mixing several sources into one looping active mix
//! - Destructive effects, including a phase-vocoder pitch shift
//! - A lock-free playback cursor and rodio output
//! - Trailing-window export

pub mod buffer;
pub mod cursor;
pub mod effects;
pub mod export;
pub mod mixer;
pub mod output;
pub mod wav;

pub use buffer::{AudioBuffer, SourceId};
pub use cursor::{PcmSample, PlaybackCursor, Rendered};
pub use effects::{Effect, EffectsEngine, Mood, Preset};
pub use export::{export_to_file, export_window};
pub use mixer::{MixEngine, MixHandle};
pub use output::{AudioDriver, OfflineDriver, RodioDriver};
