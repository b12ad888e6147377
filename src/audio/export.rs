//! Trailing-window export.
//!
//! An export captures the audio that most recently played: the window of
//! frames that ends at the playback cursor, reading backwards through the
//! start of the mix and wrapping into its tail when the cursor is near the
//! beginning. The result is always a fresh buffer that never aliases the mix.

use super::buffer::{try_filled, AudioBuffer};
use super::cursor::PlaybackCursor;
use super::mixer::MixEngine;
use super::wav;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// Timestamp layout used in export file names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Copies the `window_frames` frames that end at `position`.
///
/// The window is capped at the mix length, so a mix shorter than the window
/// comes back whole, rotated to start at the cursor (the oldest frame heard).
/// `position` is reduced modulo the mix length first.
///
/// # Arguments
///
/// * `mix` - The active mix
/// * `position` - Playback position in frames
/// * `window_frames` - Requested window length in frames
///
/// # Errors
///
/// Returns `Allocation` if the copy cannot be allocated.
pub fn trailing_window(
    mix: &AudioBuffer,
    position: usize,
    window_frames: usize,
) -> Result<AudioBuffer> {
    let total = mix.frames();
    let channels = mix.channels as usize;
    let samples = mix.samples();
    let window = window_frames.min(total);

    let mut out = try_filled(window * channels, 0i16)?;
    if window > 0 {
        let start = (position % total + total - window) % total;
        // Frames read before wrapping to the head of the mix.
        let before_wrap = (total - start).min(window);
        let split = before_wrap * channels;
        out[..split].copy_from_slice(&samples[start * channels..start * channels + split]);
        out[split..].copy_from_slice(&samples[..(window - before_wrap) * channels]);
    }

    AudioBuffer::new(out, mix.sample_rate, mix.channels)
}

/// Copies the trailing export window from the mixer's active mix.
///
/// The window length is the mixer's window in seconds at the first source's
/// sample rate.
///
/// # Errors
///
/// Returns `State` if there is no active mix.
pub fn export_window(mixer: &MixEngine, cursor: &PlaybackCursor) -> Result<AudioBuffer> {
    let mix = mixer
        .active()
        .ok_or_else(|| EngineError::state("nothing to export: no active mix"))?;
    let position = cursor.position();
    let window = trailing_window(mix, position, mixer.window_frames())?;
    tracing::debug!(
        "Exported {} frames ending at frame {}",
        window.frames(),
        position % mix.frames().max(1)
    );
    Ok(window)
}

/// Builds `<prefix>_YYYYMMDD_HHMMSS.wav` for the given local time.
pub fn export_filename(prefix: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.wav", prefix, at.format(TIMESTAMP_FORMAT))
}

/// Writes an exported window to a timestamped file in `dir`.
///
/// `dir` is created if missing. If a file with the same timestamp already
/// exists a numeric suffix is appended instead of overwriting it.
///
/// # Arguments
///
/// * `dir` - Directory to write into
/// * `prefix` - File name prefix
/// * `buffer` - Audio to save
///
/// # Returns
///
/// The path of the written file
///
/// # Errors
///
/// Returns `Io` if the directory or file cannot be written.
pub fn export_to_file(dir: &Path, prefix: &str, buffer: &AudioBuffer) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let name = export_filename(prefix, Local::now());
    let mut path = dir.join(&name);
    let mut suffix = 1;
    while path.exists() {
        suffix += 1;
        let stem = name.trim_end_matches(".wav");
        path = dir.join(format!("{}_{}.wav", stem, suffix));
    }

    wav::save(&path, buffer)?;
    tracing::info!(
        "Exported {:.1}s of audio to {:?}",
        buffer.duration_seconds(),
        path
    );
    Ok(path)
}
