//! Audio drivers that pull frames from a [`PlaybackCursor`].
//!
//! The engine never talks to an audio device directly. It owns one
//! [`AudioDriver`] and hands it a cursor on start; the driver decides when
//! frames are pulled.

use super::cursor::PlaybackCursor;
use crate::error::{EngineError, Result};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Frames rendered per block on the output thread.
/// Smaller = lower latency, more frequent snapshot loads.
const BLOCK_FRAMES: usize = 512;

/// Largest channel count the output block is sized for.
const MAX_CHANNELS: usize = 8;

/// Capability interface for something that consumes the playback cursor.
pub trait AudioDriver {
    /// Binds the cursor and begins pulling frames from it.
    fn start(&mut self, cursor: PlaybackCursor) -> Result<()>;

    /// Stops pulling frames. Safe to call when already stopped.
    fn stop(&mut self);

    /// Pulls `frames` frames for drivers that are advanced by the caller.
    ///
    /// Callback-driven drivers ignore this and return 0.
    fn feed(&mut self, frames: usize) -> Result<usize>;

    /// Returns true between a successful `start` and `stop`.
    fn is_running(&self) -> bool;
}

/// Audio source that reads blocks from the cursor.
/// Implements rodio's Source trait for playback.
struct CursorSource {
    cursor: PlaybackCursor,
    /// Cleared by the driver to end the stream.
    running: Arc<AtomicBool>,
    /// Interleaved block, allocated once up front.
    block: Vec<f32>,
    /// Valid samples in `block`.
    block_len: usize,
    /// Next sample to hand out.
    block_pos: usize,
    channels: u16,
    sample_rate: u32,
}

impl CursorSource {
    fn new(cursor: PlaybackCursor, running: Arc<AtomicBool>) -> Self {
        let (channels, sample_rate) = cursor.format().unwrap_or((2, 44100));
        let mut source = Self {
            cursor,
            running,
            block: vec![0.0; BLOCK_FRAMES * MAX_CHANNELS],
            block_len: 0,
            block_pos: 0,
            channels,
            sample_rate,
        };
        source.refill();
        source
    }

    /// Renders the next block so channel count and rate are known before
    /// its first sample is handed out.
    fn refill(&mut self) {
        let wanted = self
            .cursor
            .format()
            .map(|(channels, _)| channels)
            .unwrap_or(self.channels)
            .clamp(1, MAX_CHANNELS as u16) as usize;

        let rendered = self.cursor.render(&mut self.block[..BLOCK_FRAMES * wanted]);
        if rendered.frames > 0 && (rendered.channels as usize) <= MAX_CHANNELS {
            self.channels = rendered.channels;
            self.sample_rate = rendered.sample_rate;
            self.block_len = rendered.frames * rendered.channels as usize;
        } else {
            // Nothing loaded: keep the last layout and play silence.
            let len = BLOCK_FRAMES * self.channels as usize;
            self.block[..len].fill(0.0);
            self.block_len = len;
        }
        self.block_pos = 0;
    }
}

impl Iterator for CursorSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if !self.running.load(Ordering::Relaxed) {
            return None;
        }

        let sample = self.block[self.block_pos];
        self.block_pos += 1;
        if self.block_pos >= self.block_len {
            self.refill();
        }
        Some(sample)
    }
}

impl Source for CursorSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.block_len - self.block_pos)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Loops until stopped
    }
}

/// Plays the cursor through the default output device using rodio.
#[derive(Default)]
pub struct RodioDriver {
    /// Audio output stream and handle (must be kept alive while playing).
    stream: Option<(OutputStream, OutputStreamHandle)>,
    /// Shared with the source on the output thread.
    running: Arc<AtomicBool>,
}

impl RodioDriver {
    /// Creates a stopped driver. The device is opened on `start`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioDriver for RodioDriver {
    fn start(&mut self, cursor: PlaybackCursor) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| EngineError::Device(format!("failed to open audio output: {}", e)))?;

        // A fresh flag per stream so a source from a previous start that is
        // still draining cannot be revived.
        self.running = Arc::new(AtomicBool::new(true));
        let source = CursorSource::new(cursor, Arc::clone(&self.running));
        handle.play_raw(source).map_err(|e| {
            self.running.store(false, Ordering::Relaxed);
            EngineError::Device(format!("failed to start audio playback: {}", e))
        })?;

        self.stream = Some((stream, handle));
        tracing::info!("Audio output started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if self.stream.take().is_some() {
            tracing::info!("Audio output stopped");
        }
    }

    fn feed(&mut self, _frames: usize) -> Result<usize> {
        Ok(0)
    }

    fn is_running(&self) -> bool {
        self.stream.is_some() && self.running.load(Ordering::Relaxed)
    }
}

impl Drop for RodioDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Driver without a device: `feed` renders frames into memory.
///
/// Useful headless, and for checking what playback would have produced.
#[derive(Debug, Default)]
pub struct OfflineDriver {
    cursor: Option<PlaybackCursor>,
    captured: Vec<i16>,
}

impl OfflineDriver {
    /// Creates a stopped driver with nothing captured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interleaved samples rendered so far.
    pub fn captured(&self) -> &[i16] {
        &self.captured
    }
}

impl AudioDriver for OfflineDriver {
    fn start(&mut self, cursor: PlaybackCursor) -> Result<()> {
        self.cursor = Some(cursor);
        Ok(())
    }

    fn stop(&mut self) {
        self.cursor = None;
    }

    fn feed(&mut self, frames: usize) -> Result<usize> {
        let cursor = self
            .cursor
            .as_ref()
            .ok_or_else(|| EngineError::state("driver is not running"))?;
        let Some((channels, _)) = cursor.format() else {
            return Ok(0);
        };

        let start = self.captured.len();
        let len = frames * channels as usize;
        self.captured.try_reserve(len)?;
        self.captured.resize(start + len, 0);
        let rendered = cursor.render(&mut self.captured[start..]);
        self.captured
            .truncate(start + rendered.frames * rendered.channels as usize);
        Ok(rendered.frames)
    }

    fn is_running(&self) -> bool {
        self.cursor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, MixEngine};

    #[test]
    fn test_offline_driver_captures_looping_playback() {
        let mut mixer = MixEngine::new();
        mixer
            .add_source(AudioBuffer::new(vec![1, 2, 3, 4], 8000, 1).unwrap())
            .unwrap();
        let cursor = PlaybackCursor::new(mixer.handle());

        let mut driver = OfflineDriver::new();
        assert!(driver.feed(1).is_err());

        driver.start(cursor.clone()).unwrap();
        assert_eq!(driver.feed(3).unwrap(), 3);
        assert_eq!(driver.feed(3).unwrap(), 3);
        assert_eq!(driver.captured(), &[1, 2, 3, 4, 1, 2]);
        assert_eq!(cursor.position(), 2);

        driver.stop();
        assert!(!driver.is_running());
    }

    #[test]
    fn test_offline_driver_without_mix_renders_nothing() {
        let mixer = MixEngine::new();
        let mut driver = OfflineDriver::new();
        driver.start(PlaybackCursor::new(mixer.handle())).unwrap();
        assert_eq!(driver.feed(64).unwrap(), 0);
        assert!(driver.captured().is_empty());
    }

    #[test]
    fn test_cursor_source_blocks_follow_mix_format() {
        let mut mixer = MixEngine::new();
        mixer
            .add_source(AudioBuffer::new(vec![16384, -16384], 22050, 2).unwrap())
            .unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let mut source = CursorSource::new(PlaybackCursor::new(mixer.handle()), Arc::clone(&running));

        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 22050);
        assert_eq!(source.current_frame_len(), Some(BLOCK_FRAMES * 2));
        assert_eq!(source.next(), Some(0.5));
        assert_eq!(source.next(), Some(-0.5));

        running.store(false, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }

    #[test]
    fn test_cursor_source_plays_silence_without_mix() {
        let mixer = MixEngine::new();
        let running = Arc::new(AtomicBool::new(true));
        let mut source = CursorSource::new(PlaybackCursor::new(mixer.handle()), running);
        assert_eq!(source.channels(), 2);
        assert!((0..BLOCK_FRAMES * 4).all(|_| source.next() == Some(0.0)));
    }
}
