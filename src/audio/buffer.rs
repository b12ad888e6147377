//! PCM sample buffer.
//!
//! An [`AudioBuffer`] is the value type passed between the codec, the mixer,
//! the effects and the exporter. Samples are signed 16-bit and interleaved by
//! channel (L, R, L, R, ... for stereo).

use crate::error::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Bit depth of every buffer the engine handles.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Global counter for generating unique source IDs.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a source buffer held by the mixer.
///
/// The UI keeps these to address a source when changing its volume or
/// removing it, without relying on list positions that shift on removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Generates a new unique source ID.
    pub fn new() -> Self {
        Self(SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Interleaved 16-bit PCM audio plus its format metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples. Length is always a multiple of `channels`.
    samples: Vec<i16>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,

    /// Bits per sample. Always [`BITS_PER_SAMPLE`].
    pub bits_per_sample: u16,

    /// Gain applied when this buffer is summed into the mix (not for the
    /// first source, which is copied verbatim).
    pub mix_volume: f32,

    /// File this buffer was loaded from, if any.
    pub source_path: Option<PathBuf>,
}

impl AudioBuffer {
    /// Wraps interleaved samples in a buffer.
    ///
    /// # Errors
    ///
    /// Returns `Format` if `channels` or `sample_rate` is zero, or if the
    /// sample count is not a whole number of frames.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels == 0 {
            return Err(EngineError::format("channel count must be at least 1"));
        }
        if sample_rate == 0 {
            return Err(EngineError::format("sample rate must be positive"));
        }
        if samples.len() % channels as usize != 0 {
            return Err(EngineError::format(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
            bits_per_sample: BITS_PER_SAMPLE,
            mix_volume: 1.0,
            source_path: None,
        })
    }

    /// Creates a buffer of `frames` silent frames.
    pub fn silent(frames: usize, sample_rate: u32, channels: u16) -> Result<Self> {
        let samples = try_filled(frames * channels.max(1) as usize, 0i16)?;
        Self::new(samples, sample_rate, channels)
    }

    /// Attaches the path the buffer was loaded from.
    pub fn with_source_path(mut self, path: impl AsRef<Path>) -> Self {
        self.source_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Returns the interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Returns the interleaved samples for in-place editing.
    ///
    /// The slice cannot change length, so the frame invariant is preserved.
    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Total number of interleaved samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns true if both buffers share rate, channel count and length.
    pub fn same_shape(&self, other: &AudioBuffer) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.samples.len() == other.samples.len()
    }

    /// Copy of this buffer that reports allocation failure instead of aborting.
    pub fn try_clone(&self) -> Result<Self> {
        let mut samples = Vec::new();
        samples.try_reserve_exact(self.samples.len())?;
        samples.extend_from_slice(&self.samples);
        Ok(Self {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            mix_volume: self.mix_volume,
            source_path: self.source_path.clone(),
        })
    }

    /// Display name for the buffer (file name, or "untitled").
    pub fn name(&self) -> String {
        self.source_path
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string())
    }
}

/// Saturates a wide sample value into the signed 16-bit range.
#[inline]
pub fn clamp_i16(value: f64) -> i16 {
    value.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Allocates a vector of `len` copies of `value`, reporting failure as
/// [`EngineError::Allocation`].
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, value);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_partial_frames() {
        assert!(AudioBuffer::new(vec![1, 2, 3], 44100, 2).is_err());
        assert!(AudioBuffer::new(vec![1, 2, 3, 4], 44100, 2).is_ok());
    }

    #[test]
    fn test_new_rejects_zero_format_fields() {
        assert!(AudioBuffer::new(vec![], 44100, 0).is_err());
        assert!(AudioBuffer::new(vec![], 0, 1).is_err());
    }

    #[test]
    fn test_frames_and_duration() {
        let buffer = AudioBuffer::silent(22050, 44100, 2).unwrap();
        assert_eq!(buffer.len(), 44100);
        assert_eq!(buffer.frames(), 22050);
        assert!((buffer.duration_seconds() - 0.5).abs() < 1e-9);
        assert_eq!(buffer.bits_per_sample, 16);
        assert_eq!(buffer.mix_volume, 1.0);
    }

    #[test]
    fn test_clamp_i16() {
        assert_eq!(clamp_i16(40000.0), 32767);
        assert_eq!(clamp_i16(-40000.0), -32768);
        assert_eq!(clamp_i16(123.9), 123);
    }

    #[test]
    fn test_source_ids_are_unique() {
        let a = SourceId::new();
        let b = SourceId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_name_uses_file_name() {
        let buffer = AudioBuffer::silent(1, 8000, 1)
            .unwrap()
            .with_source_path("/tmp/loops/drums.wav");
        assert_eq!(buffer.name(), "drums.wav");
        assert_eq!(AudioBuffer::silent(1, 8000, 1).unwrap().name(), "untitled");
    }
}
