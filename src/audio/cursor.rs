//! Real-time read path through the active mix.
//!
//! The cursor is the only engine code that runs on the audio thread. Each
//! driver callback asks it for a block of frames; it loads the published mix
//! snapshot once, copies frames starting at its position (wrapping around the
//! end of the mix), and advances the position by the number of frames handed
//! out. It never allocates, locks or logs.

use super::buffer::AudioBuffer;
use super::mixer::MixHandle;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sample types the cursor can render into.
pub trait PcmSample: Copy + Send + 'static {
    /// Value written when there is nothing to play.
    const SILENCE: Self;

    /// Converts a 16-bit PCM sample.
    fn from_i16(sample: i16) -> Self;
}

impl PcmSample for i16 {
    const SILENCE: Self = 0;

    #[inline]
    fn from_i16(sample: i16) -> Self {
        sample
    }
}

impl PcmSample for f32 {
    const SILENCE: Self = 0.0;

    #[inline]
    fn from_i16(sample: i16) -> Self {
        sample as f32 / 32768.0
    }
}

/// What a single [`PlaybackCursor::render`] call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rendered {
    /// Frames copied from the mix. 0 when there was no mix.
    pub frames: usize,
    /// Channel layout of the frames. 0 when there was no mix.
    pub channels: u16,
    /// Sample rate of the mix. 0 when there was no mix.
    pub sample_rate: u32,
}

/// Looping read position into the active mix.
///
/// Cheap to clone; clones share the same position.
#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    mix: MixHandle,
    /// Position in frames.
    position: Arc<AtomicUsize>,
}

impl PlaybackCursor {
    /// Creates a cursor at frame 0 reading from `mix`.
    pub fn new(mix: MixHandle) -> Self {
        Self {
            mix,
            position: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current position in frames.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Moves the cursor to `frame`. Wrapped on the next render.
    pub fn seek(&self, frame: usize) {
        self.position.store(frame, Ordering::Release);
    }

    /// Channel count and sample rate of the current mix, if any.
    pub fn format(&self) -> Option<(u16, u32)> {
        self.mix
            .load()
            .as_deref()
            .map(|mix| (mix.channels, mix.sample_rate))
    }

    /// Fills `out` with interleaved frames from the mix and advances.
    ///
    /// `out.len() / channels` frames are produced; any trailing partial frame
    /// is filled with silence. With no mix loaded, `out` is silenced and the
    /// position does not move.
    pub fn render<S: PcmSample>(&self, out: &mut [S]) -> Rendered {
        let guard = self.mix.load();
        let Some(mix) = guard.as_deref() else {
            out.fill(S::SILENCE);
            return Rendered::default();
        };
        self.render_from(mix, out)
    }

    fn render_from<S: PcmSample>(&self, mix: &AudioBuffer, out: &mut [S]) -> Rendered {
        let channels = mix.channels as usize;
        let total = mix.frames();
        if total == 0 {
            out.fill(S::SILENCE);
            return Rendered {
                frames: 0,
                channels: mix.channels,
                sample_rate: mix.sample_rate,
            };
        }

        let samples = mix.samples();
        let frames = out.len() / channels;
        let mut pos = self.position.load(Ordering::Acquire) % total;

        for frame in out.chunks_exact_mut(channels) {
            let src = &samples[pos * channels..(pos + 1) * channels];
            for (dst, &sample) in frame.iter_mut().zip(src) {
                *dst = S::from_i16(sample);
            }
            pos += 1;
            if pos == total {
                pos = 0;
            }
        }
        out[frames * channels..].fill(S::SILENCE);

        self.position.store(pos, Ordering::Release);
        Rendered {
            frames,
            channels: mix.channels,
            sample_rate: mix.sample_rate,
        }
    }
}
