//! Source list and active-mix management.
//!
//! The mixer owns every loaded source buffer and produces the single "active
//! mix" that playback, effects and export all work from. The first source is
//! privileged: its format and length define the mix, and its sample rate
//! defines the export window.
//!
//! The active mix lives in two places:
//! - a private working copy that only the control thread touches, and
//! - a published snapshot behind a [`MixHandle`] that the audio thread loads
//!   once per callback.
//!
//! Every mutation builds a complete new buffer and publishes it with a single
//! atomic pointer swap, so the audio thread never sees a half-written mix.
//! The snapshot it replaces is kept for one more publish and freed here.

use super::buffer::{clamp_i16, AudioBuffer, SourceId};
use crate::error::{EngineError, Result};
use arc_swap::ArcSwapOption;
use rayon::prelude::*;
use std::sync::Arc;

/// Default length of the trailing export window, in seconds.
pub const DEFAULT_WINDOW_SECONDS: u32 = 60;

/// Shared, atomically swappable handle to the published active mix.
pub type MixHandle = Arc<ArcSwapOption<AudioBuffer>>;

/// A loaded source and its identifier.
#[derive(Debug, Clone)]
struct Source {
    id: SourceId,
    buffer: AudioBuffer,
}

/// Owns the source buffers and the active mix.
#[derive(Debug)]
pub struct MixEngine {
    /// Sources in load order. The first one defines the mix format.
    sources: Vec<Source>,

    /// Control-side copy of the active mix. `None` until a source is loaded.
    active: Option<Arc<AudioBuffer>>,

    /// Snapshot of the mix taken before the first destructive edit.
    backup: Option<AudioBuffer>,

    /// True while an effect-created backup exists and has not been restored.
    /// While set, source changes do not overwrite the active mix.
    effect_active: bool,

    /// Handle the render thread reads from.
    published: MixHandle,

    /// Snapshot replaced by the latest publish. Held until the next one so
    /// the last reference to an old mix is released here, not on the audio
    /// thread.
    retired: Option<Arc<AudioBuffer>>,

    /// Length of the trailing export window.
    window_seconds: u32,
}

impl Default for MixEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MixEngine {
    /// Creates an empty mixer with the default 60-second export window.
    pub fn new() -> Self {
        Self::with_window_seconds(DEFAULT_WINDOW_SECONDS)
    }

    /// Creates an empty mixer with a custom export window length.
    pub fn with_window_seconds(window_seconds: u32) -> Self {
        Self {
            sources: Vec::new(),
            active: None,
            backup: None,
            effect_active: false,
            published: Arc::new(ArcSwapOption::empty()),
            retired: None,
            window_seconds: window_seconds.max(1),
        }
    }

    /// Returns a handle to the published mix for the render thread.
    pub fn handle(&self) -> MixHandle {
        Arc::clone(&self.published)
    }

    /// Appends a source and recomputes the mix.
    ///
    /// If this is the first source it becomes the reference for the mix
    /// format and export window, and an initial backup of it is taken.
    ///
    /// # Returns
    ///
    /// The ID under which the source can later be addressed
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the new mix cannot be built; the source list
    /// is left as it was.
    pub fn add_source(&mut self, buffer: AudioBuffer) -> Result<SourceId> {
        let id = SourceId::new();
        let is_first = self.sources.is_empty();

        if let Some(first) = self.sources.first() {
            if first.buffer.sample_rate != buffer.sample_rate {
                tracing::warn!(
                    "Mixing {} at {} Hz into a {} Hz mix; samples are summed by index",
                    buffer.name(),
                    buffer.sample_rate,
                    first.buffer.sample_rate
                );
            }
        }

        let initial_backup = if is_first && self.backup.is_none() {
            Some(buffer.try_clone()?)
        } else {
            None
        };

        tracing::info!(
            "Adding source {} ({} Hz, {} ch, {:.1}s)",
            buffer.name(),
            buffer.sample_rate,
            buffer.channels,
            buffer.duration_seconds()
        );
        self.sources.push(Source { id, buffer });

        if let Err(e) = self.recompute_mix() {
            self.sources.pop();
            return Err(e);
        }

        if initial_backup.is_some() {
            self.backup = initial_backup;
        }

        Ok(id)
    }

    /// Removes a source and recomputes the mix.
    ///
    /// Removing the last source clears the active mix and all backup state.
    ///
    /// # Errors
    ///
    /// Returns `State` if no source has the given ID.
    pub fn remove_source(&mut self, id: SourceId) -> Result<()> {
        let index = self
            .sources
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EngineError::state(format!("no source with id {}", id.as_u64())))?;

        let removed = self.sources.remove(index);
        tracing::info!("Removed source {}", removed.buffer.name());

        if self.sources.is_empty() {
            self.backup = None;
            self.effect_active = false;
        }
        self.recompute_mix()
    }

    /// Sets the gain a source is mixed in with and recomputes the mix.
    ///
    /// Negative volumes are treated as 0.
    ///
    /// # Errors
    ///
    /// Returns `State` for an unknown ID or a non-finite volume.
    pub fn set_volume(&mut self, id: SourceId, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(EngineError::state(format!("volume {} is not finite", volume)));
        }
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::state(format!("no source with id {}", id.as_u64())))?;
        source.buffer.mix_volume = volume.max(0.0);
        self.recompute_mix()
    }

    /// Rebuilds the active mix from the sources.
    ///
    /// While an effect is active this leaves the active mix untouched, so a
    /// volume change or new source cannot clobber an in-progress edit.
    ///
    /// Otherwise the first source is copied verbatim and every other source
    /// is added at its mix volume, sample by sample, saturating at the 16-bit
    /// range. Shorter sources contribute nothing past their end; longer ones
    /// are cut at the mix length. Sources are not resampled.
    pub fn recompute_mix(&mut self) -> Result<()> {
        let Some(first) = self.sources.first() else {
            self.set_active(None);
            return Ok(());
        };

        if self.effect_active && self.active.is_some() {
            tracing::debug!("Effect active, keeping current mix");
            return Ok(());
        }

        let mut mix = first.buffer.try_clone()?;
        mix.mix_volume = 1.0;
        mix.source_path = None;

        for source in &self.sources[1..] {
            let volume = source.buffer.mix_volume as f64;
            mix.samples_mut()
                .par_iter_mut()
                .zip(source.buffer.samples().par_iter())
                .for_each(|(out, &sample)| {
                    *out = clamp_i16(*out as f64 + sample as f64 * volume);
                });
        }

        tracing::debug!(
            "Recomputed mix from {} source(s), {} frames",
            self.sources.len(),
            mix.frames()
        );
        self.set_active(Some(mix));
        Ok(())
    }

    /// Restores the pre-effect mix and drops every source but the first.
    ///
    /// The backup (if any) is copied back verbatim and discarded, the effect
    /// flag is cleared, the first source's volume goes back to 1.0, and the
    /// mix is recomputed. With several sources the result is the first source
    /// alone, not the backed-up mix.
    pub fn reset_to_original(&mut self) -> Result<()> {
        if let Some(backup) = self.backup.take() {
            self.set_active(Some(backup));
        }
        self.effect_active = false;

        if self.sources.len() > 1 {
            tracing::info!("Reset: dropping {} extra source(s)", self.sources.len() - 1);
        }
        self.sources.truncate(1);
        if let Some(first) = self.sources.first_mut() {
            first.buffer.mix_volume = 1.0;
        }

        self.recompute_mix()
    }

    /// Snapshots the active mix as the restore point, once per clean session.
    ///
    /// Does nothing if an effect is already active.
    pub fn ensure_backup(&mut self) -> Result<()> {
        if self.effect_active {
            return Ok(());
        }
        let active = self
            .active
            .as_deref()
            .ok_or_else(|| EngineError::state("no active mix to back up"))?;
        self.backup = Some(active.try_clone()?);
        self.effect_active = true;
        tracing::debug!("Backed up active mix before first effect");
        Ok(())
    }

    /// Applies a destructive edit to the active mix.
    ///
    /// The edit runs on a copy. Only when it succeeds is the backup taken (if
    /// this is the first edit since reset) and the result published, so a
    /// failed edit leaves the mix exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns `State` if there is no active mix, or whatever `edit` returns.
    pub fn edit_active<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut AudioBuffer) -> Result<()>,
    {
        let current = self
            .active
            .as_deref()
            .ok_or_else(|| EngineError::state("no active mix; load a source first"))?;

        let mut edited = current.try_clone()?;
        edit(&mut edited)?;
        debug_assert!(edited.same_shape(current));

        self.ensure_backup()?;
        self.set_active(Some(edited));
        Ok(())
    }

    fn set_active(&mut self, mix: Option<AudioBuffer>) {
        self.active = mix.map(Arc::new);
        self.retired = self.published.swap(self.active.clone());
    }

    /// Returns the active mix, if any.
    pub fn active(&self) -> Option<&AudioBuffer> {
        self.active.as_deref()
    }

    /// Returns the restore point, if any.
    pub fn backup(&self) -> Option<&AudioBuffer> {
        self.backup.as_ref()
    }

    /// Returns true while an effect-created backup is outstanding.
    pub fn is_effect_active(&self) -> bool {
        self.effect_active
    }

    /// Sample rate of the first source.
    pub fn target_sample_rate(&self) -> Option<u32> {
        self.sources.first().map(|s| s.buffer.sample_rate)
    }

    /// Number of frames in the trailing export window.
    pub fn window_frames(&self) -> usize {
        self.target_sample_rate()
            .map(|rate| rate as usize * self.window_seconds as usize)
            .unwrap_or(0)
    }

    /// Number of loaded sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Iterates over the sources in load order.
    pub fn sources(&self) -> impl Iterator<Item = (SourceId, &AudioBuffer)> {
        self.sources.iter().map(|s| (s.id, &s.buffer))
    }

    /// Looks up a source by ID.
    pub fn source(&self, id: SourceId) -> Option<&AudioBuffer> {
        self.sources.iter().find(|s| s.id == id).map(|s| &s.buffer)
    }

    /// Removes all sources and the active mix.
    pub fn clear(&mut self) {
        self.sources.clear();
        self.backup = None;
        self.effect_active = false;
        self.set_active(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: Vec<i16>) -> AudioBuffer {
        AudioBuffer::new(samples, 8000, 1).unwrap()
    }

    #[test]
    fn test_single_source_is_copied_verbatim() {
        let mut mixer = MixEngine::new();
        let samples = vec![0, 100, -100, i16::MAX, i16::MIN, 42];
        mixer.add_source(mono(samples.clone())).unwrap();

        assert_eq!(mixer.active().unwrap().samples(), samples.as_slice());
        assert_eq!(mixer.handle().load_full().unwrap().samples(), samples.as_slice());
    }

    #[test]
    fn test_first_source_defines_window_and_backup() {
        let mut mixer = MixEngine::new();
        assert_eq!(mixer.window_frames(), 0);

        mixer.add_source(mono(vec![1, 2, 3])).unwrap();
        assert_eq!(mixer.target_sample_rate(), Some(8000));
        assert_eq!(mixer.window_frames(), 8000 * 60);
        assert_eq!(mixer.backup().unwrap().samples(), &[1, 2, 3]);
        assert!(!mixer.is_effect_active());
    }

    #[test]
    fn test_mixing_sums_with_volume_and_zero_pads() {
        let mut mixer = MixEngine::new();
        mixer.add_source(mono(vec![100, 100, 100, 100])).unwrap();
        let second = mixer.add_source(mono(vec![10, 20])).unwrap();
        assert_eq!(mixer.active().unwrap().samples(), &[110, 120, 100, 100]);

        mixer.set_volume(second, 0.5).unwrap();
        assert_eq!(mixer.active().unwrap().samples(), &[105, 110, 100, 100]);
    }

    #[test]
    fn test_longer_source_is_truncated_to_mix() {
        let mut mixer = MixEngine::new();
        mixer.add_source(mono(vec![1, 1])).unwrap();
        mixer.add_source(mono(vec![1, 1, 1, 1])).unwrap();
        assert_eq!(mixer.active().unwrap().samples(), &[2, 2]);
    }

    #[test]
    fn test_mixing_saturates() {
        let mut mixer = MixEngine::new();
        mixer.add_source(mono(vec![30000, -30000])).unwrap();
        mixer.add_source(mono(vec![30000, -30000])).unwrap();
        assert_eq!(mixer.active().unwrap().samples(), &[i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_recompute_does_not_clobber_active_effect() {
        let mut mixer = MixEngine::new();
        mixer.add_source(mono(vec![100, 100])).unwrap();
        mixer
            .edit_active(|mix| {
                mix.samples_mut().fill(7);
                Ok(())
            })
            .unwrap();

        mixer.add_source(mono(vec![1, 1])).unwrap();
        assert_eq!(mixer.active().unwrap().samples(), &[7, 7]);
        assert_eq!(mixer.source_count(), 2);
    }

    #[test]
    fn test_reset_restores_backup_and_first_source() {
        let mut mixer = MixEngine::new();
        let first = mixer.add_source(mono(vec![100, 200])).unwrap();
        mixer.set_volume(first, 0.25).unwrap();
        mixer.add_source(mono(vec![5, 5])).unwrap();
        let pre_effect = mixer.active().unwrap().clone();

        mixer
            .edit_active(|mix| {
                mix.samples_mut().fill(0);
                Ok(())
            })
            .unwrap();
        assert_eq!(mixer.backup().unwrap(), &pre_effect);

        mixer.reset_to_original().unwrap();
        assert!(!mixer.is_effect_active());
        assert!(mixer.backup().is_none());
        assert_eq!(mixer.source_count(), 1);
        assert_eq!(mixer.source(first).unwrap().mix_volume, 1.0);
        assert_eq!(mixer.active().unwrap().samples(), &[100, 200]);
        // The second source is gone, so this is not the pre-effect mix.
        assert_ne!(mixer.active().unwrap().samples(), pre_effect.samples());
    }

    #[test]
    fn test_failed_edit_leaves_mix_untouched() {
        let mut mixer = MixEngine::new();
        mixer.add_source(mono(vec![1, 2, 3])).unwrap();
        mixer.reset_to_original().unwrap();

        let result = mixer.edit_active(|mix| {
            mix.samples_mut().fill(0);
            Err(EngineError::state("boom"))
        });
        assert!(result.is_err());
        assert_eq!(mixer.active().unwrap().samples(), &[1, 2, 3]);
        assert!(!mixer.is_effect_active());
        assert!(mixer.backup().is_none());
    }

    #[test]
    fn test_edit_without_mix_is_state_error() {
        let mut mixer = MixEngine::new();
        let result = mixer.edit_active(|_| Ok(()));
        assert!(matches!(result, Err(EngineError::State(_))));
    }

    #[test]
    fn test_removing_all_sources_clears_mix() {
        let mut mixer = MixEngine::new();
        let id = mixer.add_source(mono(vec![1, 2])).unwrap();
        mixer.remove_source(id).unwrap();

        assert!(mixer.active().is_none());
        assert!(mixer.handle().load().is_none());
        assert!(mixer.backup().is_none());
        assert!(matches!(mixer.remove_source(id), Err(EngineError::State(_))));
    }

    #[test]
    fn test_removing_first_source_promotes_next() {
        let mut mixer = MixEngine::new();
        let first = mixer.add_source(mono(vec![1, 1, 1])).unwrap();
        mixer
            .add_source(AudioBuffer::new(vec![9, 9], 16000, 1).unwrap())
            .unwrap();
        mixer.remove_source(first).unwrap();

        let mix = mixer.active().unwrap();
        assert_eq!(mix.samples(), &[9, 9]);
        assert_eq!(mix.sample_rate, 16000);
        assert_eq!(mixer.window_frames(), 16000 * 60);
    }

    #[test]
    fn test_set_volume_rejects_bad_input() {
        let mut mixer = MixEngine::new();
        let id = mixer.add_source(mono(vec![1])).unwrap();
        assert!(mixer.set_volume(id, f32::NAN).is_err());
        mixer.set_volume(id, -3.0).unwrap();
        assert_eq!(mixer.source(id).unwrap().mix_volume, 0.0);
    }

    #[test]
    fn test_superseded_snapshot_is_freed_on_next_publish() {
        let mut mixer = MixEngine::new();
        let first = mixer.add_source(mono(vec![1, 2])).unwrap();
        let snapshot = mixer.handle().load_full().unwrap();

        mixer.set_volume(first, 0.5).unwrap();
        assert!(Arc::ptr_eq(mixer.retired.as_ref().unwrap(), &snapshot));
        assert_eq!(Arc::strong_count(&snapshot), 2);

        mixer.set_volume(first, 1.0).unwrap();
        assert_eq!(Arc::strong_count(&snapshot), 1);
    }
}
