//! Top-level engine tying the mixer, effects, playback and export together.
//!
//! This is the surface a front end talks to. Every method runs on the caller's
//! (control) thread; the only thing shared with the audio thread is the
//! published mix snapshot and the cursor position.

use crate::audio::cursor::PlaybackCursor;
use crate::audio::effects::{Effect, EffectsEngine, Mood, Preset};
use crate::audio::export;
use crate::audio::mixer::MixEngine;
use crate::audio::output::AudioDriver;
use crate::audio::{wav, AudioBuffer, SourceId};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::history::{ExportHistory, ExportRecord};
use std::path::{Path, PathBuf};

/// Playback state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No driver is pulling frames.
    #[default]
    Stopped,
    /// The driver is pulling frames from the cursor.
    Playing,
}

/// The mixing, effects and export engine.
pub struct Engine {
    config: EngineConfig,
    mixer: MixEngine,
    effects: EffectsEngine,
    cursor: PlaybackCursor,
    /// Output driver. Playback is unavailable until one is attached.
    driver: Option<Box<dyn AudioDriver>>,
    playback_state: PlaybackState,
    exports: ExportHistory,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Creates an engine with no sources and no output driver.
    ///
    /// # Arguments
    ///
    /// * `config` - Export and effect settings
    pub fn new(config: EngineConfig) -> Self {
        let mixer = MixEngine::with_window_seconds(config.export_window_secs);
        let cursor = PlaybackCursor::new(mixer.handle());
        let effects = match config.seed {
            Some(seed) => EffectsEngine::with_seed(seed),
            None => EffectsEngine::new(),
        };
        let exports = ExportHistory::new(config.recent_exports);

        Self {
            config,
            mixer,
            effects,
            cursor,
            driver: None,
            playback_state: PlaybackState::Stopped,
            exports,
        }
    }

    /// Attaches an output driver, replacing (and stopping) any previous one.
    pub fn with_driver<D: AudioDriver + 'static>(mut self, driver: D) -> Self {
        self.set_driver(Box::new(driver));
        self
    }

    /// Replaces the output driver. Playback stops.
    pub fn set_driver(&mut self, driver: Box<dyn AudioDriver>) {
        self.stop();
        self.driver = Some(driver);
    }

    // ==================== Sources ====================

    /// Loads a WAV file and adds it as a source.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Format` if the file cannot be decoded. The engine is
    /// unchanged on error.
    pub fn load_source<P: AsRef<Path>>(&mut self, path: P) -> Result<SourceId> {
        let buffer = wav::load(path.as_ref()).map_err(|e| {
            tracing::warn!("Failed to load {:?}: {}", path.as_ref(), e);
            e
        })?;
        self.mixer.add_source(buffer)
    }

    /// Adds an already decoded buffer as a source.
    pub fn add_source(&mut self, buffer: AudioBuffer) -> Result<SourceId> {
        self.mixer.add_source(buffer)
    }

    /// Removes a source. Removing the last one stops playback.
    pub fn remove_source(&mut self, id: SourceId) -> Result<()> {
        self.mixer.remove_source(id)?;
        if self.mixer.source_count() == 0 {
            self.stop();
            self.cursor.seek(0);
        }
        Ok(())
    }

    /// Drops every source, the mix and any backup, and rewinds the cursor.
    pub fn clear_sources(&mut self) {
        self.stop();
        self.mixer.clear();
        self.cursor.seek(0);
        tracing::info!("Cleared all sources");
    }

    /// Sets a source's mix volume.
    pub fn set_volume(&mut self, id: SourceId, volume: f32) -> Result<()> {
        self.mixer.set_volume(id, volume)
    }

    /// Undoes every effect and drops all sources but the first.
    pub fn reset_to_original(&mut self) -> Result<()> {
        self.mixer.reset_to_original()?;
        tracing::info!("Reset to original mix");
        Ok(())
    }

    // ==================== Effects ====================

    /// Applies an effect to the active mix.
    ///
    /// # Returns
    ///
    /// The effect as applied, after parameter clamping
    ///
    /// # Errors
    ///
    /// Returns `State` if there is no active mix or the parameters are not
    /// usable. The mix is unchanged on error.
    pub fn apply(&mut self, effect: Effect) -> Result<Effect> {
        let applied = self.effects.apply(&mut self.mixer, effect)?;
        tracing::info!("Applied {}", applied);
        Ok(applied)
    }

    /// Applies one of the preset effects.
    pub fn apply_preset(&mut self, preset: Preset) -> Result<Effect> {
        self.apply(preset.effect())
    }

    /// Applies a mood's effect chain as a single edit.
    pub fn apply_mood(&mut self, mood: Mood) -> Result<Vec<Effect>> {
        let applied = self.effects.apply_chain(&mut self.mixer, mood.chain())?;
        tracing::info!("Applied {:?} mood ({} effects)", mood, applied.len());
        Ok(applied)
    }

    /// Applies a randomly chosen effect with random parameters.
    pub fn random_effect(&mut self) -> Result<Effect> {
        let applied = self.effects.apply_random(&mut self.mixer)?;
        tracing::info!("Applied random {}", applied);
        Ok(applied)
    }

    /// Masks every sample and flips random bits in a few of them.
    pub fn bit_mash(&mut self, intensity: f32) -> Result<Effect> {
        self.apply(Effect::BitMash { intensity })
    }

    /// Zeroes a random subset of samples.
    pub fn bit_drop(&mut self, probability: f32) -> Result<Effect> {
        self.apply(Effect::BitDrop { probability })
    }

    /// Resamples the mix in place by `factor`.
    pub fn tempo_shift(&mut self, factor: f32) -> Result<Effect> {
        self.apply(Effect::TempoShift { factor })
    }

    /// Shifts pitch by `semitones` without changing length.
    pub fn pitch_shift(&mut self, semitones: f32) -> Result<Effect> {
        self.apply(Effect::PitchShift { semitones })
    }

    /// Adds a single decaying echo.
    pub fn add_echo(&mut self, delay_ms: f32, decay: f32) -> Result<Effect> {
        self.apply(Effect::Echo { delay_ms, decay })
    }

    /// Amplitude-modulates the mix with a slow sine.
    pub fn add_robot(&mut self, frequency_hz: f32) -> Result<Effect> {
        self.apply(Effect::Robot { frequency_hz })
    }

    // ==================== Export ====================

    /// Copies the audio that played most recently, ending at the cursor.
    ///
    /// # Errors
    ///
    /// Returns `State` if there is no active mix.
    pub fn export_window(&self) -> Result<AudioBuffer> {
        export::export_window(&self.mixer, &self.cursor)
    }

    /// Exports the trailing window to the configured export directory.
    ///
    /// # Returns
    ///
    /// The path of the written file
    pub fn export_to_file(&mut self) -> Result<PathBuf> {
        let dir = self.config.resolved_export_dir();
        self.export_to_dir(&dir)
    }

    /// Exports the trailing window to a timestamped file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `State` if there is no active mix and `Io` if the file cannot
    /// be written. Nothing is recorded on error.
    pub fn export_to_dir(&mut self, dir: &Path) -> Result<PathBuf> {
        let window = self.export_window()?;
        let path = export::export_to_file(dir, &self.config.export_prefix, &window)?;
        self.exports
            .push(ExportRecord::new(&path, window.duration_seconds()));
        Ok(path)
    }

    /// Recent exports, most recent first.
    pub fn recent_exports(&self) -> impl Iterator<Item = &ExportRecord> {
        self.exports.recent()
    }

    /// The most recent export, if any.
    pub fn last_export(&self) -> Option<&ExportRecord> {
        self.exports.latest()
    }

    /// Forgets the recent exports. Files on disk are left alone.
    pub fn clear_recent_exports(&mut self) {
        self.exports.clear();
    }

    // ==================== Playback ====================

    /// Starts the output driver. Does nothing if already playing.
    ///
    /// # Errors
    ///
    /// Returns `State` if no driver is attached, or the driver's error.
    pub fn play(&mut self) -> Result<()> {
        if self.playback_state == PlaybackState::Playing {
            return Ok(());
        }
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| EngineError::state("no audio driver attached"))?;
        driver.start(self.cursor.clone())?;
        self.playback_state = PlaybackState::Playing;
        Ok(())
    }

    /// Stops the output driver. The cursor keeps its position.
    pub fn stop(&mut self) {
        if let Some(driver) = self.driver.as_mut() {
            driver.stop();
        }
        self.playback_state = PlaybackState::Stopped;
    }

    /// Advances push-style drivers by `frames` frames.
    ///
    /// # Returns
    ///
    /// The number of frames rendered
    pub fn feed(&mut self, frames: usize) -> Result<usize> {
        match self.driver.as_mut() {
            Some(driver) if self.playback_state == PlaybackState::Playing => driver.feed(frames),
            _ => Err(EngineError::state("not playing")),
        }
    }

    /// Current playback state.
    pub fn playback_state(&self) -> PlaybackState {
        self.playback_state
    }

    /// Returns true if the driver is pulling frames.
    pub fn is_playing(&self) -> bool {
        self.playback_state == PlaybackState::Playing
    }

    /// Cursor position in frames.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Moves the cursor.
    pub fn seek(&self, frame: usize) {
        self.cursor.seek(frame);
    }

    // ==================== Accessors ====================

    /// The mixer, for inspecting sources and the active mix.
    pub fn mixer(&self) -> &MixEngine {
        &self.mixer
    }

    /// The active mix, if any.
    pub fn active_mix(&self) -> Option<&AudioBuffer> {
        self.mixer.active()
    }

    /// A cursor sharing this engine's position, for custom drivers.
    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor.clone()
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineDriver;

    fn seeded() -> Engine {
        Engine::new(EngineConfig {
            seed: Some(42),
            export_window_secs: 1,
            ..EngineConfig::default()
        })
    }

    fn tone(frames: usize) -> AudioBuffer {
        let samples = (0..frames).map(|i| ((i % 100) as i16 - 50) * 100).collect();
        AudioBuffer::new(samples, 1000, 1).unwrap()
    }

    #[test]
    fn test_effects_need_a_mix() {
        let mut engine = seeded();
        assert!(matches!(engine.bit_mash(0.5), Err(EngineError::State(_))));
        assert!(matches!(engine.random_effect(), Err(EngineError::State(_))));
        assert!(engine.active_mix().is_none());
    }

    #[test]
    fn test_reset_restores_first_source() {
        let mut engine = seeded();
        let original = tone(2000);
        engine.add_source(original.clone()).unwrap();
        let second = engine.add_source(tone(2000)).unwrap();
        engine.set_volume(second, 0.5).unwrap();

        engine.add_echo(100.0, 0.5).unwrap();
        engine.apply_preset(Preset::Robot).unwrap();
        engine.bit_drop(0.3).unwrap();
        engine.reset_to_original().unwrap();

        assert_eq!(engine.mixer().source_count(), 1);
        assert_eq!(engine.active_mix().unwrap().samples(), original.samples());
    }

    #[test]
    fn test_failed_load_leaves_sources_alone() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.wav");
        std::fs::write(&bogus, b"not a wav file at all, far too short").unwrap();

        let mut engine = seeded();
        engine.add_source(tone(10)).unwrap();
        assert!(engine.load_source(&bogus).is_err());
        assert!(engine.load_source(dir.path().join("missing.wav")).is_err());
        assert_eq!(engine.mixer().source_count(), 1);
    }

    #[test]
    fn test_play_requires_driver() {
        let mut engine = seeded();
        assert!(matches!(engine.play(), Err(EngineError::State(_))));
        assert!(matches!(engine.feed(10), Err(EngineError::State(_))));
        assert_eq!(engine.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_offline_playback_moves_export_window() {
        let mut engine = seeded().with_driver(OfflineDriver::new());
        engine.add_source(tone(3000)).unwrap();

        engine.play().unwrap();
        assert!(engine.is_playing());
        assert_eq!(engine.feed(2500).unwrap(), 2500);
        assert_eq!(engine.position(), 2500);

        // 1 second at 1000 Hz ending at frame 2500.
        let window = engine.export_window().unwrap();
        assert_eq!(window.frames(), 1000);
        assert_eq!(
            window.samples(),
            &engine.active_mix().unwrap().samples()[1500..2500]
        );

        engine.stop();
        assert!(matches!(engine.feed(1), Err(EngineError::State(_))));
    }

    #[test]
    fn test_export_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(EngineConfig {
            export_dir: Some(dir.path().to_path_buf()),
            recent_exports: 2,
            export_window_secs: 1,
            seed: Some(1),
            ..EngineConfig::default()
        });
        assert!(engine.export_to_file().is_err());
        assert_eq!(engine.recent_exports().count(), 0);

        engine.add_source(tone(500)).unwrap();
        let paths: Vec<PathBuf> = (0..3).map(|_| engine.export_to_file().unwrap()).collect();

        let recent: Vec<&Path> = engine.recent_exports().map(|r| r.path.as_path()).collect();
        assert_eq!(recent, [paths[2].as_path(), paths[1].as_path()]);
        assert!(paths.iter().all(|p| p.starts_with(dir.path())));
        assert!(paths[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("tastewarp_export_"));
    }

    #[test]
    fn test_removing_last_source_stops_playback() {
        let mut engine = seeded().with_driver(OfflineDriver::new());
        let id = engine.add_source(tone(100)).unwrap();
        engine.play().unwrap();
        engine.feed(40).unwrap();

        engine.remove_source(id).unwrap();
        assert!(!engine.is_playing());
        assert_eq!(engine.position(), 0);
        assert!(engine.export_window().is_err());
    }

    #[test]
    fn test_seeded_engines_agree() {
        let mut a = seeded();
        let mut b = seeded();
        a.add_source(tone(4096)).unwrap();
        b.add_source(tone(4096)).unwrap();

        let ea = a.random_effect().unwrap();
        let eb = b.random_effect().unwrap();
        assert_eq!(ea, eb);
        assert_eq!(a.active_mix(), b.active_mix());
    }

    #[test]
    fn test_short_mix_export_starts_at_cursor() {
        // 500 frames, shorter than the 1 s window at 1000 Hz.
        let mut engine = seeded().with_driver(OfflineDriver::new());
        engine.add_source(tone(500)).unwrap();
        engine.play().unwrap();
        engine.feed(730).unwrap();
        assert_eq!(engine.position(), 230);

        let mix = engine.active_mix().unwrap().samples().to_vec();
        let expected: Vec<i16> = mix[230..].iter().chain(&mix[..230]).copied().collect();
        assert_eq!(engine.export_window().unwrap().samples(), &expected[..]);
    }

    #[test]
    fn test_mood_is_undone_by_reset() {
        let mut engine = seeded();
        let original = tone(4096);
        engine.add_source(original.clone()).unwrap();

        let applied = engine.apply_mood(Mood::Goth).unwrap();
        assert_eq!(applied, Mood::Goth.chain());
        assert_ne!(engine.active_mix().unwrap().samples(), original.samples());

        engine.reset_to_original().unwrap();
        assert_eq!(engine.active_mix().unwrap().samples(), original.samples());
    }

    #[test]
    fn test_clear_sources_empties_engine() {
        let mut engine = seeded().with_driver(OfflineDriver::new());
        engine.add_source(tone(100)).unwrap();
        engine.add_source(tone(100)).unwrap();
        engine.bit_mash(0.5).unwrap();
        engine.play().unwrap();
        engine.feed(30).unwrap();

        engine.clear_sources();
        assert!(!engine.is_playing());
        assert_eq!(engine.position(), 0);
        assert_eq!(engine.mixer().source_count(), 0);
        assert!(engine.mixer().backup().is_none());
        assert!(engine.active_mix().is_none());
    }

    #[test]
    fn test_last_export_and_clearing_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = seeded();
        engine.add_source(tone(200)).unwrap();
        assert!(engine.last_export().is_none());

        let path = engine.export_to_dir(dir.path()).unwrap();
        let last = engine.last_export().unwrap();
        assert_eq!(last.path, path);
        assert!((last.duration_seconds - 0.2).abs() < 1e-9);

        engine.clear_recent_exports();
        assert!(engine.last_export().is_none());
        assert!(path.exists());
    }
}
