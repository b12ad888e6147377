//! Destructive effects applied to the active mix.
//!
//! Every effect is described by an [`Effect`] value and applied through
//! [`EffectsEngine::apply`], which routes the edit through
//! [`MixEngine::edit_active`]. That single entry point takes care of the
//! backup-on-first-edit bookkeeping, so the individual algorithms below only
//! deal with samples.
//!
//! Multichannel buffers are processed per frame where time matters (tempo,
//! echo delay, modulation phase, pitch analysis) so channels never bleed into
//! each other. For mono buffers this is the same as working per sample.

use super::buffer::{clamp_i16, try_filled, AudioBuffer};
use super::mixer::MixEngine;
use crate::error::{EngineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Analysis window length of the phase vocoder, in samples.
pub const PV_WINDOW_SIZE: usize = 2048;

/// Hop between analysis frames (75% overlap).
pub const PV_HOP_SIZE: usize = PV_WINDOW_SIZE / 4;

/// A destructive transformation of the active mix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    /// Masks off bits and randomly flips others. `intensity` in [0, 1].
    BitMash { intensity: f32 },
    /// Zeroes samples at random. `probability` in [0, 1].
    BitDrop { probability: f32 },
    /// Resamples by `factor`, wrapping around. Changes pitch and tempo together.
    TempoShift { factor: f32 },
    /// Phase-vocoder pitch shift.
    PitchShift { semitones: f32 },
    /// Single feed-forward echo tap. `decay` in [0, 1].
    Echo { delay_ms: f32, decay: f32 },
    /// Amplitude modulation by a slow sine.
    Robot { frequency_hz: f32 },
}

impl Effect {
    /// Picks one of the six effects uniformly with randomized parameters.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..6) {
            0 => Effect::BitMash {
                intensity: rng.gen::<f32>() * 0.8,
            },
            1 => Effect::BitDrop {
                probability: rng.gen::<f32>() * 0.3,
            },
            2 => Effect::TempoShift {
                factor: 0.5 + rng.gen::<f32>(),
            },
            3 => Effect::PitchShift {
                semitones: rng.gen::<f32>() * 24.0 - 12.0,
            },
            4 => Effect::Echo {
                delay_ms: 100.0 + rng.gen::<f32>() * 400.0,
                decay: 0.3 + rng.gen::<f32>() * 0.4,
            },
            _ => Effect::Robot {
                frequency_hz: 1.0 + rng.gen::<f32>() * 10.0,
            },
        }
    }

    /// Short human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Effect::BitMash { .. } => "bit mash",
            Effect::BitDrop { .. } => "bit drop",
            Effect::TempoShift { .. } => "tempo shift",
            Effect::PitchShift { .. } => "pitch shift",
            Effect::Echo { .. } => "echo",
            Effect::Robot { .. } => "robot",
        }
    }

    /// Clamps parameters into their documented ranges.
    ///
    /// # Errors
    ///
    /// Returns `State` for non-finite parameters, a tempo factor that is not
    /// positive, or a negative echo delay.
    pub fn validated(self) -> Result<Self> {
        let finite = |name: &str, v: f32| {
            if v.is_finite() {
                Ok(v)
            } else {
                Err(EngineError::state(format!("{} must be finite, got {}", name, v)))
            }
        };

        Ok(match self {
            Effect::BitMash { intensity } => Effect::BitMash {
                intensity: finite("intensity", intensity)?.clamp(0.0, 1.0),
            },
            Effect::BitDrop { probability } => Effect::BitDrop {
                probability: finite("probability", probability)?.clamp(0.0, 1.0),
            },
            Effect::TempoShift { factor } => {
                let factor = finite("tempo factor", factor)?;
                if factor <= 0.0 {
                    return Err(EngineError::state(format!(
                        "tempo factor must be positive, got {}",
                        factor
                    )));
                }
                Effect::TempoShift { factor }
            }
            Effect::PitchShift { semitones } => Effect::PitchShift {
                semitones: finite("semitones", semitones)?,
            },
            Effect::Echo { delay_ms, decay } => {
                let delay_ms = finite("echo delay", delay_ms)?;
                if delay_ms < 0.0 {
                    return Err(EngineError::state("echo delay cannot be negative"));
                }
                Effect::Echo {
                    delay_ms,
                    decay: finite("decay", decay)?.clamp(0.0, 1.0),
                }
            }
            Effect::Robot { frequency_hz } => Effect::Robot {
                frequency_hz: finite("modulation frequency", frequency_hz)?,
            },
        })
    }

    /// Applies the effect to `buffer` in place.
    ///
    /// Parameters are expected to have been through [`Effect::validated`].
    pub fn apply<R: Rng + ?Sized>(&self, buffer: &mut AudioBuffer, rng: &mut R) -> Result<()> {
        match *self {
            Effect::BitMash { intensity } => bit_mash(buffer.samples_mut(), intensity, rng),
            Effect::BitDrop { probability } => bit_drop(buffer.samples_mut(), probability, rng),
            Effect::TempoShift { factor } => return tempo_shift(buffer, factor),
            Effect::PitchShift { semitones } => return pitch_shift(buffer, semitones),
            Effect::Echo { delay_ms, decay } => return add_echo(buffer, delay_ms, decay),
            Effect::Robot { frequency_hz } => add_robot(buffer, frequency_hz),
        }
        Ok(())
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::BitMash { intensity } => write!(f, "bit mash ({:.2})", intensity),
            Effect::BitDrop { probability } => write!(f, "bit drop ({:.2})", probability),
            Effect::TempoShift { factor } => write!(f, "tempo shift (x{:.2})", factor),
            Effect::PitchShift { semitones } => write!(f, "pitch shift ({:+.1} st)", semitones),
            Effect::Echo { delay_ms, decay } => {
                write!(f, "echo ({:.0} ms, {:.2})", delay_ms, decay)
            }
            Effect::Robot { frequency_hz } => write!(f, "robot ({:.1} Hz)", frequency_hz),
        }
    }
}

/// The fixed-parameter effects behind the toolbar buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Mash,
    Drop,
    Faster,
    Slower,
    PitchUp,
    PitchDown,
    Echo,
    Robot,
}

impl Preset {
    /// All presets in toolbar order.
    pub const ALL: [Preset; 8] = [
        Preset::Mash,
        Preset::Drop,
        Preset::Faster,
        Preset::Slower,
        Preset::PitchUp,
        Preset::PitchDown,
        Preset::Echo,
        Preset::Robot,
    ];

    /// The effect this preset applies.
    pub fn effect(self) -> Effect {
        match self {
            Preset::Mash => Effect::BitMash { intensity: 0.5 },
            Preset::Drop => Effect::BitDrop { probability: 0.2 },
            Preset::Faster => Effect::TempoShift { factor: 1.2 },
            Preset::Slower => Effect::TempoShift { factor: 0.8 },
            Preset::PitchUp => Effect::PitchShift { semitones: 2.0 },
            Preset::PitchDown => Effect::PitchShift { semitones: -2.0 },
            Preset::Echo => Effect::Echo {
                delay_ms: 200.0,
                decay: 0.5,
            },
            Preset::Robot => Effect::Robot { frequency_hz: 5.0 },
        }
    }
}

/// Two-step effect chains that give the loop an overall character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Warm,
    Cool,
    Dark,
    Light,
    Goth,
    Baroque,
    Romantic,
}

impl Mood {
    /// All moods in menu order.
    pub const ALL: [Mood; 7] = [
        Mood::Warm,
        Mood::Cool,
        Mood::Dark,
        Mood::Light,
        Mood::Goth,
        Mood::Baroque,
        Mood::Romantic,
    ];

    /// The effects this mood applies, in order.
    pub fn chain(self) -> &'static [Effect] {
        match self {
            Mood::Warm => &[
                Effect::BitMash { intensity: 0.2 },
                Effect::PitchShift { semitones: 0.5 },
            ],
            Mood::Cool => &[
                Effect::Echo {
                    delay_ms: 300.0,
                    decay: 0.3,
                },
                Effect::PitchShift { semitones: -0.5 },
            ],
            Mood::Dark => &[
                Effect::Echo {
                    delay_ms: 500.0,
                    decay: 0.5,
                },
                Effect::PitchShift { semitones: -2.0 },
            ],
            Mood::Light => &[Effect::PitchShift { semitones: 2.0 }],
            Mood::Goth => &[
                Effect::BitMash { intensity: 0.4 },
                Effect::PitchShift { semitones: -4.0 },
            ],
            Mood::Baroque => &[
                Effect::Echo {
                    delay_ms: 200.0,
                    decay: 0.3,
                },
                Effect::PitchShift { semitones: 1.0 },
            ],
            Mood::Romantic => &[
                Effect::Echo {
                    delay_ms: 400.0,
                    decay: 0.2,
                },
                Effect::PitchShift { semitones: 0.5 },
            ],
        }
    }
}

/// Applies effects to a mixer's active mix.
///
/// Owns the random source used by the stochastic effects so results can be
/// reproduced from a seed.
#[derive(Debug)]
pub struct EffectsEngine {
    rng: StdRng,
}

impl Default for EffectsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectsEngine {
    /// Creates an engine seeded from the OS.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates an engine with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Applies `effect` to the active mix.
    ///
    /// The first effect after a reset snapshots the mix so it can be restored.
    ///
    /// # Returns
    ///
    /// The effect as actually applied, with parameters clamped
    ///
    /// # Errors
    ///
    /// Returns `State` if there is no active mix or the parameters are
    /// invalid, and `Allocation` if working memory runs out. The mix is
    /// unchanged on error.
    pub fn apply(&mut self, mixer: &mut MixEngine, effect: Effect) -> Result<Effect> {
        let effect = effect.validated()?;
        tracing::debug!("Applying {}", effect);
        let rng = &mut self.rng;
        mixer.edit_active(|mix| effect.apply(mix, rng))?;
        Ok(effect)
    }

    /// Applies several effects as one edit.
    ///
    /// Every parameter is validated before anything runs, and the mix is
    /// published once at the end, so a failure part way through leaves the
    /// mix as it was.
    ///
    /// # Returns
    ///
    /// The effects as actually applied
    pub fn apply_chain(&mut self, mixer: &mut MixEngine, chain: &[Effect]) -> Result<Vec<Effect>> {
        let chain = chain
            .iter()
            .map(|effect| effect.validated())
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("Applying chain of {} effect(s)", chain.len());
        let rng = &mut self.rng;
        mixer.edit_active(|mix| {
            for effect in &chain {
                effect.apply(mix, &mut *rng)?;
            }
            Ok(())
        })?;
        Ok(chain)
    }

    /// Applies one randomly chosen effect.
    pub fn apply_random(&mut self, mixer: &mut MixEngine) -> Result<Effect> {
        let effect = Effect::random(&mut self.rng);
        self.apply(mixer, effect)
    }
}

/// Mask applied by [`bit_mash`]: `0xFFFF >> floor(intensity * 8)`.
pub fn bit_mash_mask(intensity: f32) -> u16 {
    let shift = (intensity.clamp(0.0, 1.0) * 8.0).floor() as u32;
    0xFFFFu16 >> shift
}

/// Masks every sample and randomly flips one bit in roughly
/// `intensity * 10%` of them.
pub fn bit_mash<R: Rng + ?Sized>(samples: &mut [i16], intensity: f32, rng: &mut R) {
    let mask = bit_mash_mask(intensity);
    let flip_chance = intensity.clamp(0.0, 1.0) * 0.1;

    for sample in samples.iter_mut() {
        let mut bits = *sample as u16 & mask;
        if rng.gen::<f32>() < flip_chance {
            bits ^= 1 << rng.gen_range(0..16u32);
        }
        *sample = bits as i16;
    }
}

/// Zeroes each sample independently with the given probability.
pub fn bit_drop<R: Rng + ?Sized>(samples: &mut [i16], probability: f32, rng: &mut R) {
    let probability = probability.clamp(0.0, 1.0);
    for sample in samples.iter_mut() {
        if rng.gen::<f32>() < probability {
            *sample = 0;
        }
    }
}

/// Output frame `i` takes input frame `floor(i * factor) mod frames`.
///
/// Length is unchanged, so speeding up wraps around to the start and slowing
/// down only covers the beginning of the buffer.
pub fn tempo_shift(buffer: &mut AudioBuffer, factor: f32) -> Result<()> {
    let channels = buffer.channels as usize;
    let frames = buffer.frames();
    if frames == 0 {
        return Ok(());
    }

    let mut source = try_filled(buffer.len(), 0i16)?;
    source.copy_from_slice(buffer.samples());
    let factor = factor as f64;

    buffer
        .samples_mut()
        .par_chunks_mut(channels)
        .enumerate()
        .for_each(|(i, frame)| {
            let src = ((i as f64 * factor) as usize) % frames;
            frame.copy_from_slice(&source[src * channels..(src + 1) * channels]);
        });
    Ok(())
}

/// Adds one delayed copy of the input at `decay` gain.
pub fn add_echo(buffer: &mut AudioBuffer, delay_ms: f32, decay: f32) -> Result<()> {
    let channels = buffer.channels as usize;
    let delay_frames = (delay_ms as f64 * buffer.sample_rate as f64 / 1000.0) as usize;
    let offset = delay_frames.saturating_mul(channels);
    let len = buffer.len();
    if offset >= len {
        return Ok(());
    }

    let mut dry = try_filled(len - offset, 0i16)?;
    dry.copy_from_slice(&buffer.samples()[..len - offset]);
    let decay = decay as f64;

    buffer.samples_mut()[offset..]
        .par_iter_mut()
        .zip(dry.par_iter())
        .for_each(|(out, &delayed)| {
            *out = clamp_i16(*out as f64 + delayed as f64 * decay);
        });
    Ok(())
}

/// Multiplies frame `i` by `0.5 * (1 + sin(i * 2pi * frequency / rate))`.
pub fn add_robot(buffer: &mut AudioBuffer, frequency_hz: f32) {
    let channels = buffer.channels as usize;
    let phase_step = 2.0 * PI * frequency_hz as f64 / buffer.sample_rate as f64;

    buffer
        .samples_mut()
        .par_chunks_mut(channels)
        .enumerate()
        .for_each(|(i, frame)| {
            let modulator = 0.5 * (1.0 + (i as f64 * phase_step).sin());
            for sample in frame {
                *sample = clamp_i16(*sample as f64 * modulator);
            }
        });
}

/// Shifts pitch by `semitones` with a phase vocoder, one channel at a time.
///
/// All working memory is reserved before the buffer is written, so an
/// allocation failure leaves `buffer` untouched.
pub fn pitch_shift(buffer: &mut AudioBuffer, semitones: f32) -> Result<()> {
    let channels = buffer.channels as usize;
    let frames = buffer.frames();
    if frames == 0 {
        return Ok(());
    }

    let factor = 2f64.powf(semitones as f64 / 12.0);
    let mut vocoder = PhaseVocoder::new(PV_WINDOW_SIZE, PV_HOP_SIZE)?;
    let mut input = try_filled(frames, 0.0f64)?;
    let mut shifted = Vec::new();
    shifted.try_reserve_exact(channels)?;

    for channel in 0..channels {
        for (dst, frame) in input.iter_mut().zip(buffer.samples().chunks_exact(channels)) {
            *dst = frame[channel] as f64;
        }
        vocoder.reset();
        shifted.push(vocoder.process(&input, factor)?);
    }

    for (i, frame) in buffer.samples_mut().chunks_exact_mut(channels).enumerate() {
        for (channel, sample) in frame.iter_mut().enumerate() {
            *sample = clamp_i16(shifted[channel][i].round());
        }
    }
    Ok(())
}

/// Wraps a phase into (-pi, pi].
fn wrap_phase(phase: f64) -> f64 {
    let wrapped = (phase + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Short-time Fourier analysis/resynthesis with per-bin phase correction.
struct PhaseVocoder {
    size: usize,
    hop: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    /// Hann window, used for both analysis and synthesis.
    window: Vec<f64>,
    /// Nominal phase advance per hop for each bin.
    expected: Vec<f64>,
    /// Analysis phase of each bin in the previous frame.
    last_phase: Vec<f64>,
    /// Accumulated synthesis phase of each bin.
    sum_phase: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl PhaseVocoder {
    fn new(size: usize, hop: usize) -> Result<Self> {
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let bins = size / 2 + 1;
        let mut window = try_filled(size, 0.0)?;
        for (i, w) in window.iter_mut().enumerate() {
            *w = 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos());
        }
        let mut expected = try_filled(bins, 0.0)?;
        for (bin, e) in expected.iter_mut().enumerate() {
            *e = 2.0 * PI * bin as f64 * hop as f64 / size as f64;
        }

        Ok(Self {
            size,
            hop,
            forward,
            inverse,
            window,
            expected,
            last_phase: try_filled(bins, 0.0)?,
            sum_phase: try_filled(bins, 0.0)?,
            spectrum: try_filled(size, Complex::new(0.0, 0.0))?,
            scratch: try_filled(scratch_len, Complex::new(0.0, 0.0))?,
        })
    }

    fn reset(&mut self) {
        self.last_phase.fill(0.0);
        self.sum_phase.fill(0.0);
    }

    /// Runs the whole signal through the vocoder and returns the result,
    /// the same length as `input`.
    ///
    /// Frames start `size - hop` samples before the signal so that every
    /// output sample is covered by the same number of overlapping windows.
    fn process(&mut self, input: &[f64], factor: f64) -> Result<Vec<f64>> {
        let n = input.len();
        let size = self.size;
        let lead = size - self.hop;
        let span = n + lead + size;

        let mut accumulator = try_filled(span, 0.0f64)?;
        let mut weight = try_filled(span, 0.0f64)?;
        let mut output = try_filled(n, 0.0f64)?;

        let mut start = 0;
        while start < n + lead {
            for (i, bin) in self.spectrum.iter_mut().enumerate() {
                let sample = (start + i)
                    .checked_sub(lead)
                    .and_then(|idx| input.get(idx))
                    .copied()
                    .unwrap_or(0.0);
                *bin = Complex::new(sample * self.window[i], 0.0);
            }

            self.forward
                .process_with_scratch(&mut self.spectrum, &mut self.scratch);

            for bin in 0..=size / 2 {
                let magnitude = self.spectrum[bin].norm();
                let phase = self.spectrum[bin].arg();

                let deviation = wrap_phase(phase - self.last_phase[bin] - self.expected[bin]);
                self.last_phase[bin] = phase;
                let true_frequency = self.expected[bin] + deviation;

                self.sum_phase[bin] = wrap_phase(self.sum_phase[bin] + true_frequency * factor);
                self.spectrum[bin] = Complex::from_polar(magnitude, self.sum_phase[bin]);
            }
            for bin in 1..size / 2 {
                self.spectrum[size - bin] = self.spectrum[bin].conj();
            }

            self.inverse
                .process_with_scratch(&mut self.spectrum, &mut self.scratch);

            for i in 0..size {
                let w = self.window[i];
                accumulator[start + i] += self.spectrum[i].re * w / size as f64;
                weight[start + i] += w * w;
            }

            start += self.hop;
        }

        for (i, out) in output.iter_mut().enumerate() {
            let w = weight[i + lead];
            *out = if w > 1e-9 {
                accumulator[i + lead] / w
            } else {
                0.0
            };
        }
        Ok(output)
    }
}
