//! Per-note synth voice rendering: additive oscillators through a per-voice filter driven by
//! its own filter envelope, for `InstrumentKind::Synth` instruments (`SPEC_FULL.md` §4.2, §4.3).

use std::collections::HashMap;

use ae_core::{OscillatorShape, Sample, SynthFilterKind, SynthParams, VoiceId};
use ae_dsp::biquad::BiquadTdf2;

use crate::sample_engine::equal_power_pan;
use crate::voice::Envelope;
use crate::voice_manager::VoiceBlockOutput;

/// Resolves a fractional-semitone pitch to Hz under the `69 == A4` convention (`ae_core::Pitch`).
fn pitch_to_hz(semitones: f64) -> f64 {
    440.0 * 2f64.powf((semitones - 69.0) / 12.0)
}

/// xorshift64* noise source. Cheap and deterministic per voice; a general-purpose RNG crate
/// would be overkill for a per-sample hot loop that just needs white noise.
struct Xorshift64(u64);

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_unit(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }
}

/// One cycle of `shape` at `phase` (`[0, 1)`). `Square` is 50% duty, `Pulse` is 25%.
fn oscillator_sample(shape: OscillatorShape, phase: f64, rng: &mut Xorshift64) -> f64 {
    match shape {
        OscillatorShape::Sine => (std::f64::consts::TAU * phase).sin(),
        OscillatorShape::Triangle => 4.0 * (phase - (phase + 0.5).floor()).abs() - 1.0,
        OscillatorShape::Sawtooth => 2.0 * phase - 1.0,
        OscillatorShape::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        OscillatorShape::Pulse => {
            if phase < 0.25 {
                1.0
            } else {
                -1.0
            }
        }
        OscillatorShape::Noise => rng.next_unit(),
    }
}

struct SynthVoiceState {
    phases: Vec<f64>,
    rng: Xorshift64,
    filter: BiquadTdf2,
    filter_envelope: Envelope,
    last_cutoff_hz: f64,
}

/// Per-voice oscillator phase, noise, filter, and filter-envelope state for synth instruments.
pub struct SynthEngine {
    sample_rate: f64,
    voices: HashMap<VoiceId, SynthVoiceState>,
}

impl SynthEngine {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate, voices: HashMap::new() }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn release_voice(&mut self, voice_id: VoiceId) {
        self.voices.remove(&voice_id);
    }

    /// Produces one block of interleaved stereo output for one synth voice: sums `params`'s
    /// oscillators, runs the mix through a resonant filter whose cutoff is modulated by its own
    /// DAHDSR envelope, applies `voice_output`'s per-sample gain, and pans the result. `out`
    /// must be `voice_output.gain.len() * 2` samples long.
    pub fn render_voice_block(
        &mut self,
        voice_id: VoiceId,
        params: &SynthParams,
        pan: f64,
        voice_output: &VoiceBlockOutput,
        out: &mut [Sample],
    ) {
        debug_assert_eq!(out.len(), voice_output.gain.len() * 2);

        let sample_rate = self.sample_rate;
        let osc_count = params.oscillators.len().max(1);
        let state = self.voices.entry(voice_id).or_insert_with(|| SynthVoiceState {
            phases: vec![0.0; osc_count],
            rng: Xorshift64::new(voice_id.raw() ^ 0x9E37_79B9_7F4A_7C15),
            filter: BiquadTdf2::new(sample_rate),
            filter_envelope: Envelope::new(sample_rate, params.filter_envelope),
            last_cutoff_hz: -1.0,
        });
        if state.phases.len() != osc_count {
            state.phases.resize(osc_count, 0.0);
        }

        let (gain_l, gain_r) = equal_power_pan(pan);

        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let hz = pitch_to_hz(voice_output.pitch_semitones[i]);

            let mono = if params.oscillators.is_empty() {
                let sample = oscillator_sample(OscillatorShape::Sine, state.phases[0], &mut state.rng);
                state.phases[0] = (state.phases[0] + hz / sample_rate).fract();
                sample
            } else {
                let mut acc = 0.0;
                for (osc_idx, shape) in params.oscillators.iter().enumerate() {
                    acc += oscillator_sample(*shape, state.phases[osc_idx], &mut state.rng);
                    state.phases[osc_idx] = (state.phases[osc_idx] + hz / sample_rate).fract();
                }
                acc / osc_count as f64
            };

            // Unlike `ThreeBandEq`'s dirty-flag coefficient cache, the cutoff here is meant to
            // move every sample (it tracks the filter envelope), so we only skip the recompute
            // when two successive cutoffs land close enough to be inaudible.
            let env_level = state.filter_envelope.tick();
            let cutoff = (params.filter_cutoff_hz * (0.2 + 0.8 * env_level)).clamp(20.0, sample_rate * 0.49);
            if (cutoff - state.last_cutoff_hz).abs() > 0.5 {
                match params.filter_kind {
                    SynthFilterKind::Lowpass => state.filter.set_lowpass(cutoff, params.filter_resonance),
                    SynthFilterKind::Highpass => state.filter.set_highpass(cutoff, params.filter_resonance),
                    SynthFilterKind::Bandpass => state.filter.set_bandpass(cutoff, params.filter_resonance),
                    SynthFilterKind::Notch => state.filter.set_notch(cutoff, params.filter_resonance),
                }
                state.last_cutoff_hz = cutoff;
            }

            let filtered = state.filter.process_sample(mono as Sample);
            let gain = voice_output.gain[i] as Sample;
            frame[0] = filtered * gain * gain_l as Sample;
            frame[1] = filtered * gain * gain_r as Sample;
        }

        if voice_output.is_dead_after_block {
            self.release_voice(voice_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::DahdsrSettings;
    use smallvec::SmallVec;

    fn flat_voice_output(len: usize, pitch: f64) -> VoiceBlockOutput {
        VoiceBlockOutput {
            voice_id: VoiceId::new(1),
            instrument_id: ae_core::InstrumentId::new(1),
            pitch_semitones: vec![pitch; len],
            gain: vec![1.0; len],
            is_dead_after_block: false,
        }
    }

    fn open_envelope_params(shape: OscillatorShape) -> SynthParams {
        SynthParams {
            oscillators: SmallVec::from_slice(&[shape]),
            filter_kind: SynthFilterKind::Lowpass,
            filter_cutoff_hz: 18_000.0,
            filter_resonance: 0.707,
            filter_envelope: DahdsrSettings {
                delay_seconds: 0.0,
                attack_seconds: 0.0,
                hold_seconds: 10.0,
                decay_seconds: 0.0,
                sustain_level: 1.0,
                release_seconds: 0.05,
            },
            lfo_count: 0,
        }
    }

    #[test]
    fn sine_oscillator_produces_nonsilent_output() {
        let mut engine = SynthEngine::new(48_000.0);
        let params = open_envelope_params(OscillatorShape::Sine);
        let voice_output = flat_voice_output(64, 69.0);
        let mut out = vec![0.0; 128];

        engine.render_voice_block(VoiceId::new(1), &params, 0.0, &voice_output, &mut out);

        assert!(out.iter().any(|&s| s.abs() > 1e-3));
    }

    #[test]
    fn noise_oscillator_is_not_constant() {
        let mut engine = SynthEngine::new(48_000.0);
        let params = open_envelope_params(OscillatorShape::Noise);
        let voice_output = flat_voice_output(256, 69.0);
        let mut out = vec![0.0; 512];

        engine.render_voice_block(VoiceId::new(1), &params, 0.0, &voice_output, &mut out);

        let first = out[0];
        assert!(out.chunks_exact(2).any(|frame| frame[0] != first));
    }

    #[test]
    fn releasing_a_voice_drops_its_phase_and_filter_state() {
        let mut engine = SynthEngine::new(48_000.0);
        let params = open_envelope_params(OscillatorShape::Sawtooth);
        let mut voice_output = flat_voice_output(16, 69.0);
        let mut out = vec![0.0; 32];

        engine.render_voice_block(VoiceId::new(1), &params, 0.0, &voice_output, &mut out);
        assert!(engine.voices.contains_key(&VoiceId::new(1)));

        voice_output.is_dead_after_block = true;
        engine.render_voice_block(VoiceId::new(1), &params, 0.0, &voice_output, &mut out);
        assert!(!engine.voices.contains_key(&VoiceId::new(1)));
    }
}
