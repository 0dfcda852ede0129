//! Per-note sample playback: resample, pitch-shift, apply the per-note and voice envelopes,
//! and pan to stereo (`SPEC_FULL.md` §4.3).

use std::collections::HashMap;

use ae_core::{Pitch, Sample, SharedBuffer, VoiceId};

use crate::voice_manager::VoiceBlockOutput;

/// Resampling quality. `Linear` is the minimum; `WindowedSinc` trades CPU for fidelity at
/// higher quality presets (`SPEC_FULL.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterpolationQuality {
    Linear,
    WindowedSinc { taps: usize },
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

/// Equal-power pan law: `gain_l = cos(theta)`, `gain_r = sin(theta)`, `-3 dB` at center
/// (`SPEC_FULL.md` §4.3).
pub fn equal_power_pan(pan: f64) -> (f64, f64) {
    let pan = pan.clamp(-1.0, 1.0);
    let theta = (pan + 1.0) * 0.25 * std::f64::consts::PI;
    (theta.cos(), theta.sin())
}

struct VoicePlaybackState {
    read_pos: f64,
}

/// Per-voice fractional read-position tracking and the resample/pitch/pan pipeline.
pub struct SampleEngine {
    quality: InterpolationQuality,
    positions: HashMap<VoiceId, VoicePlaybackState>,
}

impl SampleEngine {
    pub fn new(quality: InterpolationQuality) -> Self {
        Self { quality, positions: HashMap::new() }
    }

    pub fn set_quality(&mut self, quality: InterpolationQuality) {
        self.quality = quality;
    }

    pub fn release_voice(&mut self, voice_id: VoiceId) {
        self.positions.remove(&voice_id);
    }

    fn interpolate(&self, buffer: &SharedBuffer, channel: u16, pos: f64) -> Sample {
        match self.quality {
            InterpolationQuality::Linear => {
                let base = pos.floor();
                let frac = (pos - base) as Sample;
                let i0 = base as i64;
                let s0 = if i0 >= 0 { buffer.sample_at(i0 as u64, channel) } else { 0.0 };
                let s1 = if i0 + 1 >= 0 { buffer.sample_at((i0 + 1) as u64, channel) } else { 0.0 };
                s0 + (s1 - s0) * frac
            }
            InterpolationQuality::WindowedSinc { taps } => {
                let half = (taps / 2) as i64;
                let base = pos.floor() as i64;
                let mut acc = 0.0f64;
                for k in -half..=half {
                    let idx = base + k;
                    if idx < 0 {
                        continue;
                    }
                    let sample = buffer.sample_at(idx as u64, channel) as f64;
                    let d = pos - idx as f64;
                    let window = 0.5 * (1.0 + (std::f64::consts::PI * d / half.max(1) as f64).cos());
                    acc += sample * sinc(d) * window;
                }
                acc as Sample
            }
        }
    }

    /// Produces one block of interleaved stereo output for one voice: reads `buffer` at a
    /// read-rate derived from the voice's resolved pitch (including any portamento glide) and
    /// the instrument's tempo-tracking factor, applies `voice_output`'s per-sample gain, and
    /// pans the result. `out` must be `voice_output.gain.len() * 2` samples long.
    pub fn render_voice_block(
        &mut self,
        voice_id: VoiceId,
        buffer: &SharedBuffer,
        base_pitch: Pitch,
        base_read_rate: f64,
        tempo_tracking_factor: f64,
        pan: f64,
        voice_output: &VoiceBlockOutput,
        out: &mut [Sample],
    ) {
        debug_assert_eq!(out.len(), voice_output.gain.len() * 2);

        let state = self.positions.entry(voice_id).or_insert(VoicePlaybackState { read_pos: 0.0 });
        let (gain_l, gain_r) = equal_power_pan(pan);
        let channels = buffer.channels();

        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let pitch_offset = voice_output.pitch_semitones[i] - base_pitch.0 as f64;
            let read_rate = base_read_rate * 2f64.powf(pitch_offset / 12.0) * tempo_tracking_factor;

            let mono = if channels <= 1 {
                self.interpolate(buffer, 0, state.read_pos)
            } else {
                (self.interpolate(buffer, 0, state.read_pos) + self.interpolate(buffer, 1, state.read_pos)) * 0.5
            };

            let gain = voice_output.gain[i] as Sample;
            frame[0] = mono * gain * gain_l as Sample;
            frame[1] = mono * gain * gain_r as Sample;

            state.read_pos += read_rate;
        }

        if voice_output.is_dead_after_block {
            self.release_voice(voice_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::{Buffer, BufferMeta, BufferId, SampleRate};

    fn ramp_buffer() -> SharedBuffer {
        let data: Vec<Sample> = (0..1000).map(|i| i as Sample / 1000.0).collect();
        Buffer::new(
            BufferMeta { id: BufferId::new(1), channels: 1, sample_rate: SampleRate::Hz48000, length_frames: 1000, slice_markers: Vec::new() },
            data,
        )
        .as_shared()
    }

    fn flat_voice_output(len: usize, pitch: f64) -> VoiceBlockOutput {
        VoiceBlockOutput {
            voice_id: VoiceId::new(1),
            instrument_id: ae_core::InstrumentId::new(1),
            pitch_semitones: vec![pitch; len],
            gain: vec![1.0; len],
            is_dead_after_block: false,
        }
    }

    #[test]
    fn equal_power_pan_is_unity_at_extremes_and_down_3db_at_center() {
        let (l, r) = equal_power_pan(-1.0);
        assert!((l - 1.0).abs() < 1e-9);
        assert!(r.abs() < 1e-9);

        let (l, r) = equal_power_pan(0.0);
        assert!((l - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!((r - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn linear_playback_advances_read_position_at_unit_rate() {
        let mut engine = SampleEngine::new(InterpolationQuality::Linear);
        let buffer = ramp_buffer();
        let voice_output = flat_voice_output(100, 60.0);
        let mut out = vec![0.0; 200];

        engine.render_voice_block(VoiceId::new(1), &buffer, Pitch(60), 1.0, 1.0, 0.0, &voice_output, &mut out);

        assert!((out[0] - 0.0).abs() < 1e-3);
        assert!(out[198] > out[0]);
    }

    #[test]
    fn pitch_offset_doubles_read_rate_per_octave() {
        let mut engine_up = SampleEngine::new(InterpolationQuality::Linear);
        let buffer = ramp_buffer();
        let voice_output = flat_voice_output(10, 72.0);
        let mut out = vec![0.0; 20];
        engine_up.render_voice_block(VoiceId::new(1), &buffer, Pitch(60), 1.0, 1.0, 0.0, &voice_output, &mut out);

        // one octave up over 10 samples should read roughly twice as far as unison.
        let mut engine_unison = SampleEngine::new(InterpolationQuality::Linear);
        let voice_output_unison = flat_voice_output(10, 60.0);
        let mut out_unison = vec![0.0; 20];
        engine_unison.render_voice_block(VoiceId::new(2), &buffer, Pitch(60), 1.0, 1.0, 0.0, &voice_output_unison, &mut out_unison);

        assert!(out[18] > out_unison[18]);
    }
}
