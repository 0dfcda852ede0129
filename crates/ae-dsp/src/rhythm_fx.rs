//! Tempo-synced rhythm effects: gate, stutter, repeat, reverse, glitch, tape-stop
//! (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhythmMode {
    Gate,
    Stutter,
    Repeat,
    Reverse,
    Glitch,
    TapeStop,
}

pub mod param_ids {
    use ae_core::ParamId;
    pub const MODE: ParamId = ParamId(11_000); // 0..6 -> RhythmMode
    pub const DIVISION_STEPS_PER_BAR: ParamId = ParamId(11_001);
    pub const CHANCE: ParamId = ParamId(11_002);
    pub const INTENSITY: ParamId = ParamId(11_003);
    pub const SWING: ParamId = ParamId(11_004);
    pub const BUFFER_SIZE_STEPS: ParamId = ParamId(11_005);
    pub const FADE_TIME_MS: ParamId = ParamId(11_006);
    pub const GLITCH_AMOUNT: ParamId = ParamId(11_007);
    pub const TAPE_SPEED: ParamId = ParamId(11_008);
    pub const BPM: ParamId = ParamId(11_009);
    pub const MIX: ParamId = ParamId(11_010);
}

const CAPTURE_SECONDS: f64 = 2.0;

pub struct RhythmFx {
    sample_rate: f64,
    mode: RhythmMode,
    division_steps_per_bar: f64,
    chance: f64,
    intensity: f64,
    swing: f64,
    buffer_size_steps: f64,
    fade_time_ms: f64,
    glitch_amount: f64,
    tape_speed: f64,
    bpm: f64,
    mix: f64,

    capture_l: Vec<Sample>,
    capture_r: Vec<Sample>,
    capture_write: usize,

    step_phase_samples: f64,
    current_step: u64,
    step_active: bool,
    step_reversed: bool,
    read_pos: f64,
    tape_ramp: f64,
    rng: ChaCha8Rng,
}

impl RhythmFx {
    pub fn new() -> Self {
        let sample_rate = 48_000.0;
        let capacity = (sample_rate * CAPTURE_SECONDS) as usize + 1;
        Self {
            sample_rate,
            mode: RhythmMode::Gate,
            division_steps_per_bar: 16.0,
            chance: 1.0,
            intensity: 1.0,
            swing: 0.0,
            buffer_size_steps: 1.0,
            fade_time_ms: 5.0,
            glitch_amount: 0.3,
            tape_speed: 1.0,
            bpm: 120.0,
            mix: 1.0,
            capture_l: vec![0.0; capacity],
            capture_r: vec![0.0; capacity],
            capture_write: 0,
            step_phase_samples: 0.0,
            current_step: 0,
            step_active: true,
            step_reversed: false,
            read_pos: 0.0,
            tape_ramp: 1.0,
            rng: ChaCha8Rng::seed_from_u64(0xAE_DEAD_BEEF),
        }
    }

    fn step_length_samples(&self) -> f64 {
        let beats_per_bar = 4.0;
        let samples_per_beat = 60.0 / self.bpm.max(1.0) * self.sample_rate;
        samples_per_beat * beats_per_bar / self.division_steps_per_bar.max(1.0)
    }

    fn swung_step_length(&self) -> f64 {
        let base = self.step_length_samples();
        if self.current_step % 2 == 1 {
            base * (1.0 + self.swing.clamp(0.0, 0.75))
        } else {
            base * (1.0 - self.swing.clamp(0.0, 0.75) * 0.5)
        }
    }

    fn roll_step_decision(&mut self) {
        self.current_step += 1;
        self.step_active = self.rng.r#gen::<f64>() < self.chance.clamp(0.0, 1.0);
        self.step_reversed = self.mode == RhythmMode::Reverse && self.rng.r#gen::<f64>() < 0.5;
        let capacity_steps = self.buffer_size_steps.max(1.0);
        let buf_len_samples = self.step_length_samples() * capacity_steps;
        self.read_pos = if self.step_reversed { buf_len_samples } else { 0.0 };
    }
}

impl Default for RhythmFx {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for RhythmFx {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        let capacity = (sample_rate * CAPTURE_SECONDS) as usize + 1;
        self.capture_l = vec![0.0; capacity];
        self.capture_r = vec![0.0; capacity];
        self.capture_write = 0;
        self.step_phase_samples = 0.0;
        self.current_step = 0;
        self.tape_ramp = 1.0;
    }

    fn reset(&mut self) {
        self.capture_l.iter_mut().for_each(|s| *s = 0.0);
        self.capture_r.iter_mut().for_each(|s| *s = 0.0);
        self.capture_write = 0;
        self.step_phase_samples = 0.0;
        self.current_step = 0;
        self.step_active = true;
        self.step_reversed = false;
        self.read_pos = 0.0;
        self.tape_ramp = 1.0;
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::MODE => {
                self.mode = match value as i32 {
                    0 => RhythmMode::Gate,
                    1 => RhythmMode::Stutter,
                    2 => RhythmMode::Repeat,
                    3 => RhythmMode::Reverse,
                    4 => RhythmMode::Glitch,
                    _ => RhythmMode::TapeStop,
                };
            }
            param_ids::DIVISION_STEPS_PER_BAR => self.division_steps_per_bar = value.max(1.0),
            param_ids::CHANCE => self.chance = value.clamp(0.0, 1.0),
            param_ids::INTENSITY => self.intensity = value.clamp(0.0, 1.0),
            param_ids::SWING => self.swing = value.clamp(0.0, 0.75),
            param_ids::BUFFER_SIZE_STEPS => self.buffer_size_steps = value.max(1.0),
            param_ids::FADE_TIME_MS => self.fade_time_ms = value.max(0.1),
            param_ids::GLITCH_AMOUNT => self.glitch_amount = value.clamp(0.0, 1.0),
            param_ids::TAPE_SPEED => self.tape_speed = value.clamp(0.0, 1.0),
            param_ids::BPM => self.bpm = value.clamp(20.0, 400.0),
            param_ids::MIX => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let mix = self.mix as Sample;
        let intensity = self.intensity as Sample;
        let fade_samples = (self.fade_time_ms * 0.001 * self.sample_rate).max(1.0);

        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let dry_l = frame_in[0];
            let dry_r = frame_in[1];

            let cap_len = self.capture_l.len();
            self.capture_l[self.capture_write] = dry_l;
            self.capture_r[self.capture_write] = dry_r;
            self.capture_write = (self.capture_write + 1) % cap_len;

            if self.step_phase_samples <= 0.0 {
                self.roll_step_decision();
                self.step_phase_samples = self.swung_step_length();
            }
            self.step_phase_samples -= 1.0;

            let step_progress = 1.0 - (self.step_phase_samples / self.swung_step_length().max(1.0)).clamp(0.0, 1.0);
            let fade_gain = ((step_progress * self.swung_step_length()).min(fade_samples) / fade_samples).clamp(0.0, 1.0) as Sample;

            let (wet_l, wet_r) = match self.mode {
                RhythmMode::Gate => {
                    let g = if self.step_active { fade_gain } else { 0.0 };
                    (dry_l * g, dry_r * g)
                }
                RhythmMode::Stutter | RhythmMode::Repeat => {
                    let buf_len_samples = self.step_length_samples().max(1.0);
                    let offset = self.read_pos as usize % cap_len;
                    let idx = (self.capture_write + cap_len - (buf_len_samples as usize) + offset) % cap_len;
                    self.read_pos = (self.read_pos + 1.0) % buf_len_samples.max(1.0);
                    let g = if self.step_active { 1.0 } else { 0.0 };
                    (self.capture_l[idx] * g, self.capture_r[idx] * g)
                }
                RhythmMode::Reverse => {
                    let idx = (self.capture_write + cap_len - (self.read_pos.max(0.0) as usize) - 1) % cap_len;
                    if self.read_pos > 0.0 {
                        self.read_pos -= 1.0;
                    }
                    (self.capture_l[idx], self.capture_r[idx])
                }
                RhythmMode::Glitch => {
                    let jitter = if self.rng.r#gen::<f64>() < self.glitch_amount { self.rng.gen_range(1..512) } else { 0 };
                    let idx = (self.capture_write + cap_len - 1 - jitter) % cap_len;
                    (self.capture_l[idx], self.capture_r[idx])
                }
                RhythmMode::TapeStop => {
                    let target_ramp = self.tape_speed as Sample;
                    self.tape_ramp += (target_ramp - self.tape_ramp) * 0.0005;
                    self.read_pos += self.tape_ramp as f64;
                    let idx = (self.capture_write + cap_len - (self.read_pos as usize % cap_len) - 1) % cap_len;
                    (self.capture_l[idx] * self.tape_ramp, self.capture_r[idx] * self.tape_ramp)
                }
            };

            let blended_l = dry_l * (1.0 - intensity) + wet_l * intensity;
            let blended_r = dry_r * (1.0 - intensity) + wet_r * intensity;

            frame_out[0] = flush_denormal(dry_l * (1.0 - mix) + blended_l * mix);
            frame_out[1] = flush_denormal(dry_r * (1.0 - mix) + blended_r * mix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_mode_silences_inactive_steps() {
        let mut fx = RhythmFx::new();
        fx.prepare(48_000.0, 64);
        fx.set_parameter(param_ids::MODE, 0.0);
        fx.set_parameter(param_ids::CHANCE, 0.0);
        fx.set_parameter(param_ids::FADE_TIME_MS, 0.1);
        fx.set_parameter(param_ids::MIX, 1.0);
        fx.set_parameter(param_ids::BPM, 120.0);
        fx.set_parameter(param_ids::DIVISION_STEPS_PER_BAR, 16.0);

        let n = 4000;
        let input = vec![0.8; n * 2];
        let mut output = vec![0.0; n * 2];
        fx.process(&input, None, &mut output);

        let tail_energy: f64 = output[n * 2 - 200..].iter().map(|s| (*s as f64).powi(2)).sum();
        assert!(tail_energy < 1.0);
    }

    #[test]
    fn reverse_mode_produces_output() {
        let mut fx = RhythmFx::new();
        fx.prepare(48_000.0, 64);
        fx.set_parameter(param_ids::MODE, 3.0);
        fx.set_parameter(param_ids::MIX, 1.0);
        let n = 4000;
        let mut input = vec![0.0; n * 2];
        for (i, frame) in input.chunks_exact_mut(2).enumerate() {
            let t = i as f32 / 48_000.0;
            let s = (2.0 * std::f32::consts::PI * 220.0 * t).sin();
            frame[0] = s;
            frame[1] = s;
        }
        let mut output = vec![0.0; n * 2];
        fx.process(&input, None, &mut output);
        let energy: f64 = output.iter().map(|s| (*s as f64).powi(2)).sum();
        assert!(energy > 0.0);
    }
}
