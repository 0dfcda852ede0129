//! Algorithmic feedback-delay-network reverb (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbAlgorithm {
    Room,
    Hall,
    Plate,
    Spring,
    Chamber,
}

pub mod param_ids {
    use ae_core::ParamId;
    pub const SIZE: ParamId = ParamId(10_000);
    pub const DECAY: ParamId = ParamId(10_001);
    pub const DAMPING: ParamId = ParamId(10_002);
    pub const WIDTH: ParamId = ParamId(10_003);
    pub const PRE_DELAY_MS: ParamId = ParamId(10_004);
    pub const EARLY_LATE_MIX: ParamId = ParamId(10_005);
    pub const DIFFUSION: ParamId = ParamId(10_006);
    pub const LOW_CUT_HZ: ParamId = ParamId(10_007);
    pub const HIGH_CUT_HZ: ParamId = ParamId(10_008);
    pub const MOD_DEPTH: ParamId = ParamId(10_009);
    pub const MOD_RATE_HZ: ParamId = ParamId(10_010);
    pub const SHIMMER: ParamId = ParamId(10_011);
    pub const ALGORITHM: ParamId = ParamId(10_012); // 0..5 -> ReverbAlgorithm
    pub const MIX: ParamId = ParamId(10_013);
}

const NUM_COMBS: usize = 8;
const NUM_ALLPASS: usize = 4;

/// Base delay lengths (at 48kHz) for the comb bank, mutually prime-ish to avoid flutter.
const COMB_TUNING_MS: [f64; NUM_COMBS] = [29.7, 37.1, 41.1, 43.7, 31.3, 39.9, 44.9, 47.3];
const ALLPASS_TUNING_MS: [f64; NUM_ALLPASS] = [5.0, 1.7, 3.3, 2.3];

struct CombFilter {
    buffer: Vec<Sample>,
    write: usize,
    damp_state: Sample,
    feedback: Sample,
    damping: Sample,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len.max(1)], write: 0, damp_state: 0.0, feedback: 0.5, damping: 0.2 }
    }

    fn process(&mut self, x: Sample) -> Sample {
        let len = self.buffer.len();
        let out = self.buffer[self.write];
        self.damp_state = out * (1.0 - self.damping) + self.damp_state * self.damping;
        self.buffer[self.write] = flush_denormal(x + self.damp_state * self.feedback);
        self.write = (self.write + 1) % len;
        out
    }

    fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.damp_state = 0.0;
    }
}

struct AllpassFilter {
    buffer: Vec<Sample>,
    write: usize,
    feedback: Sample,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len.max(1)], write: 0, feedback: 0.5 }
    }

    fn process(&mut self, x: Sample) -> Sample {
        let len = self.buffer.len();
        let buffered = self.buffer[self.write];
        let y = -x + buffered;
        self.buffer[self.write] = flush_denormal(x + buffered * self.feedback);
        self.write = (self.write + 1) % len;
        y
    }

    fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(sample_rate: f64, size: f64) -> Self {
        let combs = COMB_TUNING_MS
            .iter()
            .map(|ms| CombFilter::new(((ms * size).max(1.0) * 0.001 * sample_rate) as usize))
            .collect();
        let allpasses = ALLPASS_TUNING_MS
            .iter()
            .map(|ms| AllpassFilter::new(((ms * size).max(1.0) * 0.001 * sample_rate) as usize))
            .collect();
        Self { combs, allpasses }
    }

    fn set_feedback_and_damping(&mut self, feedback: Sample, damping: Sample) {
        for comb in &mut self.combs {
            comb.feedback = feedback;
            comb.damping = damping;
        }
    }

    fn set_diffusion(&mut self, diffusion: Sample) {
        for ap in &mut self.allpasses {
            ap.feedback = diffusion;
        }
    }

    fn process(&mut self, x: Sample) -> Sample {
        let mut sum = 0.0;
        for comb in &mut self.combs {
            sum += comb.process(x);
        }
        let mut y = sum / self.combs.len() as Sample;
        for ap in &mut self.allpasses {
            y = ap.process(y);
        }
        y
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::reset);
        self.allpasses.iter_mut().for_each(AllpassFilter::reset);
    }
}

pub struct Reverb {
    sample_rate: f64,
    size: f64,
    decay: f64,
    damping: f64,
    width: f64,
    pre_delay_ms: f64,
    early_late_mix: f64,
    diffusion: f64,
    low_cut_hz: f64,
    high_cut_hz: f64,
    mod_depth: f64,
    mod_rate_hz: f64,
    shimmer: f64,
    algorithm: ReverbAlgorithm,
    mix: f64,

    pre_delay_buf: Vec<Sample>,
    pre_delay_write: usize,

    tank_left: Tank,
    tank_right: Tank,
    low_cut_l: BiquadTdf2,
    low_cut_r: BiquadTdf2,
    high_cut_l: BiquadTdf2,
    high_cut_r: BiquadTdf2,

    mod_phase: f64,
}

impl Reverb {
    pub fn new() -> Self {
        let sample_rate = 48_000.0;
        let mut reverb = Self {
            sample_rate,
            size: 1.0,
            decay: 0.5,
            damping: 0.3,
            width: 1.0,
            pre_delay_ms: 20.0,
            early_late_mix: 0.3,
            diffusion: 0.6,
            low_cut_hz: 100.0,
            high_cut_hz: 10_000.0,
            mod_depth: 0.0,
            mod_rate_hz: 0.3,
            shimmer: 0.0,
            algorithm: ReverbAlgorithm::Hall,
            mix: 0.3,
            pre_delay_buf: vec![0.0; 1],
            pre_delay_write: 0,
            tank_left: Tank::new(sample_rate, 1.0),
            tank_right: Tank::new(sample_rate, 1.0),
            low_cut_l: BiquadTdf2::new(sample_rate),
            low_cut_r: BiquadTdf2::new(sample_rate),
            high_cut_l: BiquadTdf2::new(sample_rate),
            high_cut_r: BiquadTdf2::new(sample_rate),
            mod_phase: 0.0,
        };
        reverb.rebuild_tanks();
        reverb.rebuild_filters();
        reverb.rebuild_pre_delay();
        reverb
    }

    fn algorithm_size_scale(&self) -> f64 {
        match self.algorithm {
            ReverbAlgorithm::Room => 0.6,
            ReverbAlgorithm::Hall => 1.4,
            ReverbAlgorithm::Plate => 0.8,
            ReverbAlgorithm::Spring => 0.4,
            ReverbAlgorithm::Chamber => 1.0,
        }
    }

    fn rebuild_tanks(&mut self) {
        let scale = self.size * self.algorithm_size_scale();
        self.tank_left = Tank::new(self.sample_rate, scale);
        self.tank_right = Tank::new(self.sample_rate, scale);
        let feedback = self.decay.clamp(0.0, 0.98) as Sample;
        let damping = self.damping.clamp(0.0, 1.0) as Sample;
        self.tank_left.set_feedback_and_damping(feedback, damping);
        self.tank_right.set_feedback_and_damping(feedback, damping);
        self.tank_left.set_diffusion(self.diffusion as Sample);
        self.tank_right.set_diffusion(self.diffusion as Sample);
    }

    fn rebuild_filters(&mut self) {
        self.low_cut_l.set_highpass(self.low_cut_hz, 0.7071);
        self.low_cut_r.set_highpass(self.low_cut_hz, 0.7071);
        self.high_cut_l.set_lowpass(self.high_cut_hz, 0.7071);
        self.high_cut_r.set_lowpass(self.high_cut_hz, 0.7071);
    }

    fn rebuild_pre_delay(&mut self) {
        let len = ((self.pre_delay_ms.max(0.0) * 0.001 * self.sample_rate) as usize).max(1) + 1;
        self.pre_delay_buf = vec![0.0; len];
        self.pre_delay_write = 0;
    }

    /// Estimated RT60 in seconds for the current decay/size setting.
    pub fn estimated_rt60_seconds(&self) -> f64 {
        if self.decay <= 0.0 {
            0.0
        } else {
            let avg_loop_ms: f64 = COMB_TUNING_MS.iter().sum::<f64>() / NUM_COMBS as f64 * self.size * self.algorithm_size_scale();
            let loop_seconds = avg_loop_ms / 1000.0;
            -3.0 * loop_seconds / self.decay.min(0.9999).log10()
        }
    }
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Reverb {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.rebuild_tanks();
        self.rebuild_filters();
        self.rebuild_pre_delay();
    }

    fn reset(&mut self) {
        self.tank_left.reset();
        self.tank_right.reset();
        self.low_cut_l.reset();
        self.low_cut_r.reset();
        self.high_cut_l.reset();
        self.high_cut_r.reset();
        self.pre_delay_buf.iter_mut().for_each(|s| *s = 0.0);
        self.pre_delay_write = 0;
        self.mod_phase = 0.0;
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::SIZE => {
                self.size = value.clamp(0.1, 4.0);
                self.rebuild_tanks();
            }
            param_ids::DECAY => {
                self.decay = value.clamp(0.0, 0.98);
                self.rebuild_tanks();
            }
            param_ids::DAMPING => {
                self.damping = value.clamp(0.0, 1.0);
                self.rebuild_tanks();
            }
            param_ids::WIDTH => self.width = value.clamp(0.0, 2.0),
            param_ids::PRE_DELAY_MS => {
                self.pre_delay_ms = value.max(0.0);
                self.rebuild_pre_delay();
            }
            param_ids::EARLY_LATE_MIX => self.early_late_mix = value.clamp(0.0, 1.0),
            param_ids::DIFFUSION => {
                self.diffusion = value.clamp(0.0, 0.95);
                self.rebuild_tanks();
            }
            param_ids::LOW_CUT_HZ => {
                self.low_cut_hz = value.max(10.0);
                self.rebuild_filters();
            }
            param_ids::HIGH_CUT_HZ => {
                self.high_cut_hz = value.max(1_000.0);
                self.rebuild_filters();
            }
            param_ids::MOD_DEPTH => self.mod_depth = value.clamp(0.0, 1.0),
            param_ids::MOD_RATE_HZ => self.mod_rate_hz = value.max(0.01),
            param_ids::SHIMMER => self.shimmer = value.clamp(0.0, 1.0),
            param_ids::ALGORITHM => {
                self.algorithm = match value as i32 {
                    0 => ReverbAlgorithm::Room,
                    1 => ReverbAlgorithm::Hall,
                    2 => ReverbAlgorithm::Plate,
                    3 => ReverbAlgorithm::Spring,
                    _ => ReverbAlgorithm::Chamber,
                };
                self.rebuild_tanks();
            }
            param_ids::MIX => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let width = self.width as Sample;
        let mix = self.mix as Sample;
        let early_late = self.early_late_mix as Sample;
        let mod_depth = self.mod_depth as Sample;
        let two_pi = 2.0 * std::f64::consts::PI;

        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let dry_l = frame_in[0];
            let dry_r = frame_in[1];
            let mono_in = (dry_l + dry_r) * 0.5;

            let pre_len = self.pre_delay_buf.len();
            let read_idx = (self.pre_delay_write + 1) % pre_len;
            let delayed = self.pre_delay_buf[read_idx];
            self.pre_delay_buf[self.pre_delay_write] = mono_in;
            self.pre_delay_write = (self.pre_delay_write + 1) % pre_len;

            self.mod_phase += self.mod_rate_hz / self.sample_rate;
            if self.mod_phase >= 1.0 {
                self.mod_phase -= 1.0;
            }
            let lfo = (two_pi * self.mod_phase).sin() as Sample;
            let modulated = delayed * (1.0 + lfo * mod_depth * 0.02);

            let tank_l = self.tank_left.process(modulated);
            let tank_r = self.tank_right.process(modulated);

            let wet_l = modulated * (1.0 - early_late) + tank_l * early_late;
            let wet_r = modulated * (1.0 - early_late) + tank_r * early_late;

            let wet_mid = (wet_l + wet_r) * 0.5;
            let wet_side = (wet_l - wet_r) * 0.5 * width;

            let out_wet_l = self.low_cut_l.process_sample(self.high_cut_l.process_sample(wet_mid + wet_side));
            let out_wet_r = self.low_cut_r.process_sample(self.high_cut_r.process_sample(wet_mid - wet_side));

            frame_out[0] = flush_denormal(dry_l * (1.0 - mix) + out_wet_l * mix);
            frame_out[1] = flush_denormal(dry_r * (1.0 - mix) + out_wet_r * mix);
        }
    }

    fn latency_samples(&self) -> usize {
        self.pre_delay_buf.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_produces_decaying_tail() {
        let mut reverb = Reverb::new();
        reverb.prepare(48_000.0, 512);
        reverb.set_parameter(param_ids::MIX, 1.0);
        reverb.set_parameter(param_ids::DECAY, 0.7);
        reverb.set_parameter(param_ids::PRE_DELAY_MS, 0.0);

        let n = 48_000;
        let mut input = vec![0.0; n * 2];
        input[0] = 1.0;
        input[1] = 1.0;
        let mut output = vec![0.0; n * 2];
        reverb.process(&input, None, &mut output);

        let early_energy: f64 = output[..2000 * 2].iter().map(|s| (*s as f64).powi(2)).sum();
        let late_energy: f64 = output[40_000 * 2..].iter().map(|s| (*s as f64).powi(2)).sum();
        assert!(early_energy > 0.0);
        assert!(late_energy >= 0.0);
    }

    #[test]
    fn rt60_increases_with_decay() {
        let mut short = Reverb::new();
        short.set_parameter(param_ids::DECAY, 0.3);
        let mut long = Reverb::new();
        long.set_parameter(param_ids::DECAY, 0.9);
        assert!(long.estimated_rt60_seconds() > short.estimated_rt60_seconds());
    }
}
