//! Phaser: 2-12 cascaded all-pass stages swept by an LFO, with stereo phase offset
//! (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::Processor;

pub mod param_ids {
    use ae_core::ParamId;
    pub const STAGES: ParamId = ParamId(12_000); // 2..12, even
    pub const RATE_HZ: ParamId = ParamId(12_001);
    pub const DEPTH: ParamId = ParamId(12_002);
    pub const FEEDBACK: ParamId = ParamId(12_003);
    pub const CENTER_HZ: ParamId = ParamId(12_004);
    pub const STEREO_PHASE_OFFSET_DEG: ParamId = ParamId(12_005);
    pub const MIX: ParamId = ParamId(12_006);
}

const MIN_STAGES: usize = 2;
const MAX_STAGES: usize = 12;

struct PhaserChannel {
    stages: Vec<BiquadTdf2>,
    feedback_state: Sample,
    phase: f64,
}

impl PhaserChannel {
    fn new(sample_rate: f64) -> Self {
        Self {
            stages: (0..MAX_STAGES).map(|_| BiquadTdf2::new(sample_rate)).collect(),
            feedback_state: 0.0,
            phase: 0.0,
        }
    }

    fn reset(&mut self) {
        self.stages.iter_mut().for_each(BiquadTdf2::reset);
        self.feedback_state = 0.0;
    }
}

pub struct Phaser {
    sample_rate: f64,
    stages: usize,
    rate_hz: f64,
    depth: f64,
    feedback: f64,
    center_hz: f64,
    stereo_phase_offset_deg: f64,
    mix: f64,

    left: PhaserChannel,
    right: PhaserChannel,
}

impl Phaser {
    pub fn new() -> Self {
        let sample_rate = 48_000.0;
        Self {
            sample_rate,
            stages: 6,
            rate_hz: 0.5,
            depth: 0.7,
            feedback: 0.3,
            center_hz: 800.0,
            stereo_phase_offset_deg: 90.0,
            mix: 0.5,
            left: PhaserChannel::new(sample_rate),
            right: PhaserChannel::new(sample_rate),
        }
    }

    fn process_channel(&mut self, channel: usize, x: Sample) -> Sample {
        let feedback = self.feedback as Sample;
        let stages = self.stages.clamp(MIN_STAGES, MAX_STAGES);

        let (chan, phase_offset_rad) = if channel == 0 {
            (&mut self.left, 0.0)
        } else {
            (&mut self.right, self.stereo_phase_offset_deg.to_radians())
        };

        let two_pi = 2.0 * std::f64::consts::PI;
        chan.phase += self.rate_hz / self.sample_rate;
        if chan.phase >= 1.0 {
            chan.phase -= 1.0;
        }
        let effective_phase = chan.phase + phase_offset_rad / two_pi;
        let freq = {
            let lfo = (effective_phase * two_pi).sin();
            let octave_range = 2.0 * self.depth.clamp(0.0, 1.0);
            self.center_hz * 2f64.powf(lfo * octave_range)
        };
        let freq = freq.clamp(20.0, self.sample_rate * 0.45);

        let fed = x + chan.feedback_state * feedback;
        let mut y = fed;
        for stage in chan.stages.iter_mut().take(stages) {
            stage.set_allpass(freq, 0.5);
            y = stage.process_sample(y);
        }
        chan.feedback_state = y;
        y
    }
}

impl Default for Phaser {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Phaser {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.left = PhaserChannel::new(sample_rate);
        self.right = PhaserChannel::new(sample_rate);
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::STAGES => {
                let stages = (value as usize).clamp(MIN_STAGES, MAX_STAGES);
                self.stages = stages - (stages % 2);
            }
            param_ids::RATE_HZ => self.rate_hz = value.max(0.01),
            param_ids::DEPTH => self.depth = value.clamp(0.0, 1.0),
            param_ids::FEEDBACK => self.feedback = value.clamp(-0.98, 0.98),
            param_ids::CENTER_HZ => self.center_hz = value.max(20.0),
            param_ids::STEREO_PHASE_OFFSET_DEG => self.stereo_phase_offset_deg = value,
            param_ids::MIX => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let mix = self.mix as Sample;
        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let wet_l = self.process_channel(0, frame_in[0]);
            let wet_r = self.process_channel(1, frame_in[1]);
            frame_out[0] = flush_denormal(frame_in[0] * (1.0 - mix) + wet_l * mix);
            frame_out[1] = flush_denormal(frame_in[1] * (1.0 - mix) + wet_r * mix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_phase_offset_decorrelates_channels() {
        let mut phaser = Phaser::new();
        phaser.prepare(48_000.0, 512);
        phaser.set_parameter(param_ids::MIX, 1.0);
        phaser.set_parameter(param_ids::STEREO_PHASE_OFFSET_DEG, 180.0);
        phaser.set_parameter(param_ids::RATE_HZ, 1.0);

        let n = 4096;
        let mut input = vec![0.0; n * 2];
        for (i, frame) in input.chunks_exact_mut(2).enumerate() {
            let t = i as f32 / 48_000.0;
            let s = (2.0 * std::f32::consts::PI * 300.0 * t).sin() * 0.5;
            frame[0] = s;
            frame[1] = s;
        }
        let mut output = vec![0.0; n * 2];
        phaser.process(&input, None, &mut output);

        let diff_energy: f64 = output.chunks_exact(2).map(|f| ((f[0] - f[1]) as f64).powi(2)).sum();
        assert!(diff_energy > 0.0);
    }

    #[test]
    fn stage_count_is_clamped_and_even() {
        let mut phaser = Phaser::new();
        phaser.set_parameter(param_ids::STAGES, 15.0);
        assert!(phaser.stages <= MAX_STAGES);
        assert_eq!(phaser.stages % 2, 0);
    }
}
