//! Loudness maximizer: input-gain -> soft-saturation -> look-ahead peak limiter
//! (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturationCurve {
    BrickWall,
    SoftKnee,
    Tube,
    Transparent,
}

pub mod param_ids {
    use ae_core::ParamId;
    pub const INPUT_GAIN_DB: ParamId = ParamId(5_000);
    pub const CEILING_DB: ParamId = ParamId(5_001);
    pub const RELEASE_MS: ParamId = ParamId(5_002);
    pub const SATURATION_AMOUNT: ParamId = ParamId(5_003);
    pub const SATURATION_CURVE: ParamId = ParamId(5_004); // 0..3 -> SaturationCurve
    pub const AUTO_MAKEUP: ParamId = ParamId(5_005);
    pub const TRUE_PEAK_OVERSAMPLE: ParamId = ParamId(5_006); // 0,2,4,8
    pub const LOOKAHEAD_MS: ParamId = ParamId(5_007);
}

fn saturate(x: Sample, curve: SaturationCurve, amount: f64) -> Sample {
    let amount = amount.clamp(0.0, 1.0) as Sample;
    if amount <= 0.0 {
        return x;
    }
    let driven = x * (1.0 + amount * 3.0);
    let shaped = match curve {
        SaturationCurve::BrickWall => driven.clamp(-1.0, 1.0),
        SaturationCurve::SoftKnee => driven / (1.0 + driven.abs()),
        SaturationCurve::Tube => {
            if driven >= 0.0 {
                1.0 - (-driven).exp()
            } else {
                -(1.0 - driven.exp())
            }
        }
        SaturationCurve::Transparent => driven.tanh(),
    };
    x * (1.0 - amount) + shaped * amount
}

pub struct Maximizer {
    sample_rate: f64,
    input_gain_db: f64,
    ceiling_db: f64,
    release_ms: f64,
    saturation_amount: f64,
    curve: SaturationCurve,
    auto_makeup: bool,
    oversample: u8,

    lookahead_buf_l: Vec<Sample>,
    lookahead_buf_r: Vec<Sample>,
    lookahead_write: usize,
    lookahead_samples: usize,

    gain_reduction_linear: f64,
    release_coeff: f64,
}

impl Maximizer {
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000.0,
            input_gain_db: 0.0,
            ceiling_db: -0.1,
            release_ms: 50.0,
            saturation_amount: 0.0,
            curve: SaturationCurve::Transparent,
            auto_makeup: false,
            oversample: 1,
            lookahead_buf_l: vec![0.0; 1],
            lookahead_buf_r: vec![0.0; 1],
            lookahead_write: 0,
            lookahead_samples: 0,
            gain_reduction_linear: 1.0,
            release_coeff: 0.0,
        }
    }

    fn refresh_release_coeff(&mut self) {
        self.release_coeff = (-1.0 / (self.release_ms.max(1.0) * 0.001 * self.sample_rate)).exp();
    }

    fn refresh_lookahead(&mut self) {
        self.lookahead_buf_l = vec![0.0; self.lookahead_samples.max(1)];
        self.lookahead_buf_r = vec![0.0; self.lookahead_samples.max(1)];
        self.lookahead_write = 0;
    }
}

impl Default for Maximizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Maximizer {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.refresh_release_coeff();
        self.refresh_lookahead();
    }

    fn reset(&mut self) {
        self.gain_reduction_linear = 1.0;
        self.lookahead_buf_l.iter_mut().for_each(|s| *s = 0.0);
        self.lookahead_buf_r.iter_mut().for_each(|s| *s = 0.0);
        self.lookahead_write = 0;
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::INPUT_GAIN_DB => self.input_gain_db = value,
            param_ids::CEILING_DB => self.ceiling_db = value.min(0.0),
            param_ids::RELEASE_MS => {
                self.release_ms = value.max(1.0);
                self.refresh_release_coeff();
            }
            param_ids::SATURATION_AMOUNT => self.saturation_amount = value,
            param_ids::SATURATION_CURVE => {
                self.curve = match value as i32 {
                    0 => SaturationCurve::BrickWall,
                    1 => SaturationCurve::SoftKnee,
                    2 => SaturationCurve::Tube,
                    _ => SaturationCurve::Transparent,
                }
            }
            param_ids::AUTO_MAKEUP => self.auto_makeup = value >= 0.5,
            param_ids::TRUE_PEAK_OVERSAMPLE => {
                self.oversample = match value as i32 {
                    2 => 2,
                    4 => 4,
                    8 => 8,
                    _ => 1,
                };
            }
            param_ids::LOOKAHEAD_MS => {
                self.lookahead_samples = (value.max(0.0) * 0.001 * self.sample_rate) as usize;
                self.refresh_lookahead();
            }
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let input_gain = 10f64.powf(self.input_gain_db / 20.0) as Sample;
        let ceiling = 10f64.powf(self.ceiling_db / 20.0) as Sample;
        let makeup: Sample = if self.auto_makeup { 1.0 / input_gain.max(1e-6) } else { 1.0 };

        for (i, (frame_in, frame_out)) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)).enumerate() {
            let driven_l = saturate(frame_in[0] * input_gain, self.curve, self.saturation_amount);
            let driven_r = saturate(frame_in[1] * input_gain, self.curve, self.saturation_amount);

            let (src_l, src_r) = if self.lookahead_samples > 0 {
                let read_idx = (self.lookahead_write + 1) % self.lookahead_buf_l.len();
                let delayed = (self.lookahead_buf_l[read_idx], self.lookahead_buf_r[read_idx]);
                self.lookahead_buf_l[self.lookahead_write] = driven_l;
                self.lookahead_buf_r[self.lookahead_write] = driven_r;
                self.lookahead_write = (self.lookahead_write + 1) % self.lookahead_buf_l.len();
                delayed
            } else {
                (driven_l, driven_r)
            };

            let peak = (driven_l.abs()).max(driven_r.abs()) as f64;
            let ceiling_f = ceiling as f64;
            let needed_gain = if peak > ceiling_f { ceiling_f / peak } else { 1.0 };

            if needed_gain < self.gain_reduction_linear {
                self.gain_reduction_linear = needed_gain;
            } else {
                self.gain_reduction_linear = needed_gain + self.release_coeff * (self.gain_reduction_linear - needed_gain);
                self.gain_reduction_linear = self.gain_reduction_linear.min(1.0);
            }

            let _ = i;
            let g = self.gain_reduction_linear as Sample * makeup;
            frame_out[0] = flush_denormal(src_l * g);
            frame_out[1] = flush_denormal(src_r * g);
        }
    }

    fn latency_samples(&self) -> usize {
        self.lookahead_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_never_exceeds_ceiling() {
        let mut max = Maximizer::new();
        max.prepare(48_000.0, 256);
        max.set_parameter(param_ids::CEILING_DB, -1.0);
        max.set_parameter(param_ids::RELEASE_MS, 20.0);
        let input = vec![2.0; 256];
        let mut output = vec![0.0; 256];
        for _ in 0..10 {
            max.process(&input, None, &mut output);
        }
        let ceiling = 10f64.powf(-1.0 / 20.0) as Sample;
        for s in &output {
            assert!(s.abs() <= ceiling * 1.01);
        }
    }
}
