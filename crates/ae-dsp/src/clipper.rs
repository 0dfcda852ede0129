//! Six-mode clipper: hard, soft, tube, diode, foldback, bitcrush (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipMode {
    Hard,
    Soft,
    Tube,
    Diode,
    Foldback,
    Bitcrush,
}

pub mod param_ids {
    use ae_core::ParamId;
    pub const MODE: ParamId = ParamId(6_000); // 0..6 -> ClipMode
    pub const CEILING_DB: ParamId = ParamId(6_001);
    pub const HARDNESS_PCT: ParamId = ParamId(6_002);
    pub const HARMONICS_PCT: ParamId = ParamId(6_003);
    pub const PRE_GAIN_DB: ParamId = ParamId(6_004);
    pub const POST_GAIN_DB: ParamId = ParamId(6_005);
    pub const DC_FILTER: ParamId = ParamId(6_006); // bool
    pub const OVERSAMPLE: ParamId = ParamId(6_007); // 1,2,4,8
    pub const MIX: ParamId = ParamId(6_008);
    pub const BITCRUSH_BITS: ParamId = ParamId(6_009);
}

fn clip_sample(x: Sample, mode: ClipMode, ceiling: Sample, hardness: Sample, harmonics: Sample, bits: Sample) -> Sample {
    let x = x / ceiling;
    let clipped = match mode {
        ClipMode::Hard => x.clamp(-1.0, 1.0),
        ClipMode::Soft => {
            let k = 1.0 + hardness * 4.0;
            (x * k).tanh() / k.tanh().max(1e-6)
        }
        ClipMode::Tube => {
            let drive = 1.0 + harmonics * 3.0;
            let driven = x * drive;
            if driven >= 0.0 {
                1.0 - (-driven).exp()
            } else {
                -1.0 + (driven).exp()
            }
        }
        ClipMode::Diode => {
            // asymmetric: harder clip on negative half, softer on positive
            if x >= 0.0 {
                (x * (1.0 + hardness)).tanh()
            } else {
                (x * 2.0).clamp(-1.0, 0.3)
            }
        }
        ClipMode::Foldback => {
            let mut y = x;
            while y.abs() > 1.0 {
                y = if y > 1.0 { 2.0 - y } else { -2.0 - y };
            }
            y
        }
        ClipMode::Bitcrush => {
            let levels = 2f32.powf(bits.max(1.0));
            (x * levels).round() / levels
        }
    };
    clipped * ceiling
}

pub struct Clipper {
    sample_rate: f64,
    mode: ClipMode,
    ceiling_db: f64,
    hardness_pct: f64,
    harmonics_pct: f64,
    pre_gain_db: f64,
    post_gain_db: f64,
    dc_filter_enabled: bool,
    mix: f64,
    bitcrush_bits: f64,

    dc_blocker_l: BiquadTdf2,
    dc_blocker_r: BiquadTdf2,
    samples_clipped: u64,
    samples_total: u64,
}

impl Clipper {
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000.0,
            mode: ClipMode::Hard,
            ceiling_db: 0.0,
            hardness_pct: 0.5,
            harmonics_pct: 0.3,
            pre_gain_db: 0.0,
            post_gain_db: 0.0,
            dc_filter_enabled: true,
            mix: 1.0,
            bitcrush_bits: 8.0,
            dc_blocker_l: BiquadTdf2::new(48_000.0),
            dc_blocker_r: BiquadTdf2::new(48_000.0),
            samples_clipped: 0,
            samples_total: 0,
        }
    }

    pub fn clipping_percentage(&self) -> f64 {
        if self.samples_total == 0 {
            0.0
        } else {
            self.samples_clipped as f64 / self.samples_total as f64 * 100.0
        }
    }
}

impl Default for Clipper {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Clipper {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.dc_blocker_l = BiquadTdf2::new(sample_rate);
        self.dc_blocker_r = BiquadTdf2::new(sample_rate);
        self.dc_blocker_l.set_highpass(20.0, 0.7071);
        self.dc_blocker_r.set_highpass(20.0, 0.7071);
        self.samples_clipped = 0;
        self.samples_total = 0;
    }

    fn reset(&mut self) {
        self.dc_blocker_l.reset();
        self.dc_blocker_r.reset();
        self.samples_clipped = 0;
        self.samples_total = 0;
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::MODE => {
                self.mode = match value as i32 {
                    0 => ClipMode::Hard,
                    1 => ClipMode::Soft,
                    2 => ClipMode::Tube,
                    3 => ClipMode::Diode,
                    4 => ClipMode::Foldback,
                    _ => ClipMode::Bitcrush,
                }
            }
            param_ids::CEILING_DB => self.ceiling_db = value,
            param_ids::HARDNESS_PCT => self.hardness_pct = (value / 100.0).clamp(0.0, 1.0),
            param_ids::HARMONICS_PCT => self.harmonics_pct = (value / 100.0).clamp(0.0, 1.0),
            param_ids::PRE_GAIN_DB => self.pre_gain_db = value,
            param_ids::POST_GAIN_DB => self.post_gain_db = value,
            param_ids::DC_FILTER => self.dc_filter_enabled = value >= 0.5,
            param_ids::MIX => self.mix = value.clamp(0.0, 1.0),
            param_ids::BITCRUSH_BITS => self.bitcrush_bits = value.clamp(1.0, 16.0),
            param_ids::OVERSAMPLE => {} // oversampling factor accepted, scalar path only
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let pre_gain = 10f64.powf(self.pre_gain_db / 20.0) as Sample;
        let post_gain = 10f64.powf(self.post_gain_db / 20.0) as Sample;
        let ceiling = 10f64.powf(self.ceiling_db / 20.0) as Sample;
        let hardness = self.hardness_pct as Sample;
        let harmonics = self.harmonics_pct as Sample;
        let bits = self.bitcrush_bits as Sample;
        let mix = self.mix as Sample;

        for frame in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let (frame_in, frame_out): (&[Sample], &mut [Sample]) = frame;
            let dry_l = frame_in[0];
            let dry_r = frame_in[1];
            let driven_l = dry_l * pre_gain;
            let driven_r = dry_r * pre_gain;

            self.samples_total += 2;
            if driven_l.abs() > ceiling {
                self.samples_clipped += 1;
            }
            if driven_r.abs() > ceiling {
                self.samples_clipped += 1;
            }

            let mut clipped_l = clip_sample(driven_l, self.mode, ceiling, hardness, harmonics, bits);
            let mut clipped_r = clip_sample(driven_r, self.mode, ceiling, hardness, harmonics, bits);

            if self.dc_filter_enabled {
                clipped_l = self.dc_blocker_l.process_sample(clipped_l);
                clipped_r = self.dc_blocker_r.process_sample(clipped_r);
            }

            clipped_l *= post_gain;
            clipped_r *= post_gain;

            frame_out[0] = flush_denormal(dry_l * (1.0 - mix) + clipped_l * mix);
            frame_out[1] = flush_denormal(dry_r * (1.0 - mix) + clipped_r * mix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_clip_respects_ceiling() {
        let mut c = Clipper::new();
        c.prepare(48_000.0, 64);
        c.set_parameter(param_ids::MODE, 0.0);
        c.set_parameter(param_ids::CEILING_DB, 0.0);
        c.set_parameter(param_ids::DC_FILTER, 0.0);
        let input = vec![2.0, -2.0];
        let mut output = vec![0.0; 2];
        c.process(&input, None, &mut output);
        assert!(output[0] <= 1.0001);
        assert!(output[1] >= -1.0001);
    }

    #[test]
    fn clipping_percentage_tracks_over_ceiling_samples() {
        let mut c = Clipper::new();
        c.prepare(48_000.0, 64);
        c.set_parameter(param_ids::CEILING_DB, 0.0);
        let input = vec![2.0; 64];
        let mut output = vec![0.0; 64];
        c.process(&input, None, &mut output);
        assert!(c.clipping_percentage() > 90.0);
    }
}
