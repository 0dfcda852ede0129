//! Compressor: threshold/ratio/knee/attack/release/auto-makeup/stereo-link/look-ahead, with
//! optional external sidechain pre-filtering (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::envelope_follower::{DetectionMode, EnvelopeFollower};
use crate::Processor;

pub mod param_ids {
    use ae_core::ParamId;
    pub const THRESHOLD_DB: ParamId = ParamId(4_000);
    pub const RATIO: ParamId = ParamId(4_001);
    pub const KNEE_DB: ParamId = ParamId(4_002);
    pub const ATTACK_MS: ParamId = ParamId(4_003);
    pub const RELEASE_MS: ParamId = ParamId(4_004);
    pub const AUTO_MAKEUP: ParamId = ParamId(4_005);
    pub const STEREO_LINK: ParamId = ParamId(4_006);
    pub const LOOKAHEAD_MS: ParamId = ParamId(4_007);
    pub const SC_HPF_HZ: ParamId = ParamId(4_008);
    pub const SC_LPF_HZ: ParamId = ParamId(4_009);
    pub const SC_GAIN_DB: ParamId = ParamId(4_010);
    pub const DETECTION_MODE: ParamId = ParamId(4_011); // 0 = peak, 1 = rms
    pub const RMS_WINDOW_MS: ParamId = ParamId(4_012);
}

const SOFT_LIMITER_CEILING_DB: f64 = -0.3;
const MAX_LOOKAHEAD_MS: f64 = 10.0;

pub struct Compressor {
    sample_rate: f64,
    threshold_db: f64,
    ratio: f64,
    knee_db: f64,
    attack_ms: f64,
    release_ms: f64,
    auto_makeup: bool,
    stereo_link: bool,
    lookahead_ms: f64,
    sc_hpf_hz: f64,
    sc_lpf_hz: f64,
    sc_gain_db: f64,
    soft_limiter_enabled: bool,

    env_l: EnvelopeFollower,
    env_r: EnvelopeFollower,
    sc_hpf: BiquadTdf2,
    sc_lpf: BiquadTdf2,

    lookahead_buf_l: Vec<Sample>,
    lookahead_buf_r: Vec<Sample>,
    lookahead_write: usize,
    lookahead_samples: usize,

    last_gain_reduction_db: f64,
    last_sidechain_level_db: f64,
}

impl Compressor {
    pub fn new() -> Self {
        let sample_rate = 48_000.0;
        Self {
            sample_rate,
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 6.0,
            attack_ms: 5.0,
            release_ms: 150.0,
            auto_makeup: false,
            stereo_link: true,
            lookahead_ms: 0.0,
            sc_hpf_hz: 20.0,
            sc_lpf_hz: 20_000.0,
            sc_gain_db: 0.0,
            soft_limiter_enabled: true,
            env_l: EnvelopeFollower::new(sample_rate),
            env_r: EnvelopeFollower::new(sample_rate),
            sc_hpf: BiquadTdf2::new(sample_rate),
            sc_lpf: BiquadTdf2::new(sample_rate),
            lookahead_buf_l: Vec::new(),
            lookahead_buf_r: Vec::new(),
            lookahead_write: 0,
            lookahead_samples: 0,
            last_gain_reduction_db: 0.0,
            last_sidechain_level_db: f64::NEG_INFINITY,
        }
    }

    fn refresh_detector_times(&mut self) {
        self.env_l.set_times(self.attack_ms, self.release_ms);
        self.env_r.set_times(self.attack_ms, self.release_ms);
    }

    fn refresh_sidechain_filters(&mut self) {
        self.sc_hpf.set_highpass(self.sc_hpf_hz.max(1.0), 0.7071);
        self.sc_lpf.set_lowpass(self.sc_lpf_hz.min(self.sample_rate * 0.49), 0.7071);
    }

    fn refresh_lookahead_buffers(&mut self) {
        self.lookahead_samples = ((self.lookahead_ms.min(MAX_LOOKAHEAD_MS)) * 0.001 * self.sample_rate) as usize;
        self.lookahead_buf_l = vec![0.0; self.lookahead_samples.max(1)];
        self.lookahead_buf_r = vec![0.0; self.lookahead_samples.max(1)];
        self.lookahead_write = 0;
    }

    /// Gain reduction in dB for a detected level, applying threshold/ratio/knee.
    fn gain_reduction_db(&self, level_db: f64) -> f64 {
        let half_knee = self.knee_db / 2.0;
        let over = level_db - self.threshold_db;
        if over <= -half_knee {
            0.0
        } else if over >= half_knee {
            over - over / self.ratio
        } else {
            // soft-knee quadratic interpolation region
            let x = over + half_knee;
            let knee_ratio = (1.0 / self.ratio - 1.0) / (2.0 * self.knee_db.max(1e-6));
            knee_ratio * x * x
        }
    }

    fn makeup_gain_db(&self) -> f64 {
        if !self.auto_makeup {
            return 0.0;
        }
        // approximate makeup: half the reduction expected at 0dBFS input
        let at_zero = self.gain_reduction_db(0.0);
        at_zero * 0.5
    }

    pub fn gain_reduction_db_last(&self) -> f64 {
        self.last_gain_reduction_db
    }

    pub fn sidechain_level_db_last(&self) -> f64 {
        self.last_sidechain_level_db
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Compressor {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.env_l = EnvelopeFollower::new(sample_rate);
        self.env_r = EnvelopeFollower::new(sample_rate);
        self.sc_hpf.set_sample_rate(sample_rate);
        self.sc_lpf.set_sample_rate(sample_rate);
        self.refresh_detector_times();
        self.refresh_sidechain_filters();
        self.refresh_lookahead_buffers();
    }

    fn reset(&mut self) {
        self.env_l.reset();
        self.env_r.reset();
        self.sc_hpf.reset();
        self.sc_lpf.reset();
        self.lookahead_buf_l.iter_mut().for_each(|s| *s = 0.0);
        self.lookahead_buf_r.iter_mut().for_each(|s| *s = 0.0);
        self.lookahead_write = 0;
        self.last_gain_reduction_db = 0.0;
        self.last_sidechain_level_db = f64::NEG_INFINITY;
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::THRESHOLD_DB => self.threshold_db = value,
            param_ids::RATIO => self.ratio = value.max(1.0),
            param_ids::KNEE_DB => self.knee_db = value.max(0.0),
            param_ids::ATTACK_MS => {
                self.attack_ms = value.max(0.01);
                self.refresh_detector_times();
            }
            param_ids::RELEASE_MS => {
                self.release_ms = value.max(1.0);
                self.refresh_detector_times();
            }
            param_ids::AUTO_MAKEUP => self.auto_makeup = value >= 0.5,
            param_ids::STEREO_LINK => self.stereo_link = value >= 0.5,
            param_ids::LOOKAHEAD_MS => {
                self.lookahead_ms = value.max(0.0);
                self.refresh_lookahead_buffers();
            }
            param_ids::SC_HPF_HZ => {
                self.sc_hpf_hz = value;
                self.refresh_sidechain_filters();
            }
            param_ids::SC_LPF_HZ => {
                self.sc_lpf_hz = value;
                self.refresh_sidechain_filters();
            }
            param_ids::SC_GAIN_DB => self.sc_gain_db = value,
            param_ids::DETECTION_MODE => {
                let mode = if value >= 0.5 { DetectionMode::Rms } else { DetectionMode::Peak };
                self.env_l.set_mode(mode);
                self.env_r.set_mode(mode);
            }
            param_ids::RMS_WINDOW_MS => {
                self.env_l.set_rms_window_ms(value);
                self.env_r.set_rms_window_ms(value);
            }
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let sc_gain = 10f64.powf(self.sc_gain_db / 20.0) as Sample;
        for (i, (frame_in, frame_out)) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)).enumerate() {
            let (l, r) = (frame_in[0], frame_in[1]);

            // detection signal: external sidechain if supplied, else the input itself
            let (det_l, det_r) = if let Some(sc) = sidechain {
                let idx = i * 2;
                (sc[idx] * sc_gain, sc[idx + 1] * sc_gain)
            } else {
                (l, r)
            };
            let filtered_l = self.sc_lpf.process_sample(self.sc_hpf.process_sample(det_l));
            let filtered_r = self.sc_lpf.process_sample(self.sc_hpf.process_sample(det_r));

            let env_l = self.env_l.process(filtered_l);
            let env_r = self.env_r.process(filtered_r);
            let env = if self.stereo_link { env_l.max(env_r) } else { env_l };
            let env_r_eff = if self.stereo_link { env } else { env_r };

            let level_l_db = 20.0 * (env.max(1e-12)).log10();
            let level_r_db = 20.0 * (env_r_eff.max(1e-12)).log10();
            let gr_l = self.gain_reduction_db(level_l_db);
            let gr_r = self.gain_reduction_db(level_r_db);
            self.last_gain_reduction_db = gr_l.max(gr_r);
            self.last_sidechain_level_db = level_l_db.max(level_r_db);

            let makeup = self.makeup_gain_db();
            let gain_l = 10f64.powf((makeup - gr_l) / 20.0);
            let gain_r = 10f64.powf((makeup - gr_r) / 20.0);

            // look-ahead: write current sample, read delayed sample, apply gain computed from
            // the (non-delayed) detector above
            let (src_l, src_r) = if self.lookahead_samples > 0 {
                let read_idx = (self.lookahead_write + 1) % self.lookahead_buf_l.len();
                let delayed = (self.lookahead_buf_l[read_idx], self.lookahead_buf_r[read_idx]);
                self.lookahead_buf_l[self.lookahead_write] = l;
                self.lookahead_buf_r[self.lookahead_write] = r;
                self.lookahead_write = (self.lookahead_write + 1) % self.lookahead_buf_l.len();
                delayed
            } else {
                (l, r)
            };

            let mut out_l = src_l * gain_l as Sample;
            let mut out_r = src_r * gain_r as Sample;

            if self.soft_limiter_enabled {
                let ceiling = 10f64.powf(SOFT_LIMITER_CEILING_DB / 20.0) as Sample;
                out_l = soft_clip_to_ceiling(out_l, ceiling);
                out_r = soft_clip_to_ceiling(out_r, ceiling);
            }

            frame_out[0] = flush_denormal(out_l);
            frame_out[1] = flush_denormal(out_r);
        }
    }

    fn latency_samples(&self) -> usize {
        self.lookahead_samples
    }
}

/// Softly approaches `ceiling` asymptotically above it, passes through unchanged below it.
fn soft_clip_to_ceiling(x: Sample, ceiling: Sample) -> Sample {
    if x.abs() <= ceiling {
        x
    } else {
        let over = x.abs() - ceiling;
        let shaped = ceiling + ceiling * 0.25 * (1.0 - (-over / (ceiling * 0.25)).exp());
        shaped.min(ceiling * 1.25) * x.signum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_passes_unity() {
        let mut comp = Compressor::new();
        comp.prepare(48_000.0, 512);
        comp.set_parameter(param_ids::THRESHOLD_DB, -6.0);
        comp.set_parameter(param_ids::RATIO, 4.0);
        let input = vec![0.01, 0.01, -0.01, -0.01];
        let mut output = vec![0.0; 4];
        comp.process(&input, None, &mut output);
        assert!((output[0] - input[0]).abs() < 0.01);
    }

    #[test]
    fn sidechain_duck_reduces_gain_within_attack_window() {
        let mut comp = Compressor::new();
        comp.prepare(48_000.0, 64);
        comp.set_parameter(param_ids::THRESHOLD_DB, -20.0);
        comp.set_parameter(param_ids::RATIO, 4.0);
        comp.set_parameter(param_ids::ATTACK_MS, 5.0);
        comp.set_parameter(param_ids::RELEASE_MS, 200.0);

        let block = 64usize;
        let sustained: Vec<Sample> = vec![0.5; block * 2];
        let sidechain_hot: Vec<Sample> = vec![1.0; block * 2];
        let mut output = vec![0.0; block * 2];

        // run several blocks of sustained sidechain-hot signal to let attack settle
        for _ in 0..20 {
            comp.process(&sustained, Some(&sidechain_hot), &mut output);
        }
        assert!(comp.gain_reduction_db_last() >= 6.0);
    }
}
