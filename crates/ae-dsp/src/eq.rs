//! Fixed 3-band EQ: low-shelf, mid-peaking (fixed 1 kHz), high-shelf. Built into every mixer
//! channel (`SPEC_FULL.md` §4.7, §10.5).

use ae_core::{ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::Processor;

pub const MID_FREQ_HZ: f64 = 1_000.0;

pub mod param_ids {
    use ae_core::ParamId;
    pub const LOW_GAIN: ParamId = ParamId(3_000);
    pub const LOW_FREQ: ParamId = ParamId(3_001);
    pub const MID_GAIN: ParamId = ParamId(3_002);
    pub const MID_Q: ParamId = ParamId(3_003);
    pub const HIGH_GAIN: ParamId = ParamId(3_004);
    pub const HIGH_FREQ: ParamId = ParamId(3_005);
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    low: BiquadTdf2,
    mid: BiquadTdf2,
    high: BiquadTdf2,
}

impl ChannelState {
    fn new(sample_rate: f64) -> Self {
        Self {
            low: BiquadTdf2::new(sample_rate),
            mid: BiquadTdf2::new(sample_rate),
            high: BiquadTdf2::new(sample_rate),
        }
    }
}

/// A three-band EQ; coefficients recompute only when a source parameter is dirtied, per the
/// Parameter Controller's dirty-set convention (`SPEC_FULL.md` §4.5).
pub struct ThreeBandEq {
    left: ChannelState,
    right: ChannelState,
    sample_rate: f64,
    low_gain_db: f64,
    low_freq: f64,
    mid_gain_db: f64,
    mid_q: f64,
    high_gain_db: f64,
    high_freq: f64,
    dirty: bool,
}

impl ThreeBandEq {
    pub fn new() -> Self {
        Self {
            left: ChannelState::new(48_000.0),
            right: ChannelState::new(48_000.0),
            sample_rate: 48_000.0,
            low_gain_db: 0.0,
            low_freq: 120.0,
            mid_gain_db: 0.0,
            mid_q: 1.0,
            high_gain_db: 0.0,
            high_freq: 8_000.0,
            dirty: true,
        }
    }

    fn recompute_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        for ch in [&mut self.left, &mut self.right] {
            ch.low.set_low_shelf(self.low_freq, 0.7071, self.low_gain_db);
            ch.mid.set_peaking(MID_FREQ_HZ, self.mid_q, self.mid_gain_db);
            ch.high.set_high_shelf(self.high_freq, 0.7071, self.high_gain_db);
        }
        self.dirty = false;
    }

    fn process_channel(ch: &mut ChannelState, x: Sample) -> Sample {
        let y = ch.low.process_sample(x);
        let y = ch.mid.process_sample(y);
        ch.high.process_sample(y)
    }
}

impl Default for ThreeBandEq {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ThreeBandEq {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.left = ChannelState::new(sample_rate);
        self.right = ChannelState::new(sample_rate);
        self.dirty = true;
    }

    fn reset(&mut self) {
        self.left.low.reset();
        self.left.mid.reset();
        self.left.high.reset();
        self.right.low.reset();
        self.right.mid.reset();
        self.right.high.reset();
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::LOW_GAIN => self.low_gain_db = value,
            param_ids::LOW_FREQ => self.low_freq = value,
            param_ids::MID_GAIN => self.mid_gain_db = value,
            param_ids::MID_Q => self.mid_q = value,
            param_ids::HIGH_GAIN => self.high_gain_db = value,
            param_ids::HIGH_FREQ => self.high_freq = value,
            _ => return,
        }
        self.dirty = true;
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        self.recompute_if_dirty();
        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            frame_out[0] = Self::process_channel(&mut self.left, frame_in[0]);
            frame_out[1] = Self::process_channel(&mut self.right, frame_in[1]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_eq_passes_signal_near_unchanged() {
        let mut eq = ThreeBandEq::new();
        eq.prepare(48_000.0, 512);
        let input = vec![0.5, -0.5, 0.3, -0.3];
        let mut output = vec![0.0; 4];
        eq.process(&input, None, &mut output);
        for (i, o) in input.iter().zip(output.iter()) {
            assert!((i - o).abs() < 0.05);
        }
    }

    #[test]
    fn dirty_flag_forces_recompute_on_param_change() {
        let mut eq = ThreeBandEq::new();
        eq.prepare(48_000.0, 512);
        eq.set_parameter(param_ids::LOW_GAIN, 6.0);
        assert!(eq.dirty);
        eq.recompute_if_dirty();
        assert!(!eq.dirty);
    }
}
