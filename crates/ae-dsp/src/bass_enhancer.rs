//! Bass enhancer: sub-harmonic synthesis with a saturation/texture/taste stage chain
//! (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::envelope_follower::EnvelopeFollower;
use crate::Processor;

pub mod param_ids {
    use ae_core::ParamId;
    pub const SUB_BOOST: ParamId = ParamId(8_000);
    pub const SATURATION: ParamId = ParamId(8_001);
    pub const PUNCH: ParamId = ParamId(8_002);
    pub const TASTE: ParamId = ParamId(8_003);
    pub const TEXTURE: ParamId = ParamId(8_004);
    pub const WET: ParamId = ParamId(8_005);
}

/// Signed square root preserves sign while halving the perceived fundamental, a cheap way to
/// generate a sub-harmonic from a band-limited low-end signal.
fn signed_sqrt(x: Sample) -> Sample {
    x.signum() * x.abs().sqrt()
}

struct ChannelState {
    isolate_lp: BiquadTdf2,
    cleanup_hp: BiquadTdf2,
    envelope: EnvelopeFollower,
    taste_delay: Vec<Sample>,
    taste_write: usize,
}

impl ChannelState {
    fn new(sample_rate: f64) -> Self {
        let mut isolate_lp = BiquadTdf2::new(sample_rate);
        isolate_lp.set_lowpass(150.0, 0.7071);
        let mut cleanup_hp = BiquadTdf2::new(sample_rate);
        cleanup_hp.set_highpass(30.0, 0.7071);
        let mut envelope = EnvelopeFollower::new(sample_rate);
        envelope.set_times(10.0, 250.0);
        let delay_len = (sample_rate * 0.02) as usize + 1;
        Self {
            isolate_lp,
            cleanup_hp,
            envelope,
            taste_delay: vec![0.0; delay_len],
            taste_write: 0,
        }
    }

    fn reset(&mut self) {
        self.isolate_lp.reset();
        self.cleanup_hp.reset();
        self.envelope.reset();
        self.taste_delay.iter_mut().for_each(|s| *s = 0.0);
        self.taste_write = 0;
    }
}

pub struct BassEnhancer {
    sample_rate: f64,
    sub_boost: f64,
    saturation: f64,
    punch: f64,
    taste: f64,
    texture: f64,
    wet: f64,
    left: ChannelState,
    right: ChannelState,
}

impl BassEnhancer {
    pub fn new() -> Self {
        let sample_rate = 48_000.0;
        Self {
            sample_rate,
            sub_boost: 0.5,
            saturation: 0.3,
            punch: 0.3,
            taste: 0.2,
            texture: 0.2,
            wet: 0.5,
            left: ChannelState::new(sample_rate),
            right: ChannelState::new(sample_rate),
        }
    }

}

impl Default for BassEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for BassEnhancer {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.left = ChannelState::new(sample_rate);
        self.right = ChannelState::new(sample_rate);
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::SUB_BOOST => self.sub_boost = value.clamp(0.0, 1.0),
            param_ids::SATURATION => self.saturation = value.clamp(0.0, 1.0),
            param_ids::PUNCH => self.punch = value.clamp(0.0, 1.0),
            param_ids::TASTE => self.taste = value.clamp(0.0, 1.0),
            param_ids::TEXTURE => self.texture = value.clamp(0.0, 1.0),
            param_ids::WET => self.wet = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let wet = self.wet as Sample;
        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let enhanced_l = self.process_channel_left(frame_in[0]);
            let enhanced_r = self.process_channel_right(frame_in[1]);
            frame_out[0] = flush_denormal(frame_in[0] + enhanced_l * wet);
            frame_out[1] = flush_denormal(frame_in[1] + enhanced_r * wet);
        }
    }
}

impl BassEnhancer {
    fn params(&self) -> BassParams {
        BassParams {
            sub_boost: self.sub_boost,
            saturation: self.saturation,
            punch: self.punch,
            taste: self.taste,
            texture: self.texture,
        }
    }

    fn process_channel_left(&mut self, x: Sample) -> Sample {
        let params = self.params();
        process_with_params(&mut self.left, x, &params)
    }

    fn process_channel_right(&mut self, x: Sample) -> Sample {
        let params = self.params();
        process_with_params(&mut self.right, x, &params)
    }
}

struct BassParams {
    sub_boost: f64,
    saturation: f64,
    punch: f64,
    taste: f64,
    texture: f64,
}

fn process_with_params(ch: &mut ChannelState, x: Sample, params: &BassParams) -> Sample {
    let isolated = ch.cleanup_hp.process_sample(ch.isolate_lp.process_sample(x));
    let envelope = ch.envelope.process(isolated) as Sample;

    let sub = signed_sqrt(isolated) * (params.sub_boost as Sample) * (1.0 + envelope * (params.punch as Sample));

    let sat_amount = params.saturation as Sample;
    let saturated = sub * (1.0 - sat_amount) + sub.tanh() * sat_amount;

    let texture_amount = params.texture as Sample;
    let even_harmonic = saturated * saturated * saturated.signum();
    let textured = saturated * (1.0 - texture_amount) + even_harmonic * texture_amount;

    let taste_amount = params.taste as Sample;
    let delay_len = ch.taste_delay.len();
    let read_idx = (ch.taste_write + delay_len - (delay_len / 3)) % delay_len;
    let delayed = ch.taste_delay[read_idx];
    ch.taste_delay[ch.taste_write] = textured + delayed * 0.15;
    ch.taste_write = (ch.taste_write + 1) % delay_len;
    textured * (1.0 - taste_amount) + delayed * taste_amount
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_silence_out() {
        let mut bass = BassEnhancer::new();
        bass.prepare(48_000.0, 64);
        let input = vec![0.0; 128];
        let mut output = vec![0.0; 128];
        bass.process(&input, None, &mut output);
        for s in output {
            assert_eq!(s, 0.0);
        }
    }

    #[test]
    fn low_frequency_content_is_enhanced() {
        let mut bass = BassEnhancer::new();
        bass.prepare(48_000.0, 512);
        bass.set_parameter(param_ids::SUB_BOOST, 1.0);
        bass.set_parameter(param_ids::WET, 1.0);
        let n = 2048;
        let mut input = vec![0.0; n * 2];
        for (i, frame) in input.chunks_exact_mut(2).enumerate() {
            let t = i as f32 / 48_000.0;
            let s = (2.0 * std::f32::consts::PI * 60.0 * t).sin() * 0.5;
            frame[0] = s;
            frame[1] = s;
        }
        let mut output = vec![0.0; n * 2];
        bass.process(&input, None, &mut output);
        let out_energy: f32 = output.iter().map(|s| s * s).sum();
        assert!(out_energy > 0.0);
    }
}
