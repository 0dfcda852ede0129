//! Multiband imager: four Linkwitz-Riley crossovers splitting low/low-mid/high-mid/high, with
//! per-band M/S width control (`SPEC_FULL.md` §4.7).

use ae_core::{flush_denormal, ParamId, Sample};

use crate::biquad::BiquadTdf2;
use crate::Processor;

pub const NUM_BANDS: usize = 4;

pub mod param_ids {
    use ae_core::ParamId;
    pub const CROSSOVER_1: ParamId = ParamId(7_000);
    pub const CROSSOVER_2: ParamId = ParamId(7_001);
    pub const CROSSOVER_3: ParamId = ParamId(7_002);
    // band width/mute/solo: band index 0..4 encoded into the param ID offset
    pub const BAND_WIDTH_BASE: u64 = 7_010;
    pub const BAND_MUTE_BASE: u64 = 7_020;
    pub const BAND_SOLO_BASE: u64 = 7_030;
    pub const STEREOIZE: ParamId = ParamId(7_040);
    pub const GLOBAL_WIDTH: ParamId = ParamId(7_041);
    pub const WET: ParamId = ParamId(7_042);

    pub fn band_width(band: usize) -> ParamId {
        ParamId(BAND_WIDTH_BASE + band as u64)
    }
    pub fn band_mute(band: usize) -> ParamId {
        ParamId(BAND_MUTE_BASE + band as u64)
    }
    pub fn band_solo(band: usize) -> ParamId {
        ParamId(BAND_SOLO_BASE + band as u64)
    }
}

/// 4th-order Linkwitz-Riley filter: two cascaded 2nd-order Butterworth sections at Q=0.7071.
#[derive(Clone)]
struct LrFilter {
    stage1: BiquadTdf2,
    stage2: BiquadTdf2,
}

impl LrFilter {
    fn lowpass(sample_rate: f64, freq: f64) -> Self {
        let mut stage1 = BiquadTdf2::new(sample_rate);
        let mut stage2 = BiquadTdf2::new(sample_rate);
        stage1.set_lowpass(freq, 0.7071);
        stage2.set_lowpass(freq, 0.7071);
        Self { stage1, stage2 }
    }

    fn highpass(sample_rate: f64, freq: f64) -> Self {
        let mut stage1 = BiquadTdf2::new(sample_rate);
        let mut stage2 = BiquadTdf2::new(sample_rate);
        stage1.set_highpass(freq, 0.7071);
        stage2.set_highpass(freq, 0.7071);
        Self { stage1, stage2 }
    }

    fn process(&mut self, x: Sample) -> Sample {
        self.stage2.process_sample(self.stage1.process_sample(x))
    }

    fn reset(&mut self) {
        self.stage1.reset();
        self.stage2.reset();
    }
}

/// Splits a signal into low/high around one crossover frequency.
struct Crossover {
    low: LrFilter,
    high: LrFilter,
}

impl Crossover {
    fn new(sample_rate: f64, freq: f64) -> Self {
        Self { low: LrFilter::lowpass(sample_rate, freq), high: LrFilter::highpass(sample_rate, freq) }
    }

    fn split(&mut self, x: Sample) -> (Sample, Sample) {
        (self.low.process(x), self.high.process(x))
    }

    fn reset(&mut self) {
        self.low.reset();
        self.high.reset();
    }
}

struct BandSettings {
    width: f64,
    mute: bool,
    solo: bool,
}

impl Default for BandSettings {
    fn default() -> Self {
        Self { width: 0.0, mute: false, solo: false }
    }
}

/// Four-band imager: three crossovers cascade to produce low / low-mid / high-mid / high.
pub struct Imager {
    sample_rate: f64,
    crossover_1_hz: f64,
    crossover_2_hz: f64,
    crossover_3_hz: f64,

    xover_low: Crossover,
    xover_mid: Crossover,
    xover_high: Crossover,

    bands: [BandSettings; NUM_BANDS],
    stereoize: bool,
    global_width: f64,
    wet: f64,

    last_correlation: f64,
}

impl Imager {
    pub fn new() -> Self {
        let sample_rate = 48_000.0;
        Self {
            sample_rate,
            crossover_1_hz: 150.0,
            crossover_2_hz: 2_000.0,
            crossover_3_hz: 6_000.0,
            xover_low: Crossover::new(sample_rate, 150.0),
            xover_mid: Crossover::new(sample_rate, 2_000.0),
            xover_high: Crossover::new(sample_rate, 6_000.0),
            bands: [
                BandSettings::default(),
                BandSettings::default(),
                BandSettings::default(),
                BandSettings::default(),
            ],
            stereoize: false,
            global_width: 1.0,
            wet: 1.0,
            last_correlation: 1.0,
        }
    }

    fn rebuild_crossovers(&mut self) {
        self.xover_low = Crossover::new(self.sample_rate, self.crossover_1_hz);
        self.xover_mid = Crossover::new(self.sample_rate, self.crossover_2_hz);
        self.xover_high = Crossover::new(self.sample_rate, self.crossover_3_hz);
    }

    pub fn correlation(&self) -> f64 {
        self.last_correlation
    }

    fn split_bands(&mut self, mid: Sample, side: Sample) -> ([Sample; NUM_BANDS], [Sample; NUM_BANDS]) {
        let (low_m, rest_m) = self.xover_low.split(mid);
        let (lowmid_m, rest2_m) = self.xover_mid.split(rest_m);
        let (highmid_m, high_m) = self.xover_high.split(rest2_m);

        let (low_s, rest_s) = self.xover_low.split(side);
        let (lowmid_s, rest2_s) = self.xover_mid.split(rest_s);
        let (highmid_s, high_s) = self.xover_high.split(rest2_s);

        ([low_m, lowmid_m, highmid_m, high_m], [low_s, lowmid_s, highmid_s, high_s])
    }
}

impl Default for Imager {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Imager {
    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.rebuild_crossovers();
    }

    fn reset(&mut self) {
        self.xover_low.reset();
        self.xover_mid.reset();
        self.xover_high.reset();
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            param_ids::CROSSOVER_1 => {
                self.crossover_1_hz = value;
                self.rebuild_crossovers();
            }
            param_ids::CROSSOVER_2 => {
                self.crossover_2_hz = value;
                self.rebuild_crossovers();
            }
            param_ids::CROSSOVER_3 => {
                self.crossover_3_hz = value;
                self.rebuild_crossovers();
            }
            param_ids::STEREOIZE => self.stereoize = value >= 0.5,
            param_ids::GLOBAL_WIDTH => self.global_width = value,
            param_ids::WET => self.wet = value.clamp(0.0, 1.0),
            other => {
                for band in 0..NUM_BANDS {
                    if other == param_ids::band_width(band) {
                        self.bands[band].width = value.clamp(-100.0, 100.0) / 100.0;
                        return;
                    }
                    if other == param_ids::band_mute(band) {
                        self.bands[band].mute = value >= 0.5;
                        return;
                    }
                    if other == param_ids::band_solo(band) {
                        self.bands[band].solo = value >= 0.5;
                        return;
                    }
                }
            }
        }
    }

    fn process(&mut self, input: &[Sample], _sidechain: Option<&[Sample]>, output: &mut [Sample]) {
        let any_solo = self.bands.iter().any(|b| b.solo);
        let mut sum_lr = 0.0f64;
        let mut sum_l2 = 0.0f64;
        let mut sum_r2 = 0.0f64;

        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let l = frame_in[0];
            let r = frame_in[1];

            let mut mid = (l + r) * 0.5;
            let mut side = (l - r) * 0.5;

            if self.stereoize && side.abs() < 1e-9 {
                side = mid * (self.global_width as Sample) * 0.2;
                mid *= 1.0 - (self.global_width as Sample) * 0.1;
            }

            let (mids, sides) = self.split_bands(mid, side);

            let mut mid_out: Sample = 0.0;
            let mut side_out: Sample = 0.0;
            for band in 0..NUM_BANDS {
                let audible = !any_solo || self.bands[band].solo;
                if self.bands[band].mute || !audible {
                    continue;
                }
                let width_scale = (1.0 + self.bands[band].width) as Sample * self.global_width as Sample;
                mid_out += mids[band];
                side_out += sides[band] * width_scale;
            }

            let wet_l = mid_out + side_out;
            let wet_r = mid_out - side_out;
            let wet = self.wet as Sample;

            let out_l = flush_denormal(l * (1.0 - wet) + wet_l * wet);
            let out_r = flush_denormal(r * (1.0 - wet) + wet_r * wet);
            frame_out[0] = out_l;
            frame_out[1] = out_r;

            sum_lr += (out_l * out_r) as f64;
            sum_l2 += (out_l * out_l) as f64;
            sum_r2 += (out_r * out_r) as f64;
        }

        if sum_l2 > 1e-12 && sum_r2 > 1e-12 {
            self.last_correlation = (sum_lr / (sum_l2.sqrt() * sum_r2.sqrt())).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_all_but_one_band_attenuates_other_bands() {
        let mut imager = Imager::new();
        imager.prepare(48_000.0, 512);
        imager.set_parameter(param_ids::CROSSOVER_1, 150.0);
        imager.set_parameter(param_ids::CROSSOVER_2, 2_500.0);
        imager.set_parameter(param_ids::CROSSOVER_3, 6_000.0);
        // solo band 2 (high-mid, 2.5-6kHz)
        imager.set_parameter(param_ids::band_solo(2), 1.0);

        let n = 4096;
        let mut rng_state: u32 = 12345;
        let mut input = vec![0.0; n * 2];
        for frame in input.chunks_exact_mut(2) {
            rng_state = rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
            let noise = ((rng_state >> 8) as f32 / (1u32 << 24) as f32) * 2.0 - 1.0;
            frame[0] = noise;
            frame[1] = noise;
        }
        let mut output = vec![0.0; n * 2];
        imager.process(&input, None, &mut output);

        let in_energy: f64 = input.iter().map(|s| (*s as f64).powi(2)).sum();
        let out_energy: f64 = output.iter().map(|s| (*s as f64).powi(2)).sum();
        assert!(out_energy < in_energy);
    }

    #[test]
    fn correlation_is_one_for_identical_channels() {
        let mut imager = Imager::new();
        imager.prepare(48_000.0, 64);
        let input = vec![0.3; 128];
        let mut output = vec![0.0; 128];
        imager.process(&input, None, &mut output);
        assert!((imager.correlation() - 1.0).abs() < 0.05);
    }
}
