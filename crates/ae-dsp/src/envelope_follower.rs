//! Attack/release envelope follower, the detection core for the Compressor and the
//! Bass Enhancer's sub-harmonic envelope (`SPEC_FULL.md` §4.7).

use ae_core::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    Peak,
    Rms,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvelopeFollower {
    attack_coeff: f64,
    release_coeff: f64,
    envelope: f64,
    sample_rate: f64,
    mode: DetectionMode,
    rms_window_samples: usize,
    rms_sum_sq: f64,
}

impl EnvelopeFollower {
    pub fn new(sample_rate: f64) -> Self {
        let mut f = Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            sample_rate,
            mode: DetectionMode::Peak,
            rms_window_samples: (sample_rate * 0.01) as usize,
            rms_sum_sq: 0.0,
        };
        f.set_times(10.0, 100.0);
        f
    }

    pub fn set_mode(&mut self, mode: DetectionMode) {
        self.mode = mode;
    }

    pub fn set_rms_window_ms(&mut self, ms: f64) {
        self.rms_window_samples = ((ms * 0.001 * self.sample_rate) as usize).max(1);
    }

    pub fn set_times(&mut self, attack_ms: f64, release_ms: f64) {
        self.attack_coeff = (-1.0 / (attack_ms * 0.001 * self.sample_rate)).exp();
        self.release_coeff = (-1.0 / (release_ms * 0.001 * self.sample_rate)).exp();
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.rms_sum_sq = 0.0;
    }

    #[inline]
    pub fn process(&mut self, input: Sample) -> f64 {
        let rectified = match self.mode {
            DetectionMode::Peak => (input as f64).abs(),
            DetectionMode::Rms => {
                let window = self.rms_window_samples.max(1) as f64;
                self.rms_sum_sq += (input as f64).powi(2) - self.rms_sum_sq / window;
                (self.rms_sum_sq / window).max(0.0).sqrt()
            }
        };
        let coeff = if rectified > self.envelope { self.attack_coeff } else { self.release_coeff };
        self.envelope = rectified + coeff * (self.envelope - rectified);
        self.envelope
    }

    pub fn envelope(&self) -> f64 {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rises_toward_input_level() {
        let mut f = EnvelopeFollower::new(48_000.0);
        f.set_times(1.0, 100.0);
        let mut last = 0.0;
        for _ in 0..2000 {
            last = f.process(1.0);
        }
        assert!(last > 0.9);
    }

    #[test]
    fn envelope_decays_after_input_stops() {
        let mut f = EnvelopeFollower::new(48_000.0);
        f.set_times(1.0, 10.0);
        for _ in 0..2000 {
            f.process(1.0);
        }
        let peak = f.envelope();
        for _ in 0..2000 {
            f.process(0.0);
        }
        assert!(f.envelope() < peak);
    }
}
