//! Peak/RMS/correlation meter primitives, consumed by mixer channels and published to the
//! telemetry snapshot (`SPEC_FULL.md` §6, §10.5).

use ae_core::Sample;

/// Peak meter with exponential release and a held peak value.
#[derive(Debug, Clone)]
pub struct PeakMeter {
    current_peak: f64,
    peak_hold: f64,
    hold_samples: usize,
    hold_counter: usize,
    release_coeff: f64,
}

impl PeakMeter {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            current_peak: 0.0,
            peak_hold: 0.0,
            hold_samples: (sample_rate * 1.5) as usize,
            hold_counter: 0,
            release_coeff: (-1.0 / (0.6 * sample_rate)).exp(),
        }
    }

    pub fn process(&mut self, sample: Sample) {
        let abs = sample.abs() as f64;
        if abs > self.current_peak {
            self.current_peak = abs;
        } else {
            self.current_peak *= self.release_coeff;
        }

        if abs > self.peak_hold {
            self.peak_hold = abs;
            self.hold_counter = 0;
        } else {
            self.hold_counter += 1;
            if self.hold_counter >= self.hold_samples {
                self.peak_hold *= self.release_coeff;
            }
        }
    }

    pub fn process_block(&mut self, samples: &[Sample]) {
        for &s in samples {
            self.process(s);
        }
    }

    pub fn peak_dbfs(&self) -> f64 {
        20.0 * self.current_peak.max(1e-10).log10()
    }

    pub fn peak_hold_dbfs(&self) -> f64 {
        20.0 * self.peak_hold.max(1e-10).log10()
    }

    pub fn reset(&mut self) {
        self.current_peak = 0.0;
        self.peak_hold = 0.0;
        self.hold_counter = 0;
    }

    pub fn reset_peak_hold(&mut self) {
        self.peak_hold = self.current_peak;
        self.hold_counter = 0;
    }
}

/// Windowed RMS meter.
#[derive(Debug, Clone)]
pub struct RmsMeter {
    sum: f64,
    buffer: Vec<f64>,
    pos: usize,
}

impl RmsMeter {
    pub fn new(sample_rate: f64, window_ms: f64) -> Self {
        let window_samples = ((window_ms * 0.001 * sample_rate) as usize).max(1);
        Self { sum: 0.0, buffer: vec![0.0; window_samples], pos: 0 }
    }

    pub fn process(&mut self, sample: Sample) {
        let squared = (sample as f64) * (sample as f64);
        self.sum -= self.buffer[self.pos];
        self.sum += squared;
        self.buffer[self.pos] = squared;
        self.pos = (self.pos + 1) % self.buffer.len();
    }

    pub fn process_block(&mut self, samples: &[Sample]) {
        for &s in samples {
            self.process(s);
        }
    }

    pub fn rms(&self) -> f64 {
        (self.sum / self.buffer.len() as f64).max(0.0).sqrt()
    }

    pub fn rms_dbfs(&self) -> f64 {
        20.0 * self.rms().max(1e-10).log10()
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.pos = 0;
    }
}

/// Stereo correlation meter over a sliding window, smoothed for display stability.
#[derive(Debug, Clone)]
pub struct CorrelationMeter {
    sum_lr: f64,
    sum_ll: f64,
    sum_rr: f64,
    buffer_l: Vec<f64>,
    buffer_r: Vec<f64>,
    write_pos: usize,
    smoothed: f64,
    smooth_coeff: f64,
}

impl CorrelationMeter {
    pub fn new(sample_rate: f64, window_ms: f64) -> Self {
        let window_samples = ((window_ms * 0.001 * sample_rate) as usize).max(1);
        Self {
            sum_lr: 0.0,
            sum_ll: 0.0,
            sum_rr: 0.0,
            buffer_l: vec![0.0; window_samples],
            buffer_r: vec![0.0; window_samples],
            write_pos: 0,
            smoothed: 0.0,
            smooth_coeff: 0.1,
        }
    }

    pub fn process(&mut self, left: Sample, right: Sample) {
        let (left, right) = (left as f64, right as f64);
        let old_l = self.buffer_l[self.write_pos];
        let old_r = self.buffer_r[self.write_pos];

        self.sum_lr -= old_l * old_r;
        self.sum_ll -= old_l * old_l;
        self.sum_rr -= old_r * old_r;

        self.sum_lr += left * right;
        self.sum_ll += left * left;
        self.sum_rr += right * right;

        self.buffer_l[self.write_pos] = left;
        self.buffer_r[self.write_pos] = right;
        self.write_pos = (self.write_pos + 1) % self.buffer_l.len();

        let denominator = (self.sum_ll * self.sum_rr).sqrt();
        let raw = if denominator > 1e-10 { self.sum_lr / denominator } else { 0.0 };
        self.smoothed = self.smoothed * (1.0 - self.smooth_coeff) + raw * self.smooth_coeff;
    }

    pub fn process_block(&mut self, left: &[Sample], right: &[Sample]) {
        for (&l, &r) in left.iter().zip(right.iter()) {
            self.process(l, r);
        }
    }

    pub fn correlation(&self) -> f64 {
        self.smoothed.clamp(-1.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.sum_lr = 0.0;
        self.sum_ll = 0.0;
        self.sum_rr = 0.0;
        self.buffer_l.iter_mut().for_each(|s| *s = 0.0);
        self.buffer_r.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.smoothed = 0.0;
    }
}

/// Combined stereo meter: peak + RMS per channel plus correlation, matching the telemetry
/// snapshot shape published by the mixer.
#[derive(Debug, Clone)]
pub struct StereoMeter {
    pub peak_l: PeakMeter,
    pub peak_r: PeakMeter,
    pub rms_l: RmsMeter,
    pub rms_r: RmsMeter,
    pub correlation: CorrelationMeter,
}

impl StereoMeter {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            peak_l: PeakMeter::new(sample_rate),
            peak_r: PeakMeter::new(sample_rate),
            rms_l: RmsMeter::new(sample_rate, 300.0),
            rms_r: RmsMeter::new(sample_rate, 300.0),
            correlation: CorrelationMeter::new(sample_rate, 100.0),
        }
    }

    pub fn process(&mut self, left: Sample, right: Sample) {
        self.peak_l.process(left);
        self.peak_r.process(right);
        self.rms_l.process(left);
        self.rms_r.process(right);
        self.correlation.process(left, right);
    }

    pub fn process_block(&mut self, left: &[Sample], right: &[Sample]) {
        for (&l, &r) in left.iter().zip(right.iter()) {
            self.process(l, r);
        }
    }

    pub fn reset(&mut self) {
        self.peak_l.reset();
        self.peak_r.reset();
        self.rms_l.reset();
        self.rms_r.reset();
        self.correlation.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_meter_tracks_loudest_sample_and_releases() {
        let mut meter = PeakMeter::new(48_000.0);
        meter.process(0.8);
        assert!((meter.peak_dbfs() - 20.0 * 0.8f64.log10()).abs() < 1e-6);
        for _ in 0..48_000 {
            meter.process(0.0);
        }
        assert!(meter.peak_dbfs() < -40.0);
    }

    #[test]
    fn rms_meter_reports_half_power_for_full_scale_square_wave() {
        let mut meter = RmsMeter::new(48_000.0, 10.0);
        for _ in 0..480 {
            meter.process(1.0);
        }
        assert!((meter.rms() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn correlation_meter_detects_out_of_phase_signal() {
        let mut meter = CorrelationMeter::new(48_000.0, 20.0);
        for _ in 0..1000 {
            meter.process(0.5, -0.5);
        }
        assert!(meter.correlation() < -0.9);
    }
}
