//! Per-sample parameter smoothing, used throughout the DSP library and by the Parameter
//! Controller's ramp semantics (`SPEC_FULL.md` §4.5).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingType {
    Linear,
    Exponential,
    Logarithmic,
    SCurve,
    None,
}

impl Default for SmoothingType {
    fn default() -> Self {
        SmoothingType::Linear
    }
}

/// A smoothed scalar parameter: holds a target and a current value, and advances the current
/// value toward the target once per sample (or once per block, for coarser consumers) according
/// to its `SmoothingType`.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedParam {
    target: f64,
    current: f64,
    smoothing_type: SmoothingType,
    sample_rate: f64,
    smoothing_time_seconds: f64,
    exp_coeff: f64,
    linear_step: f64,
    linear_remaining: u32,
    min_value: f64,
    max_value: f64,
}

impl SmoothedParam {
    pub fn new(initial: f64, sample_rate: f64, smoothing_time_seconds: f64, smoothing_type: SmoothingType) -> Self {
        let mut p = Self {
            target: initial,
            current: initial,
            smoothing_type,
            sample_rate,
            smoothing_time_seconds,
            exp_coeff: 0.0,
            linear_step: 0.0,
            linear_remaining: 0,
            min_value: f64::NEG_INFINITY,
            max_value: f64::INFINITY,
        };
        p.recompute_exp_coeff();
        p
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    fn recompute_exp_coeff(&mut self) {
        if self.smoothing_time_seconds <= 0.0 {
            self.exp_coeff = 1.0;
        } else {
            self.exp_coeff = 1.0 - (-1.0 / (self.smoothing_time_seconds * self.sample_rate)).exp();
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.recompute_exp_coeff();
    }

    /// Overrides the ramp duration used by the next `set_target` call, without touching the
    /// current value or any ramp already in flight.
    pub fn set_smoothing_time(&mut self, smoothing_time_seconds: f64) {
        self.smoothing_time_seconds = smoothing_time_seconds;
        self.recompute_exp_coeff();
    }

    pub fn set_target(&mut self, target: f64) {
        let target = target.clamp(self.min_value, self.max_value);
        self.target = target;
        if self.smoothing_type == SmoothingType::Linear {
            let samples = (self.smoothing_time_seconds * self.sample_rate).max(1.0) as u32;
            self.linear_step = (target - self.current) / samples as f64;
            self.linear_remaining = samples;
        }
    }

    /// Set the target and snap immediately, cancelling any in-flight ramp.
    pub fn set_immediate(&mut self, value: f64) {
        let value = value.clamp(self.min_value, self.max_value);
        self.target = value;
        self.current = value;
        self.linear_remaining = 0;
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_smoothing(&self) -> bool {
        (self.current - self.target).abs() > 1e-9 || self.linear_remaining > 0
    }

    /// Advance by one sample, returning the new current value.
    pub fn tick(&mut self) -> f64 {
        match self.smoothing_type {
            SmoothingType::None => {
                self.current = self.target;
            }
            SmoothingType::Linear => {
                if self.linear_remaining > 0 {
                    self.current += self.linear_step;
                    self.linear_remaining -= 1;
                    if self.linear_remaining == 0 {
                        self.current = self.target;
                    }
                }
            }
            SmoothingType::Exponential => {
                self.current += (self.target - self.current) * self.exp_coeff;
            }
            SmoothingType::Logarithmic => {
                // approach the target proportionally in log-magnitude space, guarding sign/zero
                if self.target.abs() < 1e-12 || self.current.abs() < 1e-12 {
                    self.current += (self.target - self.current) * self.exp_coeff;
                } else {
                    let ratio = (self.target / self.current).signum() * (self.target / self.current).abs().powf(self.exp_coeff);
                    self.current *= ratio;
                }
            }
            SmoothingType::SCurve => {
                let delta = self.target - self.current;
                let t = self.exp_coeff.clamp(0.0, 1.0);
                let eased = t * t * (3.0 - 2.0 * t);
                self.current += delta * eased;
            }
        }
        self.current
    }

    pub fn process_block(&mut self, len: usize) -> f64 {
        for _ in 0..len {
            self.tick();
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_converges() {
        let mut p = SmoothedParam::new(0.0, 48_000.0, 0.01, SmoothingType::Exponential);
        p.set_target(1.0);
        for _ in 0..10_000 {
            p.tick();
        }
        assert!((p.current() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn linear_reaches_target_exactly_after_duration() {
        let mut p = SmoothedParam::new(0.0, 1000.0, 0.01, SmoothingType::Linear);
        p.set_target(1.0);
        for _ in 0..10 {
            p.tick();
        }
        assert!((p.current() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn set_immediate_cancels_ramp() {
        let mut p = SmoothedParam::new(0.0, 1000.0, 1.0, SmoothingType::Linear);
        p.set_target(1.0);
        p.tick();
        assert!(p.is_smoothing());
        p.set_immediate(-0.5);
        assert!(!p.is_smoothing());
        assert_eq!(p.current(), -0.5);
    }

    #[test]
    fn range_clamps_target() {
        let mut p = SmoothedParam::new(0.0, 1000.0, 0.0, SmoothingType::None).with_range(0.0, 1.0);
        p.set_target(5.0);
        p.tick();
        assert_eq!(p.current(), 1.0);
    }
}
