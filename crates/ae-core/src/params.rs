//! Parameter primitives: normalized values, ranges with curves, and an atomic cell for
//! cross-thread parameter state.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::ids::ParamId;

/// A value guaranteed to lie in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct NormalizedValue(f64);

impl NormalizedValue {
    pub const ZERO: NormalizedValue = NormalizedValue(0.0);
    pub const ONE: NormalizedValue = NormalizedValue(1.0);
    pub const HALF: NormalizedValue = NormalizedValue(0.5);

    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn get(self) -> f64 {
        self.0
    }

    /// Linear map into `[min, max]`.
    pub fn map(self, min: f64, max: f64) -> f64 {
        min + self.0 * (max - min)
    }

    /// Logarithmic map into `[min, max]` (both must be strictly positive).
    pub fn map_log(self, min: f64, max: f64) -> f64 {
        debug_assert!(min > 0.0 && max > 0.0);
        min * (max / min).powf(self.0)
    }

    /// Exponential-skew map into `[min, max]` using the given exponent (>0; 1.0 == linear).
    pub fn map_exp(self, min: f64, max: f64, exponent: f64) -> f64 {
        min + self.0.powf(exponent) * (max - min)
    }
}

/// How a parameter's normalized `[0,1]` position maps onto its real-world range.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParamSkew {
    Linear,
    Logarithmic,
    Exponential(f64),
}

/// Full description of one parameter's range, default, and curve, as registered in the
/// Parameter Registry.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub skew: ParamSkew,
}

impl ParamRange {
    pub fn linear(min: f64, max: f64, default: f64) -> Self {
        Self { min, max, default, skew: ParamSkew::Linear }
    }

    pub fn logarithmic(min: f64, max: f64, default: f64) -> Self {
        debug_assert!(min > 0.0);
        Self { min, max, default, skew: ParamSkew::Logarithmic }
    }

    pub fn exponential(min: f64, max: f64, default: f64, exponent: f64) -> Self {
        Self { min, max, default, skew: ParamSkew::Exponential(exponent) }
    }

    /// Convert a normalized `[0,1]` value into this parameter's real value.
    pub fn denormalize(&self, norm: NormalizedValue) -> f64 {
        match self.skew {
            ParamSkew::Linear => norm.map(self.min, self.max),
            ParamSkew::Logarithmic => norm.map_log(self.min, self.max),
            ParamSkew::Exponential(exp) => norm.map_exp(self.min, self.max, exp),
        }
    }

    /// Convert a real value back into normalized `[0,1]` space.
    pub fn normalize(&self, value: f64) -> NormalizedValue {
        let value = value.clamp(self.min, self.max);
        let n = match self.skew {
            ParamSkew::Linear => {
                if (self.max - self.min).abs() < f64::EPSILON {
                    0.0
                } else {
                    (value - self.min) / (self.max - self.min)
                }
            }
            ParamSkew::Logarithmic => {
                ((value / self.min).ln()) / ((self.max / self.min).ln())
            }
            ParamSkew::Exponential(exp) => {
                ((value - self.min) / (self.max - self.min)).powf(1.0 / exp)
            }
        };
        NormalizedValue::new(n)
    }

    /// Clamp an already-real-valued candidate into `[min, max]`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A lock-free cell holding a single `f64` parameter value, safely shared between the audio
/// thread and control threads. Bit-casts through `AtomicU64` since `f64` has no native atomic.
#[derive(Debug)]
pub struct AtomicParam {
    bits: AtomicU64,
}

impl AtomicParam {
    pub fn new(initial: f64) -> Self {
        Self { bits: AtomicU64::new(initial.to_bits()) }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Move the stored value a fraction `coeff` of the way toward `target` (exponential
    /// approach), returning the new value. Intended to be called once per sample/block by a
    /// smoothing consumer.
    pub fn smooth_set(&self, target: f64, coeff: f64) -> f64 {
        let current = self.get();
        let next = current + (target - current) * coeff;
        self.set(next);
        next
    }
}

/// A single pending parameter change, as enqueued by the Parameter Controller and drained by
/// the audio thread.
#[derive(Debug, Clone, Copy)]
pub struct ParamChange {
    pub id: ParamId,
    pub value: f64,
    pub sample_offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_value_clamps() {
        assert_eq!(NormalizedValue::new(-1.0).get(), 0.0);
        assert_eq!(NormalizedValue::new(2.0).get(), 1.0);
    }

    #[test]
    fn linear_range_round_trip() {
        let range = ParamRange::linear(-24.0, 24.0, 0.0);
        let norm = range.normalize(12.0);
        let back = range.denormalize(norm);
        assert!((back - 12.0).abs() < 1e-9);
    }

    #[test]
    fn log_range_round_trip() {
        let range = ParamRange::logarithmic(20.0, 20_000.0, 1000.0);
        let norm = range.normalize(440.0);
        let back = range.denormalize(norm);
        assert!((back - 440.0).abs() < 1e-6);
    }

    #[test]
    fn atomic_param_smooths_toward_target() {
        let p = AtomicParam::new(0.0);
        for _ in 0..1000 {
            p.smooth_set(1.0, 0.01);
        }
        assert!(p.get() > 0.9);
    }
}
