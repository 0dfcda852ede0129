//! Modulation routing data model (`SPEC_FULL.md` §3, §4.4).

use smallvec::SmallVec;

use crate::ids::ParamId;
use crate::tempo::TempoSyncDivision;

pub const MAX_MODULATION_SLOTS: usize = 16;

/// LFO waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LfoWaveform {
    Sine,
    Triangle,
    Sawtooth,
    Square,
    SampleAndHold,
    SmoothRandom,
}

/// An LFO's rate, either free-running in Hz or locked to a tempo division. Tempo-synced
/// divisions are re-evaluated at each block boundary (fixed Open Question, `SPEC_FULL.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LfoRate {
    Hz(f64),
    Synced(TempoSyncDivision),
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LfoSettings {
    pub waveform: LfoWaveform,
    pub rate: LfoRate,
    pub depth: f64,
    pub phase_degrees: f64,
    pub fade_in_seconds: f64,
    pub polyphonic: bool,
    pub retrigger_on_note: bool,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            waveform: LfoWaveform::Sine,
            rate: LfoRate::Hz(1.0),
            depth: 1.0,
            phase_degrees: 0.0,
            fade_in_seconds: 0.0,
            polyphonic: false,
            retrigger_on_note: false,
        }
    }
}

/// Sources a modulation slot may read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModSource {
    Lfo(u8),
    Envelope(u8),
    Velocity,
    Aftertouch,
    ModWheel,
    PitchWheel,
}

/// Shape applied to a slot's contribution before summation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModCurve {
    Linear,
    /// Sign-preserving exponential: `sign(x) * |x|^k`.
    Exponential,
    SCurve,
}

impl ModCurve {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            ModCurve::Linear => x,
            ModCurve::Exponential => x.signum() * x.abs().powf(2.0),
            ModCurve::SCurve => {
                let t = (x + 1.0) * 0.5;
                let eased = t * t * (3.0 - 2.0 * t);
                eased * 2.0 - 1.0
            }
        }
    }
}

/// One modulation routing: a source mapped to a destination parameter with amount and curve.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModulationSlot {
    pub enabled: bool,
    pub source: ModSource,
    pub destination: ParamId,
    pub amount: f64,
    pub curve: ModCurve,
}

impl ModulationSlot {
    pub fn new(source: ModSource, destination: ParamId, amount: f64) -> Self {
        Self { enabled: true, source, destination, amount: amount.clamp(-1.0, 1.0), curve: ModCurve::Linear }
    }

    pub fn contribution(&self, source_value: f64) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.curve.apply(source_value) * self.amount
    }
}

/// Bounded collection of modulation slots, capped per `SPEC_FULL.md` §3.
pub type ModulationSlots = SmallVec<[ModulationSlot; MAX_MODULATION_SLOTS]>;

/// Combine a base value with every slot contribution targeting it, clamped into range, per
/// the linear-superposition routing rule (`SPEC_FULL.md` §4.4, §8).
pub fn combine_modulation(base: f64, contributions: impl IntoIterator<Item = f64>, min: f64, max: f64) -> f64 {
    let sum: f64 = contributions.into_iter().sum();
    (base + sum).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_curve_is_identity() {
        assert_eq!(ModCurve::Linear.apply(0.3), 0.3);
    }

    #[test]
    fn exponential_curve_preserves_sign() {
        assert!(ModCurve::Exponential.apply(-0.5) < 0.0);
        assert!(ModCurve::Exponential.apply(0.5) > 0.0);
    }

    #[test]
    fn combine_modulation_sums_and_clamps() {
        let result = combine_modulation(0.0, [0.6, 0.6], 0.0, 1.0);
        assert_eq!(result, 1.0);
    }

    #[test]
    fn modulation_slot_amount_is_clamped() {
        let slot = ModulationSlot::new(ModSource::Velocity, ParamId::new(1), 5.0);
        assert_eq!(slot.amount, 1.0);
    }
}
