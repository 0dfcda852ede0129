//! Audio-thread parameter state: owns one `SmoothedParam` per registered parameter ID, ticks
//! every one of them once per block, and tracks which IDs changed since the last drain so a
//! host UI or automation recorder can poll cheaply (`SPEC_FULL.md` §6, "Parameter registry").

use std::collections::{HashMap, HashSet};

use ae_core::{ParamId, ParamRange};
use ae_dsp::smoothing::{SmoothedParam, SmoothingType};

use crate::commands::ParamOpts;

struct Entry {
    param: SmoothedParam,
    range: ParamRange,
    default_ramp_seconds: f64,
}

/// Owns every smoothed parameter's live value and advances them block-by-block. Lives entirely
/// on the audio thread; the control thread only ever reaches it indirectly through commands
/// drained by `AudioExecutor`.
pub struct ParameterController {
    sample_rate: f64,
    entries: HashMap<ParamId, Entry>,
    dirty: HashSet<ParamId>,
}

impl ParameterController {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate, entries: HashMap::new(), dirty: HashSet::new() }
    }

    /// Registers a parameter with its validated range and default ramp duration. Re-registering
    /// an existing ID resets its current value to the range's default.
    pub fn register(&mut self, id: ParamId, range: ParamRange, default_ramp_seconds: f64, smoothing_type: SmoothingType) {
        let param = SmoothedParam::new(range.default, self.sample_rate, default_ramp_seconds, smoothing_type)
            .with_range(range.min, range.max);
        self.entries.insert(id, Entry { param, range, default_ramp_seconds });
    }

    pub fn is_registered(&self, id: ParamId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Sets a parameter's target, clamped against its registered range. `opts.immediate` snaps
    /// and cancels any in-flight ramp; otherwise ramps over `opts.ramp_seconds` (falling back to
    /// the parameter's registered default when `ramp_seconds <= 0.0`).
    pub fn set(&mut self, id: ParamId, value: f64, opts: ParamOpts) {
        let Some(entry) = self.entries.get_mut(&id) else { return };
        let clamped = entry.range.clamp(value);
        if opts.immediate {
            entry.param.set_immediate(clamped);
        } else {
            let ramp = if opts.ramp_seconds > 0.0 { opts.ramp_seconds } else { entry.default_ramp_seconds };
            entry.param.set_smoothing_time(ramp);
            entry.param.set_target(clamped);
        }
        self.dirty.insert(id);
    }

    /// Advances every registered parameter by one block's worth of samples. Called once per
    /// block from the real-time pipeline, after commands are drained and before the mixer runs.
    pub fn tick_block(&mut self, block_size: usize) {
        for entry in self.entries.values_mut() {
            entry.param.process_block(block_size);
        }
    }

    pub fn value(&self, id: ParamId) -> Option<f64> {
        self.entries.get(&id).map(|e| e.param.current())
    }

    pub fn is_smoothing(&self, id: ParamId) -> bool {
        self.entries.get(&id).map(|e| e.param.is_smoothing()).unwrap_or(false)
    }

    /// Drains and returns the set of parameter IDs written since the last call, for a host UI
    /// or automation recorder to poll without re-reading every parameter each block.
    pub fn take_dirty(&mut self) -> Vec<ParamId> {
        self.dirty.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_id_set_is_a_noop() {
        let mut ctrl = ParameterController::new(48_000.0);
        ctrl.set(ParamId::new(1), 0.5, ParamOpts::IMMEDIATE);
        assert_eq!(ctrl.value(ParamId::new(1)), None);
    }

    #[test]
    fn immediate_set_snaps_without_ramping() {
        let mut ctrl = ParameterController::new(48_000.0);
        ctrl.register(ParamId::new(1), ParamRange::linear(0.0, 1.0, 0.0), 0.05, SmoothingType::Linear);
        ctrl.set(ParamId::new(1), 0.8, ParamOpts::IMMEDIATE);
        assert_eq!(ctrl.value(ParamId::new(1)), Some(0.8));
        assert!(!ctrl.is_smoothing(ParamId::new(1)));
    }

    #[test]
    fn ramped_set_reaches_target_after_duration_and_clamps_out_of_range() {
        let mut ctrl = ParameterController::new(1000.0);
        ctrl.register(ParamId::new(1), ParamRange::linear(0.0, 1.0, 0.0), 0.01, SmoothingType::Linear);
        ctrl.set(ParamId::new(1), 5.0, ParamOpts::ramped(0.01));
        assert!(ctrl.is_smoothing(ParamId::new(1)));
        ctrl.tick_block(10);
        assert!((ctrl.value(ParamId::new(1)).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn immediate_set_cancels_an_in_flight_ramp() {
        let mut ctrl = ParameterController::new(1000.0);
        ctrl.register(ParamId::new(1), ParamRange::linear(0.0, 1.0, 0.0), 1.0, SmoothingType::Linear);
        ctrl.set(ParamId::new(1), 1.0, ParamOpts::ramped(1.0));
        ctrl.tick_block(1);
        assert!(ctrl.is_smoothing(ParamId::new(1)));

        ctrl.set(ParamId::new(1), 0.25, ParamOpts::IMMEDIATE);
        assert!(!ctrl.is_smoothing(ParamId::new(1)));
        assert_eq!(ctrl.value(ParamId::new(1)), Some(0.25));
    }

    #[test]
    fn take_dirty_reports_and_clears_changed_ids() {
        let mut ctrl = ParameterController::new(48_000.0);
        ctrl.register(ParamId::new(1), ParamRange::linear(0.0, 1.0, 0.0), 0.01, SmoothingType::Linear);
        ctrl.register(ParamId::new(2), ParamRange::linear(0.0, 1.0, 0.0), 0.01, SmoothingType::Linear);
        ctrl.set(ParamId::new(1), 0.5, ParamOpts::IMMEDIATE);

        let dirty = ctrl.take_dirty();
        assert_eq!(dirty, vec![ParamId::new(1)]);
        assert!(ctrl.take_dirty().is_empty());
    }
}
