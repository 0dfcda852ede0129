//! LFO generation, envelope modulation sources, and the routing matrix that sums slot
//! contributions into parameter destinations (`SPEC_FULL.md` §4.4).
//!
//! Tempo-synced LFO rates are wall-clock in Hz between block boundaries and re-evaluated at
//! the start of each block against the current tempo (fixed Open Question, `SPEC_FULL.md` §9).

use std::collections::HashMap;

use ae_core::{
    combine_modulation, EngineError, EngineResult, LfoRate, LfoSettings, LfoWaveform, ModSource, ModulationSlot,
    ModulationSlots, ParamId, MAX_MODULATION_SLOTS,
};

const TWO_PI: f64 = std::f64::consts::PI * 2.0;

/// A single free-running or tempo-synced LFO, advanced one sample at a time.
#[derive(Debug, Clone)]
pub struct Lfo {
    settings: LfoSettings,
    phase: f64,
    sample_rate: f64,
    elapsed_seconds: f64,
    hold_value: f64,
    rng_state: u64,
}

impl Lfo {
    pub fn new(sample_rate: f64, settings: LfoSettings) -> Self {
        let phase = settings.phase_degrees / 360.0;
        Self {
            settings,
            phase: phase.rem_euclid(1.0),
            sample_rate,
            elapsed_seconds: 0.0,
            hold_value: 0.0,
            rng_state: 0x9E3779B97F4A7C15,
        }
    }

    pub fn retrigger(&mut self) {
        if self.settings.retrigger_on_note {
            self.phase = (self.settings.phase_degrees / 360.0).rem_euclid(1.0);
            self.elapsed_seconds = 0.0;
        }
    }

    fn next_random(&mut self) -> f64 {
        // xorshift64*, deterministic and allocation-free.
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        ((self.rng_state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    fn rate_hz(&self, bpm: f64) -> f64 {
        match self.settings.rate {
            LfoRate::Hz(hz) => hz,
            LfoRate::Synced(division) => division.to_hz(bpm),
        }
    }

    /// Advances the LFO by one sample and returns its current output in `[-1, 1]`, scaled by
    /// `depth` and any attack fade-in.
    pub fn tick(&mut self, bpm: f64) -> f64 {
        let rate = self.rate_hz(bpm).max(0.0);
        let raw = match self.settings.waveform {
            LfoWaveform::Sine => (self.phase * TWO_PI).sin(),
            LfoWaveform::Triangle => 4.0 * (self.phase - (self.phase + 0.5).floor()).abs() - 1.0,
            LfoWaveform::Sawtooth => 2.0 * (self.phase - self.phase.floor()) - 1.0,
            LfoWaveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoWaveform::SampleAndHold => self.hold_value,
            LfoWaveform::SmoothRandom => self.hold_value,
        };

        let prev_phase = self.phase;
        self.phase += rate / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
            if matches!(self.settings.waveform, LfoWaveform::SampleAndHold) {
                self.hold_value = self.next_random();
            }
        }
        if matches!(self.settings.waveform, LfoWaveform::SmoothRandom) {
            let target = if self.phase < prev_phase { self.next_random() } else { self.hold_value };
            self.hold_value = self.hold_value * 0.999 + target * 0.001;
        }

        self.elapsed_seconds += 1.0 / self.sample_rate;
        let fade = if self.settings.fade_in_seconds > 0.0 {
            (self.elapsed_seconds / self.settings.fade_in_seconds).clamp(0.0, 1.0)
        } else {
            1.0
        };

        raw * self.settings.depth * fade
    }
}

/// Owns the full set of LFOs and a routing matrix of modulation slots, and evaluates every
/// destination parameter's modulated value once per block.
pub struct ModulationEngine {
    lfos: Vec<Lfo>,
    slots: ModulationSlots,
    envelope_values: HashMap<u8, f64>,
    velocity: f64,
    aftertouch: f64,
    mod_wheel: f64,
    pitch_wheel: f64,
    lfo_values: Vec<f64>,
}

impl ModulationEngine {
    pub fn new() -> Self {
        Self {
            lfos: Vec::new(),
            slots: ModulationSlots::new(),
            envelope_values: HashMap::new(),
            velocity: 0.0,
            aftertouch: 0.0,
            mod_wheel: 0.0,
            pitch_wheel: 0.0,
            lfo_values: Vec::new(),
        }
    }

    pub fn add_lfo(&mut self, sample_rate: f64, settings: LfoSettings) -> usize {
        self.lfos.push(Lfo::new(sample_rate, settings));
        self.lfos.len() - 1
    }

    /// Writes `slot` into routing slot `index`. Rejects indices at or past
    /// `MAX_MODULATION_SLOTS` (`SPEC_FULL.md` §3's "up to a fixed maximum (16)" cap) rather than
    /// silently growing the matrix past it.
    pub fn set_slot(&mut self, index: usize, slot: ModulationSlot) -> EngineResult<()> {
        if index >= MAX_MODULATION_SLOTS {
            return Err(EngineError::Invalid(format!(
                "modulation slot index {index} exceeds the maximum of {MAX_MODULATION_SLOTS}"
            )));
        }
        if index >= self.slots.len() {
            self.slots.resize(
                index + 1,
                ModulationSlot::new(ModSource::Velocity, ParamId::new(0), 0.0),
            );
        }
        self.slots[index] = slot;
        Ok(())
    }

    pub fn set_envelope_value(&mut self, index: u8, value: f64) {
        self.envelope_values.insert(index, value);
    }

    pub fn note_on(&mut self, velocity: f64) {
        self.velocity = velocity;
        for lfo in &mut self.lfos {
            lfo.retrigger();
        }
    }

    pub fn set_aftertouch(&mut self, value: f64) {
        self.aftertouch = value;
    }

    pub fn set_mod_wheel(&mut self, value: f64) {
        self.mod_wheel = value;
    }

    pub fn set_pitch_wheel(&mut self, value: f64) {
        self.pitch_wheel = value;
    }

    fn source_value(&self, source: ModSource, lfo_values: &[f64]) -> f64 {
        match source {
            ModSource::Lfo(index) => lfo_values.get(index as usize).copied().unwrap_or(0.0),
            ModSource::Envelope(index) => self.envelope_values.get(&index).copied().unwrap_or(0.0),
            ModSource::Velocity => self.velocity,
            ModSource::Aftertouch => self.aftertouch,
            ModSource::ModWheel => self.mod_wheel,
            ModSource::PitchWheel => self.pitch_wheel,
        }
    }

    /// Every distinct parameter currently targeted by at least one modulation slot, for a
    /// control-rate driver to iterate without needing to know the routing matrix itself.
    pub fn destinations(&self) -> impl Iterator<Item = ParamId> + '_ {
        let mut seen = Vec::new();
        self.slots.iter().map(|slot| slot.destination).filter(move |dest| {
            if seen.contains(dest) {
                false
            } else {
                seen.push(*dest);
                true
            }
        })
    }

    /// Advances every LFO by a full block (`block_size` samples), caching each LFO's
    /// end-of-block output for subsequent `value_for` calls within the same block. Call once per
    /// block, before reading any destination's modulated value (`SPEC_FULL.md` §4.4).
    ///
    /// LFOs are block-rate modulation sources: their depth/shape only needs to be current at
    /// block boundaries, not resolved per-sample, so ticking `block_size` times per block (rather
    /// than once) keeps their phase advancing in real wall-clock time instead of `block_size`
    /// times too slowly.
    pub fn advance(&mut self, bpm: f64, block_size: usize) {
        self.lfo_values.clear();
        self.lfo_values.extend(self.lfos.iter_mut().map(|lfo| {
            let mut value = 0.0;
            for _ in 0..block_size.max(1) {
                value = lfo.tick(bpm);
            }
            value
        }));
    }

    /// Returns `destination`'s modulated value from the LFO outputs cached by the last
    /// `advance` call, combined from its slots' contributions via linear superposition
    /// (`SPEC_FULL.md` §8).
    pub fn value_for(&self, destination: ParamId, base: f64, min: f64, max: f64) -> f64 {
        let contributions = self
            .slots
            .iter()
            .filter(|slot| slot.destination == destination)
            .map(|slot| slot.contribution(self.source_value(slot.source, &self.lfo_values)));
        combine_modulation(base, contributions, min, max)
    }

    /// Convenience for a single destination: advances one block and reads back in one call.
    pub fn tick(&mut self, bpm: f64, block_size: usize, destination: ParamId, base: f64, min: f64, max: f64) -> f64 {
        self.advance(bpm, block_size);
        self.value_for(destination, base, min, max)
    }
}

impl Default for ModulationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_lfo_oscillates_within_depth() {
        let mut lfo = Lfo::new(48_000.0, LfoSettings { depth: 0.5, ..LfoSettings::default() });
        let mut max_abs = 0.0f64;
        for _ in 0..48_000 {
            max_abs = max_abs.max(lfo.tick(120.0).abs());
        }
        assert!(max_abs <= 0.51);
        assert!(max_abs > 0.3);
    }

    #[test]
    fn modulation_is_linearly_superposable_before_clamping() {
        let mut engine = ModulationEngine::new();
        let dest = ParamId::new(42);
        engine.set_envelope_value(0, 0.4);
        engine.set_envelope_value(1, 0.4);
        engine.set_slot(0, ModulationSlot::new(ModSource::Envelope(0), dest, 0.5)).unwrap();
        engine.set_slot(1, ModulationSlot::new(ModSource::Envelope(1), dest, 0.5)).unwrap();

        let result = engine.tick(120.0, 64, dest, 0.0, -10.0, 10.0);
        assert!((result - 0.4).abs() < 1e-6);
    }

    #[test]
    fn set_slot_rejects_an_index_past_the_maximum() {
        let mut engine = ModulationEngine::new();
        let dest = ParamId::new(1);
        let result = engine.set_slot(MAX_MODULATION_SLOTS, ModulationSlot::new(ModSource::Velocity, dest, 1.0));
        assert!(matches!(result, Err(EngineError::Invalid(_))));
    }

    #[test]
    fn advance_moves_the_lfo_by_a_full_block_not_one_sample() {
        let mut engine = ModulationEngine::new();
        let slot_index = engine.add_lfo(48_000.0, LfoSettings { rate: LfoRate::Hz(5.0), depth: 1.0, ..LfoSettings::default() });
        let dest = ParamId::new(7);
        engine
            .set_slot(0, ModulationSlot::new(ModSource::Lfo(slot_index as u8), dest, 1.0))
            .unwrap();

        // a 5 Hz LFO completes one full cycle every 9_600 samples at 48 kHz; ticking 150 blocks
        // of 64 samples (9_600 samples total) should land back near phase zero, i.e. near the
        // LFO's starting output, rather than still be a tiny fraction of the way through it.
        let mut last = 0.0;
        for _ in 0..150 {
            engine.advance(120.0, 64);
            last = engine.value_for(dest, 0.0, -1.0, 1.0);
        }
        assert!(last.abs() < 0.1, "expected the LFO to have completed full cycles, got {last}");
    }

    #[test]
    fn fade_in_ramps_depth_from_zero() {
        let mut lfo = Lfo::new(48_000.0, LfoSettings { fade_in_seconds: 1.0, ..LfoSettings::default() });
        let first = lfo.tick(120.0).abs();
        assert!(first < 0.01);
    }
}
