//! Musical time: ticks, tempo maps, time signatures, and grid quantization.

use crate::error::{EngineError, EngineResult};

/// Pulses (ticks) per quarter note.
pub const PPQ: u32 = 960;
pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 400.0;

/// A position expressed in ticks since the start of the timeline.
pub type Tick = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature { numerator: 4, denominator: 4 };
    pub const CUT: TimeSignature = TimeSignature { numerator: 2, denominator: 2 };
    pub const WALTZ: TimeSignature = TimeSignature { numerator: 3, denominator: 4 };

    pub fn ticks_per_beat(self) -> u32 {
        PPQ * 4 / self.denominator as u32
    }

    pub fn ticks_per_bar(self) -> u32 {
        self.ticks_per_beat() * self.numerator as u32
    }

    pub fn is_compound(self) -> bool {
        self.numerator % 3 == 0 && self.numerator > 3
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature::COMMON
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// How a tempo change transitions from the previous event's tempo to this one.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub enum TempoRamp {
    #[default]
    Instant,
    Linear,
    SCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TempoEvent {
    pub tick: Tick,
    pub bpm: f64,
    pub ramp: TempoRamp,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeSignatureEvent {
    pub bar: u32,
    pub time_signature: TimeSignature,
}

/// Bar.Beat.Tick, all 1-indexed for bar/beat to match conventional DAW display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u8,
    pub tick: u16,
}

impl MusicalPosition {
    pub fn to_display_string(self) -> String {
        format!("{}.{}.{:03}", self.bar + 1, self.beat + 1, self.tick)
    }

    pub fn from_display_string(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let bar: u32 = parts.next()?.parse().ok()?;
        let beat: u8 = parts.next()?.parse().ok()?;
        let tick: u16 = parts.next()?.parse().ok()?;
        if bar == 0 || beat == 0 {
            return None;
        }
        Some(MusicalPosition { bar: bar - 1, beat: beat - 1, tick })
    }
}

/// Quantize grid values, including swing-friendly triplet and dotted divisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GridValue {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
    TripletQuarter,
    TripletEighth,
    TripletSixteenth,
    DottedQuarter,
    DottedEighth,
    DottedSixteenth,
    Custom(u32),
}

impl Default for GridValue {
    fn default() -> Self {
        GridValue::Sixteenth
    }
}

impl GridValue {
    pub fn to_ticks(self) -> u32 {
        match self {
            GridValue::Whole => PPQ * 4,
            GridValue::Half => PPQ * 2,
            GridValue::Quarter => PPQ,
            GridValue::Eighth => PPQ / 2,
            GridValue::Sixteenth => PPQ / 4,
            GridValue::ThirtySecond => PPQ / 8,
            GridValue::SixtyFourth => PPQ / 16,
            GridValue::TripletQuarter => PPQ * 2 / 3,
            GridValue::TripletEighth => PPQ / 3,
            GridValue::TripletSixteenth => PPQ / 6,
            GridValue::DottedQuarter => PPQ * 3 / 2,
            GridValue::DottedEighth => PPQ * 3 / 4,
            GridValue::DottedSixteenth => PPQ * 3 / 8,
            GridValue::Custom(ticks) => ticks,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GridValue::Whole => "1/1",
            GridValue::Half => "1/2",
            GridValue::Quarter => "1/4",
            GridValue::Eighth => "1/8",
            GridValue::Sixteenth => "1/16",
            GridValue::ThirtySecond => "1/32",
            GridValue::SixtyFourth => "1/64",
            GridValue::TripletQuarter => "1/4T",
            GridValue::TripletEighth => "1/8T",
            GridValue::TripletSixteenth => "1/16T",
            GridValue::DottedQuarter => "1/4D",
            GridValue::DottedEighth => "1/8D",
            GridValue::DottedSixteenth => "1/16D",
            GridValue::Custom(_) => "custom",
        }
    }
}

/// Tempo-synced LFO rate divisions (`SPEC_FULL.md` §4.4). Triplet (`T`) and dotted (`D`)
/// variants follow the standard musical convention relative to the plain division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TempoSyncDivision {
    ThirtySecond,
    SixteenthTriplet,
    Sixteenth,
    SixteenthDotted,
    EighthTriplet,
    Eighth,
    EighthDotted,
    QuarterTriplet,
    Quarter,
    QuarterDotted,
    Half,
    Whole,
    TwoBar,
    FourBar,
}

impl TempoSyncDivision {
    /// Period of one cycle in ticks.
    pub fn ticks(self) -> u32 {
        match self {
            TempoSyncDivision::ThirtySecond => PPQ / 8,
            TempoSyncDivision::SixteenthTriplet => PPQ / 6,
            TempoSyncDivision::Sixteenth => PPQ / 4,
            TempoSyncDivision::SixteenthDotted => PPQ * 3 / 8,
            TempoSyncDivision::EighthTriplet => PPQ / 3,
            TempoSyncDivision::Eighth => PPQ / 2,
            TempoSyncDivision::EighthDotted => PPQ * 3 / 4,
            TempoSyncDivision::QuarterTriplet => PPQ * 2 / 3,
            TempoSyncDivision::Quarter => PPQ,
            TempoSyncDivision::QuarterDotted => PPQ * 3 / 2,
            TempoSyncDivision::Half => PPQ * 2,
            TempoSyncDivision::Whole => PPQ * 4,
            TempoSyncDivision::TwoBar => PPQ * 8,
            TempoSyncDivision::FourBar => PPQ * 16,
        }
    }

    /// Frequency in Hz at a given tempo (evaluated fresh every block per the fixed Open
    /// Question decision that tempo-synced divisions are re-evaluated at each block boundary).
    pub fn to_hz(self, bpm: f64) -> f64 {
        let beats_per_cycle = self.ticks() as f64 / PPQ as f64;
        let seconds_per_beat = 60.0 / bpm;
        1.0 / (beats_per_cycle * seconds_per_beat)
    }
}

/// A cached tick<->sample conversion point.
#[derive(Debug, Clone, Copy)]
struct CachePoint {
    tick: Tick,
    sample: u64,
}

/// Maps between musical ticks and absolute sample positions, honoring tempo and time-signature
/// changes over the timeline. Caches tick->sample conversions at fixed beat intervals and
/// invalidates the cache whenever tempo/time-signature events change.
#[derive(Debug, Clone)]
pub struct TempoMap {
    tempo_events: Vec<TempoEvent>,
    time_sig_events: Vec<TimeSignatureEvent>,
    sample_rate: f64,
    cache: Vec<CachePoint>,
    cache_valid: bool,
}

impl TempoMap {
    pub fn new(sample_rate: f64) -> Self {
        let mut map = Self {
            tempo_events: vec![TempoEvent { tick: 0, bpm: 120.0, ramp: TempoRamp::Instant }],
            time_sig_events: vec![TimeSignatureEvent { bar: 0, time_signature: TimeSignature::COMMON }],
            sample_rate,
            cache: Vec::new(),
            cache_valid: false,
        };
        map.rebuild_cache();
        map
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.invalidate_cache();
    }

    pub fn invalidate_cache(&mut self) {
        self.cache_valid = false;
    }

    fn rebuild_cache(&mut self) {
        self.cache.clear();
        let max_beats = 10_000u32;
        let mut accumulated_samples = 0.0f64;
        let mut tick = 0i64;
        let step_ticks = PPQ as i64 * 4; // cache every 4 beats
        self.cache.push(CachePoint { tick: 0, sample: 0 });
        while (tick as f64 / PPQ as f64) < max_beats as f64 {
            let next_tick = tick + step_ticks;
            let bpm = self.tempo_at_tick(tick);
            let seconds = (step_ticks as f64 / PPQ as f64) * (60.0 / bpm);
            accumulated_samples += seconds * self.sample_rate;
            self.cache.push(CachePoint { tick: next_tick, sample: accumulated_samples as u64 });
            tick = next_tick;
        }
        self.cache_valid = true;
    }

    fn ensure_cache(&mut self) {
        if !self.cache_valid {
            self.rebuild_cache();
        }
    }

    /// Tempo (BPM) active at the given tick, honoring ramps between the surrounding events.
    pub fn tempo_at_tick(&self, tick: Tick) -> f64 {
        let idx = match self.tempo_events.binary_search_by_key(&tick, |e| e.tick) {
            Ok(i) => return self.tempo_events[i].bpm,
            Err(0) => return self.tempo_events[0].bpm,
            Err(i) => i - 1,
        };
        let current = self.tempo_events[idx];
        match self.tempo_events.get(idx + 1) {
            None => current.bpm,
            Some(next) => match next.ramp {
                TempoRamp::Instant => current.bpm,
                TempoRamp::Linear => {
                    let span = (next.tick - current.tick).max(1) as f64;
                    let progress = (tick - current.tick) as f64 / span;
                    current.bpm + (next.bpm - current.bpm) * progress.clamp(0.0, 1.0)
                }
                TempoRamp::SCurve => {
                    let span = (next.tick - current.tick).max(1) as f64;
                    let t = ((tick - current.tick) as f64 / span).clamp(0.0, 1.0);
                    let eased = t * t * (3.0 - 2.0 * t);
                    current.bpm + (next.bpm - current.bpm) * eased
                }
            },
        }
    }

    pub fn set_tempo(&mut self, tick: Tick, bpm: f64) -> EngineResult<()> {
        self.set_tempo_with_ramp(tick, bpm, TempoRamp::Instant)
    }

    /// Rejects `bpm <= 0.0` outright rather than silently clamping it into range; any other
    /// out-of-range value is clamped to `[MIN_TEMPO, MAX_TEMPO]` (`SPEC_FULL.md` §4.1).
    pub fn set_tempo_with_ramp(&mut self, tick: Tick, bpm: f64, ramp: TempoRamp) -> EngineResult<()> {
        if bpm <= 0.0 {
            return Err(EngineError::Invalid(format!("tempo must be positive, got {bpm}")));
        }
        let bpm = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
        match self.tempo_events.binary_search_by_key(&tick, |e| e.tick) {
            Ok(i) => self.tempo_events[i] = TempoEvent { tick, bpm, ramp },
            Err(i) => self.tempo_events.insert(i, TempoEvent { tick, bpm, ramp }),
        }
        self.invalidate_cache();
        Ok(())
    }

    pub fn remove_tempo_event(&mut self, tick: Tick) {
        if tick == 0 {
            return; // the origin tempo event is never removed
        }
        self.tempo_events.retain(|e| e.tick != tick);
        self.invalidate_cache();
    }

    pub fn time_signature_at_bar(&self, bar: u32) -> TimeSignature {
        self.time_sig_events
            .iter()
            .rev()
            .find(|e| e.bar <= bar)
            .map(|e| e.time_signature)
            .unwrap_or_default()
    }

    pub fn set_time_signature(&mut self, bar: u32, time_signature: TimeSignature) {
        match self.time_sig_events.binary_search_by_key(&bar, |e| e.bar) {
            Ok(i) => self.time_sig_events[i].time_signature = time_signature,
            Err(i) => self.time_sig_events.insert(i, TimeSignatureEvent { bar, time_signature }),
        }
        self.invalidate_cache();
    }

    pub fn remove_time_signature_event(&mut self, bar: u32) {
        if bar == 0 {
            return;
        }
        self.time_sig_events.retain(|e| e.bar != bar);
        self.invalidate_cache();
    }

    /// Converts a tick position into an absolute sample position, using the cache for the
    /// nearest prior 4-beat boundary and walking forward tempo-accurately from there.
    pub fn ticks_to_samples(&mut self, tick: Tick) -> u64 {
        self.ensure_cache();
        let anchor = self
            .cache
            .iter()
            .rev()
            .find(|c| c.tick <= tick)
            .copied()
            .unwrap_or(CachePoint { tick: 0, sample: 0 });
        self.calculate_samples_from(anchor.tick, anchor.sample, tick)
    }

    fn calculate_samples_from(&self, from_tick: Tick, from_sample: u64, to_tick: Tick) -> u64 {
        if to_tick <= from_tick {
            return from_sample;
        }
        // Walk in small steps so tempo ramps are honored without needing dense caching.
        let step = 64i64; // ticks
        let mut tick = from_tick;
        let mut samples = from_sample as f64;
        while tick < to_tick {
            let next = (tick + step).min(to_tick);
            let bpm = self.tempo_at_tick(tick);
            let seconds = ((next - tick) as f64 / PPQ as f64) * (60.0 / bpm);
            samples += seconds * self.sample_rate;
            tick = next;
        }
        samples as u64
    }

    /// Converts an absolute sample position back into ticks via binary search over cache
    /// anchors followed by a fine walk, the inverse of `ticks_to_samples`.
    pub fn samples_to_ticks(&mut self, sample: u64) -> Tick {
        self.ensure_cache();
        let anchor = self
            .cache
            .iter()
            .rev()
            .find(|c| c.sample <= sample)
            .copied()
            .unwrap_or(CachePoint { tick: 0, sample: 0 });
        let mut tick = anchor.tick;
        let mut samples = anchor.sample as f64;
        let target = sample as f64;
        let step = 64i64;
        while samples < target {
            let bpm = self.tempo_at_tick(tick);
            let seconds = (step as f64 / PPQ as f64) * (60.0 / bpm);
            let next_samples = samples + seconds * self.sample_rate;
            if next_samples > target {
                let remaining = target - samples;
                let fraction = remaining / (next_samples - samples);
                tick += (step as f64 * fraction) as i64;
                break;
            }
            samples = next_samples;
            tick += step;
        }
        tick
    }

    pub fn ticks_to_position(&self, tick: Tick) -> MusicalPosition {
        let mut bar = 0u32;
        let mut remaining = tick.max(0);
        loop {
            let ts = self.time_signature_at_bar(bar);
            let ticks_per_bar = ts.ticks_per_bar() as i64;
            if remaining < ticks_per_bar {
                let ticks_per_beat = ts.ticks_per_beat() as i64;
                let beat = (remaining / ticks_per_beat) as u8;
                let tick_in_beat = (remaining % ticks_per_beat) as u16;
                return MusicalPosition { bar, beat, tick: tick_in_beat };
            }
            remaining -= ticks_per_bar;
            bar += 1;
        }
    }

    pub fn position_to_ticks(&self, position: MusicalPosition) -> Tick {
        let mut tick = 0i64;
        for bar in 0..position.bar {
            tick += self.time_signature_at_bar(bar).ticks_per_bar() as i64;
        }
        let ts = self.time_signature_at_bar(position.bar);
        tick += position.beat as i64 * ts.ticks_per_beat() as i64;
        tick += position.tick as i64;
        tick
    }

    pub fn ticks_to_seconds(&self, tick: Tick) -> f64 {
        let mut seconds = 0.0;
        let mut t = 0i64;
        let step = 64i64;
        while t < tick {
            let next = (t + step).min(tick);
            let bpm = self.tempo_at_tick(t);
            seconds += ((next - t) as f64 / PPQ as f64) * (60.0 / bpm);
            t = next;
        }
        seconds
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> Tick {
        let mut remaining = seconds;
        let mut tick = 0i64;
        let step = 64i64;
        while remaining > 0.0 {
            let bpm = self.tempo_at_tick(tick);
            let step_seconds = (step as f64 / PPQ as f64) * (60.0 / bpm);
            if step_seconds > remaining {
                let fraction = remaining / step_seconds;
                tick += (step as f64 * fraction) as i64;
                break;
            }
            remaining -= step_seconds;
            tick += step;
        }
        tick
    }

    pub fn samples_to_seconds(&self, samples: u64) -> f64 {
        samples as f64 / self.sample_rate
    }

    pub fn seconds_to_samples(&self, seconds: f64) -> u64 {
        (seconds * self.sample_rate) as u64
    }

    pub fn snap_to_grid(&self, tick: Tick, grid: GridValue) -> Tick {
        let g = grid.to_ticks() as i64;
        if g == 0 {
            return tick;
        }
        ((tick + g / 2) / g) * g
    }

    pub fn next_bar(&self, tick: Tick) -> Tick {
        let pos = self.ticks_to_position(tick);
        if pos.beat == 0 && pos.tick == 0 {
            tick
        } else {
            self.position_to_ticks(MusicalPosition { bar: pos.bar + 1, beat: 0, tick: 0 })
        }
    }

    pub fn next_beat(&self, tick: Tick) -> Tick {
        let pos = self.ticks_to_position(tick);
        let ts = self.time_signature_at_bar(pos.bar);
        if pos.tick == 0 {
            tick
        } else if pos.beat + 1 < ts.numerator {
            self.position_to_ticks(MusicalPosition { bar: pos.bar, beat: pos.beat + 1, tick: 0 })
        } else {
            self.position_to_ticks(MusicalPosition { bar: pos.bar + 1, beat: 0, tick: 0 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_signature_ticks_per_bar() {
        assert_eq!(TimeSignature::COMMON.ticks_per_bar(), PPQ * 4);
        assert_eq!(TimeSignature::WALTZ.ticks_per_bar(), PPQ * 3);
    }

    #[test]
    fn tempo_map_basics() {
        let map = TempoMap::new(48_000.0);
        assert!((map.tempo_at_tick(0) - 120.0).abs() < 1e-9);
    }

    #[test]
    fn tempo_change_applies_after_tick() {
        let mut map = TempoMap::new(48_000.0);
        map.set_tempo(PPQ as i64 * 4, 140.0).unwrap();
        assert!((map.tempo_at_tick(0) - 120.0).abs() < 1e-9);
        assert!((map.tempo_at_tick(PPQ as i64 * 4) - 140.0).abs() < 1e-9);
    }

    #[test]
    fn set_tempo_rejects_non_positive_bpm() {
        let mut map = TempoMap::new(48_000.0);
        assert!(matches!(map.set_tempo(0, 0.0), Err(EngineError::Invalid(_))));
        assert!(matches!(map.set_tempo(0, -10.0), Err(EngineError::Invalid(_))));
        // rejected call must not have mutated the map
        assert!((map.tempo_at_tick(0) - 120.0).abs() < 1e-9);
    }

    #[test]
    fn set_tempo_clamps_extreme_but_positive_bpm_into_range() {
        let mut map = TempoMap::new(48_000.0);
        map.set_tempo(0, 1.0).unwrap();
        assert!((map.tempo_at_tick(0) - MIN_TEMPO).abs() < 1e-9);
        map.set_tempo(0, 10_000.0).unwrap();
        assert!((map.tempo_at_tick(0) - MAX_TEMPO).abs() < 1e-9);
    }

    #[test]
    fn ticks_to_samples_matches_whole_note_at_120bpm() {
        let mut map = TempoMap::new(48_000.0);
        // one beat at 120bpm = 0.5s = 24000 samples
        let samples = map.ticks_to_samples(PPQ as i64);
        assert!((samples as i64 - 24_000).abs() <= 1);
    }

    #[test]
    fn musical_position_round_trip() {
        let map = TempoMap::new(48_000.0);
        let pos = MusicalPosition { bar: 3, beat: 2, tick: 100 };
        let ticks = map.position_to_ticks(pos);
        let back = map.ticks_to_position(ticks);
        assert_eq!(pos, back);
    }

    #[test]
    fn grid_values_have_expected_ticks() {
        assert_eq!(GridValue::Quarter.to_ticks(), PPQ);
        assert_eq!(GridValue::Eighth.to_ticks(), PPQ / 2);
        assert_eq!(GridValue::TripletEighth.to_ticks(), PPQ / 3);
    }

    #[test]
    fn snap_to_grid_rounds_to_nearest() {
        let map = TempoMap::new(48_000.0);
        let snapped = map.snap_to_grid(100, GridValue::Sixteenth);
        assert_eq!(snapped, 0);
        let snapped2 = map.snap_to_grid(200, GridValue::Sixteenth);
        assert_eq!(snapped2, GridValue::Sixteenth.to_ticks() as i64);
    }

    #[test]
    fn position_display_round_trip() {
        let pos = MusicalPosition { bar: 4, beat: 1, tick: 50 };
        let s = pos.to_display_string();
        let back = MusicalPosition::from_display_string(&s).unwrap();
        assert_eq!(pos, back);
    }

    #[test]
    fn tempo_sync_division_hz_at_120bpm() {
        // quarter note at 120bpm = 2 Hz
        let hz = TempoSyncDivision::Quarter.to_hz(120.0);
        assert!((hz - 2.0).abs() < 1e-9);
    }
}
