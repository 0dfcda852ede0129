//! Instrument data model (`SPEC_FULL.md` §3).

use smallvec::SmallVec;

use crate::ids::{BufferId, ChannelId, InstrumentId};
use crate::voice_types::DahdsrSettings;

/// Oscillator waveform for synth instruments.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum OscillatorShape {
    Sine,
    Triangle,
    Sawtooth,
    Square,
    Pulse,
    Noise,
}

/// Filter type used by a synth instrument's per-voice filter stage.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SynthFilterKind {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SynthParams {
    pub oscillators: SmallVec<[OscillatorShape; 4]>,
    pub filter_kind: SynthFilterKind,
    pub filter_cutoff_hz: f64,
    pub filter_resonance: f64,
    pub filter_envelope: DahdsrSettings,
    pub lfo_count: u8,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            oscillators: SmallVec::from_slice(&[OscillatorShape::Sawtooth]),
            filter_kind: SynthFilterKind::Lowpass,
            filter_cutoff_hz: 2_000.0,
            filter_resonance: 0.707,
            filter_envelope: DahdsrSettings::default(),
            lfo_count: 1,
        }
    }
}

/// Whether an instrument plays back a decoded sample buffer or is purely synthesized.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum InstrumentKind {
    Sample { buffer_id: BufferId },
    Synth(SynthParams),
}

/// A registered instrument (`SPEC_FULL.md` §3, §10.5 for portamento/legato).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstrumentSpec {
    pub id: InstrumentId,
    pub kind: InstrumentKind,
    pub channel_id: ChannelId,
    pub mute: bool,
    pub cut_itself: bool,
    pub default_envelope: DahdsrSettings,
    pub velocity_sensitivity: f64,
    pub max_voices: u32,
    pub legato: bool,
    pub portamento_time_seconds: f64,
    /// Tempo-tracking factor for sample playback rate (1.0 = follow tempo normally,
    /// `SPEC_FULL.md` §4.3).
    pub tempo_tracking_factor: f64,
}

impl InstrumentSpec {
    pub fn new_sample(id: InstrumentId, buffer_id: BufferId, channel_id: ChannelId) -> Self {
        Self {
            id,
            kind: InstrumentKind::Sample { buffer_id },
            channel_id,
            mute: false,
            cut_itself: false,
            default_envelope: DahdsrSettings::default(),
            velocity_sensitivity: 1.0,
            max_voices: 16,
            legato: false,
            portamento_time_seconds: 0.0,
            tempo_tracking_factor: 1.0,
        }
    }

    pub fn new_synth(id: InstrumentId, params: SynthParams, channel_id: ChannelId) -> Self {
        Self {
            id,
            kind: InstrumentKind::Synth(params),
            channel_id,
            mute: false,
            cut_itself: false,
            default_envelope: DahdsrSettings::default(),
            velocity_sensitivity: 1.0,
            max_voices: 16,
            legato: false,
            portamento_time_seconds: 0.0,
            tempo_tracking_factor: 1.0,
        }
    }

    pub fn is_monophonic(&self) -> bool {
        self.max_voices == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_instrument_is_not_monophonic_by_default() {
        let inst = InstrumentSpec::new_sample(InstrumentId::new(1), BufferId::new(1), ChannelId::new(1));
        assert!(!inst.is_monophonic());
    }
}
