//! Voice state-machine types shared between the core data model and the voice manager
//! (`SPEC_FULL.md` §4.2).

/// Voice lifecycle stage. `Dead` voices are reclaimed at the start of the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceStage {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Dead,
}

impl VoiceStage {
    pub fn is_releasing_or_dead(self) -> bool {
        matches!(self, VoiceStage::Release | VoiceStage::Dead)
    }
}

/// DAHDSR envelope timing/shape settings. Stage times are wall-clock seconds, unaffected by
/// tempo (`SPEC_FULL.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DahdsrSettings {
    pub delay_seconds: f64,
    pub attack_seconds: f64,
    pub hold_seconds: f64,
    pub decay_seconds: f64,
    pub sustain_level: f64,
    pub release_seconds: f64,
}

impl Default for DahdsrSettings {
    fn default() -> Self {
        Self {
            delay_seconds: 0.0,
            attack_seconds: 0.005,
            hold_seconds: 0.0,
            decay_seconds: 0.1,
            sustain_level: 0.7,
            release_seconds: 0.3,
        }
    }
}

/// The silence floor at which a `Release` stage is considered complete (`SPEC_FULL.md` §4.2).
pub const VOICE_SILENCE_THRESHOLD_DB: f64 = -80.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_or_dead_detection() {
        assert!(VoiceStage::Release.is_releasing_or_dead());
        assert!(VoiceStage::Dead.is_releasing_or_dead());
        assert!(!VoiceStage::Sustain.is_releasing_or_dead());
    }
}
