//! Per-note voice state: the DAHDSR envelope generator and the pitch/velocity/portamento
//! state a single `Voice` carries through its lifecycle (`SPEC_FULL.md` §4.2).

use ae_core::{
    DahdsrSettings, InstrumentId, Pitch, Velocity, VoiceId, VoiceStage, VOICE_SILENCE_THRESHOLD_DB,
};

/// Converts a dB value to the linear silence floor the `Release` stage decays toward.
fn silence_floor_linear() -> f64 {
    10f64.powf(VOICE_SILENCE_THRESHOLD_DB / 20.0)
}

/// Exponential-approach DAHDSR envelope. Stage times are wall-clock seconds and unaffected
/// by tempo; levels are linear amplitude in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Envelope {
    settings: DahdsrSettings,
    stage: VoiceStage,
    level: f64,
    stage_elapsed_seconds: f64,
    sample_rate: f64,
    override_release_seconds: Option<f64>,
}

impl Envelope {
    pub fn new(sample_rate: f64, settings: DahdsrSettings) -> Self {
        Self {
            settings,
            stage: VoiceStage::Delay,
            level: 0.0,
            stage_elapsed_seconds: 0.0,
            sample_rate,
            override_release_seconds: None,
        }
    }

    pub fn stage(&self) -> VoiceStage {
        self.stage
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn retrigger(&mut self) {
        self.stage = VoiceStage::Delay;
        self.stage_elapsed_seconds = 0.0;
        self.level = 0.0;
    }

    pub fn note_off(&mut self) {
        if !self.stage.is_releasing_or_dead() {
            self.override_release_seconds = None;
            self.stage = VoiceStage::Release;
            self.stage_elapsed_seconds = 0.0;
        }
    }

    /// Forces an immediate release with a fixed fade time, overriding the instrument's
    /// configured release time. Used by cut-itself to fade out a prior voice in 2 ms rather
    /// than its normal release (`SPEC_FULL.md` §4.3).
    pub fn force_release(&mut self, fade_seconds: f64) {
        self.override_release_seconds = Some(fade_seconds.max(0.0));
        self.stage = VoiceStage::Release;
        self.stage_elapsed_seconds = 0.0;
    }

    /// Approaches `target` with a time constant derived from `duration_seconds` (the time to
    /// cover ~95% of the distance), matching the teacher's smoothing coefficient shape.
    fn approach(&mut self, target: f64, duration_seconds: f64) {
        if duration_seconds <= 0.0 {
            self.level = target;
            return;
        }
        let coeff = (-1.0 / (duration_seconds * self.sample_rate)).exp();
        self.level = target + (self.level - target) * coeff;
    }

    /// Advances the envelope by one sample, returning the current linear level.
    pub fn tick(&mut self) -> f64 {
        let dt = 1.0 / self.sample_rate;
        self.stage_elapsed_seconds += dt;

        match self.stage {
            VoiceStage::Delay => {
                self.level = 0.0;
                if self.stage_elapsed_seconds >= self.settings.delay_seconds {
                    self.stage = VoiceStage::Attack;
                    self.stage_elapsed_seconds = 0.0;
                }
            }
            VoiceStage::Attack => {
                self.approach(1.0, self.settings.attack_seconds.max(1e-4));
                if self.stage_elapsed_seconds >= self.settings.attack_seconds {
                    self.level = 1.0;
                    self.stage = VoiceStage::Hold;
                    self.stage_elapsed_seconds = 0.0;
                }
            }
            VoiceStage::Hold => {
                self.level = 1.0;
                if self.stage_elapsed_seconds >= self.settings.hold_seconds {
                    self.stage = VoiceStage::Decay;
                    self.stage_elapsed_seconds = 0.0;
                }
            }
            VoiceStage::Decay => {
                self.approach(self.settings.sustain_level, self.settings.decay_seconds.max(1e-4));
                if self.stage_elapsed_seconds >= self.settings.decay_seconds {
                    self.level = self.settings.sustain_level;
                    self.stage = VoiceStage::Sustain;
                    self.stage_elapsed_seconds = 0.0;
                }
            }
            VoiceStage::Sustain => {
                self.level = self.settings.sustain_level;
            }
            VoiceStage::Release => {
                let release_seconds = self.override_release_seconds.unwrap_or(self.settings.release_seconds);
                self.approach(0.0, release_seconds.max(1e-4));
                if self.level < silence_floor_linear() {
                    self.level = 0.0;
                    self.stage = VoiceStage::Dead;
                }
            }
            VoiceStage::Dead => {
                self.level = 0.0;
            }
        }

        self.level
    }
}

/// One sounding note. Owns its envelope and, for portamento, a linear pitch glide toward a
/// retargeted destination.
#[derive(Debug, Clone)]
pub struct Voice {
    pub voice_id: VoiceId,
    pub instrument_id: InstrumentId,
    pub pitch: Pitch,
    pub velocity: Velocity,
    pub envelope: Envelope,
    pub age_samples: u64,

    glide_from_semitones: f64,
    glide_to_semitones: f64,
    glide_elapsed_seconds: f64,
    glide_duration_seconds: f64,
    sample_rate: f64,

    /// Offset within the current render block at which this voice should start contributing
    /// (set by `note_on`, consumed by `VoiceManager::render`, reset to 0 after each block).
    pub(crate) pending_start_offset: u32,
    /// Offset within the current render block at which `note_off` should take effect.
    pub(crate) pending_release_offset: Option<u32>,
}

impl Voice {
    pub fn new(
        voice_id: VoiceId,
        instrument_id: InstrumentId,
        pitch: Pitch,
        velocity: Velocity,
        sample_rate: f64,
        envelope_settings: DahdsrSettings,
    ) -> Self {
        let semis = pitch.0 as f64;
        Self {
            voice_id,
            instrument_id,
            pitch,
            velocity,
            envelope: Envelope::new(sample_rate, envelope_settings),
            age_samples: 0,
            glide_from_semitones: semis,
            glide_to_semitones: semis,
            glide_elapsed_seconds: 0.0,
            glide_duration_seconds: 0.0,
            sample_rate,
            pending_start_offset: 0,
            pending_release_offset: None,
        }
    }

    pub fn stage(&self) -> VoiceStage {
        self.envelope.stage()
    }

    pub fn is_dead(&self) -> bool {
        self.envelope.stage() == VoiceStage::Dead
    }

    /// Retargets an already-sounding monophonic voice to a new pitch/velocity without
    /// retriggering the envelope; the pitch glides linearly in semitones over
    /// `portamento_time_seconds` (`SPEC_FULL.md` §4.2, legato/portamento).
    pub fn retarget_legato(&mut self, pitch: Pitch, velocity: Velocity, portamento_time_seconds: f64) {
        self.glide_from_semitones = self.current_pitch_semitones();
        self.glide_to_semitones = pitch.0 as f64;
        self.glide_elapsed_seconds = 0.0;
        self.glide_duration_seconds = portamento_time_seconds.max(0.0);
        self.pitch = pitch;
        self.velocity = velocity;
    }

    pub fn note_off(&mut self) {
        self.envelope.note_off();
    }

    /// Forces a fixed-duration linear fade-out, used by cut-itself (`SPEC_FULL.md` §4.3).
    pub fn force_fade_out(&mut self, fade_seconds: f64) {
        self.envelope.force_release(fade_seconds);
    }

    pub(crate) fn reset_pending(&mut self) {
        self.pending_start_offset = 0;
        self.pending_release_offset = None;
    }

    /// Current pitch including any in-progress portamento glide, in fractional semitones.
    pub fn current_pitch_semitones(&self) -> f64 {
        if self.glide_duration_seconds <= 0.0 || self.glide_elapsed_seconds >= self.glide_duration_seconds {
            return self.glide_to_semitones;
        }
        let t = self.glide_elapsed_seconds / self.glide_duration_seconds;
        self.glide_from_semitones + (self.glide_to_semitones - self.glide_from_semitones) * t
    }

    /// Advances envelope and glide by one sample; returns the envelope's linear level scaled
    /// by the velocity-to-amplitude mapping.
    pub fn tick(&mut self, velocity_gamma: f64) -> f64 {
        self.age_samples += 1;
        if self.glide_elapsed_seconds < self.glide_duration_seconds {
            self.glide_elapsed_seconds += 1.0 / self.sample_rate;
        }
        self.envelope.tick() * self.velocity.to_amplitude(velocity_gamma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DahdsrSettings {
        DahdsrSettings {
            delay_seconds: 0.0,
            attack_seconds: 0.01,
            hold_seconds: 0.0,
            decay_seconds: 0.02,
            sustain_level: 0.5,
            release_seconds: 0.05,
        }
    }

    #[test]
    fn envelope_reaches_sustain_level_after_attack_and_decay() {
        let mut env = Envelope::new(48_000.0, settings());
        for _ in 0..48_000 / 10 {
            env.tick();
        }
        assert_eq!(env.stage(), VoiceStage::Sustain);
        assert!((env.level() - 0.5).abs() < 0.01);
    }

    #[test]
    fn release_reaches_dead_once_below_silence_floor() {
        let mut env = Envelope::new(48_000.0, settings());
        for _ in 0..48_000 / 10 {
            env.tick();
        }
        env.note_off();
        for _ in 0..48_000 {
            env.tick();
        }
        assert_eq!(env.stage(), VoiceStage::Dead);
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn retrigger_restarts_from_delay() {
        let mut env = Envelope::new(48_000.0, settings());
        for _ in 0..1000 {
            env.tick();
        }
        env.retrigger();
        assert_eq!(env.stage(), VoiceStage::Delay);
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn legato_retarget_glides_pitch_without_retriggering_envelope() {
        let mut voice =
            Voice::new(VoiceId::new(1), InstrumentId::new(1), Pitch(60), Velocity::new(1.0), 48_000.0, settings());
        for _ in 0..500 {
            voice.tick(1.0);
        }
        let stage_before = voice.stage();
        voice.retarget_legato(Pitch(67), Velocity::new(0.8), 0.1);
        assert_eq!(voice.stage(), stage_before);
        assert!((voice.current_pitch_semitones() - 60.0).abs() < 1e-6);

        for _ in 0..(48_000 / 10) {
            voice.tick(1.0);
        }
        assert!((voice.current_pitch_semitones() - 67.0).abs() < 0.1);
    }
}
