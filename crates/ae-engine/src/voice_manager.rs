//! Voice allocation, stealing, and per-block envelope/portamento advancement
//! (`SPEC_FULL.md` §4.2).
//!
//! `VoiceManager` owns voice lifecycle only. It does not synthesize audio: `render` advances
//! every voice's envelope and portamento glide by one block and returns the resulting
//! per-voice, per-sample gain and pitch curves; turning those into actual waveform output
//! (oscillator or sample playback, resampling, panning) is the sample engine's job (§4.3),
//! which reads this output back in alongside each voice's owning instrument.

use ae_core::{IdAllocator, InstrumentId, InstrumentSpec, Pitch, Velocity, VoiceId, VoiceStage};

use crate::voice::Voice;

/// One voice's contribution to the current block: per-sample pitch (semitones, including any
/// portamento glide) and gain (envelope level x velocity-to-amplitude), silence before the
/// voice's start offset.
#[derive(Debug, Clone)]
pub struct VoiceBlockOutput {
    pub voice_id: VoiceId,
    pub instrument_id: InstrumentId,
    pub pitch_semitones: Vec<f64>,
    pub gain: Vec<f64>,
    pub is_dead_after_block: bool,
}

pub struct VoiceManager {
    sample_rate: f64,
    voices: Vec<Voice>,
    id_alloc: IdAllocator,
    global_max_voices: usize,
}

impl VoiceManager {
    pub fn new(sample_rate: f64, global_max_voices: usize) -> Self {
        Self { sample_rate, voices: Vec::new(), id_alloc: IdAllocator::new(), global_max_voices }
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voices_for_instrument(&self, instrument_id: InstrumentId) -> impl Iterator<Item = &Voice> {
        self.voices.iter().filter(move |v| v.instrument_id == instrument_id)
    }

    /// Allocates (or, for a legato monophonic instrument, retargets) a voice. `sample_offset`
    /// is the offset within the upcoming block at which the voice should start sounding.
    pub fn note_on(&mut self, instrument: &InstrumentSpec, pitch: Pitch, velocity: Velocity, sample_offset: u32) {
        const CUT_ITSELF_FADE_SECONDS: f64 = 0.002;
        if instrument.cut_itself {
            for voice in self.voices.iter_mut() {
                if voice.instrument_id == instrument.id && !voice.is_dead() {
                    voice.force_fade_out(CUT_ITSELF_FADE_SECONDS);
                }
            }
        }

        if instrument.legato && instrument.is_monophonic() {
            if let Some(voice) = self
                .voices
                .iter_mut()
                .find(|v| v.instrument_id == instrument.id && !v.stage().is_releasing_or_dead())
            {
                voice.retarget_legato(pitch, velocity, instrument.portamento_time_seconds);
                return;
            }
        }

        let per_instrument_count =
            self.voices.iter().filter(|v| v.instrument_id == instrument.id).count();
        if per_instrument_count >= instrument.max_voices as usize {
            self.steal_voice(Some(instrument.id));
        }
        if self.voices.len() >= self.global_max_voices {
            self.steal_voice(None);
        }

        let voice_id = VoiceId::new(self.id_alloc.alloc());
        let mut voice =
            Voice::new(voice_id, instrument.id, pitch, velocity, self.sample_rate, instrument.default_envelope);
        voice.pending_start_offset = sample_offset;
        self.voices.push(voice);
    }

    /// Transitions matching sounding voices into `Release` at `sample_offset` within the
    /// upcoming block.
    pub fn note_off(&mut self, instrument_id: InstrumentId, pitch: Pitch, sample_offset: u32) {
        for voice in self.voices.iter_mut() {
            if voice.instrument_id == instrument_id
                && voice.pitch == pitch
                && !voice.stage().is_releasing_or_dead()
            {
                voice.pending_release_offset = Some(sample_offset);
            }
        }
    }

    /// Forces every sounding voice into `Release` immediately, at the top of the next block.
    /// Used by transport `stop` (`SPEC_FULL.md` §5: "stop forces release of all voices").
    pub fn release_all(&mut self) {
        for voice in self.voices.iter_mut() {
            if !voice.stage().is_releasing_or_dead() {
                voice.pending_release_offset = Some(0);
            }
        }
    }

    /// Stealing priority: any `Dead` voice first, then the quietest voice in `Release`, then
    /// the oldest voice in any stage. `scope` restricts the candidate set to one instrument;
    /// `None` steals across the whole engine for the global polyphony cap.
    fn steal_voice(&mut self, scope: Option<InstrumentId>) {
        let candidates: Vec<usize> = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| scope.map_or(true, |id| v.instrument_id == id))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return;
        }

        if let Some(&i) = candidates.iter().find(|&&i| self.voices[i].is_dead()) {
            self.voices.remove(i);
            return;
        }

        let quietest_release = candidates
            .iter()
            .copied()
            .filter(|&i| self.voices[i].stage() == VoiceStage::Release)
            .min_by(|&a, &b| {
                self.voices[a].envelope.level().partial_cmp(&self.voices[b].envelope.level()).unwrap()
            });
        if let Some(i) = quietest_release {
            self.voices.remove(i);
            return;
        }

        if let Some(i) = candidates.iter().copied().max_by_key(|&i| self.voices[i].age_samples) {
            self.voices.remove(i);
        }
    }

    /// Advances every voice by one block, returns each voice's per-sample pitch/gain curve,
    /// and reclaims voices that reached `Dead` during this block.
    pub fn render(
        &mut self,
        block_size: usize,
        mut velocity_gamma: impl FnMut(InstrumentId) -> f64,
    ) -> Vec<VoiceBlockOutput> {
        let mut outputs = Vec::with_capacity(self.voices.len());

        for voice in self.voices.iter_mut() {
            let gamma = velocity_gamma(voice.instrument_id);
            let mut pitch_semitones = Vec::with_capacity(block_size);
            let mut gain = Vec::with_capacity(block_size);

            for i in 0..block_size as u32 {
                if let Some(release_offset) = voice.pending_release_offset {
                    if i == release_offset {
                        voice.note_off();
                    }
                }

                if i < voice.pending_start_offset {
                    pitch_semitones.push(voice.current_pitch_semitones());
                    gain.push(0.0);
                    continue;
                }

                pitch_semitones.push(voice.current_pitch_semitones());
                gain.push(voice.tick(gamma));
            }

            outputs.push(VoiceBlockOutput {
                voice_id: voice.voice_id,
                instrument_id: voice.instrument_id,
                pitch_semitones,
                gain,
                is_dead_after_block: voice.is_dead(),
            });

            voice.reset_pending();
        }

        self.voices.retain(|v| !v.is_dead());
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::BufferId;

    fn instrument(id: u64) -> InstrumentSpec {
        InstrumentSpec::new_sample(InstrumentId::new(id), BufferId::new(1), ae_core::ChannelId::new(1))
    }

    #[test]
    fn note_on_allocates_and_render_produces_nonzero_gain() {
        let mut mgr = VoiceManager::new(48_000.0, 64);
        let inst = instrument(1);
        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);
        assert_eq!(mgr.active_voice_count(), 1);

        let out = mgr.render(512, |_| 1.0);
        assert_eq!(out.len(), 1);
        assert!(out[0].gain.iter().any(|&g| g > 0.0));
    }

    #[test]
    fn note_off_then_full_release_reclaims_voice() {
        let mut mgr = VoiceManager::new(48_000.0, 64);
        let inst = instrument(1);
        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);
        mgr.render(512, |_| 1.0);
        mgr.note_off(inst.id, Pitch(60), 0);

        for _ in 0..50 {
            mgr.render(512, |_| 1.0);
        }
        assert_eq!(mgr.active_voice_count(), 0);
    }

    #[test]
    fn per_instrument_cap_steals_oldest_when_all_sustaining() {
        let mut mgr = VoiceManager::new(48_000.0, 64);
        let mut inst = instrument(1);
        inst.max_voices = 2;

        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);
        mgr.render(4800, |_| 1.0);
        mgr.note_on(&inst, Pitch(62), Velocity::new(1.0), 0);
        mgr.render(4800, |_| 1.0);
        assert_eq!(mgr.active_voice_count(), 2);

        mgr.note_on(&inst, Pitch(64), Velocity::new(1.0), 0);
        assert_eq!(mgr.active_voice_count(), 2);
        assert!(mgr.voices_for_instrument(inst.id).any(|v| v.pitch == Pitch(64)));
        assert!(!mgr.voices_for_instrument(inst.id).any(|v| v.pitch == Pitch(60)));
    }

    #[test]
    fn legato_monophonic_retargets_instead_of_allocating() {
        let mut mgr = VoiceManager::new(48_000.0, 64);
        let mut inst = instrument(1);
        inst.max_voices = 1;
        inst.legato = true;
        inst.portamento_time_seconds = 0.05;

        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);
        mgr.render(256, |_| 1.0);
        mgr.note_on(&inst, Pitch(67), Velocity::new(0.9), 0);
        assert_eq!(mgr.active_voice_count(), 1);
    }

    #[test]
    fn release_all_forces_every_sounding_voice_into_release() {
        let mut mgr = VoiceManager::new(48_000.0, 64);
        let inst = instrument(1);
        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);
        mgr.note_on(&inst, Pitch(64), Velocity::new(1.0), 0);
        mgr.render(64, |_| 1.0);

        mgr.release_all();
        mgr.render(64, |_| 1.0);

        assert!(mgr.voices_for_instrument(inst.id).all(|v| v.stage() == VoiceStage::Release));
    }

    #[test]
    fn cut_itself_force_releases_prior_voices_regardless_of_pitch() {
        let mut mgr = VoiceManager::new(48_000.0, 64);
        let mut inst = instrument(1);
        inst.cut_itself = true;

        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);
        mgr.render(64, |_| 1.0);
        mgr.note_on(&inst, Pitch(60), Velocity::new(1.0), 0);

        let releasing = mgr.voices_for_instrument(inst.id).filter(|v| v.stage() == VoiceStage::Release).count();
        assert_eq!(releasing, 1);
    }
}
