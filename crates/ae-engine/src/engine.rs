//! The process-wide owned engine struct: wires transport, voice manager, sample engine,
//! modulation engine, and mixer into one per-block render path (`SPEC_FULL.md` §4, §9).
//!
//! Created once at boot and torn down on exit; every other subsystem is reached only through
//! `&mut Engine`, never a shared mutable singleton (`SPEC_FULL.md` §9, "shared mutable
//! singletons" translation note).

use std::collections::HashMap;
use std::sync::Arc;

use ae_core::{
    BufferId, EngineConfig, EngineError, EngineResult, InsertEffectSpec, InstrumentId, InstrumentKind,
    InstrumentSpec, MissCounters, MixerChannelSpec, ParamId, Pitch, ResolvedNoteEvent, Sample, SharedBuffer,
    Velocity,
};

use crate::buffer_cache::BufferCache;
use crate::mixer::Mixer;
use crate::modulation_engine::ModulationEngine;
use crate::quality_manager::QualityManager;
use crate::sample_engine::{InterpolationQuality, SampleEngine};
use crate::synth_engine::SynthEngine;
use crate::transport::{Pattern, Transport};
use crate::voice_manager::VoiceManager;

pub struct Engine {
    config: EngineConfig,
    transport: Transport,
    voices: VoiceManager,
    sample_engine: SampleEngine,
    synth_engine: SynthEngine,
    modulation: ModulationEngine,
    mixer: Mixer,
    buffer_cache: BufferCache,
    quality: QualityManager,
    instruments: HashMap<InstrumentId, InstrumentSpec>,
    voice_scratch: Vec<Sample>,
    misses: Arc<MissCounters>,
}

impl Engine {
    pub fn new(config: EngineConfig, buffer_cache_byte_cap: u64) -> Self {
        let sample_rate = config.sample_rate.as_f64();
        let block_size = config.block_size.as_usize();
        let quality = InterpolationQuality::Linear;

        Self {
            config,
            transport: Transport::new(config.sample_rate),
            voices: VoiceManager::new(sample_rate, config.max_polyphony as usize),
            sample_engine: SampleEngine::new(quality),
            synth_engine: SynthEngine::new(sample_rate),
            modulation: ModulationEngine::new(),
            mixer: Mixer::new(sample_rate, block_size),
            buffer_cache: BufferCache::new(buffer_cache_byte_cap),
            quality: QualityManager::new(config),
            instruments: HashMap::new(),
            voice_scratch: vec![0.0; block_size * 2],
            misses: Arc::new(MissCounters::default()),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// The counters this engine records real buffer-cache misses into. Clone and hand to
    /// `ae_bridge::telemetry_channel` so a control thread observes the audio thread's actual
    /// miss counts rather than an independent shadow copy (`SPEC_FULL.md` §10.5).
    pub fn misses(&self) -> Arc<MissCounters> {
        self.misses.clone()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    pub fn modulation_mut(&mut self) -> &mut ModulationEngine {
        &mut self.modulation
    }

    pub fn register_instrument(&mut self, spec: InstrumentSpec) {
        self.instruments.insert(spec.id, spec);
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&InstrumentSpec> {
        self.instruments.get(&id)
    }

    pub fn update_instrument(
        &mut self,
        id: InstrumentId,
        patch: impl FnOnce(&mut InstrumentSpec),
    ) -> EngineResult<()> {
        let spec = self.instruments.get_mut(&id).ok_or(EngineError::UnknownInstrument(id))?;
        patch(spec);
        Ok(())
    }

    pub fn remove_instrument(&mut self, id: InstrumentId) {
        self.instruments.remove(&id);
        self.transport.clear_pattern(id);
    }

    pub fn insert_buffer(&mut self, buffer: SharedBuffer) {
        self.buffer_cache.insert_original(buffer);
    }

    pub fn remove_buffer(&mut self, id: BufferId) {
        self.buffer_cache.remove_original(id);
    }

    pub fn set_pattern(&mut self, instrument_id: InstrumentId, pattern: Pattern) {
        self.transport.set_pattern(instrument_id, pattern);
    }

    pub fn schedule_note(&mut self, note: ae_core::NoteEvent) {
        self.transport.schedule_note(note);
    }

    pub fn clear_notes(&mut self, instrument_id: InstrumentId) {
        self.transport.clear_pattern(instrument_id);
    }

    /// `pause` leaves sounding voices untouched; `stop` forces release of every voice in
    /// addition to resetting transport position (`SPEC_FULL.md` §5).
    pub fn stop_transport(&mut self) {
        self.transport.stop();
        self.voices.release_all();
    }

    pub fn note_on(&mut self, instrument_id: InstrumentId, pitch: Pitch, velocity: Velocity, sample_offset: u32) -> EngineResult<()> {
        let instrument = self.instruments.get(&instrument_id).ok_or(EngineError::UnknownInstrument(instrument_id))?;
        self.voices.note_on(instrument, pitch, velocity, sample_offset);
        self.modulation.note_on(velocity.get());
        Ok(())
    }

    pub fn note_off(&mut self, instrument_id: InstrumentId, pitch: Pitch, sample_offset: u32) -> EngineResult<()> {
        if !self.instruments.contains_key(&instrument_id) {
            return Err(EngineError::UnknownInstrument(instrument_id));
        }
        self.voices.note_off(instrument_id, pitch, sample_offset);
        Ok(())
    }

    pub fn add_mixer_channel(&mut self, spec: MixerChannelSpec) -> EngineResult<()> {
        self.mixer.add_channel(spec)
    }

    pub fn remove_mixer_channel(&mut self, id: ae_core::ChannelId) {
        self.mixer.remove_channel(id);
    }

    pub fn set_insert(&mut self, channel_id: ae_core::ChannelId, index: usize, spec: InsertEffectSpec) -> EngineResult<()> {
        self.mixer.set_insert(channel_id, index, spec)
    }

    pub fn set_insert_parameter(
        &mut self,
        channel_id: ae_core::ChannelId,
        insert_index: usize,
        param_id: ParamId,
        value: f64,
    ) -> EngineResult<()> {
        self.mixer.set_insert_parameter(channel_id, insert_index, param_id, value)
    }

    pub fn quality_manager_mut(&mut self) -> &mut QualityManager {
        &mut self.quality
    }

    /// Applies a quality preset: swaps the active config, re-sizes every scratch buffer, and
    /// re-`prepare`s the mixer's processors. No parameter value is lost (`SPEC_FULL.md` §4.8).
    pub fn apply_quality_preset(&mut self, preset: ae_core::QualityPreset) {
        let config = self.quality.apply_preset(preset);
        self.apply_config(config);
    }

    /// Installs an already-resolved config (e.g. from `QualityManager::apply_custom`) and
    /// re-sizes/re-`prepare`s every dependent buffer to match.
    pub fn apply_config(&mut self, config: ae_core::EngineConfig) {
        self.config = config;
        let sample_rate = self.config.sample_rate.as_f64();
        let block_size = self.config.block_size.as_usize();
        self.voice_scratch.resize(block_size * 2, 0.0);
        self.synth_engine.set_sample_rate(sample_rate);
        self.mixer.prepare(sample_rate, block_size);
    }

    /// Renders one block: resolves this block's note events against the transport, advances
    /// every voice's envelope/portamento, synthesizes each voice's audio into its owning
    /// instrument's mixer channel, runs the mixer, and writes the master bus into `out`
    /// (interleaved stereo, `out.len() == block_size * 2`).
    pub fn process_block(&mut self, out: &mut [Sample]) {
        let block_size = self.config.block_size.as_usize();
        debug_assert_eq!(out.len(), block_size * 2);

        let ctx = self.transport.events_for_block(block_size);
        for (offset, event) in ctx.events.iter() {
            match *event {
                ResolvedNoteEvent::NoteOn { instrument_id, pitch, velocity } => {
                    let _ = self.note_on(instrument_id, pitch, velocity, *offset);
                }
                ResolvedNoteEvent::NoteOff { instrument_id, pitch } => {
                    let _ = self.note_off(instrument_id, pitch, *offset);
                }
            }
        }

        self.mixer.clear_all_inputs();

        let instruments = &self.instruments;
        let voice_outputs = self.voices.render(block_size, |instrument_id| {
            instruments.get(&instrument_id).map(|i| i.velocity_sensitivity).unwrap_or(1.0)
        });

        for voice_output in &voice_outputs {
            let Some(instrument) = self.instruments.get(&voice_output.instrument_id) else { continue };

            self.voice_scratch.iter_mut().for_each(|s| *s = 0.0);
            let rendered = match &instrument.kind {
                InstrumentKind::Sample { buffer_id } => match self.buffer_cache.original(*buffer_id) {
                    Some(buffer) => {
                        self.sample_engine.render_voice_block(
                            voice_output.voice_id,
                            &buffer,
                            Pitch(60),
                            1.0,
                            instrument.tempo_tracking_factor,
                            0.0,
                            voice_output,
                            &mut self.voice_scratch,
                        );
                        true
                    }
                    None => {
                        self.misses.record_buffer_not_resident();
                        false
                    }
                },
                InstrumentKind::Synth(params) => {
                    self.synth_engine.render_voice_block(voice_output.voice_id, params, 0.0, voice_output, &mut self.voice_scratch);
                    true
                }
            };
            if !rendered {
                continue;
            }

            if let Some(input) = self.mixer.channel_input_mut(instrument.channel_id) {
                for (dest, src) in input.iter_mut().zip(self.voice_scratch.iter()) {
                    *dest += *src;
                }
            }
        }

        self.mixer.render_block();
        if let Some(master) = self.mixer.master_output() {
            out.copy_from_slice(master);
        } else {
            out.iter_mut().for_each(|s| *s = 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::{Buffer, BufferMeta, ChannelId, ChannelKind, QualityPreset, SampleRate};

    fn silent_buffer() -> SharedBuffer {
        Buffer::new(
            BufferMeta { id: BufferId::new(1), channels: 1, sample_rate: SampleRate::Hz48000, length_frames: 48_000, slice_markers: Vec::new() },
            vec![1.0; 48_000],
        )
        .as_shared()
    }

    #[test]
    fn registering_instrument_and_triggering_note_produces_nonsilent_block() {
        let mut engine = Engine::new(QualityPreset::Balanced.to_config(), 1 << 20);
        engine.insert_buffer(silent_buffer());

        let channel = ChannelId::new(1);
        let mut master = MixerChannelSpec::new(ChannelId::new(2), "Master", ChannelKind::Master);
        master.kind = ChannelKind::Master;
        engine.add_mixer_channel(MixerChannelSpec::new(channel, "Track", ChannelKind::Track)).unwrap();
        engine.add_mixer_channel(master).unwrap();
        engine.mixer_mut().set_send(channel, ChannelId::new(2), ae_core::Decibels::ZERO, ae_core::SendTapPoint::Post).unwrap();

        let inst = InstrumentSpec::new_sample(InstrumentId::new(1), BufferId::new(1), channel);
        engine.register_instrument(inst);
        engine.note_on(InstrumentId::new(1), Pitch(60), Velocity::new(1.0), 0).unwrap();

        let block_size = engine.config().block_size.as_usize();
        let mut out = vec![0.0; block_size * 2];
        for _ in 0..4 {
            engine.process_block(&mut out);
        }
        assert!(out.iter().any(|&s| s.abs() > 0.0));
    }

    #[test]
    fn unknown_instrument_note_on_is_rejected() {
        let mut engine = Engine::new(QualityPreset::Balanced.to_config(), 1 << 20);
        let result = engine.note_on(InstrumentId::new(99), Pitch(60), Velocity::new(1.0), 0);
        assert!(matches!(result, Err(EngineError::UnknownInstrument(_))));
    }
}
