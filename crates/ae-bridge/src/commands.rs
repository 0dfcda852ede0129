//! The external command vocabulary (`SPEC_FULL.md` §6) and the two halves of its execution:
//! `ControlSurface` validates and enqueues from any control thread, `AudioExecutor` drains and
//! applies on the audio thread.

use ae_core::{
    ChannelId, Decibels, EngineError, InsertEffectSpec, InstrumentId, InstrumentSpec, MixerChannelSpec,
    NoteEvent, ParamId, ParamRange, QualityPreset, SendTapPoint, Tick,
};
use ae_engine::quality_manager::CustomQualityOverrides;
use ae_engine::{Engine, Pattern};

use crate::command_queue::{CommandQueueManager, ControlCommandHandle, AudioCommandHandle};
use crate::parameter_controller::ParameterController;

/// A targeted, concrete field update for an instrument, mirroring the teacher's field-specific
/// `EngineCommand::SetBus*` variants rather than shipping a closure across the command ring.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentPatchOp {
    SetMute(bool),
    SetCutItself(bool),
    SetEnvelope(ae_core::DahdsrSettings),
    SetVelocitySensitivity(f64),
    SetMaxVoices(u32),
    SetLegato(bool),
    SetPortamentoTimeSeconds(f64),
    SetTempoTrackingFactor(f64),
    SetChannel(ChannelId),
}

impl InstrumentPatchOp {
    fn apply(self, spec: &mut InstrumentSpec) {
        match self {
            InstrumentPatchOp::SetMute(v) => spec.mute = v,
            InstrumentPatchOp::SetCutItself(v) => spec.cut_itself = v,
            InstrumentPatchOp::SetEnvelope(v) => spec.default_envelope = v,
            InstrumentPatchOp::SetVelocitySensitivity(v) => spec.velocity_sensitivity = v,
            InstrumentPatchOp::SetMaxVoices(v) => spec.max_voices = v,
            InstrumentPatchOp::SetLegato(v) => spec.legato = v,
            InstrumentPatchOp::SetPortamentoTimeSeconds(v) => spec.portamento_time_seconds = v,
            InstrumentPatchOp::SetTempoTrackingFactor(v) => spec.tempo_tracking_factor = v,
            InstrumentPatchOp::SetChannel(v) => spec.channel_id = v,
        }
    }
}

/// A targeted field update for a mixer channel (`mixer.set_channel_field`, `SPEC_FULL.md` §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelFieldValue {
    Gain(Decibels),
    Pan(f64),
    Mute(bool),
    Solo(bool),
}

/// Ramp behavior for a parameter write (`SPEC_FULL.md` §4.5, testable property "ramp cancel").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamOpts {
    pub immediate: bool,
    pub ramp_seconds: f64,
}

impl ParamOpts {
    pub const IMMEDIATE: ParamOpts = ParamOpts { immediate: true, ramp_seconds: 0.0 };

    pub fn ramped(seconds: f64) -> Self {
        Self { immediate: false, ramp_seconds: seconds }
    }
}

/// One command in flight between control and audio threads. Carries no closures: every variant
/// is plain data so it can cross the SPSC ring without allocation on the audio side.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    TransportPlay,
    TransportPause,
    TransportStop,
    TransportSetBpm(f64),
    TransportSeek(Tick),

    InstrumentRegister(InstrumentSpec),
    InstrumentUpdate(InstrumentId, InstrumentPatchOp),
    InstrumentRemove(InstrumentId),

    NoteSchedule(NoteEvent),
    NoteClear(InstrumentId),
    NoteReplacePattern(InstrumentId, Pattern),

    MixerAddChannel(MixerChannelSpec),
    MixerRemoveChannel(ChannelId),
    MixerSetInsert(ChannelId, usize, InsertEffectSpec),
    MixerSetSend(ChannelId, ChannelId, Decibels, SendTapPoint),
    MixerRemoveSend(ChannelId, ChannelId),
    MixerSetSidechain(ChannelId, usize, Option<ChannelId>),
    MixerSetChannelField(ChannelId, ChannelFieldValue),

    ParamsSet(ParamId, f64, ParamOpts),
    ParamsBatch(Vec<(ParamId, f64)>, ParamOpts),

    QualityApplyPreset(QualityPreset),
    QualityApplyCustom(CustomQualityOverrides),
}

/// Opaque handle returned for a `Deferred` command; resolved later via `ControlSurface::poll_acks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferredHandle(pub u64);

/// Audio thread's verdict on a previously-deferred command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub handle: DeferredHandle,
    pub result: Result<(), EngineError>,
}

/// The unit that actually crosses the command ring: every command is tagged with the handle the
/// control side allocated for it, so the audio side can ack the right one.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub handle: DeferredHandle,
    pub command: EngineCommand,
}

/// Control-thread command surface: validates what it can synchronously (parameter range lookups
/// only need a read of the shared, immutable registry) and otherwise defers to the audio thread,
/// which alone can detect structural conflicts such as a cyclic send (`SPEC_FULL.md` §6).
pub struct ControlSurface {
    handle: ControlCommandHandle,
    next_handle: u64,
    param_ranges: std::collections::HashMap<ParamId, ParamRange>,
}

impl ControlSurface {
    pub fn new(handle: ControlCommandHandle) -> Self {
        Self { handle, next_handle: 0, param_ranges: std::collections::HashMap::new() }
    }

    /// Registers a parameter's range for control-side pre-clamping. Called once per parameter
    /// at setup, before any `params.set` referencing that ID (`SPEC_FULL.md` §6, "Parameter
    /// registry").
    pub fn register_param_range(&mut self, id: ParamId, range: ParamRange) {
        self.param_ranges.insert(id, range);
    }

    fn alloc_handle(&mut self) -> DeferredHandle {
        let handle = DeferredHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn submit(&mut self, command: EngineCommand) -> ae_core::CommandOutcome<DeferredHandle> {
        if !self.handle.has_space() {
            return ae_core::CommandOutcome::Rejected { reason: EngineError::Busy("command queue full".into()) };
        }
        let handle = self.alloc_handle();
        if self.handle.send(CommandEnvelope { handle, command }) {
            ae_core::CommandOutcome::Deferred { handle }
        } else {
            ae_core::CommandOutcome::Rejected { reason: EngineError::Busy("command queue full".into()) }
        }
    }

    pub fn play(&mut self) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::TransportPlay)
    }

    pub fn pause(&mut self) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::TransportPause)
    }

    pub fn stop(&mut self) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::TransportStop)
    }

    pub fn set_bpm(&mut self, bpm: f64) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::TransportSetBpm(bpm))
    }

    pub fn seek(&mut self, tick: Tick) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::TransportSeek(tick))
    }

    pub fn register_instrument(&mut self, spec: InstrumentSpec) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::InstrumentRegister(spec))
    }

    pub fn update_instrument(&mut self, id: InstrumentId, op: InstrumentPatchOp) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::InstrumentUpdate(id, op))
    }

    pub fn remove_instrument(&mut self, id: InstrumentId) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::InstrumentRemove(id))
    }

    pub fn schedule_note(&mut self, event: NoteEvent) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::NoteSchedule(event))
    }

    pub fn clear_notes(&mut self, instrument_id: InstrumentId) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::NoteClear(instrument_id))
    }

    pub fn replace_pattern(&mut self, instrument_id: InstrumentId, pattern: Pattern) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::NoteReplacePattern(instrument_id, pattern))
    }

    pub fn add_mixer_channel(&mut self, spec: MixerChannelSpec) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerAddChannel(spec))
    }

    pub fn remove_mixer_channel(&mut self, id: ChannelId) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerRemoveChannel(id))
    }

    pub fn set_insert(&mut self, channel_id: ChannelId, index: usize, spec: InsertEffectSpec) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerSetInsert(channel_id, index, spec))
    }

    pub fn set_send(&mut self, from: ChannelId, to: ChannelId, level: Decibels, tap_point: SendTapPoint) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerSetSend(from, to, level, tap_point))
    }

    pub fn remove_send(&mut self, from: ChannelId, to: ChannelId) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerRemoveSend(from, to))
    }

    pub fn set_sidechain(&mut self, channel_id: ChannelId, insert_index: usize, source: Option<ChannelId>) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerSetSidechain(channel_id, insert_index, source))
    }

    pub fn set_channel_field(&mut self, id: ChannelId, field: ChannelFieldValue) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::MixerSetChannelField(id, field))
    }

    /// Pre-clamps against the registered range before enqueuing, rejecting synchronously if
    /// `id` was never registered (`SPEC_FULL.md` §5, "validated and pre-clamped before enqueue").
    pub fn set_param(&mut self, id: ParamId, value: f64, opts: ParamOpts) -> ae_core::CommandOutcome<DeferredHandle> {
        let Some(range) = self.param_ranges.get(&id) else {
            return ae_core::CommandOutcome::Rejected { reason: EngineError::UnknownParameter(id) };
        };
        let clamped = range.clamp(value);
        self.submit(EngineCommand::ParamsSet(id, clamped, opts))
    }

    pub fn set_params_batch(&mut self, values: Vec<(ParamId, f64)>, opts: ParamOpts) -> ae_core::CommandOutcome<DeferredHandle> {
        let mut clamped = Vec::with_capacity(values.len());
        for (id, value) in values {
            match self.param_ranges.get(&id) {
                Some(range) => clamped.push((id, range.clamp(value))),
                None => return ae_core::CommandOutcome::Rejected { reason: EngineError::UnknownParameter(id) },
            }
        }
        self.submit(EngineCommand::ParamsBatch(clamped, opts))
    }

    pub fn apply_quality_preset(&mut self, preset: QualityPreset) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::QualityApplyPreset(preset))
    }

    pub fn apply_quality_custom(&mut self, overrides: CustomQualityOverrides) -> ae_core::CommandOutcome<DeferredHandle> {
        self.submit(EngineCommand::QualityApplyCustom(overrides))
    }

    pub fn poll_acks(&mut self) -> Vec<CommandAck> {
        self.handle.poll_acks().collect()
    }
}

/// Audio-thread executor: drains the command ring at the top of each block and applies every
/// command directly against the owned `Engine` and `ParameterController`.
pub struct AudioExecutor {
    handle: AudioCommandHandle,
}

impl AudioExecutor {
    pub fn new(handle: AudioCommandHandle) -> Self {
        Self { handle }
    }

    /// Builds a fresh command/ack ring pair and the two halves addressing it.
    pub fn pair() -> (ControlSurface, AudioExecutor) {
        let (control, audio) = CommandQueueManager::new().split();
        (ControlSurface::new(control), AudioExecutor::new(audio))
    }

    /// Drains every pending command and applies it. Acks are published best-effort; a dropped
    /// ack (full ack ring) never blocks this call.
    pub fn drain_into(&mut self, engine: &mut Engine, params: &mut ParameterController) {
        let envelopes: Vec<CommandEnvelope> = self.handle.drain().collect();
        for envelope in envelopes {
            let result = apply(engine, params, envelope.command);
            let _ = self.handle.send_ack(CommandAck { handle: envelope.handle, result });
        }
    }
}

fn apply(engine: &mut Engine, params: &mut ParameterController, command: EngineCommand) -> Result<(), EngineError> {
    match command {
        EngineCommand::TransportPlay => engine.transport_mut().play(),
        EngineCommand::TransportPause => engine.transport_mut().pause(),
        EngineCommand::TransportStop => engine.stop_transport(),
        EngineCommand::TransportSetBpm(bpm) => {
            engine.transport_mut().tempo_map_mut().set_tempo(engine.transport().position_ticks(), bpm)?
        }
        EngineCommand::TransportSeek(tick) => engine.transport_mut().seek_ticks(tick)?,

        EngineCommand::InstrumentRegister(spec) => engine.register_instrument(spec),
        EngineCommand::InstrumentUpdate(id, op) => engine.update_instrument(id, |spec| op.apply(spec))?,
        EngineCommand::InstrumentRemove(id) => engine.remove_instrument(id),

        EngineCommand::NoteSchedule(event) => engine.schedule_note(event),
        EngineCommand::NoteClear(id) => engine.clear_notes(id),
        EngineCommand::NoteReplacePattern(id, pattern) => engine.set_pattern(id, pattern),

        EngineCommand::MixerAddChannel(spec) => engine.add_mixer_channel(spec)?,
        EngineCommand::MixerRemoveChannel(id) => engine.remove_mixer_channel(id),
        EngineCommand::MixerSetInsert(channel_id, index, spec) => engine.set_insert(channel_id, index, spec)?,
        EngineCommand::MixerSetSend(from, to, level, tap_point) => engine.mixer_mut().set_send(from, to, level, tap_point)?,
        EngineCommand::MixerRemoveSend(from, to) => engine.mixer_mut().remove_send(from, to),
        EngineCommand::MixerSetSidechain(channel_id, index, source) => engine.mixer_mut().set_sidechain(channel_id, index, source)?,
        EngineCommand::MixerSetChannelField(id, field) => match field {
            ChannelFieldValue::Gain(db) => engine.mixer_mut().set_channel_gain(id, db)?,
            ChannelFieldValue::Pan(pan) => engine.mixer_mut().set_channel_pan(id, pan)?,
            ChannelFieldValue::Mute(mute) => engine.mixer_mut().set_channel_mute(id, mute)?,
            ChannelFieldValue::Solo(solo) => engine.mixer_mut().set_channel_solo(id, solo)?,
        },

        EngineCommand::ParamsSet(id, value, opts) => params.set(id, value, opts),
        EngineCommand::ParamsBatch(values, opts) => {
            for (id, value) in values {
                params.set(id, value, opts);
            }
        }

        EngineCommand::QualityApplyPreset(preset) => engine.apply_quality_preset(preset),
        EngineCommand::QualityApplyCustom(overrides) => {
            let config = engine.quality_manager_mut().apply_custom(overrides);
            engine.apply_config(config);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::BufferId;

    #[test]
    fn unregistered_param_is_rejected_synchronously() {
        let (mut control, _audio) = AudioExecutor::pair();
        let outcome = control.set_param(ParamId::new(1), 0.5, ParamOpts::IMMEDIATE);
        assert!(outcome.is_rejected());
    }

    #[test]
    fn registered_param_is_clamped_and_deferred() {
        let (mut control, _audio) = AudioExecutor::pair();
        control.register_param_range(ParamId::new(1), ParamRange::linear(0.0, 1.0, 0.0));
        let outcome = control.set_param(ParamId::new(1), 5.0, ParamOpts::IMMEDIATE);
        assert!(matches!(outcome, ae_core::CommandOutcome::Deferred { .. }));
    }

    #[test]
    fn instrument_register_command_reaches_the_engine() {
        use ae_engine::Engine;

        let (mut control, mut audio) = AudioExecutor::pair();
        let mut engine = Engine::new(QualityPreset::Balanced.to_config(), 1 << 20);
        let mut params = ParameterController::new(engine.config().sample_rate.as_f64());

        control.register_instrument(InstrumentSpec::new_sample(InstrumentId::new(1), BufferId::new(1), ChannelId::new(1)));
        audio.drain_into(&mut engine, &mut params);

        let outcome = control.update_instrument(InstrumentId::new(1), InstrumentPatchOp::SetMute(true));
        assert!(matches!(outcome, ae_core::CommandOutcome::Deferred { .. }));
        audio.drain_into(&mut engine, &mut params);

        assert!(engine.instrument(InstrumentId::new(1)).unwrap().mute);
        let acks = control.poll_acks();
        assert!(!acks.is_empty());
    }
}
