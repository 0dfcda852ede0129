//! Shared value types, stable IDs, musical time, parameters, and the error taxonomy used by
//! every other crate in the audio engine core workspace.

pub mod block_context;
pub mod buffer;
pub mod error;
pub mod ids;
pub mod instrument;
pub mod mixer_types;
pub mod modulation;
pub mod note_event;
pub mod params;
pub mod quality;
pub mod sample;
pub mod telemetry;
pub mod tempo;
pub mod value;
pub mod voice_types;

pub use block_context::{BlockContext, PlaybackState, ResolvedNoteEvent};
pub use buffer::{Buffer, BufferMeta, SharedBuffer, SliceMarker};
pub use error::{CommandOutcome, EngineError, EngineResult};
pub use ids::{BufferId, ChannelId, EffectId, IdAllocator, InstrumentId, ParamId, VoiceId};
pub use instrument::{InstrumentKind, InstrumentSpec, OscillatorShape, SynthFilterKind, SynthParams};
pub use mixer_types::{
    ChannelKind, InsertEffectSpec, MixerChannelSpec, ProcessorKind, SendSpec, SendTapPoint, SidechainSpec,
};
pub use modulation::{
    combine_modulation, LfoRate, LfoSettings, LfoWaveform, ModCurve, ModSource, ModulationSlot,
    ModulationSlots, MAX_MODULATION_SLOTS,
};
pub use note_event::{NoteEvent, Pitch, Velocity};
pub use params::{AtomicParam, NormalizedValue, ParamChange, ParamRange, ParamSkew};
pub use quality::{EngineConfig, QualityPreset};
pub use sample::{flush_denormal, AudioBuffer, MidSideSample, MonoBuffer, Sample, StereoSample};
pub use telemetry::MissCounters;
pub use tempo::{
    GridValue, MusicalPosition, TempoEvent, TempoMap, TempoRamp, TempoSyncDivision, Tick, TimeSignature,
    TimeSignatureEvent, MAX_TEMPO, MIN_TEMPO, PPQ,
};
pub use value::{BufferSize, ChannelConfig, Decibels, SampleRate};
pub use voice_types::{DahdsrSettings, VoiceStage, VOICE_SILENCE_THRESHOLD_DB};
