//! The control/audio thread boundary: lock-free command queues, the audio-thread parameter
//! controller, and a seqlock-backed telemetry snapshot (`SPEC_FULL.md` §5, §6).

pub mod command_queue;
pub mod commands;
pub mod parameter_controller;
pub mod telemetry;

pub use command_queue::{AudioCommandHandle, CommandQueueManager, ControlCommandHandle};
pub use commands::{
    AudioExecutor, ChannelFieldValue, CommandAck, ControlSurface, DeferredHandle, EngineCommand,
    InstrumentPatchOp, ParamOpts,
};
pub use parameter_controller::ParameterController;
pub use telemetry::{
    telemetry_channel, ChannelMeterSnapshot, MissCounters, TelemetryPublisher, TelemetryReader,
    TelemetrySnapshot,
};
