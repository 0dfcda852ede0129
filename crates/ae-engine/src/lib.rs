//! Transport, voice manager, sample engine, modulation engine, mixer graph, buffer cache, and
//! quality manager: the control- and audio-thread logic that sits between `ae-core`'s data
//! model and `ae-dsp`'s processor library (`SPEC_FULL.md` §4).

pub mod buffer_cache;
pub mod engine;
pub mod graph;
pub mod mixer;
pub mod modulation_engine;
pub mod quality_manager;
pub mod sample_engine;
pub mod synth_engine;
pub mod transport;
pub mod voice;
pub mod voice_manager;

pub use buffer_cache::{BufferCache, VariantKey};
pub use engine::Engine;
pub use graph::ChannelGraph;
pub use mixer::Mixer;
pub use modulation_engine::{Lfo, ModulationEngine};
pub use quality_manager::{CapabilityProbe, CustomQualityOverrides, QualityManager};
pub use sample_engine::{equal_power_pan, InterpolationQuality, SampleEngine};
pub use synth_engine::SynthEngine;
pub use transport::{Pattern, Transport};
pub use voice::{Envelope, Voice};
pub use voice_manager::{VoiceBlockOutput, VoiceManager};
