//! Mixer graph data model: channels, inserts, sends, sidechains (`SPEC_FULL.md` §3, §4.6).

use smallvec::SmallVec;

use crate::ids::{ChannelId, EffectId};
use crate::value::Decibels;

/// A channel's role in the mixer DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChannelKind {
    Track,
    Bus,
    Master,
}

/// Whether a send taps the signal before or after the channel's fader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SendTapPoint {
    Pre,
    Post,
}

/// One routing edge from a channel to a bus.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SendSpec {
    pub target: ChannelId,
    pub level: Decibels,
    pub tap_point: SendTapPoint,
}

/// Declares that an insert effect wants a second ("sidechain") input tapped from another
/// channel's post-insert signal. Self-sidechain is forbidden by the mixer builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SidechainSpec {
    pub source_channel: ChannelId,
}

/// Known built-in processor kinds an insert effect slot may hold (`SPEC_FULL.md` §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProcessorKind {
    ThreeBandEq,
    Compressor,
    Maximizer,
    Clipper,
    Imager,
    BassEnhancer,
    Delay,
    Reverb,
    RhythmFx,
    Phaser,
}

/// One entry in a channel's ordered insert-effect chain.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InsertEffectSpec {
    pub id: EffectId,
    pub processor: ProcessorKind,
    pub bypass: bool,
    pub wet_dry: f64,
    pub sidechain: Option<SidechainSpec>,
}

impl InsertEffectSpec {
    pub fn new(id: EffectId, processor: ProcessorKind) -> Self {
        Self { id, processor, bypass: false, wet_dry: 1.0, sidechain: None }
    }
}

/// A mixer channel's data-model state (process topology and routing lives in `ae-engine`'s
/// graph; this struct is the portable description used by commands and serialization).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MixerChannelSpec {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    pub gain: Decibels,
    pub pan: f64,
    pub mute: bool,
    pub solo: bool,
    pub inserts: SmallVec<[InsertEffectSpec; 8]>,
    pub sends: SmallVec<[SendSpec; 8]>,
}

impl MixerChannelSpec {
    pub fn new(id: ChannelId, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            gain: Decibels::ZERO,
            pan: 0.0,
            mute: false,
            solo: false,
            inserts: SmallVec::new(),
            sends: SmallVec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_defaults_to_unity_gain() {
        let ch = MixerChannelSpec::new(ChannelId::new(1), "Track 1", ChannelKind::Track);
        assert_eq!(ch.gain, Decibels::ZERO);
        assert!(!ch.mute);
    }
}
