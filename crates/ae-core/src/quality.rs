//! Quality Manager configuration (`SPEC_FULL.md` §4.8, §10.3).

use crate::value::{BufferSize, SampleRate};

/// Named quality presets governing the engine's resource/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QualityPreset {
    Economy,
    Balanced,
    Quality,
    Studio,
    Ultra,
}

impl QualityPreset {
    pub fn to_config(self) -> EngineConfig {
        match self {
            QualityPreset::Economy => EngineConfig {
                sample_rate: SampleRate::Hz44100,
                block_size: BufferSize::Samples1024,
                max_polyphony: 32,
                max_mixer_channels: 16,
                enable_high_quality_resampling: false,
                enable_real_time_effects: false,
            },
            QualityPreset::Balanced => EngineConfig {
                sample_rate: SampleRate::Hz48000,
                block_size: BufferSize::Samples512,
                max_polyphony: 64,
                max_mixer_channels: 32,
                enable_high_quality_resampling: false,
                enable_real_time_effects: true,
            },
            QualityPreset::Quality => EngineConfig {
                sample_rate: SampleRate::Hz48000,
                block_size: BufferSize::Samples256,
                max_polyphony: 128,
                max_mixer_channels: 64,
                enable_high_quality_resampling: true,
                enable_real_time_effects: true,
            },
            QualityPreset::Studio => EngineConfig {
                sample_rate: SampleRate::Hz96000,
                block_size: BufferSize::Samples128,
                max_polyphony: 192,
                max_mixer_channels: 96,
                enable_high_quality_resampling: true,
                enable_real_time_effects: true,
            },
            QualityPreset::Ultra => EngineConfig {
                sample_rate: SampleRate::Hz96000,
                block_size: BufferSize::Samples64,
                max_polyphony: 256,
                max_mixer_channels: 128,
                enable_high_quality_resampling: true,
                enable_real_time_effects: true,
            },
        }
    }
}

/// The engine's single source-of-truth configuration struct, constructed either from a named
/// preset or custom overrides (`quality.apply_custom`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    pub sample_rate: SampleRate,
    pub block_size: BufferSize,
    pub max_polyphony: u32,
    pub max_mixer_channels: u32,
    pub enable_high_quality_resampling: bool,
    pub enable_real_time_effects: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        QualityPreset::Quality.to_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ultra_has_more_polyphony_than_economy() {
        let ultra = QualityPreset::Ultra.to_config();
        let economy = QualityPreset::Economy.to_config();
        assert!(ultra.max_polyphony > economy.max_polyphony);
    }
}
