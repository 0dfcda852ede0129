//! Capability probe and quality-preset application (`SPEC_FULL.md` §4.8).
//!
//! Settings are applied by stopping the graph, re-`prepare`-ing every processor, and resuming;
//! no parameter value is lost, since `prepare` only re-sizes/re-allocates internal buffers and
//! never touches already-set parameter state.

use ae_core::{BufferSize, EngineConfig, QualityPreset, SampleRate};

/// A coarse, allocation-free estimate of the host's available headroom, gathered once at
/// start-up (and optionally re-run on demand).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityProbe {
    pub logical_cores: usize,
    /// Relative single-core throughput benchmark score; 1.0 is the baseline the preset table
    /// was tuned against.
    pub benchmark_score: f64,
    pub estimated_free_memory_bytes: u64,
}

impl CapabilityProbe {
    /// Probes the host. CPU core count comes from `num_cpus`; the benchmark score and memory
    /// estimate are supplied by the caller (the control thread owns any blocking measurement,
    /// per the audio-thread-never-blocks rule of `SPEC_FULL.md` §5).
    pub fn probe(benchmark_score: f64, estimated_free_memory_bytes: u64) -> Self {
        Self { logical_cores: num_cpus::get(), benchmark_score, estimated_free_memory_bytes }
    }

    /// Chooses the richest preset the probe can sustain. Thresholds are deliberately
    /// conservative: under-provisioning degrades quality, over-provisioning risks missed
    /// deadlines.
    pub fn recommend_preset(&self) -> QualityPreset {
        if self.logical_cores >= 8 && self.benchmark_score >= 1.5 {
            QualityPreset::Ultra
        } else if self.logical_cores >= 6 && self.benchmark_score >= 1.2 {
            QualityPreset::Studio
        } else if self.logical_cores >= 4 && self.benchmark_score >= 0.9 {
            QualityPreset::Quality
        } else if self.logical_cores >= 2 {
            QualityPreset::Balanced
        } else {
            QualityPreset::Economy
        }
    }
}

/// Owns the engine's active `EngineConfig` and mediates preset/custom changes. Does not itself
/// touch DSP state: callers re-`prepare` every processor and the mixer after `apply_preset`/
/// `apply_custom` returns a new config.
pub struct QualityManager {
    active: EngineConfig,
}

impl QualityManager {
    pub fn new(initial: EngineConfig) -> Self {
        Self { active: initial }
    }

    pub fn from_probe(probe: CapabilityProbe) -> Self {
        Self::new(probe.recommend_preset().to_config())
    }

    pub fn active(&self) -> EngineConfig {
        self.active
    }

    /// Applies a named preset outright.
    pub fn apply_preset(&mut self, preset: QualityPreset) -> EngineConfig {
        self.active = preset.to_config();
        self.active
    }

    /// Applies custom overrides on top of the current config; `None` fields keep their
    /// current value.
    pub fn apply_custom(&mut self, overrides: CustomQualityOverrides) -> EngineConfig {
        let mut config = self.active;
        if let Some(sample_rate) = overrides.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(block_size) = overrides.block_size {
            config.block_size = block_size;
        }
        if let Some(max_polyphony) = overrides.max_polyphony {
            config.max_polyphony = max_polyphony;
        }
        if let Some(max_mixer_channels) = overrides.max_mixer_channels {
            config.max_mixer_channels = max_mixer_channels;
        }
        if let Some(enable_high_quality_resampling) = overrides.enable_high_quality_resampling {
            config.enable_high_quality_resampling = enable_high_quality_resampling;
        }
        if let Some(enable_real_time_effects) = overrides.enable_real_time_effects {
            config.enable_real_time_effects = enable_real_time_effects;
        }
        self.active = config;
        config
    }
}

/// Sparse override set for `QualityManager::apply_custom`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CustomQualityOverrides {
    pub sample_rate: Option<SampleRate>,
    pub block_size: Option<BufferSize>,
    pub max_polyphony: Option<u32>,
    pub max_mixer_channels: Option<u32>,
    pub enable_high_quality_resampling: Option<bool>,
    pub enable_real_time_effects: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_provisioned_host_recommends_ultra() {
        let probe = CapabilityProbe { logical_cores: 16, benchmark_score: 2.0, estimated_free_memory_bytes: 1 << 34 };
        assert_eq!(probe.recommend_preset(), QualityPreset::Ultra);
    }

    #[test]
    fn single_core_host_recommends_economy() {
        let probe = CapabilityProbe { logical_cores: 1, benchmark_score: 0.5, estimated_free_memory_bytes: 1 << 20 };
        assert_eq!(probe.recommend_preset(), QualityPreset::Economy);
    }

    #[test]
    fn reapplying_same_preset_is_idempotent() {
        let mut manager = QualityManager::new(QualityPreset::Balanced.to_config());
        let first = manager.apply_preset(QualityPreset::Studio);
        let second = manager.apply_preset(QualityPreset::Studio);
        assert_eq!(first, second);
    }

    #[test]
    fn custom_override_only_touches_named_fields() {
        let mut manager = QualityManager::new(QualityPreset::Balanced.to_config());
        let before = manager.active();
        let after = manager.apply_custom(CustomQualityOverrides { max_polyphony: Some(12), ..Default::default() });
        assert_eq!(after.max_polyphony, 12);
        assert_eq!(after.sample_rate, before.sample_rate);
        assert_eq!(after.block_size, before.block_size);
    }
}
