//! Mixer: per-channel insert chains, sends, sidechain taps, and the master bus, driven by the
//! cached topological order from [`crate::graph::ChannelGraph`] (`SPEC_FULL.md` §4.6).

use std::collections::HashMap;

use ae_core::{
    ChannelId, ChannelKind, Decibels, EngineError, EngineResult, InsertEffectSpec, MixerChannelSpec,
    ProcessorKind, Sample, SendSpec, SendTapPoint, SidechainSpec,
};
use ae_dsp::metering::StereoMeter;
use ae_dsp::pdc::MultiChannelLookahead;
use ae_dsp::{
    bass_enhancer::BassEnhancer, clipper::Clipper, compressor::Compressor, delay::Delay, eq::ThreeBandEq,
    imager::Imager, maximizer::Maximizer, phaser::Phaser, reverb::Reverb, rhythm_fx::RhythmFx, Processor,
};

use crate::graph::ChannelGraph;

/// Generous upper bound on total per-channel insert latency the PDC delay line can compensate
/// for; at 48 kHz this is well over a second, far past any realistic lookahead/pre-delay chain.
const MAX_PDC_DELAY_SAMPLES: usize = 1 << 16;

fn make_processor(kind: ProcessorKind) -> Box<dyn Processor> {
    match kind {
        ProcessorKind::ThreeBandEq => Box::new(ThreeBandEq::new()),
        ProcessorKind::Compressor => Box::new(Compressor::new()),
        ProcessorKind::Maximizer => Box::new(Maximizer::new()),
        ProcessorKind::Clipper => Box::new(Clipper::new()),
        ProcessorKind::Imager => Box::new(Imager::new()),
        ProcessorKind::BassEnhancer => Box::new(BassEnhancer::new()),
        ProcessorKind::Delay => Box::new(Delay::new()),
        ProcessorKind::Reverb => Box::new(Reverb::new()),
        ProcessorKind::RhythmFx => Box::new(RhythmFx::new()),
        ProcessorKind::Phaser => Box::new(Phaser::new()),
    }
}

struct InsertSlot {
    spec: InsertEffectSpec,
    processor: Box<dyn Processor>,
}

/// One mixer channel's live DSP state: insert chain, pan/gain, mute/solo, scratch buffers,
/// sends, and a meter.
struct Channel {
    spec: MixerChannelSpec,
    inserts: Vec<InsertSlot>,
    input: Vec<Sample>,
    output: Vec<Sample>,
    meter: StereoMeter,
    pdc: MultiChannelLookahead,
    pdc_in: [Vec<Sample>; 2],
    pdc_out: [Vec<Sample>; 2],
}

impl Channel {
    fn new(spec: MixerChannelSpec, sample_rate: f64, block_size: usize) -> Self {
        let inserts = spec
            .inserts
            .iter()
            .map(|insert_spec| {
                let mut processor = make_processor(insert_spec.processor);
                processor.prepare(sample_rate, block_size);
                InsertSlot { spec: insert_spec.clone(), processor }
            })
            .collect();
        Self {
            spec,
            inserts,
            input: vec![0.0; block_size * 2],
            output: vec![0.0; block_size * 2],
            meter: StereoMeter::new(sample_rate),
            pdc: MultiChannelLookahead::new(2, MAX_PDC_DELAY_SAMPLES),
            pdc_in: [vec![0.0; block_size], vec![0.0; block_size]],
            pdc_out: [vec![0.0; block_size], vec![0.0; block_size]],
        }
    }

    fn resize(&mut self, sample_rate: f64, block_size: usize) {
        self.input.resize(block_size * 2, 0.0);
        self.output.resize(block_size * 2, 0.0);
        self.pdc_in[0].resize(block_size, 0.0);
        self.pdc_in[1].resize(block_size, 0.0);
        self.pdc_out[0].resize(block_size, 0.0);
        self.pdc_out[1].resize(block_size, 0.0);
        for slot in &mut self.inserts {
            slot.processor.prepare(sample_rate, block_size);
        }
    }

    fn clear_input(&mut self) {
        self.input.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Holds this channel's just-rendered output back by `delay_samples` so every channel feeding
    /// a common downstream bus arrives sample-aligned regardless of how much latency its own
    /// insert chain added (`SPEC_FULL.md` §4.7).
    fn apply_pdc(&mut self, delay_samples: usize) {
        let frames = self.output.len() / 2;
        self.pdc.set_delay(delay_samples);
        ae_dsp::deinterleave(&self.output, &mut self.pdc_in[0][..frames], &mut self.pdc_in[1][..frames]);
        self.pdc.process(
            &[&self.pdc_in[0][..frames], &self.pdc_in[1][..frames]],
            &mut [&mut self.pdc_out[0][..frames], &mut self.pdc_out[1][..frames]],
        );
        ae_dsp::interleave(&self.pdc_out[0][..frames], &self.pdc_out[1][..frames], &mut self.output);
    }

    fn own_latency_samples(&self) -> usize {
        self.inserts.iter().map(|i| i.processor.latency_samples()).sum()
    }

    /// Runs the insert chain in order (bypassed slots pass through unchanged) and applies
    /// channel gain/pan, writing into `self.output`. `sidechain_source` supplies the tapped
    /// signal for any insert declaring a sidechain.
    fn process(&mut self, sidechain_source: Option<&[Sample]>) {
        self.output.copy_from_slice(&self.input);

        for slot in &mut self.inserts {
            if slot.spec.bypass {
                continue;
            }
            let sidechain = slot.spec.sidechain.and(sidechain_source);
            let dry = self.output.clone();
            slot.processor.process(&dry, sidechain, &mut self.output);
            if slot.spec.wet_dry < 1.0 {
                let wet = slot.spec.wet_dry as Sample;
                for (out, dry) in self.output.iter_mut().zip(dry.iter()) {
                    *out = *out * wet + *dry * (1.0 - wet);
                }
            }
        }

        let gain = self.spec.gain.to_gain() as Sample;
        let (pan_l, pan_r) = crate::sample_engine::equal_power_pan(self.spec.pan);
        for frame in self.output.chunks_exact_mut(2) {
            frame[0] *= gain * pan_l as Sample;
            frame[1] *= gain * pan_r as Sample;
        }

        for frame in self.output.chunks_exact(2) {
            self.meter.process(frame[0], frame[1]);
        }
    }

    fn post_output_for_send(&self, tap_point: SendTapPoint) -> &[Sample] {
        match tap_point {
            SendTapPoint::Post => &self.output,
            SendTapPoint::Pre => &self.input,
        }
    }
}

/// Owns every mixer channel plus the routing graph, and renders one block top-to-bottom in
/// cached topological order.
pub struct Mixer {
    sample_rate: f64,
    block_size: usize,
    channels: HashMap<ChannelId, Channel>,
    graph: ChannelGraph,
    master_id: Option<ChannelId>,
}

impl Mixer {
    pub fn new(sample_rate: f64, block_size: usize) -> Self {
        Self { sample_rate, block_size, channels: HashMap::new(), graph: ChannelGraph::new(), master_id: None }
    }

    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        for channel in self.channels.values_mut() {
            channel.resize(sample_rate, block_size);
        }
    }

    pub fn add_channel(&mut self, spec: MixerChannelSpec) -> EngineResult<()> {
        let id = spec.id;
        if spec.kind == ChannelKind::Master {
            if self.master_id.is_some() {
                return Err(EngineError::Rejected("master channel already exists".into()));
            }
            self.master_id = Some(id);
        }
        self.graph.add_node(id);
        self.channels.insert(id, Channel::new(spec, self.sample_rate, self.block_size));
        Ok(())
    }

    pub fn remove_channel(&mut self, id: ChannelId) {
        self.graph.remove_node(id);
        self.channels.remove(&id);
        if self.master_id == Some(id) {
            self.master_id = None;
        }
    }

    /// Adds or updates a send from `from` into `to`, both as a routing edge in the graph and as
    /// a `SendSpec` entry on the source channel so `render_block` actually mixes it.
    pub fn set_send(&mut self, from: ChannelId, to: ChannelId, level: Decibels, tap_point: SendTapPoint) -> EngineResult<()> {
        self.graph.connect(from, to)?;
        let channel = self.channels.get_mut(&from).ok_or(EngineError::UnknownChannel(from))?;
        if let Some(existing) = channel.spec.sends.iter_mut().find(|s| s.target == to) {
            existing.level = level;
            existing.tap_point = tap_point;
        } else {
            channel.spec.sends.push(SendSpec { target: to, level, tap_point });
        }
        Ok(())
    }

    pub fn remove_send(&mut self, from: ChannelId, to: ChannelId) {
        self.graph.disconnect(from, to);
        if let Some(channel) = self.channels.get_mut(&from) {
            channel.spec.sends.retain(|s| s.target != to);
        }
    }

    /// Sets or clears the sidechain source tapped by one insert slot. Registers a graph edge
    /// from the source into `channel_id` just like `set_send` does, so `rebuild_topo_order`
    /// forces the sidechain source to render first and `render_block` never reads a stale,
    /// previous-block tap.
    pub fn set_sidechain(&mut self, channel_id: ChannelId, insert_index: usize, source: Option<ChannelId>) -> EngineResult<()> {
        if let Some(src) = source {
            if src == channel_id {
                return Err(EngineError::Rejected("an insert cannot sidechain its own channel".into()));
            }
            self.graph.connect(src, channel_id)?;
        }
        let channel = self.channels.get_mut(&channel_id).ok_or(EngineError::UnknownChannel(channel_id))?;
        let slot = channel
            .inserts
            .get_mut(insert_index)
            .ok_or_else(|| EngineError::Invalid("insert index out of range".into()))?;
        let previous = slot.spec.sidechain.map(|sc| sc.source_channel);
        slot.spec.sidechain = source.map(|source_channel| SidechainSpec { source_channel });
        if let Some(old_source) = previous {
            if Some(old_source) != source {
                self.graph.disconnect(old_source, channel_id);
            }
        }
        Ok(())
    }

    pub fn set_channel_gain(&mut self, id: ChannelId, gain: Decibels) -> EngineResult<()> {
        self.channels.get_mut(&id).ok_or(EngineError::UnknownChannel(id))?.spec.gain = gain;
        Ok(())
    }

    pub fn set_channel_pan(&mut self, id: ChannelId, pan: f64) -> EngineResult<()> {
        self.channels.get_mut(&id).ok_or(EngineError::UnknownChannel(id))?.spec.pan = pan.clamp(-1.0, 1.0);
        Ok(())
    }

    pub fn set_channel_mute(&mut self, id: ChannelId, mute: bool) -> EngineResult<()> {
        self.channels.get_mut(&id).ok_or(EngineError::UnknownChannel(id))?.spec.mute = mute;
        Ok(())
    }

    pub fn set_channel_solo(&mut self, id: ChannelId, solo: bool) -> EngineResult<()> {
        self.channels.get_mut(&id).ok_or(EngineError::UnknownChannel(id))?.spec.solo = solo;
        Ok(())
    }

    pub fn set_insert(&mut self, channel_id: ChannelId, index: usize, spec: InsertEffectSpec) -> EngineResult<()> {
        let channel = self.channels.get_mut(&channel_id).ok_or(EngineError::UnknownChannel(channel_id))?;
        let mut processor = make_processor(spec.processor);
        processor.prepare(self.sample_rate, self.block_size);
        let slot = InsertSlot { spec, processor };
        if index >= channel.inserts.len() {
            channel.inserts.push(slot);
        } else {
            channel.inserts[index] = slot;
        }
        Ok(())
    }

    pub fn set_insert_parameter(
        &mut self,
        channel_id: ChannelId,
        insert_index: usize,
        param_id: ae_core::ParamId,
        value: f64,
    ) -> EngineResult<()> {
        let channel = self.channels.get_mut(&channel_id).ok_or(EngineError::UnknownChannel(channel_id))?;
        let slot = channel
            .inserts
            .get_mut(insert_index)
            .ok_or_else(|| EngineError::Invalid("insert index out of range".into()))?;
        slot.processor.set_parameter(param_id, value);
        Ok(())
    }

    pub fn channel_input_mut(&mut self, id: ChannelId) -> Option<&mut [Sample]> {
        self.channels.get_mut(&id).map(|c| c.input.as_mut_slice())
    }

    pub fn meter(&self, id: ChannelId) -> Option<&StereoMeter> {
        self.channels.get(&id).map(|c| &c.meter)
    }

    /// Effective gain for a channel, accounting for solo: if any channel in the mixer is
    /// soloed, every non-soloed, non-master channel is silenced.
    fn is_audible(&self, id: ChannelId, any_solo: bool) -> bool {
        match self.channels.get(&id) {
            Some(c) if c.spec.kind == ChannelKind::Master => !c.spec.mute,
            Some(c) => !c.spec.mute && (!any_solo || c.spec.solo),
            None => false,
        }
    }

    /// Renders one block: every channel's insert chain runs in topological order so that a
    /// channel's sends have already been summed into their destinations by the time the
    /// destination itself is processed.
    pub fn render_block(&mut self) {
        let any_solo = self.channels.values().any(|c| c.spec.solo);
        let order: Vec<ChannelId> = self.graph.processing_order().to_vec();

        // Plugin delay compensation reference point: the slowest non-master path's own insert
        // latency. Master is excluded since it's the convergence point, not a path being
        // compared against its siblings.
        let max_latency: usize = self
            .channels
            .values()
            .filter(|c| c.spec.kind != ChannelKind::Master)
            .map(|c| c.own_latency_samples())
            .max()
            .unwrap_or(0);

        for id in order {
            let sidechain_sources: Vec<(ChannelId, Vec<Sample>)> = {
                let Some(channel) = self.channels.get(&id) else { continue };
                channel
                    .spec
                    .inserts
                    .iter()
                    .filter_map(|i| i.sidechain)
                    .filter_map(|sc| {
                        self.channels.get(&sc.source_channel).map(|src| (sc.source_channel, src.output.clone()))
                    })
                    .collect()
            };

            let audible = self.is_audible(id, any_solo);
            if let Some(channel) = self.channels.get_mut(&id) {
                let sidechain = sidechain_sources.first().map(|(_, buf)| buf.as_slice());
                channel.process(sidechain);
                if channel.spec.kind != ChannelKind::Master {
                    let compensation = max_latency.saturating_sub(channel.own_latency_samples());
                    channel.apply_pdc(compensation);
                }
                if !audible {
                    channel.output.iter_mut().for_each(|s| *s = 0.0);
                }
            }

            let sends: Vec<(ChannelId, f64, SendTapPoint)> = self
                .channels
                .get(&id)
                .map(|c| c.spec.sends.iter().map(|s| (s.target, s.level.to_gain(), s.tap_point)).collect())
                .unwrap_or_default();

            for (target, gain, tap_point) in sends {
                let source_buf: Vec<Sample> = match self.channels.get(&id) {
                    Some(c) => c.post_output_for_send(tap_point).to_vec(),
                    None => continue,
                };
                if let Some(dest) = self.channels.get_mut(&target) {
                    for (dest_sample, src_sample) in dest.input.iter_mut().zip(source_buf.iter()) {
                        *dest_sample += src_sample * gain as Sample;
                    }
                }
            }
        }
    }

    /// Master bus output for this block, or silence if no master channel exists yet.
    pub fn master_output(&self) -> Option<&[Sample]> {
        self.master_id.and_then(|id| self.channels.get(&id)).map(|c| c.output.as_slice())
    }

    pub fn clear_all_inputs(&mut self) {
        for channel in self.channels.values_mut() {
            channel.clear_input();
        }
    }

    pub fn total_latency_samples(&self, id: ChannelId) -> usize {
        self.channels.get(&id).map(Channel::own_latency_samples).unwrap_or(0)
    }

    /// Every channel currently in the mixer, master bus included, for a telemetry driver to
    /// snapshot without tracking channel ids separately.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    pub fn master_id(&self) -> Option<ChannelId> {
        self.master_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::{ChannelKind, Decibels};

    fn track_spec(id: u64) -> MixerChannelSpec {
        MixerChannelSpec::new(ChannelId::new(id), format!("track-{id}"), ChannelKind::Track)
    }

    #[test]
    fn track_routes_through_to_master_via_send() {
        let mut mixer = Mixer::new(48_000.0, 64);
        let track = track_spec(1);
        let mut master = track_spec(2);
        master.kind = ChannelKind::Master;

        mixer.add_channel(track).unwrap();
        mixer.add_channel(master).unwrap();
        mixer.set_send(ChannelId::new(1), ChannelId::new(2), Decibels::ZERO, SendTapPoint::Post).unwrap();

        {
            let input = mixer.channel_input_mut(ChannelId::new(1)).unwrap();
            for frame in input.chunks_exact_mut(2) {
                frame[0] = 0.5;
                frame[1] = 0.5;
            }
        }

        mixer.render_block();
        let master_out = mixer.master_output().unwrap();
        assert!(master_out.iter().any(|&s| s.abs() > 0.0));
    }

    #[test]
    fn remove_send_drops_both_the_edge_and_the_spec() {
        let mut mixer = Mixer::new(48_000.0, 64);
        mixer.add_channel(track_spec(1)).unwrap();
        mixer.add_channel(track_spec(2)).unwrap();
        mixer.set_send(ChannelId::new(1), ChannelId::new(2), Decibels::ZERO, SendTapPoint::Post).unwrap();

        mixer.remove_send(ChannelId::new(1), ChannelId::new(2));

        let channel = mixer.channels.get(&ChannelId::new(1)).unwrap();
        assert!(channel.spec.sends.is_empty());
        // the edge is gone too, so re-adding the opposite direction must not be rejected as cyclic
        mixer.set_send(ChannelId::new(2), ChannelId::new(1), Decibels::ZERO, SendTapPoint::Post).unwrap();
    }

    #[test]
    fn sidechain_cannot_target_its_own_channel() {
        let mut mixer = Mixer::new(48_000.0, 64);
        mixer.add_channel(track_spec(1)).unwrap();
        mixer.set_insert(ChannelId::new(1), 0, ae_core::InsertEffectSpec::new(ae_core::EffectId::new(1), ProcessorKind::Compressor)).unwrap();

        let result = mixer.set_sidechain(ChannelId::new(1), 0, Some(ChannelId::new(1)));
        assert!(matches!(result, Err(EngineError::Rejected(_))));
    }

    #[test]
    fn set_sidechain_forces_the_source_to_render_before_its_consumer() {
        let mut mixer = Mixer::new(48_000.0, 64);
        mixer.add_channel(track_spec(1)).unwrap(); // kick
        mixer.add_channel(track_spec(2)).unwrap(); // pad
        mixer.set_insert(ChannelId::new(2), 0, ae_core::InsertEffectSpec::new(ae_core::EffectId::new(1), ProcessorKind::Compressor)).unwrap();

        mixer.set_sidechain(ChannelId::new(2), 0, Some(ChannelId::new(1))).unwrap();

        let order = mixer.graph.processing_order().to_vec();
        let kick_pos = order.iter().position(|&id| id == ChannelId::new(1)).unwrap();
        let pad_pos = order.iter().position(|&id| id == ChannelId::new(2)).unwrap();
        assert!(kick_pos < pad_pos);
    }

    #[test]
    fn set_sidechain_rejects_a_cycle() {
        let mut mixer = Mixer::new(48_000.0, 64);
        mixer.add_channel(track_spec(1)).unwrap();
        mixer.add_channel(track_spec(2)).unwrap();
        mixer.set_insert(ChannelId::new(1), 0, ae_core::InsertEffectSpec::new(ae_core::EffectId::new(1), ProcessorKind::Compressor)).unwrap();
        mixer.set_send(ChannelId::new(1), ChannelId::new(2), Decibels::ZERO, SendTapPoint::Post).unwrap();

        let result = mixer.set_sidechain(ChannelId::new(1), 0, Some(ChannelId::new(2)));
        assert!(matches!(result, Err(EngineError::Cyclic)));
    }

    #[test]
    fn clearing_a_sidechain_drops_its_graph_edge() {
        let mut mixer = Mixer::new(48_000.0, 64);
        mixer.add_channel(track_spec(1)).unwrap();
        mixer.add_channel(track_spec(2)).unwrap();
        mixer.set_insert(ChannelId::new(2), 0, ae_core::InsertEffectSpec::new(ae_core::EffectId::new(1), ProcessorKind::Compressor)).unwrap();

        mixer.set_sidechain(ChannelId::new(2), 0, Some(ChannelId::new(1))).unwrap();
        mixer.set_sidechain(ChannelId::new(2), 0, None).unwrap();

        // the edge is gone, so the opposite direction must not be rejected as cyclic
        mixer.set_send(ChannelId::new(2), ChannelId::new(1), Decibels::ZERO, SendTapPoint::Post).unwrap();
    }

    #[test]
    fn apply_pdc_delays_channel_output_by_the_requested_sample_count() {
        let mut channel = Channel::new(track_spec(1), 48_000.0, 4);
        channel.output.copy_from_slice(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);

        channel.apply_pdc(1);

        assert_eq!(&channel.output[0..2], &[0.0, 0.0]);
        assert_eq!(&channel.output[2..4], &[1.0, 1.0]);
        assert_eq!(&channel.output[4..6], &[2.0, 2.0]);
        assert_eq!(&channel.output[6..8], &[3.0, 3.0]);
    }

    #[test]
    fn render_block_time_aligns_a_fast_channel_with_a_slower_lookahead_sibling() {
        let mut mixer = Mixer::new(48_000.0, 64);
        let mut master = track_spec(3);
        master.kind = ChannelKind::Master;
        mixer.add_channel(track_spec(1)).unwrap(); // no inserts, would otherwise arrive first
        mixer.add_channel(track_spec(2)).unwrap(); // gets a lookahead compressor
        mixer.add_channel(master).unwrap();

        mixer
            .set_insert(ChannelId::new(2), 0, ae_core::InsertEffectSpec::new(ae_core::EffectId::new(1), ProcessorKind::Compressor))
            .unwrap();
        mixer.set_insert_parameter(ChannelId::new(2), 0, ae_dsp::compressor::param_ids::LOOKAHEAD_MS, 5.0).unwrap();
        assert_eq!(mixer.total_latency_samples(ChannelId::new(2)), 240);

        mixer.set_send(ChannelId::new(1), ChannelId::new(3), Decibels::ZERO, SendTapPoint::Post).unwrap();

        {
            let input = mixer.channel_input_mut(ChannelId::new(1)).unwrap();
            input[0] = 1.0;
            input[1] = 1.0;
        }

        let mut impulse_frame = None;
        for block in 0..6 {
            mixer.render_block();
            let master_out = mixer.master_output().unwrap().to_vec();
            for (frame_idx, frame) in master_out.chunks_exact(2).enumerate() {
                if frame[0].abs() > 0.3 {
                    impulse_frame = Some(block * 64 + frame_idx);
                }
            }
            mixer.clear_all_inputs();
        }

        // channel 2's own insert latency (240 samples) is the block's max, so channel 1 (own
        // latency 0) gets delayed the full 240 samples to stay aligned with it at master.
        assert_eq!(impulse_frame, Some(240));
    }

    #[test]
    fn soloed_channel_silences_non_soloed_siblings() {
        let mut mixer = Mixer::new(48_000.0, 64);
        let mut a = track_spec(1);
        a.solo = true;
        let b = track_spec(2);
        mixer.add_channel(a).unwrap();
        mixer.add_channel(b).unwrap();

        for id in [1u64, 2] {
            let input = mixer.channel_input_mut(ChannelId::new(id)).unwrap();
            input.iter_mut().for_each(|s| *s = 0.5);
        }
        mixer.render_block();

        let b_out: Vec<Sample> = mixer.channels.get(&ChannelId::new(2)).unwrap().output.clone();
        assert!(b_out.iter().all(|&s| s == 0.0));
    }
}
