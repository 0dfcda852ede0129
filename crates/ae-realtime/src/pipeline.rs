//! The audio thread's per-block render loop: drain commands, tick parameters and modulation,
//! render, then publish a telemetry snapshot — in that order, once per callback
//! (`SPEC_FULL.md` §5, "Audio thread drains the queue at the top of each block").

use std::time::{Duration, Instant};

use ae_bridge::telemetry::ChannelMeterSnapshot;
use ae_bridge::{AudioExecutor, ParameterController, TelemetryPublisher, TelemetrySnapshot};
use ae_core::Sample;
use ae_engine::Engine;

/// Counts rendered blocks and how many of them overran their own deadline. Read from the
/// control thread; never blocks the audio thread that updates it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadlineStats {
    pub blocks_rendered: u64,
    pub deadline_misses: u64,
}

impl DeadlineStats {
    fn record(&mut self, elapsed: Duration, deadline: Duration) {
        self.blocks_rendered += 1;
        if elapsed > deadline {
            self.deadline_misses += 1;
        }
    }
}

/// Owns everything the audio thread touches: the engine, the command/ack rings, the smoothed
/// parameter state, and the telemetry publisher. One instance per running audio stream.
pub struct RealtimePipeline {
    engine: Engine,
    executor: AudioExecutor,
    params: ParameterController,
    telemetry: TelemetryPublisher,
    block_index: u64,
    block_deadline: Duration,
    stats: DeadlineStats,
}

impl RealtimePipeline {
    pub fn new(
        engine: Engine,
        executor: AudioExecutor,
        params: ParameterController,
        telemetry: TelemetryPublisher,
    ) -> Self {
        let block_deadline = Self::compute_deadline(&engine);
        Self { engine, executor, params, telemetry, block_index: 0, block_deadline, stats: DeadlineStats::default() }
    }

    fn compute_deadline(engine: &Engine) -> Duration {
        let config = engine.config();
        Duration::from_secs_f64(config.block_size.as_usize() as f64 / config.sample_rate.as_f64())
    }

    pub fn stats(&self) -> DeadlineStats {
        self.stats
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Renders exactly one block into `out` (interleaved stereo, `block_size * 2` samples).
    /// Must only ever be called from the real-time audio callback.
    pub fn render_block(&mut self, out: &mut [Sample]) {
        let started = Instant::now();

        self.executor.drain_into(&mut self.engine, &mut self.params);

        let block_size = self.engine.config().block_size.as_usize();
        let bpm = self.current_bpm();
        self.engine.modulation_mut().advance(bpm, block_size);
        self.params.tick_block(block_size);

        self.engine.process_block(out);

        self.publish_telemetry();
        self.block_index += 1;
        self.block_deadline = Self::compute_deadline(&self.engine);
        self.stats.record(started.elapsed(), self.block_deadline);
    }

    fn current_bpm(&self) -> f64 {
        let transport = self.engine.transport();
        transport.tempo_map().tempo_at_tick(transport.position_ticks())
    }

    fn publish_telemetry(&mut self) {
        let mut snapshot = TelemetrySnapshot::silent();
        snapshot.block_index = self.block_index;

        let master_id = self.engine.mixer().master_id();
        let mut count = 0usize;
        for id in self.engine.mixer().channel_ids() {
            if Some(id) == master_id {
                continue;
            }
            let Some(meter) = self.engine.mixer().meter(id) else { continue };
            if count < snapshot.channels.len() {
                snapshot.channels[count] = ChannelMeterSnapshot::from_meter(id, meter, 0.0);
                count += 1;
            }
        }
        snapshot.channel_count = count;

        if let Some(meter) = master_id.and_then(|id| self.engine.mixer().meter(id)) {
            snapshot.master = ChannelMeterSnapshot::from_meter(master_id.unwrap(), meter, 0.0);
        }

        self.telemetry.publish(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_bridge::{telemetry_channel, AudioExecutor};
    use ae_core::{ChannelId, ChannelKind, MixerChannelSpec, QualityPreset};

    fn engine_with_master() -> Engine {
        let mut engine = Engine::new(QualityPreset::Balanced.to_config(), 1 << 20);
        let master = MixerChannelSpec::new(ChannelId::new(1), "Master", ChannelKind::Master);
        engine.add_mixer_channel(master).unwrap();
        engine
    }

    #[test]
    fn render_block_produces_output_and_advances_block_index() {
        let engine = engine_with_master();
        let block_size = engine.config().block_size.as_usize();
        let sample_rate = engine.config().sample_rate.as_f64();

        let (_control, executor) = AudioExecutor::pair();
        let params = ParameterController::new(sample_rate);
        let (publisher, reader) = telemetry_channel(engine.misses());

        let mut pipeline = RealtimePipeline::new(engine, executor, params, publisher);
        let mut out = vec![0.0; block_size * 2];
        pipeline.render_block(&mut out);

        assert_eq!(pipeline.stats().blocks_rendered, 1);
        assert_eq!(reader.snapshot().block_index, 0);
    }

    #[test]
    fn drained_commands_are_applied_before_the_block_renders() {
        let engine = engine_with_master();
        let block_size = engine.config().block_size.as_usize();
        let sample_rate = engine.config().sample_rate.as_f64();

        let (mut control, executor) = AudioExecutor::pair();
        let params = ParameterController::new(sample_rate);
        let (publisher, _reader) = telemetry_channel(engine.misses());

        control.play();

        let mut pipeline = RealtimePipeline::new(engine, executor, params, publisher);
        let mut out = vec![0.0; block_size * 2];
        pipeline.render_block(&mut out);

        assert_eq!(
            pipeline.engine().transport().playback_state(),
            ae_core::PlaybackState::Playing
        );
    }

    #[test]
    fn deadline_stats_never_report_misses_for_a_single_fast_block() {
        let engine = engine_with_master();
        let block_size = engine.config().block_size.as_usize();
        let sample_rate = engine.config().sample_rate.as_f64();

        let (_control, executor) = AudioExecutor::pair();
        let params = ParameterController::new(sample_rate);
        let (publisher, _reader) = telemetry_channel(engine.misses());

        let mut pipeline = RealtimePipeline::new(engine, executor, params, publisher);
        let mut out = vec![0.0; block_size * 2];
        pipeline.render_block(&mut out);

        assert_eq!(pipeline.stats().deadline_misses, 0);
    }
}
