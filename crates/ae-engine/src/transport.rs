//! Transport: wall-clock sample position, playback state, and the scheduler that turns a
//! pattern's scored notes into per-block `ResolvedNoteEvent`s (`SPEC_FULL.md` §4.1).

use ae_core::{
    BlockContext, EngineError, EngineResult, InstrumentId, NoteEvent, PlaybackState, ResolvedNoteEvent, SampleRate,
    TempoMap, Tick,
};

/// A single pattern: a fixed-length loop of scheduled note events starting at tick 0.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    pub events: Vec<NoteEvent>,
    /// Explicit loop length in ticks; `None` derives it from the longest event's end tick.
    pub length_ticks: Option<Tick>,
}

impl Pattern {
    pub fn effective_length_ticks(&self) -> Tick {
        match self.length_ticks {
            Some(len) if len > 0 => len,
            _ => self.events.iter().map(NoteEvent::end_tick).max().unwrap_or(PPQ_BAR),
        }
    }
}

/// one bar at 4/4 and PPQ=960, used as the fallback loop length for an empty/unspecified pattern.
const PPQ_BAR: Tick = ae_core::PPQ as Tick * 4;

/// Tracks transport position and drives the tempo map to resolve note events into sample-exact
/// offsets within the current block.
pub struct Transport {
    sample_rate: SampleRate,
    tempo_map: TempoMap,
    playback_state: PlaybackState,
    position_ticks: Tick,
    position_samples: u64,
    patterns: Vec<(InstrumentId, Pattern)>,
}

impl Transport {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            tempo_map: TempoMap::new(sample_rate.as_f64()),
            playback_state: PlaybackState::Stopped,
            position_ticks: 0,
            position_samples: 0,
            patterns: Vec::new(),
        }
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn tempo_map_mut(&mut self) -> &mut TempoMap {
        &mut self.tempo_map
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback_state
    }

    pub fn position_ticks(&self) -> Tick {
        self.position_ticks
    }

    pub fn play(&mut self) {
        self.playback_state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        self.playback_state = PlaybackState::Paused;
    }

    pub fn stop(&mut self) {
        self.playback_state = PlaybackState::Stopped;
        self.position_ticks = 0;
        self.position_samples = 0;
    }

    /// Rejects while `Playing`: seeking is only meaningful paused or stopped, since during
    /// playback the position is advancing under the audio thread's own clock every block
    /// (`SPEC_FULL.md` §4.1, "Seek allowed only in `Paused` or `Stopped`").
    pub fn seek_ticks(&mut self, tick: Tick) -> EngineResult<()> {
        if self.playback_state == PlaybackState::Playing {
            return Err(EngineError::Rejected("cannot seek while playing; pause or stop first".into()));
        }
        self.position_ticks = tick.max(0);
        self.position_samples = self.tempo_map.ticks_to_samples(self.position_ticks);
        Ok(())
    }

    pub fn set_pattern(&mut self, instrument_id: InstrumentId, pattern: Pattern) {
        if let Some(slot) = self.patterns.iter_mut().find(|(id, _)| *id == instrument_id) {
            slot.1 = pattern;
        } else {
            self.patterns.push((instrument_id, pattern));
        }
    }

    pub fn clear_pattern(&mut self, instrument_id: InstrumentId) {
        self.patterns.retain(|(id, _)| *id != instrument_id);
    }

    /// Appends one note to the instrument's pattern, creating an empty pattern first if none
    /// exists yet (`notes.schedule(event)`, `SPEC_FULL.md` §6).
    pub fn schedule_note(&mut self, note: NoteEvent) {
        let instrument_id = note.instrument_id;
        if let Some(slot) = self.patterns.iter_mut().find(|(id, _)| *id == instrument_id) {
            slot.1.events.push(note);
        } else {
            self.patterns.push((instrument_id, Pattern { events: vec![note], length_ticks: None }));
        }
    }

    /// Resolves note events starting within `[position_ticks, position_ticks + block_ticks)` for
    /// every instrument's looping pattern into sample offsets relative to the block, and advances
    /// the transport by one block. Returns the populated `BlockContext`.
    pub fn events_for_block(&mut self, block_size: usize) -> BlockContext {
        let mut ctx = BlockContext::new(self.sample_rate, block_size);
        ctx.musical_time_at_start = self.position_ticks;
        ctx.transport_state = self.playback_state;
        ctx.tempo_bpm = self.tempo_map.tempo_at_tick(self.position_ticks);

        if self.playback_state == PlaybackState::Playing {
            let block_end_samples = self.position_samples + block_size as u64;
            let position_ticks = self.position_ticks;
            let position_samples = self.position_samples;

            for (instrument_id, pattern) in &self.patterns {
                let loop_len = pattern.effective_length_ticks().max(1);
                for note in &pattern.events {
                    schedule_note_occurrences(
                        &mut self.tempo_map,
                        position_ticks,
                        position_samples,
                        &mut ctx,
                        *instrument_id,
                        note,
                        loop_len,
                        block_end_samples,
                    );
                }
            }

            self.position_samples = block_end_samples;
            self.position_ticks = self.tempo_map.samples_to_ticks(self.position_samples);
        }

        ctx.sort_events();
        ctx
    }
}

#[allow(clippy::too_many_arguments)]
fn schedule_note_occurrences(
    tempo_map: &mut TempoMap,
    position_ticks: Tick,
    block_start_samples: u64,
    ctx: &mut BlockContext,
    instrument_id: InstrumentId,
    note: &NoteEvent,
    loop_len: Tick,
    block_end_samples: u64,
) {
    let start_loop_index = position_ticks.div_euclid(loop_len);
    let end_loop_index = {
        let end_ticks = tempo_map.samples_to_ticks(block_end_samples);
        end_ticks.div_euclid(loop_len) + 1
    };

    for loop_index in start_loop_index..=end_loop_index {
        let abs_start = loop_index * loop_len + note.start_tick;
        let abs_end = abs_start + note.duration_ticks;

        let start_samples = tempo_map.ticks_to_samples(abs_start);
        if start_samples >= block_start_samples && start_samples < block_end_samples {
            let offset = (start_samples - block_start_samples) as u32;
            ctx.events.push((
                offset,
                ResolvedNoteEvent::NoteOn { instrument_id, pitch: note.pitch, velocity: note.velocity },
            ));
        }

        let end_samples = tempo_map.ticks_to_samples(abs_end);
        if end_samples >= block_start_samples && end_samples < block_end_samples {
            let offset = (end_samples - block_start_samples) as u32;
            ctx.events.push((offset, ResolvedNoteEvent::NoteOff { instrument_id, pitch: note.pitch }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::{InstrumentId, Pitch, Velocity};

    fn kick_pattern() -> Pattern {
        Pattern {
            events: vec![NoteEvent {
                instrument_id: InstrumentId::new(1),
                pitch: Pitch(36),
                velocity: Velocity::new(1.0),
                start_tick: 0,
                duration_ticks: 100,
                per_note_params: None,
            }],
            length_ticks: Some(ae_core::PPQ as Tick),
        }
    }

    #[test]
    fn sample_accurate_kick_pattern_fires_once_per_beat() {
        let mut transport = Transport::new(SampleRate::Hz48000);
        transport.tempo_map_mut().set_tempo(0, 120.0).unwrap();
        transport.set_pattern(InstrumentId::new(1), kick_pattern());
        transport.play();

        let mut note_on_offsets = Vec::new();
        let block_size = 128;
        for block in 0..400u64 {
            let ctx = transport.events_for_block(block_size);
            for (offset, event) in &ctx.events {
                if matches!(event, ResolvedNoteEvent::NoteOn { .. }) {
                    note_on_offsets.push(block * block_size as u64 + *offset as u64);
                }
            }
        }

        assert!(note_on_offsets.len() >= 2);
        // one beat at 120bpm/48kHz = 24000 samples
        let gap = note_on_offsets[1] - note_on_offsets[0];
        assert!((gap as i64 - 24_000).abs() <= 2);
    }

    #[test]
    fn seek_is_rejected_while_playing_but_allowed_paused_or_stopped() {
        let mut transport = Transport::new(SampleRate::Hz48000);

        assert!(transport.seek_ticks(480).is_ok());
        assert_eq!(transport.position_ticks(), 480);

        transport.play();
        assert!(matches!(transport.seek_ticks(960), Err(EngineError::Rejected(_))));
        assert_eq!(transport.position_ticks(), 480);

        transport.pause();
        assert!(transport.seek_ticks(960).is_ok());
        assert_eq!(transport.position_ticks(), 960);

        transport.stop();
        assert!(transport.seek_ticks(120).is_ok());
        assert_eq!(transport.position_ticks(), 120);
    }

    #[test]
    fn schedule_note_appends_to_existing_pattern() {
        let mut transport = Transport::new(SampleRate::Hz48000);
        transport.set_pattern(InstrumentId::new(1), kick_pattern());
        transport.schedule_note(NoteEvent {
            instrument_id: InstrumentId::new(1),
            pitch: Pitch(67),
            velocity: Velocity::new(0.8),
            start_tick: 480,
            duration_ticks: 50,
            per_note_params: None,
        });
        assert_eq!(transport.patterns[0].1.events.len(), 2);
    }

    #[test]
    fn stopped_transport_emits_no_events() {
        let mut transport = Transport::new(SampleRate::Hz48000);
        transport.set_pattern(InstrumentId::new(1), kick_pattern());
        let ctx = transport.events_for_block(128);
        assert!(ctx.events.is_empty());
    }
}
