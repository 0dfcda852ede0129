//! The ephemeral per-block context threaded through a single render call
//! (`SPEC_FULL.md` §3).

use smallvec::SmallVec;

use crate::ids::InstrumentId;
use crate::note_event::{Pitch, Velocity};
use crate::tempo::Tick;
use crate::value::SampleRate;

/// Current transport playback state, mirrored into every block context so DSP/voice code never
/// needs to reach back into the transport directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// A note-on or note-off resolved to a specific sample offset within the current block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedNoteEvent {
    NoteOn { instrument_id: InstrumentId, pitch: Pitch, velocity: Velocity },
    NoteOff { instrument_id: InstrumentId, pitch: Pitch },
}

/// One block's worth of scheduling context, rebuilt once per render call.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub sample_rate: SampleRate,
    pub block_size: usize,
    pub musical_time_at_start: Tick,
    pub transport_state: PlaybackState,
    pub tempo_bpm: f64,
    /// Events for this block, sorted by `sample_offset` then note-offs before note-ons at
    /// identical offsets (`SPEC_FULL.md` §4.1).
    pub events: SmallVec<[(u32, ResolvedNoteEvent); 16]>,
}

impl BlockContext {
    pub fn new(sample_rate: SampleRate, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            musical_time_at_start: 0,
            transport_state: PlaybackState::Stopped,
            tempo_bpm: 120.0,
            events: SmallVec::new(),
        }
    }

    /// Sorts events per the sample-offset-then-note-offs-first ordering rule.
    pub fn sort_events(&mut self) {
        self.events.sort_by(|(offset_a, event_a), (offset_b, event_b)| {
            offset_a.cmp(offset_b).then_with(|| {
                let rank = |e: &ResolvedNoteEvent| match e {
                    ResolvedNoteEvent::NoteOff { .. } => 0,
                    ResolvedNoteEvent::NoteOn { .. } => 1,
                };
                rank(event_a).cmp(&rank(event_b))
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::InstrumentId;

    #[test]
    fn note_offs_sort_before_note_ons_at_equal_offset() {
        let mut ctx = BlockContext::new(SampleRate::Hz48000, 128);
        ctx.events.push((10, ResolvedNoteEvent::NoteOn {
            instrument_id: InstrumentId::new(1),
            pitch: Pitch(60),
            velocity: Velocity::new(1.0),
        }));
        ctx.events.push((10, ResolvedNoteEvent::NoteOff {
            instrument_id: InstrumentId::new(1),
            pitch: Pitch(60),
        }));
        ctx.sort_events();
        assert!(matches!(ctx.events[0].1, ResolvedNoteEvent::NoteOff { .. }));
    }
}
