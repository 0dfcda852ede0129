//! Metering telemetry published from the audio thread and read from any control thread without
//! ever blocking either side (`SPEC_FULL.md` §5: "a shared snapshot structure with a
//! sequence-counter protocol — writer increments even/odd, readers retry on mismatch").
//!
//! A plain per-field atomic snapshot (as the teacher's mixer meter bridge uses) lets a reader
//! observe a torn combination of old and new field values across one publish; every consumer
//! here needs the whole snapshot to be internally consistent, so this implements an actual
//! seqlock instead.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ae_core::ChannelId;
pub use ae_core::MissCounters;
use ae_dsp::metering::StereoMeter;

/// Upper bound on channels carried in one telemetry snapshot. Chosen well above
/// `EngineConfig::max_mixer_channels`'s richest preset so a snapshot never truncates in practice;
/// `ChannelMeterSnapshot::Empty` fills any unused slots.
pub const MAX_TELEMETRY_CHANNELS: usize = 256;

/// One channel's metering readout for a single published block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMeterSnapshot {
    pub channel_id: ChannelId,
    pub peak_l_dbfs: f64,
    pub peak_r_dbfs: f64,
    pub rms_l_dbfs: f64,
    pub rms_r_dbfs: f64,
    pub correlation: f64,
    pub gain_reduction_db: f64,
}

impl ChannelMeterSnapshot {
    const EMPTY: Self = Self {
        channel_id: ChannelId(0),
        peak_l_dbfs: ae_core::Decibels::SILENCE_FLOOR.0,
        peak_r_dbfs: ae_core::Decibels::SILENCE_FLOOR.0,
        rms_l_dbfs: ae_core::Decibels::SILENCE_FLOOR.0,
        rms_r_dbfs: ae_core::Decibels::SILENCE_FLOOR.0,
        correlation: 0.0,
        gain_reduction_db: 0.0,
    };

    pub fn from_meter(channel_id: ChannelId, meter: &StereoMeter, gain_reduction_db: f64) -> Self {
        Self {
            channel_id,
            peak_l_dbfs: meter.peak_l.peak_dbfs(),
            peak_r_dbfs: meter.peak_r.peak_dbfs(),
            rms_l_dbfs: meter.rms_l.rms_dbfs(),
            rms_r_dbfs: meter.rms_r.rms_dbfs(),
            correlation: meter.correlation.correlation(),
            gain_reduction_db,
        }
    }
}

/// The full telemetry payload published once per block: every channel's meter plus the master
/// bus, packed into a fixed-size, `Copy` struct so it can live inside a seqlock without
/// allocation.
#[derive(Debug, Clone, Copy)]
pub struct TelemetrySnapshot {
    pub block_index: u64,
    pub channel_count: usize,
    pub channels: [ChannelMeterSnapshot; MAX_TELEMETRY_CHANNELS],
    pub master: ChannelMeterSnapshot,
    pub lufs_integrated: f64,
    pub lufs_short_term: f64,
    pub true_peak_dbtp: f64,
}

impl TelemetrySnapshot {
    pub fn silent() -> Self {
        Self {
            block_index: 0,
            channel_count: 0,
            channels: [ChannelMeterSnapshot::EMPTY; MAX_TELEMETRY_CHANNELS],
            master: ChannelMeterSnapshot::EMPTY,
            lufs_integrated: ae_core::Decibels::SILENCE_FLOOR.0,
            lufs_short_term: ae_core::Decibels::SILENCE_FLOOR.0,
            true_peak_dbtp: ae_core::Decibels::SILENCE_FLOOR.0,
        }
    }

    pub fn channels(&self) -> &[ChannelMeterSnapshot] {
        &self.channels[..self.channel_count]
    }
}

/// A `Copy`-typed value behind a sequence-counter lock: the writer bumps the counter to odd
/// before writing and back to even after, and a reader retries whenever it observes an odd
/// counter or the counter changed mid-read. Bounded retry is intentional: the writer side never
/// blocks or sleeps between the two bumps, so a reader loops at most a handful of times even
/// under contention.
struct SeqLock<T: Copy> {
    seq: AtomicU64,
    value: UnsafeCell<T>,
}

// Safety: `value` is only mutated by the single designated writer (the audio thread), and
// readers only ever copy out of it after validating the sequence counter around the read.
unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    fn new(initial: T) -> Self {
        Self { seq: AtomicU64::new(0), value: UnsafeCell::new(initial) }
    }

    fn write(&self, value: T) {
        self.seq.fetch_add(1, Ordering::AcqRel);
        unsafe {
            *self.value.get() = value;
        }
        self.seq.fetch_add(1, Ordering::Release);
    }

    fn read(&self) -> T {
        loop {
            let seq_before = self.seq.load(Ordering::Acquire);
            if seq_before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let value = unsafe { *self.value.get() };
            let seq_after = self.seq.load(Ordering::Acquire);
            if seq_before == seq_after {
                return value;
            }
        }
    }
}

/// Audio-thread handle: publishes one snapshot per block. Never blocks.
#[derive(Clone)]
pub struct TelemetryPublisher {
    lock: Arc<SeqLock<TelemetrySnapshot>>,
    misses: Arc<MissCounters>,
}

impl TelemetryPublisher {
    pub fn publish(&self, snapshot: TelemetrySnapshot) {
        self.lock.write(snapshot);
    }

    pub fn misses(&self) -> &MissCounters {
        &self.misses
    }
}

/// Control-thread handle: reads the latest published snapshot. Never blocks, and is cheap to
/// clone so a UI and an automation recorder can each hold their own.
#[derive(Clone)]
pub struct TelemetryReader {
    lock: Arc<SeqLock<TelemetrySnapshot>>,
    misses: Arc<MissCounters>,
}

impl TelemetryReader {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.lock.read()
    }

    pub fn misses(&self) -> &MissCounters {
        &self.misses
    }
}

/// Builds a fresh publisher/reader pair sharing one seqlock, backed by `misses` — normally the
/// same `Arc<MissCounters>` the owning `Engine` records real buffer-cache misses into, so the
/// reader observes the audio thread's actual miss counts rather than an independent shadow copy.
pub fn telemetry_channel(misses: Arc<MissCounters>) -> (TelemetryPublisher, TelemetryReader) {
    let lock = Arc::new(SeqLock::new(TelemetrySnapshot::silent()));
    (
        TelemetryPublisher { lock: lock.clone(), misses: misses.clone() },
        TelemetryReader { lock, misses },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_silence_before_first_publish() {
        let (_publisher, reader) = telemetry_channel(Arc::new(MissCounters::default()));
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.channel_count, 0);
    }

    #[test]
    fn published_snapshot_is_observed_whole_by_the_reader() {
        let (publisher, reader) = telemetry_channel(Arc::new(MissCounters::default()));
        let mut snapshot = TelemetrySnapshot::silent();
        snapshot.block_index = 42;
        snapshot.channel_count = 1;
        snapshot.channels[0] = ChannelMeterSnapshot::from_meter(ChannelId::new(1), &StereoMeter::new(48_000.0), -3.0);

        publisher.publish(snapshot);
        let observed = reader.snapshot();

        assert_eq!(observed.block_index, 42);
        assert_eq!(observed.channel_count, 1);
        assert_eq!(observed.channels()[0].channel_id, ChannelId::new(1));
        assert_eq!(observed.channels()[0].gain_reduction_db, -3.0);
    }

    #[test]
    fn miss_counters_are_shared_between_publisher_and_reader() {
        let shared = Arc::new(MissCounters::default());
        let (publisher, reader) = telemetry_channel(shared.clone());
        publisher.misses().record_buffer_not_resident();
        publisher.misses().record_buffer_not_resident();

        assert_eq!(reader.misses().buffer_not_resident_count(), 2);
        assert_eq!(shared.buffer_not_resident_count(), 2);
    }

    #[test]
    fn concurrent_publish_and_read_never_observes_a_torn_snapshot() {
        use std::thread;

        let (publisher, reader) = telemetry_channel(Arc::new(MissCounters::default()));
        let writer = thread::spawn(move || {
            for i in 0..5000u64 {
                let mut snapshot = TelemetrySnapshot::silent();
                snapshot.block_index = i;
                snapshot.channel_count = 1;
                snapshot.channels[0].channel_id = ChannelId::new(i);
                publisher.publish(snapshot);
            }
        });

        for _ in 0..5000 {
            let snapshot = reader.snapshot();
            assert_eq!(snapshot.channels[0].channel_id.raw(), snapshot.block_index);
        }

        writer.join().unwrap();
    }
}
