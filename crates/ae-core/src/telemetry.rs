//! Monotonic counters for audio-thread conditions a control thread cares about but that don't
//! warrant a rejected command (`SPEC_FULL.md` §10.5, "Telemetry miss counters"). Lives in
//! `ae-core` rather than `ae-bridge` so `ae-engine`'s `Engine` — which sits below `ae-bridge`
//! in the dependency graph — can record into the same counters it publishes from `ae-bridge`.

use std::sync::atomic::{AtomicU32, Ordering};

/// Counts samples rendered while a voice's instrument referenced a buffer not yet resident in
/// the buffer cache.
#[derive(Debug, Default)]
pub struct MissCounters {
    buffer_not_resident: AtomicU32,
}

impl MissCounters {
    pub fn record_buffer_not_resident(&self) {
        self.buffer_not_resident.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffer_not_resident_count(&self) -> u32 {
        self.buffer_not_resident.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_not_resident_accumulates() {
        let misses = MissCounters::default();
        misses.record_buffer_not_resident();
        misses.record_buffer_not_resident();
        assert_eq!(misses.buffer_not_resident_count(), 2);
    }
}
