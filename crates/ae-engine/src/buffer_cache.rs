//! Two-level buffer cache: L1 holds original decoded PCM (immutable, reference-counted); L2
//! holds lazily-built processed variants, LRU-evicted against a byte budget
//! (`SPEC_FULL.md` §4.3).

use std::collections::HashMap;

use ae_core::{BufferId, SharedBuffer};

/// Key identifying one processed variant of an original buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub original_id: BufferId,
    pub normalize: bool,
    pub reverse: bool,
    pub trim_start_frames: u64,
    pub trim_end_frames: u64,
    pub gain_millibels: i32,
}

impl VariantKey {
    pub fn identity(original_id: BufferId) -> Self {
        Self {
            original_id,
            normalize: false,
            reverse: false,
            trim_start_frames: 0,
            trim_end_frames: 0,
            gain_millibels: 0,
        }
    }

    fn is_identity(&self) -> bool {
        *self == Self::identity(self.original_id)
    }
}

struct L2Entry {
    buffer: SharedBuffer,
    bytes: u64,
    last_used: u64,
}

/// Owns the L1 (original) and L2 (processed-variant) buffer stores. Lookups never block the
/// audio thread: a miss on either level returns `None` and the caller degrades to silence.
pub struct BufferCache {
    originals: HashMap<BufferId, SharedBuffer>,
    variants: HashMap<VariantKey, L2Entry>,
    byte_cap: u64,
    bytes_used: u64,
    clock: u64,
}

impl BufferCache {
    pub fn new(byte_cap: u64) -> Self {
        Self { originals: HashMap::new(), variants: HashMap::new(), byte_cap, bytes_used: 0, clock: 0 }
    }

    /// Registers a freshly decoded original buffer. Decoding itself happens off the audio
    /// thread; only the already-decoded, immutable buffer reaches the cache.
    pub fn insert_original(&mut self, buffer: SharedBuffer) {
        self.originals.insert(buffer.id(), buffer);
    }

    pub fn remove_original(&mut self, id: BufferId) {
        self.originals.remove(&id);
        self.variants.retain(|key, entry| {
            let keep = key.original_id != id;
            if !keep {
                self.bytes_used = self.bytes_used.saturating_sub(entry.bytes);
            }
            keep
        });
    }

    pub fn is_resident(&self, id: BufferId) -> bool {
        self.originals.contains_key(&id)
    }

    pub fn original(&self, id: BufferId) -> Option<SharedBuffer> {
        self.originals.get(&id).cloned()
    }

    /// Fetches a processed variant if already cached, else builds it via `build` (which must
    /// not block), inserts it, and evicts LRU entries until back under the byte cap.
    pub fn get_or_build_variant(
        &mut self,
        key: VariantKey,
        build: impl FnOnce(&SharedBuffer) -> SharedBuffer,
        bytes_estimate: impl FnOnce(&SharedBuffer) -> u64,
    ) -> Option<SharedBuffer> {
        if key.is_identity() {
            return self.original(key.original_id);
        }

        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.variants.get_mut(&key) {
            entry.last_used = clock;
            return Some(entry.buffer.clone());
        }

        let original = self.original(key.original_id)?;
        let built = build(&original);
        let bytes = bytes_estimate(&built);

        self.variants.insert(key, L2Entry { buffer: built.clone(), bytes, last_used: clock });
        self.bytes_used += bytes;
        self.evict_if_over_budget();
        Some(built)
    }

    fn evict_if_over_budget(&mut self) {
        while self.bytes_used > self.byte_cap {
            let lru_key = self.variants.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| *k);
            let Some(lru_key) = lru_key else { break };
            if let Some(entry) = self.variants.remove(&lru_key) {
                self.bytes_used = self.bytes_used.saturating_sub(entry.bytes);
            }
        }
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::{Buffer, BufferMeta, SampleRate};

    fn test_buffer(id: u64, length_frames: u64) -> SharedBuffer {
        Buffer::new(
            BufferMeta { id: BufferId::new(id), channels: 1, sample_rate: SampleRate::Hz48000, length_frames, slice_markers: Vec::new() },
            vec![0.0; length_frames as usize],
        )
        .as_shared()
    }

    #[test]
    fn identity_variant_returns_original_without_building() {
        let mut cache = BufferCache::new(1_000_000);
        cache.insert_original(test_buffer(1, 100));
        let built = cache.get_or_build_variant(
            VariantKey::identity(BufferId::new(1)),
            |_| panic!("identity variant must not build"),
            |_| 0,
        );
        assert!(built.is_some());
    }

    #[test]
    fn miss_on_unresident_original_returns_none() {
        let mut cache = BufferCache::new(1_000_000);
        let key = VariantKey { reverse: true, ..VariantKey::identity(BufferId::new(99)) };
        let result = cache.get_or_build_variant(key, |b| b.clone(), |_| 4);
        assert!(result.is_none());
    }

    #[test]
    fn lru_eviction_keeps_bytes_used_under_cap() {
        let mut cache = BufferCache::new(150);
        cache.insert_original(test_buffer(1, 10));

        for i in 0..5 {
            let key = VariantKey { gain_millibels: i, ..VariantKey::identity(BufferId::new(1)) };
            cache.get_or_build_variant(key, |b| b.clone(), |_| 100);
        }

        assert!(cache.bytes_used() <= 150);
        assert!(cache.variant_count() <= 1);
    }
}
