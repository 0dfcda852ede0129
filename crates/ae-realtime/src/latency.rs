//! Per-path latency accounting (`SPEC_FULL.md` §4.7, §10.5).
//!
//! Every insert effect reports an inherent (fixed, algorithmic) and a lookahead (configurable)
//! latency; the manager sums these per signal path and reports the compensation each path needs
//! to line up with the slowest one. The actual delay lines doing that compensation live in
//! `ae_dsp::pdc` and run inside `Mixer::render_block`, since `ae-engine` (home of `Mixer`) sits
//! below this crate in the dependency graph and can't reach back up into it; this manager is
//! fed from the mixer's real per-channel latency for reporting to a control surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// One processor's contribution to its path's latency.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorLatency {
    pub id: u32,
    pub inherent_samples: u32,
    pub lookahead_samples: u32,
    pub reported_samples: u32,
}

impl ProcessorLatency {
    pub fn new(id: u32) -> Self {
        Self { id, inherent_samples: 0, lookahead_samples: 0, reported_samples: 0 }
    }

    pub fn total(&self) -> u32 {
        self.inherent_samples + self.lookahead_samples
    }

    pub fn set_inherent(&mut self, samples: u32) {
        self.inherent_samples = samples;
        self.reported_samples = self.total();
    }

    pub fn set_lookahead(&mut self, samples: u32) {
        self.lookahead_samples = samples;
        self.reported_samples = self.total();
    }
}

/// One signal path's accumulated latency and the compensation needed to line it up with the
/// slowest path in the manager.
#[derive(Debug, Clone)]
pub struct PathLatency {
    pub id: u32,
    pub name: String,
    pub processors: Vec<ProcessorLatency>,
    pub total_samples: u32,
    pub compensation_samples: u32,
}

impl PathLatency {
    pub fn new(id: u32, name: String) -> Self {
        Self { id, name, processors: Vec::new(), total_samples: 0, compensation_samples: 0 }
    }

    pub fn add_processor(&mut self, processor: ProcessorLatency) {
        self.processors.push(processor);
        self.recalculate();
    }

    pub fn remove_processor(&mut self, id: u32) -> bool {
        if let Some(idx) = self.processors.iter().position(|p| p.id == id) {
            self.processors.remove(idx);
            self.recalculate();
            true
        } else {
            false
        }
    }

    fn recalculate(&mut self) {
        self.total_samples = self.processors.iter().map(|p| p.total()).sum();
    }

    pub fn total_ms(&self, sample_rate: f64) -> f64 {
        self.total_samples as f64 / sample_rate * 1000.0
    }
}

/// Tracks every signal path's latency and keeps them aligned via per-path compensation delays.
/// `max_latency` is a plain `AtomicU32` rather than `portable_atomic`: the workspace has no
/// dependency on a 32-bit-CAS-backport crate, and native `AtomicU32` is available on every
/// target this engine ships to.
pub struct LatencyManager {
    paths: HashMap<u32, PathLatency>,
    max_latency: AtomicU32,
    sample_rate: f64,
    auto_compensate: bool,
}

impl LatencyManager {
    pub fn new(sample_rate: f64) -> Self {
        Self { paths: HashMap::new(), max_latency: AtomicU32::new(0), sample_rate, auto_compensate: true }
    }

    pub fn add_path(&mut self, id: u32, name: String) {
        self.paths.insert(id, PathLatency::new(id, name));
    }

    pub fn remove_path(&mut self, id: u32) -> bool {
        if self.paths.remove(&id).is_some() {
            self.recalculate_compensation();
            true
        } else {
            false
        }
    }

    pub fn add_processor(&mut self, path_id: u32, processor: ProcessorLatency) {
        if let Some(path) = self.paths.get_mut(&path_id) {
            path.add_processor(processor);
            self.recalculate_compensation();
        }
    }

    pub fn update_processor(&mut self, path_id: u32, processor_id: u32, inherent: u32, lookahead: u32) {
        if let Some(path) = self.paths.get_mut(&path_id) {
            if let Some(processor) = path.processors.iter_mut().find(|p| p.id == processor_id) {
                processor.set_inherent(inherent);
                processor.set_lookahead(lookahead);
                path.recalculate();
                self.recalculate_compensation();
            }
        }
    }

    fn recalculate_compensation(&mut self) {
        let max = self.paths.values().map(|p| p.total_samples).max().unwrap_or(0);
        self.max_latency.store(max, Ordering::Release);

        if self.auto_compensate {
            for path in self.paths.values_mut() {
                path.compensation_samples = max.saturating_sub(path.total_samples);
            }
        }
    }

    pub fn max_latency(&self) -> u32 {
        self.max_latency.load(Ordering::Acquire)
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.max_latency() as f64 / self.sample_rate * 1000.0
    }

    pub fn get_path(&self, id: u32) -> Option<&PathLatency> {
        self.paths.get(&id)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathLatency> {
        self.paths.values()
    }

    pub fn set_auto_compensate(&mut self, enabled: bool) {
        self.auto_compensate = enabled;
        self.recalculate_compensation();
    }

    pub fn report(&self) -> LatencyReport {
        LatencyReport {
            max_latency_samples: self.max_latency(),
            max_latency_ms: self.max_latency_ms(),
            paths: self
                .paths
                .values()
                .map(|p| PathLatencyInfo {
                    id: p.id,
                    name: p.name.clone(),
                    total_samples: p.total_samples,
                    total_ms: p.total_ms(self.sample_rate),
                    compensation_samples: p.compensation_samples,
                    num_processors: p.processors.len(),
                })
                .collect(),
            auto_compensate: self.auto_compensate,
            sample_rate: self.sample_rate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencyReport {
    pub max_latency_samples: u32,
    pub max_latency_ms: f64,
    pub paths: Vec<PathLatencyInfo>,
    pub auto_compensate: bool,
    pub sample_rate: f64,
}

#[derive(Debug, Clone)]
pub struct PathLatencyInfo {
    pub id: u32,
    pub name: String,
    pub total_samples: u32,
    pub total_ms: f64,
    pub compensation_samples: u32,
    pub num_processors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_latency_sums_inherent_and_lookahead() {
        let mut latency = ProcessorLatency::new(0);
        latency.set_inherent(64);
        latency.set_lookahead(128);

        assert_eq!(latency.total(), 192);
        assert_eq!(latency.reported_samples, 192);
    }

    #[test]
    fn path_latency_sums_its_processors() {
        let mut path = PathLatency::new(0, "Main".to_string());

        let mut proc1 = ProcessorLatency::new(0);
        proc1.set_inherent(64);
        let mut proc2 = ProcessorLatency::new(1);
        proc2.set_inherent(128);

        path.add_processor(proc1);
        path.add_processor(proc2);

        assert_eq!(path.total_samples, 192);
    }

    #[test]
    fn manager_compensates_the_faster_path_up_to_the_slower_one() {
        let mut manager = LatencyManager::new(48_000.0);
        manager.add_path(0, "Direct".to_string());
        manager.add_path(1, "Lookahead".to_string());

        let mut proc = ProcessorLatency::new(0);
        proc.set_inherent(256);
        manager.add_processor(1, proc);

        assert_eq!(manager.max_latency(), 256);
        assert_eq!(manager.get_path(0).unwrap().compensation_samples, 256);
        assert_eq!(manager.get_path(1).unwrap().compensation_samples, 0);
    }

    #[test]
    fn report_reflects_registered_paths() {
        let mut manager = LatencyManager::new(48_000.0);
        manager.add_path(0, "Test".to_string());

        let report = manager.report();
        assert_eq!(report.paths.len(), 1);
        assert_eq!(report.sample_rate, 48_000.0);
    }
}
