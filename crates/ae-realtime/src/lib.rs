//! The real-time render pipeline: the per-block drive loop that sits on the audio thread, and
//! the latency accounting every insert chain feeds into (`SPEC_FULL.md` §4.7, §5). The delay
//! lines that actually compensate for that latency live in `ae_dsp::pdc` and run inside the
//! mixer; see that module's doc comment for why.

pub mod latency;
pub mod pipeline;

pub use latency::{LatencyManager, LatencyReport, PathLatency, PathLatencyInfo, ProcessorLatency};
pub use pipeline::{DeadlineStats, RealtimePipeline};
