//! Lock-free map counters.
//!
//! The map thread bumps these with relaxed atomics; the dashboard reads
//! them whenever it likes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

use voxmap_engine::world::UnloadStats;

pub struct Metrics {
    blocks_loaded: AtomicU64,
    blocks_generated: AtomicU64,
    blocks_saved: AtomicU64,
    blocks_unloaded: AtomicU64,
    save_failures: AtomicU64,
    corrupt_blocks: AtomicU64,
    edits: AtomicU64,

    sweeps: AtomicU64,
    sweep_ns_sum: AtomicU64,
    // Sweep duration buckets
    hist_under_100us: AtomicU64,
    hist_100us_1ms: AtomicU64,
    hist_1_10ms: AtomicU64,
    hist_over_10ms: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            blocks_loaded: AtomicU64::new(0),
            blocks_generated: AtomicU64::new(0),
            blocks_saved: AtomicU64::new(0),
            blocks_unloaded: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            corrupt_blocks: AtomicU64::new(0),
            edits: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            sweep_ns_sum: AtomicU64::new(0),
            hist_under_100us: AtomicU64::new(0),
            hist_100us_1ms: AtomicU64::new(0),
            hist_1_10ms: AtomicU64::new(0),
            hist_over_10ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn block_loaded(&self) {
        self.blocks_loaded.fetch_add(1, Relaxed);
    }

    pub fn block_generated(&self) {
        self.blocks_generated.fetch_add(1, Relaxed);
    }

    pub fn block_corrupt(&self) {
        self.corrupt_blocks.fetch_add(1, Relaxed);
    }

    pub fn blocks_saved(&self, n: u64) {
        self.blocks_saved.fetch_add(n, Relaxed);
    }

    pub fn save_failed(&self, n: u64) {
        self.save_failures.fetch_add(n, Relaxed);
    }

    pub fn edit(&self) {
        self.edits.fetch_add(1, Relaxed);
    }

    /// Called after each unload sweep.
    pub fn record_sweep(&self, stats: &UnloadStats, duration: Duration) {
        self.blocks_unloaded.fetch_add(stats.blocks_unloaded as u64, Relaxed);
        self.blocks_saved(stats.blocks_saved as u64);
        self.save_failed(stats.save_failures as u64);
        self.sweeps.fetch_add(1, Relaxed);
        self.sweep_ns_sum.fetch_add(duration.as_nanos() as u64, Relaxed);

        match duration.as_micros() as u64 {
            0..=99 => {
                self.hist_under_100us.fetch_add(1, Relaxed);
            }
            100..=999 => {
                self.hist_100us_1ms.fetch_add(1, Relaxed);
            }
            1_000..=9_999 => {
                self.hist_1_10ms.fetch_add(1, Relaxed);
            }
            _ => {
                self.hist_over_10ms.fetch_add(1, Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            blocks_loaded: self.blocks_loaded.load(Relaxed),
            blocks_generated: self.blocks_generated.load(Relaxed),
            blocks_saved: self.blocks_saved.load(Relaxed),
            blocks_unloaded: self.blocks_unloaded.load(Relaxed),
            save_failures: self.save_failures.load(Relaxed),
            corrupt_blocks: self.corrupt_blocks.load(Relaxed),
            edits: self.edits.load(Relaxed),
            sweeps: self.sweeps.load(Relaxed),
            sweep_ns_sum: self.sweep_ns_sum.load(Relaxed),
            hist: [
                self.hist_under_100us.load(Relaxed),
                self.hist_100us_1ms.load(Relaxed),
                self.hist_1_10ms.load(Relaxed),
                self.hist_over_10ms.load(Relaxed),
            ],
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters at one point in time. Rates are left to the reader.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub blocks_loaded: u64,
    pub blocks_generated: u64,
    pub blocks_saved: u64,
    pub blocks_unloaded: u64,
    pub save_failures: u64,
    pub corrupt_blocks: u64,
    pub edits: u64,
    pub sweeps: u64,
    pub sweep_ns_sum: u64,
    /// `[<100μs, 100μs-1ms, 1-10ms, >10ms]`
    pub hist: [u64; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweeps_land_in_buckets() {
        let m = Metrics::new();
        let stats = UnloadStats {
            blocks_unloaded: 3,
            sectors_unloaded: 1,
            blocks_saved: 2,
            save_failures: 1,
        };
        m.record_sweep(&stats, Duration::from_micros(50));
        m.record_sweep(&UnloadStats::default(), Duration::from_millis(20));

        let s = m.snapshot();
        assert_eq!(s.blocks_unloaded, 3);
        assert_eq!(s.blocks_saved, 2);
        assert_eq!(s.save_failures, 1);
        assert_eq!(s.sweeps, 2);
        assert_eq!(s.hist, [1, 0, 0, 1]);
    }
}
