//! Live web dashboard for the map.
//!
//! Design contract with the map thread:
//!   • Metrics: relaxed atomics, never block.
//!   • Map stats: published through a `tokio::sync::watch` channel once per
//!     tick. A slow browser only ever sees the latest value.
//!   • The web server runs on its own tokio tasks and never touches the map.

pub mod metrics;
pub mod server;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

pub use metrics::{Metrics, MetricsSnapshot};

/// Shape of the map at the end of a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapStats {
    pub seed: u64,
    pub blocks: usize,
    pub sectors: usize,
    pub dummies: usize,
    /// Blocks that would be written by the next save.
    pub modified: usize,
    pub liquid_queue: usize,
}

/// Shared between the map loop and the web server via `Arc`.
pub struct DashboardState {
    pub metrics: Arc<Metrics>,
    stats_tx: watch::Sender<MapStats>,
}

impl DashboardState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        let (stats_tx, _) = watch::channel(MapStats::default());
        Self { metrics, stats_tx }
    }

    /// Replaces the published stats. Never blocks.
    pub fn publish_stats(&self, stats: MapStats) {
        self.stats_tx.send_replace(stats);
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<MapStats> {
        self.stats_tx.subscribe()
    }

    pub fn latest_stats(&self) -> MapStats {
        self.stats_tx.borrow().clone()
    }

    /// Everything the dashboard shows, as one JSON value.
    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::json!({
            "metrics": self.metrics.snapshot(),
            "map": self.latest_stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_the_latest_stats() {
        let state = DashboardState::new(Arc::new(Metrics::new()));
        let mut rx = state.subscribe_stats();
        state.publish_stats(MapStats {
            blocks: 1,
            ..MapStats::default()
        });
        state.publish_stats(MapStats {
            blocks: 5,
            ..MapStats::default()
        });
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().blocks, 5);
        assert_eq!(state.snapshot_json()["map"]["blocks"], 5);
    }
}
