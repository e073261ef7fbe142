//! Latency statistics for the report.

use std::time::Duration;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    /// Nearest-rank 95th percentile.
    pub p95_ms: f64,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl LatencyStats {
    /// `None` when there are no samples.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        let rank = ((count as f64) * 0.95).ceil() as usize;
        let p95 = sorted[rank.clamp(1, count) - 1];

        Some(Self {
            count,
            min_ms: ms(sorted[0]),
            max_ms: ms(sorted[count - 1]),
            mean_ms: ms(total) / count as f64,
            p95_ms: ms(p95),
        })
    }
}
