//! Summary statistics over a ring snapshot.

use serde::Serialize;

use crate::engine::ring::{Sample, SampleState};

/// Aggregate view of a window of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub ok: usize,
    pub lost: usize,
    pub late: usize,
    /// Over OK samples only.
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub last: Option<Sample>,
}

impl WindowStats {
    /// Summarize `samples` (expected oldest-first, as returned by a snapshot).
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut stats = Self {
            last: samples.last().copied(),
            ..Self::default()
        };
        let mut sum = 0.0;

        for sample in samples {
            match sample.state {
                SampleState::Ok => {
                    let ms = sample.latency_ms;
                    stats.ok += 1;
                    sum += ms;
                    stats.min_ms = Some(stats.min_ms.map_or(ms, |m| m.min(ms)));
                    stats.max_ms = Some(stats.max_ms.map_or(ms, |m| m.max(ms)));
                }
                SampleState::Loss => stats.lost += 1,
                SampleState::Late => stats.late += 1,
            }
        }

        if stats.ok > 0 {
            stats.avg_ms = Some(sum / stats.ok as f64);
        }
        stats
    }

    /// Number of samples considered.
    pub fn total(&self) -> usize {
        self.ok + self.lost + self.late
    }

    /// Share of LOSS samples, in percent.
    ///
    /// A LOSS later converted to LATE is no longer counted as lost.
    pub fn loss_percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.lost as f64 / total as f64 * 100.0
        }
    }
}
