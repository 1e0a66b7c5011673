//! Series buffer: the ordered sample history of the current run.
//!
//! The orchestrator is the only writer. Readers get a [`SeriesSnapshot`], an
//! immutable view that stays valid while the buffer keeps growing. Appending while a
//! snapshot is held copies the history once (copy-on-write), so a reader never sees
//! a half-updated series.
//!
//! Growth is unbounded: the operator decides how long a run lasts.

use std::sync::Arc;

use crate::acquisition::sample::Sample;

/// Append-only sample history, reset at each run start.
#[derive(Debug, Default)]
pub struct SeriesBuffer {
    samples: Arc<Vec<Sample>>,
}

impl SeriesBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all samples.
    pub fn reset(&mut self) {
        self.samples = Arc::new(Vec::new());
    }

    /// Append one sample.
    pub fn append(&mut self, sample: Sample) {
        Arc::make_mut(&mut self.samples).push(sample);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Immutable view of the current history.
    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            samples: Arc::clone(&self.samples),
        }
    }
}

/// Read-only view of a [`SeriesBuffer`] at one point in time.
#[derive(Debug, Clone, Default)]
pub struct SeriesSnapshot {
    samples: Arc<Vec<Sample>>,
}

impl SeriesSnapshot {
    /// All samples, oldest first.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample timestamps (seconds since run start).
    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    /// `(time, value)` points of one channel, skipping gaps.
    pub fn channel_points(&self, channel: &str) -> Vec<(f64, f64)> {
        self.samples
            .iter()
            .filter_map(|s| s.channel_value(channel).map(|v| (s.timestamp, v)))
            .collect()
    }

    /// `(time, value)` points of the scan target at `index`.
    pub fn scan_points(&self, index: usize) -> Vec<(f64, f64)> {
        self.samples
            .iter()
            .filter_map(|s| s.scan_values.get(index).map(|v| (s.timestamp, *v)))
            .collect()
    }
}
