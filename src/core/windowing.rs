//! Per-metric buffers for the in-progress aggregation window.
//!
//! A window collects scalar observations between two drains. Draining swaps
//! the buffers for empty ones, so each observation lands in exactly one
//! window. A closed window rejects observations; closing discards whatever
//! was buffered. The publish flag lives here too, so the decision to publish
//! a drained window is made under the same lock as the drain.

use crate::collector::types::{Metric, RawSensorEvent};
use chrono::{DateTime, Utc};

/// The in-progress window. Owned by the aggregator and only touched under
/// its lock.
#[derive(Debug)]
pub struct AggregationWindow {
    open: bool,
    publishing: bool,
    opened_at: DateTime<Utc>,
    heart_rate: Vec<f64>,
    accelerometer: Vec<f64>,
}

/// Observations taken out of a window by a drain.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub heart_rate: Vec<f64>,
    pub accelerometer: Vec<f64>,
}

impl DrainedWindow {
    /// Total number of observations across both metrics.
    pub fn event_count(&self) -> usize {
        self.heart_rate.len() + self.accelerometer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }
}

impl AggregationWindow {
    /// Create a closed, empty window that does not publish.
    pub fn new() -> Self {
        Self {
            open: false,
            publishing: false,
            opened_at: Utc::now(),
            heart_rate: Vec::new(),
            accelerometer: Vec::new(),
        }
    }

    /// Start accepting observations.
    pub fn open(&mut self, now: DateTime<Utc>) {
        self.heart_rate.clear();
        self.accelerometer.clear();
        self.opened_at = now;
        self.open = true;
    }

    /// Stop accepting observations and discard the partial window.
    pub fn close(&mut self) {
        self.open = false;
        self.heart_rate.clear();
        self.accelerometer.clear();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether drained windows should be published. Survives open/close.
    pub fn set_publishing(&mut self, publishing: bool) {
        self.publishing = publishing;
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    /// Append an observation. Returns false if the window is closed.
    pub fn push(&mut self, event: &RawSensorEvent) -> bool {
        if !self.open {
            return false;
        }
        match event.metric {
            Metric::HeartRate => self.heart_rate.push(event.value),
            Metric::AccelerometerMagnitude => self.accelerometer.push(event.value),
        }
        true
    }

    /// Swap the buffers out and start the next window at `now`.
    pub fn drain(&mut self, now: DateTime<Utc>) -> DrainedWindow {
        let start = std::mem::replace(&mut self.opened_at, now);
        DrainedWindow {
            start,
            end: now,
            heart_rate: std::mem::take(&mut self.heart_rate),
            accelerometer: std::mem::take(&mut self.accelerometer),
        }
    }

    /// Number of observations buffered for `metric`.
    pub fn len(&self, metric: Metric) -> usize {
        match metric {
            Metric::HeartRate => self.heart_rate.len(),
            Metric::AccelerometerMagnitude => self.accelerometer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_empty() && self.accelerometer.is_empty()
    }
}

impl Default for AggregationWindow {
    fn default() -> Self {
        Self::new()
    }
}
