//! Core functionality for the Synheart Focus Agent.
//!
//! This module contains:
//! - Numeric reductions over window observations
//! - The per-metric aggregation window
//! - The sensor aggregator and its window timer
//! - Telemetry samples and their upload payload

pub mod aggregator;
pub mod stats;
pub mod telemetry;
pub mod windowing;

// Re-export commonly used types
pub use aggregator::{AggregatorConfig, SensorAggregator, WINDOW_DURATION};
pub use stats::{mean, population_std, rms, MetricSummary, StatError};
pub use telemetry::{ActivityLevel, SensorSampleRequest, TelemetrySample, DEVICE_TYPE};
pub use windowing::{AggregationWindow, DrainedWindow};
