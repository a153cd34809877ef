//! Sensor event types for the Synheart Focus Agent.
//!
//! Readings arrive from the device as either a scalar heart rate or a
//! 3-axis accelerometer vector. Vectors are reduced to a single magnitude
//! at ingestion time, so everything past the collector is a scalar event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::stats;

/// Standard gravity, used to express accelerometer magnitude in g.
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Metrics the aggregator reduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Beats per minute from the optical heart-rate sensor
    HeartRate,
    /// Accelerometer magnitude in g (post-RMS)
    AccelerometerMagnitude,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::HeartRate => write!(f, "heart rate"),
            Metric::AccelerometerMagnitude => write!(f, "accelerometer"),
        }
    }
}

/// A raw reading as delivered by the platform sensor callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SensorReading {
    HeartRate {
        bpm: f64,
        observed_at: DateTime<Utc>,
    },
    Accelerometer {
        x: f64,
        y: f64,
        z: f64,
        observed_at: DateTime<Utc>,
    },
}

impl SensorReading {
    /// Heart-rate reading observed now.
    pub fn heart_rate(bpm: f64) -> Self {
        SensorReading::HeartRate {
            bpm,
            observed_at: Utc::now(),
        }
    }

    /// Accelerometer reading (m/s² per axis) observed now.
    pub fn accelerometer(x: f64, y: f64, z: f64) -> Self {
        SensorReading::Accelerometer {
            x,
            y,
            z,
            observed_at: Utc::now(),
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            SensorReading::HeartRate { .. } => Metric::HeartRate,
            SensorReading::Accelerometer { .. } => Metric::AccelerometerMagnitude,
        }
    }

    /// Reduce the reading to a scalar event. Accelerometer vectors become
    /// their RMS magnitude divided by `normalizer`.
    pub fn into_event(self, normalizer: f64) -> RawSensorEvent {
        match self {
            SensorReading::HeartRate { bpm, observed_at } => RawSensorEvent {
                metric: Metric::HeartRate,
                value: bpm,
                observed_at,
            },
            SensorReading::Accelerometer {
                x,
                y,
                z,
                observed_at,
            } => RawSensorEvent {
                metric: Metric::AccelerometerMagnitude,
                value: stats::rms(x, y, z, normalizer),
                observed_at,
            },
        }
    }
}

/// A single scalar observation, consumed once by the aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSensorEvent {
    pub metric: Metric,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl RawSensorEvent {
    pub fn new(metric: Metric, value: f64) -> Self {
        Self {
            metric,
            value,
            observed_at: Utc::now(),
        }
    }
}

/// Which metrics the device can actually deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCapabilities {
    pub heart_rate: bool,
    pub accelerometer: bool,
}

impl SensorCapabilities {
    pub fn all() -> Self {
        Self {
            heart_rate: true,
            accelerometer: true,
        }
    }

    pub fn none() -> Self {
        Self {
            heart_rate: false,
            accelerometer: false,
        }
    }

    pub fn supports(&self, metric: Metric) -> bool {
        match metric {
            Metric::HeartRate => self.heart_rate,
            Metric::AccelerometerMagnitude => self.accelerometer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerometer_reduced_to_g() {
        let event = SensorReading::accelerometer(0.0, 0.0, STANDARD_GRAVITY).into_event(STANDARD_GRAVITY);
        assert_eq!(event.metric, Metric::AccelerometerMagnitude);
        assert!((event.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_heart_rate_passthrough() {
        let event = SensorReading::heart_rate(72.0).into_event(STANDARD_GRAVITY);
        assert_eq!(event.metric, Metric::HeartRate);
        assert_eq!(event.value, 72.0);
    }

    #[test]
    fn test_capabilities() {
        let caps = SensorCapabilities {
            heart_rate: false,
            accelerometer: true,
        };
        assert!(!caps.supports(Metric::HeartRate));
        assert!(caps.supports(Metric::AccelerometerMagnitude));
        assert!(!SensorCapabilities::none().supports(Metric::AccelerometerMagnitude));
    }
}
