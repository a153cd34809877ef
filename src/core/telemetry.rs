//! Telemetry samples and the payload sent to the collector backend.
//!
//! A [`TelemetrySample`] is the statistical summary of one window. Before
//! upload it is mapped into a [`SensorSampleRequest`], which carries the
//! coarser values the ingest endpoint accepts (rounded heart rate, a step
//! estimate and an activity level).

use crate::core::stats::MetricSummary;
use crate::core::windowing::DrainedWindow;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Device type reported to the backend.
pub const DEVICE_TYPE: &str = "watch";

/// Summary of one aggregation window.
///
/// `*_std` fields are present only when at least two observations fed the
/// window; every field is absent when the window saw nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Window end, epoch seconds
    #[serde(rename = "ts")]
    pub window_end: i64,
    #[serde(rename = "hr_mean", skip_serializing_if = "Option::is_none", default)]
    pub heart_rate_mean: Option<f64>,
    #[serde(rename = "hr_std", skip_serializing_if = "Option::is_none", default)]
    pub heart_rate_std: Option<f64>,
    /// Mean accelerometer magnitude in g
    #[serde(rename = "acc_rms", skip_serializing_if = "Option::is_none", default)]
    pub accel_rms: Option<f64>,
    #[serde(rename = "acc_std", skip_serializing_if = "Option::is_none", default)]
    pub accel_std: Option<f64>,
}

impl TelemetrySample {
    /// Reduce a drained window.
    pub fn from_window(window: &DrainedWindow) -> Self {
        let hr = MetricSummary::of(&window.heart_rate);
        let acc = MetricSummary::of(&window.accelerometer);
        Self {
            window_end: window.end.timestamp(),
            heart_rate_mean: hr.mean,
            heart_rate_std: hr.std,
            accel_rms: acc.mean,
            accel_std: acc.std,
        }
    }

    /// True when the window had no observations for either metric.
    pub fn is_empty(&self) -> bool {
        self.heart_rate_mean.is_none() && self.accel_rms.is_none()
    }

    pub fn window_end_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.window_end, 0)
            .single()
            .unwrap_or_default()
    }

    /// Map into the ingest request for `session_id`.
    pub fn to_request(&self, session_id: &str) -> SensorSampleRequest {
        SensorSampleRequest {
            session_id: session_id.to_string(),
            heart_rate: self.heart_rate_mean.map(|m| m.round() as i64),
            steps: estimate_steps(self.accel_rms),
            activity_level: Some(ActivityLevel::classify(self.accel_rms, self.accel_std)),
            timestamp: iso_timestamp(self.window_end_utc()),
            device_type: DEVICE_TYPE.to_string(),
        }
    }
}

/// Coarse activity classification reported with each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Low,
    Medium,
    High,
}

impl ActivityLevel {
    /// Score = rms + 2·std. Missing accelerometer data counts as low.
    pub fn classify(accel_rms: Option<f64>, accel_std: Option<f64>) -> Self {
        let (Some(rms), Some(std)) = (accel_rms, accel_std) else {
            return ActivityLevel::Low;
        };
        let score = rms + std * 2.0;
        if score > 20.0 {
            ActivityLevel::High
        } else if score > 10.0 {
            ActivityLevel::Medium
        } else {
            ActivityLevel::Low
        }
    }
}

/// Threshold step estimate for one window.
fn estimate_steps(accel_rms: Option<f64>) -> Option<u32> {
    let rms = accel_rms?;
    let steps = if rms > 15.0 {
        (rms / 2.0).round().clamp(0.0, 10.0)
    } else if rms > 10.0 {
        (rms / 3.0).round().clamp(0.0, 5.0)
    } else if rms > 5.0 {
        1.0
    } else {
        0.0
    };
    Some(steps as u32)
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Body of `POST /sensor_sample_ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSampleRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heart_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub activity_level: Option<ActivityLevel>,
    /// Window end, ISO-8601 UTC
    pub timestamp: String,
    pub device_type: String,
}
