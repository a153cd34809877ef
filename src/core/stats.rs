//! Numeric reductions over a window's observations.
//!
//! All functions are pure and take an immutable snapshot, so they are safe
//! to call from any thread. An undefined statistic is reported as
//! [`StatError::Undefined`]; callers turn that into an absent field.

use statrs::statistics::Statistics;
use thiserror::Error;

/// Why a statistic could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatError {
    #[error("statistic undefined for {observations} observation(s)")]
    Undefined { observations: usize },
}

/// Arithmetic mean. Undefined for an empty sequence.
pub fn mean(values: &[f64]) -> Result<f64, StatError> {
    if values.is_empty() {
        return Err(StatError::Undefined { observations: 0 });
    }
    Ok(values.iter().mean())
}

/// Population standard deviation: square root of the mean squared deviation
/// from the mean. Undefined for fewer than two observations.
pub fn population_std(values: &[f64]) -> Result<f64, StatError> {
    if values.len() < 2 {
        return Err(StatError::Undefined {
            observations: values.len(),
        });
    }
    Ok(values.iter().population_std_dev())
}

/// Magnitude of a 3-axis vector divided by `normalizer`.
pub fn rms(x: f64, y: f64, z: f64, normalizer: f64) -> f64 {
    (x * x + y * y + z * z).sqrt() / normalizer
}

/// Summary of one metric's observations within a window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricSummary {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub count: usize,
}

impl MetricSummary {
    pub fn of(values: &[f64]) -> Self {
        Self {
            mean: mean(values).ok(),
            std: population_std(values).ok(),
            count: values.len(),
        }
    }
}
