//! Sensor collection module for the Synheart Focus Agent.
//!
//! The platform sensor stack is external: it pushes readings into a sink the
//! agent registers. This module defines that seam and a few sources that
//! don't need real hardware.

pub mod manual;
pub mod noop;
pub mod simulated;
pub mod types;

use std::sync::Arc;

// Re-export commonly used types
pub use manual::ManualSource;
pub use noop::NoopSource;
pub use simulated::{SimulatedProfile, SimulatedSource};
pub use types::{Metric, RawSensorEvent, SensorCapabilities, SensorReading, STANDARD_GRAVITY};

/// Callback invoked by a source for every reading. Called from the source's
/// own thread(s); implementations must not block.
pub type ReadingSink = Arc<dyn Fn(SensorReading) + Send + Sync>;

/// A push-based provider of sensor readings.
pub trait SensorSource: Send + Sync {
    /// Which metrics this device can deliver. Missing metrics are a degraded
    /// capability, not an error.
    fn capabilities(&self) -> SensorCapabilities;

    /// Begin delivering readings to `sink`.
    fn register(&self, sink: ReadingSink) -> Result<(), CollectorError>;

    /// Stop delivering readings. Once this returns no further calls to the
    /// previously registered sink are made.
    fn unregister(&self);
}

/// Errors that can occur during sensor registration.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRegistered,
    Unavailable(String),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRegistered => write!(f, "Sensor source is already registered"),
            CollectorError::Unavailable(e) => write!(f, "Sensor source unavailable: {e}"),
        }
    }
}

impl std::error::Error for CollectorError {}
