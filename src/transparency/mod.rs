//! Transparency module for the Synheart Focus Agent.
//!
//! Tracks what the agent read from the sensors and what became of every
//! sample it tried to upload.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTelemetryLog, TelemetryLog,
    TelemetryStats,
};
