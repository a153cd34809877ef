//! Synheart Focus Agent - windowed wearable telemetry with resilient upload.
//!
//! This library samples heart rate and motion on a wearable, reduces the raw
//! stream into one statistical summary every three seconds, and delivers
//! those summaries to a remote collector under an authenticated session.
//!
//! # Privacy Guarantees
//!
//! - **Summaries only**: raw readings never leave the device, only per-window statistics
//! - **No raw storage**: readings are discarded once their window is reduced
//! - **Session-scoped**: nothing is uploaded unless a paired session is active
//! - **Transparency**: every reading, window and upload outcome is counted
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Synheart Focus Agent                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐            │
//! │  │   Sensor    │──▶│ Aggregator  │──▶│   Session    │            │
//! │  │   Source    │   │ (3s window) │   │  Controller  │            │
//! │  └─────────────┘   └─────────────┘   └──────────────┘            │
//! │                           │              │       │               │
//! │                           ▼              ▼       ▼               │
//! │                    ┌─────────────┐  ┌────────┐ ┌──────────────┐  │
//! │                    │Transparency │  │Session │ │   Upload     │──┼──▶ collector
//! │                    │    Log      │  │ Store  │ │  Pipeline    │  │
//! │                    └─────────────┘  └────────┘ └──────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use synheart_focus_agent::{
//!     collector::SimulatedSource,
//!     core::{AggregatorConfig, SensorAggregator},
//!     gateway::{GatewayClient, GatewayConfig},
//!     session::{ControllerSettings, SessionController, SessionStore},
//!     transparency::create_shared_log,
//!     upload::{NetworkStatus, UploadConfig, UploadPipeline},
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let log = create_shared_log();
//! let api = Arc::new(GatewayClient::new(GatewayConfig::default())?);
//! let aggregator = Arc::new(SensorAggregator::new(
//!     AggregatorConfig::default(),
//!     Arc::new(SimulatedSource::default()),
//!     log.clone(),
//! ));
//! let pipeline = UploadPipeline::new(api.clone(), &UploadConfig::default(), NetworkStatus::default(), log);
//! pipeline.start();
//!
//! let controller = SessionController::new(
//!     api,
//!     Arc::new(SessionStore::in_memory()),
//!     aggregator,
//!     pipeline,
//!     ControllerSettings::new("watch-demo-0001"),
//! );
//! controller.submit_pairing_code("123456").await?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod session;
pub mod transparency;
pub mod upload;

// Re-export key types at crate root for convenience
pub use collector::{CollectorError, RawSensorEvent, SensorReading, SensorSource};
pub use config::Config;
pub use crate::core::{SensorAggregator, TelemetrySample};
pub use error::SessionError;
pub use gateway::{CollectorApi, GatewayClient, GatewayConfig, GatewayError};
pub use session::{AuthToken, PausePolicy, Session, SessionController, SessionState, SessionStore};
pub use transparency::{SharedTelemetryLog, TelemetryLog, TelemetryStats};
pub use upload::{NetworkStatus, RetryPolicy, UploadOutcome, UploadPipeline, UploadTask};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║            SYNHEART FOCUS AGENT - PRIVACY DECLARATION            ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent summarizes wearable sensor data during focus         ║
║  sessions you start.                                             ║
║                                                                  ║
║  ✓ WHAT LEAVES THE DEVICE (once every 3 seconds):                ║
║    • Average heart rate for the window (whole bpm)               ║
║    • Estimated step count for the window                         ║
║    • Activity level (low / medium / high)                        ║
║    • The window's timestamp and your session id                  ║
║                                                                  ║
║  ✗ WHAT NEVER LEAVES THE DEVICE:                                 ║
║    • Individual heart rate readings                              ║
║    • Raw accelerometer axes or motion traces                     ║
║    • Location, contacts or any other personal data               ║
║    • Anything at all while no session is active                  ║
║                                                                  ║
║  Raw readings are discarded as soon as their window is reduced.  ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    synheart-focus status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
