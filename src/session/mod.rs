//! Authentication and session lifecycle.
//!
//! [`SessionStore`] keeps the durable credentials and session id;
//! [`SessionController`] is the state machine that writes them and gates
//! the aggregator and the upload pipeline.

pub mod controller;
pub mod store;

// Re-export commonly used types
pub use controller::{ControllerSettings, PausePolicy, Session, SessionController, SessionState};
pub use store::{
    redact, AuthToken, JsonFileStore, KeyValueStore, MemoryStore, SessionSnapshot, SessionStore,
    StoreError,
};
