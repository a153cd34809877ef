//! Error types surfaced by the session layer.

use crate::collector::CollectorError;
use crate::gateway::GatewayError;
use crate::session::{SessionState, StoreError};
use thiserror::Error;

/// Errors returned by [`SessionController`](crate::session::SessionController)
/// operations. Each carries a message fit to show the user.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No token (or no session id) to act with.
    #[error("not authenticated: pair the device with a code first")]
    Unauthenticated,

    /// The requested transition is not valid from the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    /// The pairing code was refused or could not be checked.
    #[error("code verification failed: {0}")]
    Verification(String),

    /// The backend did not open a session.
    #[error("failed to start session: {0}")]
    SessionStart(String),

    #[error("sensor error: {0}")]
    Sensor(#[from] CollectorError),

    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    pub(crate) fn verification(err: &GatewayError) -> Self {
        SessionError::Verification(err.message())
    }

    pub(crate) fn session_start(err: &GatewayError) -> Self {
        if err.is_auth() {
            return SessionError::Unauthenticated;
        }
        SessionError::SessionStart(err.message())
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
