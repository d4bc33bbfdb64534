//! Bridge error type

use thiserror::Error;

use crate::core::{Handle, LifecycleStatus};
use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("session capacity exhausted ({0} sessions)")]
    ResourceExhausted(usize),

    #[error("unknown session handle {0}")]
    UnknownHandle(Handle),

    #[error("cannot {operation} session {handle} while {state}")]
    InvalidState {
        handle: Handle,
        state: LifecycleStatus,
        operation: &'static str,
    },

    #[error("unsupported connection profile kind: {0}")]
    UnsupportedProfileKind(String),

    #[error("session {0} has no connection profile")]
    MissingProfile(Handle),

    #[error("failed to start application context: {0}")]
    ContextStart(#[source] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
