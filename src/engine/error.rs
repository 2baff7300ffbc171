use std::io;

use crate::model::{ReservationId, SlotKey};

#[derive(Debug)]
pub enum EngineError {
    /// Another reservation already holds this natural key.
    Conflict(SlotKey),
    NotFound(String),
    Validation(String),
    LimitExceeded(&'static str),
    UpstreamUnavailable(String),
    Unauthorized,
    Forbidden(String),
    Persistence(String),
}

impl EngineError {
    pub fn not_found(id: &ReservationId) -> Self {
        EngineError::NotFound(id.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short machine-readable kind for clients and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Validation(_) => "validation",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::UpstreamUnavailable(_) => "upstream_unavailable",
            EngineError::Unauthorized => "unauthorized",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Persistence(_) => "persistence",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Conflict(key) => write!(f, "slot already reserved: {key}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::UpstreamUnavailable(msg) => write!(f, "identity provider unavailable: {msg}"),
            EngineError::Unauthorized => write!(f, "invalid credentials"),
            EngineError::Forbidden(who) => write!(f, "identity not admitted: {who}"),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}
