use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the reconciliation core.
///
/// Only `SessionNotFound` and `ContentBlocked` are surfaced to callers as
/// structured failures. Everything else (degraded classification, partial
/// bundles, degraded consolidation) is folded into response metadata at the
/// call site and never escapes as an error.
#[derive(Error, Debug)]
pub enum ConcordError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Content blocked by safety rule '{rule}'")]
    ContentBlocked { rule: String },

    #[error("Session id conflict persisted after {attempts} attempts")]
    SessionIdExhausted { attempts: usize },

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}
