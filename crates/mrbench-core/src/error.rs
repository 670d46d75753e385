//! Error types for mrbench core.

use std::time::Duration;

/// Errors raised by the core.
///
/// `BinaryNotFound`, `Timeout` and `SubprocessFailure` never escape an adapter call: they are
/// the vocabulary used to describe a failed job and end up (redacted) in `jobs.error_message`.
/// `UnknownProvider` and `NoEligibleProvider` are pre-flight failures raised before a run row is
/// created. `StorageIntegrity` and `InvalidTransition` indicate programming errors.
#[derive(Debug, thiserror::Error)]
pub enum MrbenchError {
    /// Backend binary could not be located or spawned.
    #[error("binary not found for provider '{provider}'")]
    BinaryNotFound { provider: String },

    /// Child process exceeded its allotted duration and was killed.
    #[error("process timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    /// Child process exited non-zero without a timeout.
    #[error("subprocess exited with code {exit_code}: {detail}")]
    SubprocessFailure { exit_code: i32, detail: String },

    /// Routing filtered out every candidate.
    #[error("no eligible provider: {detail}")]
    NoEligibleProvider { detail: String },

    /// Requested provider has no registered adapter.
    #[error("unknown provider '{name}' (registered: {registered})")]
    UnknownProvider { name: String, registered: String },

    /// Referential write against a missing parent row.
    #[error("storage integrity violation: {0}")]
    StorageIntegrity(String),

    /// Status change that skips or reverses a run or job lifecycle.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Configuration or suite file is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl MrbenchError {
    /// True for conditions that must stop a run from being created at all.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::UnknownProvider { .. } | Self::NoEligibleProvider { .. }
        )
    }
}

pub type Result<T, E = MrbenchError> = std::result::Result<T, E>;
