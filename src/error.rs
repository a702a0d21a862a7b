//! Error taxonomy for the push and boot paths.
//!
//! Only a subset of these are fatal. Per-file and per-record failures are
//! carried inside reports so that sibling items keep processing; the fatal
//! classes map to a process exit code through [`SyncError::exit_code`].

use thiserror::Error;

/// Errors raised by secret synchronisation and the boot sequence.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required identity or setting is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The polled dependency never accepted a connection.
    #[error("dependency {target} unavailable after {attempts} attempt(s)")]
    DependencyUnavailable {
        /// `host:port` that was polled
        target: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// A list/get/create/update call against the store failed.
    #[error("{operation} failed for '{name}': {message}")]
    RemoteOperation {
        /// Store operation, e.g. `create`
        operation: &'static str,
        /// Secret record name (or namespace prefix for listings)
        name: String,
        /// Underlying client message
        message: String,
    },

    /// A fetched record is not a flat string-to-string JSON object.
    #[error("payload of '{name}' is not a flat JSON object of strings: {message}")]
    RemotePayloadParse {
        /// Secret record name
        name: String,
        /// Parser message
        message: String,
    },

    /// The store could not be reached at all.
    #[error("secret store unreachable: {0}")]
    StoreUnreachable(String),

    /// An external boot stage exited unsuccessfully.
    #[error("stage {stage} failed with exit status {code}")]
    StageFailed {
        /// Stage name
        stage: &'static str,
        /// Exit status of the tool
        code: i32,
    },
}

impl SyncError {
    /// Process exit code for this error when it ends the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::DependencyUnavailable { .. } => 3,
            Self::StoreUnreachable(_) => 4,
            Self::StageFailed { code, .. } => *code,
            Self::RemoteOperation { .. } | Self::RemotePayloadParse { .. } => 1,
        }
    }
}

/// Exit code for an arbitrary error chain, honouring [`SyncError`] when present.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SyncError>())
        .map(SyncError::exit_code)
        .unwrap_or(1)
}
