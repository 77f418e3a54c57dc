use std::io;

/// Errors produced while validating, dispatching, or supervising a run.
///
/// `Validation` and `Conflict` are rejected synchronously, before any
/// child process exists. `Spawn`, `Timeout`, and `Cancelled` terminate a
/// run but the caller still receives a best-effort
/// [`RunResult`](crate::result::RunResult); they appear here so the
/// failure kind has a single canonical rendering.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A request field is missing or invalid. Raised before a run handle
    /// is created.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The run identifier is already registered (pending, running, or
    /// retained terminal).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No run with the given identifier is known to the registry.
    #[error("Run not found: {0}")]
    NotFound(String),

    /// The child process could not be created (e.g. executable missing).
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that could not be started.
        program: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The run exceeded its wall-clock timeout and was terminated.
    #[error("Run timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed wall-clock time before termination.
        elapsed_ms: u64,
    },

    /// The run was cancelled by an external request.
    #[error("Run was cancelled")]
    Cancelled,

    /// An I/O error outside the spawn path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RunError {
    /// Stable machine-readable code, shared by every channel's error
    /// rendering.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::Validation(_) => "VALIDATION_ERROR",
            RunError::Conflict(_) => "CONFLICT",
            RunError::NotFound(_) => "NOT_FOUND",
            RunError::Spawn { .. } => "SPAWN_ERROR",
            RunError::Timeout { .. } => "TIMEOUT",
            RunError::Cancelled => "CANCELLED",
            RunError::Io(_) => "INTERNAL_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
