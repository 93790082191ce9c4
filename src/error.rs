//! Error types for the synchronization engine.
//!
//! Only conditions that stop a whole run, or that a caller must react to,
//! are errors. Per-item failures are recorded in the ledger instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to the external storage tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool binary could not be started at all.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A listing query returned a non-zero status.
    #[error("listing folder {folder_id} failed (exit {exit_code}): {message}")]
    Listing {
        folder_id: String,
        exit_code: i32,
        message: String,
    },

    /// The availability probe returned a non-zero status.
    #[error("`{command}` exited with {exit_code}: {message}")]
    Probe {
        command: String,
        exit_code: i32,
        message: String,
    },

    /// The run was interrupted while the command was in flight.
    #[error("interrupted while running `{command}`")]
    Interrupted { command: String },

    /// An I/O error while reading process output.
    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors that abort a synchronization run before or during traversal.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The external tool failed its availability probe.
    #[error("storage tool unavailable: {0}")]
    ToolUnavailable(#[source] ToolError),

    /// The run was interrupted before any item was processed.
    #[error("interrupted before synchronization started")]
    Interrupted,

    /// The source path does not exist.
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The local tree could not be enumerated.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
