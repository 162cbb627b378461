//! Error types for ipset manager operations.
//!
//! This module defines the error types used throughout the ipsetmgr crates.
//! All errors implement `std::error::Error` via `thiserror`.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for ipset manager operations.
pub type IpsetResult<T> = Result<T, IpsetError>;

/// Stage of a reconciliation command sequence.
///
/// Carried by [`IpsetError::SyncFailed`] so callers can tell how far a
/// multi-command sequence got before the executor reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// `create -exist` of the live set.
    CreateSet,
    /// Batch `restore` creating and populating the staging set.
    RestoreStaging,
    /// `swap` of the staging set with the live set.
    Swap,
    /// `destroy` of the staging set after the swap.
    DestroyStaging,
    /// Incremental `del` of one member.
    DelMember,
    /// Incremental `add -exist` of one member.
    AddMember,
    /// `destroy` of the live set.
    DestroySet,
}

impl SyncStage {
    /// Returns the stage name used in log and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::CreateSet => "create-set",
            SyncStage::RestoreStaging => "restore-staging",
            SyncStage::Swap => "swap",
            SyncStage::DestroyStaging => "destroy-staging",
            SyncStage::DelMember => "del-member",
            SyncStage::AddMember => "add-member",
            SyncStage::DestroySet => "destroy-set",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during ipset manager operations.
#[derive(Debug, Error)]
pub enum IpsetError {
    /// Failed to execute a command (spawn error).
    #[error("Failed to execute command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// A reconciliation command sequence failed part way through.
    #[error("Sync of set '{set}' failed at stage {stage}: {source}")]
    SyncFailed {
        /// The live set name.
        set: String,
        /// The stage whose command failed.
        stage: SyncStage,
        /// The executor error.
        #[source]
        source: Box<IpsetError>,
    },

    /// Caller error detected before any command was issued.
    #[error("Precondition violated: {message}")]
    PreconditionViolation {
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl IpsetError {
    /// Wraps an executor error with the set and stage it occurred in.
    pub fn sync_failed(set: impl Into<String>, stage: SyncStage, source: IpsetError) -> Self {
        Self::SyncFailed {
            set: set.into(),
            stage,
            source: Box::new(source),
        }
    }

    /// Creates a precondition violation error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the failed stage for sync errors.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            IpsetError::SyncFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            IpsetError::ShellExec { .. } | IpsetError::ShellCommandFailed { .. } => true,
            IpsetError::SyncFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
