//! Exit codes and structured error output.

use serde::Serialize;

use crate::cache::CacheError;
use crate::detect::DetectError;

/// Process exit codes.
///
/// - 0: Success
/// - 1: General error (store unavailable, bad arguments, unexpected failure)
/// - 2: Partial success (scan finished, but some files could not be read)
/// - 130: Interrupted by Ctrl+C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An error stopped the command.
    GeneralError = 1,
    /// Completed, with per-file errors in the report.
    PartialSuccess = 2,
    /// Interrupted by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "FS000",
            Self::GeneralError => "FS001",
            Self::PartialSuccess => "FS002",
            Self::Interrupted => "FS130",
        }
    }

    /// Pick the exit code for an error that escaped `run_app`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        if err
            .downcast_ref::<DetectError>()
            .is_some_and(|e| matches!(e, DetectError::Interrupted))
        {
            Self::Interrupted
        } else {
            Self::GeneralError
        }
    }
}

/// Structured error information for `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "FS001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Coarse error category, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            kind: error_kind(err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

fn error_kind(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<CacheError>() {
            return Some(match e {
                CacheError::StoreUnavailable { .. } => "store_unavailable",
                CacheError::Migration(_) => "migration",
                CacheError::RecordCorrupt { .. } | CacheError::KeyCorrupt { .. } => {
                    "record_corrupt"
                }
                CacheError::Rejected { .. } => "rejected",
                CacheError::Sqlite(_) | CacheError::LockPoisoned => "store",
            });
        }
        cause.downcast_ref::<DetectError>().map(|e| match e {
            DetectError::PathNotFound(_) | DetectError::NotADirectory(_) => "invalid_root",
            DetectError::Interrupted => "interrupted",
            DetectError::Cache(_) => "store",
            DetectError::ThreadPool(_) => "thread_pool",
        })
    })
}
