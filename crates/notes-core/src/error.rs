use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds surfaced to callers of the rename transaction.
///
/// `StaleContent` means a participating file was edited between plan and
/// validate; retrying the rename may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidPath,
    PermissionDenied,
    PlanFailed,
    PrepareFailed,
    VerifyFailed,
    StaleContent,
    CommitFailed,
    RollbackFailed,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::PlanFailed => "plan_failed",
            ErrorKind::PrepareFailed => "prepare_failed",
            ErrorKind::VerifyFailed => "verify_failed",
            ErrorKind::StaleContent => "stale_content",
            ErrorKind::CommitFailed => "commit_failed",
            ErrorKind::RollbackFailed => "rollback_failed",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A user supplied path that cannot be mapped into the vault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultPathError {
    #[error("path is empty")]
    Empty,
    #[error("path must be relative to the vault root: {0}")]
    Absolute(String),
    #[error("path escapes the vault root: {0}")]
    EscapesVault(String),
    #[error("path must name a markdown document (.md): {0}")]
    NotMarkdown(String),
}

#[derive(Debug, Error)]
pub enum LinkScanError {
    #[error("link target must not be empty")]
    InvalidTarget,

    #[error("failed to enumerate documents under {path}: {source}")]
    VaultAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LinkRewriteError {
    #[error("both the old and the new note name are required")]
    MissingArguments,

    #[error("commit requires the content map produced by render")]
    MissingCommitInput,

    #[error(transparent)]
    Scan(#[from] LinkScanError),
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("invalid correlation id (expected UUID v4): {0}")]
    InvalidCorrelationId(String),

    #[error("write-ahead log entry not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported write-ahead log schema version {found} (expected {expected})")]
    UnsupportedSchema { found: String, expected: String },

    #[error("could not determine a configuration directory for the write-ahead log")]
    NoConfigDir,

    #[error("write-ahead log I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed write-ahead log entry {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of one phase of the rename transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] VaultPathError),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("plan failed: {0}")]
    PlanFailed(String),

    #[error("prepare failed: {0}")]
    PrepareFailed(String),

    #[error("validation failed: {0}")]
    VerifyFailed(String),

    #[error("content changed since the rename was planned: {}", .paths.join(", "))]
    StaleContent { paths: Vec<String> },

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    #[error("{0}")]
    Unknown(String),
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::NotFound(_) => ErrorKind::NotFound,
            TransactionError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            TransactionError::InvalidPath(_) => ErrorKind::InvalidPath,
            TransactionError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            TransactionError::PlanFailed(_) => ErrorKind::PlanFailed,
            TransactionError::PrepareFailed(_) => ErrorKind::PrepareFailed,
            TransactionError::VerifyFailed(_) => ErrorKind::VerifyFailed,
            TransactionError::StaleContent { .. } => ErrorKind::StaleContent,
            TransactionError::CommitFailed(_) => ErrorKind::CommitFailed,
            TransactionError::RollbackFailed(_) => ErrorKind::RollbackFailed,
            TransactionError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Map an I/O failure on `path` to a taxonomy kind, falling back to `otherwise`
    /// for errors with no dedicated kind.
    pub fn from_io(
        path: &str,
        err: &io::Error,
        otherwise: impl FnOnce(String) -> TransactionError,
    ) -> TransactionError {
        match err.kind() {
            io::ErrorKind::NotFound => TransactionError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => TransactionError::AlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => {
                TransactionError::PermissionDenied(format!("{}: {}", path, err))
            }
            _ => otherwise(format!("{}: {}", path, err)),
        }
    }
}
