//! Error taxonomy and the tagged outcome returned by public services

use serde::{Deserialize, Serialize};

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised inside the pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Toolchain unavailable: {component} ({reason})")]
    ToolchainUnavailable { component: String, reason: String },

    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Transaction {hash} failed: {reason}")]
    TransactionFailed { hash: String, reason: String },

    #[error("Transaction {hash} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { hash: String, attempts: u32 },

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] eyre::Report),
}

impl Error {
    /// Stable classification used in outcomes and job status rows
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::ValidationError,
            Error::InvalidSource(_) => ErrorKind::InvalidSource,
            Error::ToolchainUnavailable { .. } => ErrorKind::ToolchainUnavailable,
            Error::BuildFailure(_) => ErrorKind::BuildFailure,
            Error::ArtifactNotFound(_) => ErrorKind::ArtifactNotFound,
            Error::Network(_) => ErrorKind::NetworkError,
            Error::Reverted(_) => ErrorKind::ExecutionReverted,
            Error::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            Error::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::Cache(_) => ErrorKind::CacheFailure,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn network(message: impl std::fmt::Display) -> Self {
        Error::Network(message.to_string())
    }
}

/// Serializable error classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    InvalidSource,
    ToolchainUnavailable,
    BuildFailure,
    ArtifactNotFound,
    NetworkError,
    ExecutionReverted,
    TransactionFailed,
    ConfirmationTimeout,
    ParseError,
    CacheFailure,
    Internal,
}

/// Result of a public service operation.
///
/// Services never return `Err` across their boundary; failures are reported
/// as a `Failure` value with a human-readable detail string, and degraded
/// steps attach warnings to an otherwise successful result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum Outcome<T> {
    #[serde(rename = "success")]
    Success { data: T, warnings: Vec<String> },

    #[serde(rename = "failure")]
    Failure { error: ErrorKind, details: String },
}

impl<T> Outcome<T> {
    pub fn success(data: T) -> Self {
        Outcome::Success {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(data: T, warnings: Vec<String>) -> Self {
        Outcome::Success { data, warnings }
    }

    pub fn failure(error: &Error) -> Self {
        Outcome::Failure {
            error: error.kind(),
            details: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Success { data, .. } => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Outcome::Success { warnings, .. } => warnings,
            Outcome::Failure { .. } => &[],
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(*error),
        }
    }

    /// Converts back into a `Result`, used where a failure must be re-raised
    pub fn into_result(self) -> std::result::Result<T, OutcomeError> {
        match self {
            Outcome::Success { data, .. } => Ok(data),
            Outcome::Failure { error, details } => Err(OutcomeError {
                kind: error,
                details,
            }),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Outcome::success(data),
            Err(e) => Outcome::failure(&e),
        }
    }
}

/// A failed outcome re-raised as an error
#[derive(Debug, Clone, thiserror::Error)]
#[error("{details}")]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub details: String,
}
