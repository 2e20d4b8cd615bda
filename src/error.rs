use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse error classes exposed to callers of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

#[derive(Error, Diagnostic, Debug)]
pub enum LedgerError {
    #[error("{entity} {id} not found")]
    #[diagnostic(code(ledger::not_found))]
    NotFound { entity: &'static str, id: u64 },

    #[error("Validation error: {0}")]
    #[diagnostic(code(ledger::validation))]
    ValidationError(String),

    #[error("Conflict: {0}")]
    #[diagnostic(code(ledger::conflict))]
    Conflict(String),

    #[error("{operation} exceeded its deadline of {deadline:?}")]
    #[diagnostic(code(ledger::deadline_exceeded))]
    DeadlineExceeded {
        operation: &'static str,
        deadline: Duration,
    },

    #[error("Internal error: {0}")]
    #[diagnostic(code(ledger::internal))]
    InternalError(Box<dyn std::error::Error + Send + Sync>),

    #[error("CSV error: {0}")]
    #[diagnostic(code(ledger::csv))]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(ledger::io))]
    IoError(#[from] std::io::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<u64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into().into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::ValidationError(_) | LedgerError::CsvError(_) => ErrorKind::Validation,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::DeadlineExceeded { .. }
            | LedgerError::InternalError(_)
            | LedgerError::IoError(_) => ErrorKind::Internal,
        }
    }

    /// Stable code for reporting, independent of the message text.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::ValidationError(_) => "VALIDATION",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            LedgerError::InternalError(_) => "INTERNAL",
            LedgerError::CsvError(_) => "MALFORMED_INPUT",
            LedgerError::IoError(_) => "IO",
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}
