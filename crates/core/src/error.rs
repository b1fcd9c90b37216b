use serde::{Deserialize, Serialize};

use crate::{Operation, Role};

/// Coarse classification every adapter error falls into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    CapabilityUnsupported,
    Transient,
    Fatal,
}

/// Errors returned by storage adapters and by the dual-write controller.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum StorageError {
    #[error("not_found: {name}")]
    NotFound { name: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    /// The adapter itself does not implement the operation.
    #[error("unsupported: {operation}")]
    Unsupported { operation: Operation },
    /// An adapter required by the active mode lacks the operation.
    #[error("capability missing: {role} storage cannot {operation}")]
    CapabilityMissing { operation: Operation, role: Role },
    /// A collection deletion stopped after removing `deleted` objects.
    #[error("partial deletion after {deleted} objects: {cause}")]
    PartialDeletion { deleted: usize, cause: Box<StorageError> },
    #[error("cancelled")]
    Cancelled,
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn not_found(name: impl Into<String>) -> Self { StorageError::NotFound { name: name.into() } }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::Conflict(_) => ErrorKind::Conflict,
            StorageError::Invalid(_) => ErrorKind::InvalidInput,
            StorageError::Unsupported { .. } | StorageError::CapabilityMissing { .. } => {
                ErrorKind::CapabilityUnsupported
            }
            StorageError::PartialDeletion { cause, .. } => cause.kind(),
            StorageError::Cancelled | StorageError::Transient(_) => ErrorKind::Transient,
            StorageError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Objects a collection deletion removed before this error stopped it.
    pub fn deleted_before_failure(&self) -> usize {
        match self {
            StorageError::PartialDeletion { deleted, .. } => *deleted,
            _ => 0,
        }
    }

    pub fn is_not_found(&self) -> bool { self.kind() == ErrorKind::NotFound }

    pub fn is_conflict(&self) -> bool { self.kind() == ErrorKind::Conflict }
}
