use std::num::ParseIntError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse classification callers branch on. Absence looks the same no matter
/// which backend reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Decode,
    Backend,
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secret not found: {secret_id}")]
    NotFound { secret_id: String },

    /// Blob absent from the object store. Reported as `ErrorKind::NotFound`
    /// but keeps the backend's cause for diagnostics.
    #[error("encrypted file {key} not found: {source}")]
    ObjectMissing {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("failed to decode field '{field}' of secret {secret_id}: {source}")]
    Decode {
        secret_id: String,
        field: &'static str,
        #[source]
        source: FieldError,
    },

    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded { operation: &'static str },
}

/// Why a single stored field could not be turned back into its value.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("invalid encoded bytes: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("field is missing")]
    Missing,

    #[error("expected {expected} value")]
    WrongType { expected: &'static str },

    #[error("invalid number: {0}")]
    Number(#[from] ParseIntError),
}

impl StoreError {
    pub fn not_found(secret_id: impl Into<String>) -> Self {
        Self::NotFound { secret_id: secret_id.into() }
    }

    pub fn decode(secret_id: impl Into<String>, field: &'static str, source: impl Into<FieldError>) -> Self {
        Self::Decode {
            secret_id: secret_id.into(),
            field,
            source: source.into(),
        }
    }

    pub fn backend(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::ObjectMissing { .. } => ErrorKind::NotFound,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
