//! Error types for the card ledger
//!
//! Every failure an operation can produce maps to exactly one variant of
//! [`Error`]. Callers dispatch on [`Error::code`], which is the stable signal
//! a transport layer translates into its own status space.

use thiserror::Error;

use crate::models::cards::CardStatus;

/// Authentication and token failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no bearer token provided")]
    MissingToken,

    #[error("malformed token")]
    InvalidToken,

    #[error("token signature does not match")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token subject does not match the expected subject")]
    SubjectMismatch,

    #[error("invalid username or password")]
    InvalidCredentials,
}

/// PAN encryption and decryption failures.
///
/// Variants never carry plaintext or ciphertext fragments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("cannot encrypt an empty card number")]
    EmptyPlaintext,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),

    #[error("ciphertext authentication failed")]
    DecryptFailed,
}

/// Custom error type for card-ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("card is {current}, operation not permitted: {requested}")]
    InvalidState {
        current: CardStatus,
        requested: String,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable error kind exposed at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Validation,
    InvalidState,
    Forbidden,
    Conflict,
    Unauthenticated,
    Crypto,
    Internal,
}

impl Error {
    /// Stable code for this error kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Validation(_) => ErrorCode::Validation,
            Error::InvalidState { .. } => ErrorCode::InvalidState,
            Error::Forbidden(_) => ErrorCode::Forbidden,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::Auth(_) => ErrorCode::Unauthenticated,
            Error::Crypto(_) => ErrorCode::Crypto,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the caller may retry the same request and expect it to succeed.
    ///
    /// Only optimistic-lock clashes and transient contention qualify;
    /// validation and permission failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::Conflict | ErrorCode::Internal)
    }

    pub(crate) fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{entity} {id}"))
    }
}

/// Result type for card-ledger operations.
pub type Result<T> = std::result::Result<T, Error>;
