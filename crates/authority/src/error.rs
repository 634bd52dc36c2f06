//! Error model for the authority boundary.
//!
//! Callers branch on kind, never on message text: credential and
//! service-health failures collapse into `Unavailable` (the sale is not
//! lost), while authority-side business rejections are terminal and carry
//! their own kind.

use thiserror::Error;

use facturo_core::DomainError;

use crate::credentials::CredentialError;

/// Why the authority refused a voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The buyer's condition demands a different document class.
    WrongDocumentClass,
    /// Any other business-rule rejection.
    Other,
}

/// Failure at the authority boundary.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Network, timeout, health-check or authentication trouble. Not fatal
    /// to document creation; re-authorization can be retried later.
    #[error("tax authority unavailable: {0}")]
    Unavailable(String),

    /// No usable signing credentials for the current environment.
    #[error("signing credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// The authority accepted the call but refused the voucher. Terminal;
    /// never retried automatically.
    #[error("authority rejected the voucher: {reason}")]
    Rejected { kind: RejectionKind, reason: String },

    /// The request could not be assembled (receiver resolution, totals
    /// mismatch, unsupported rate).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<CredentialError> for AuthorityError {
    fn from(err: CredentialError) -> Self {
        AuthorityError::CredentialsUnavailable(err.to_string())
    }
}

impl From<DomainError> for AuthorityError {
    fn from(err: DomainError) -> Self {
        AuthorityError::Validation(err.to_string())
    }
}

/// Error surface of the injected RPC transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Connection-level failure; the call may succeed later.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The access token was missing, invalid or expired.
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// The authority processed the call and said no.
    #[error("rejected with code {code}: {message}")]
    Rejected { code: u32, message: String },
}

/// Observation code the authority reports when the buyer's condition
/// demands a different document class.
pub const WRONG_DOCUMENT_CLASS_CODE: u32 = 10048;

impl RpcError {
    /// Classify a rejection code into the caller-facing kind.
    pub fn rejection_kind(code: u32) -> RejectionKind {
        if code == WRONG_DOCUMENT_CLASS_CODE {
            RejectionKind::WrongDocumentClass
        } else {
            RejectionKind::Other
        }
    }
}
