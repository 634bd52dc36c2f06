//! Engine error taxonomy.
//!
//! Callers branch on kind. Validation and stock failures abort before any
//! side effect; authority failures are non-fatal to persistence and say so
//! in their own variants.

use rust_decimal::Decimal;
use thiserror::Error;

use facturo_authority::{AuthorityError, RejectionKind};
use facturo_core::DomainError;
use facturo_documents::{DocumentId, DocumentType};
use facturo_inventory::ProductId;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, incompatible tax condition, totals mismatch.
    /// Raised before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A line asked for more than is on hand. Raised before any mutation.
    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: Decimal,
        available: Decimal,
    },

    /// The bounded allocate-and-commit loop ran out of attempts.
    #[error("could not allocate a {doc_type:?} number after {attempts} attempts")]
    AllocationFailed {
        doc_type: DocumentType,
        attempts: usize,
    },

    /// Network, timeout, credentials or health trouble. The document (if
    /// any) persists unauthorized.
    #[error("tax authority unavailable: {0}")]
    AuthorityUnavailable(String),

    /// The authority refused the voucher. Terminal; the caller reacts on
    /// the kind (e.g. prompts for a different document class).
    #[error("authority rejected the document: {reason}")]
    AuthorityRejected {
        kind: RejectionKind,
        reason: String,
    },

    /// Attempt to cancel an already-cancelled document.
    #[error("document is already cancelled")]
    CancellationConflict,

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("storage failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => EngineError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            StoreError::DocumentNotFound(id) => EngineError::NotFound(id),
            StoreError::ProductNotFound(id) => {
                EngineError::Validation(format!("unknown product {id}"))
            }
            other => EngineError::Store(other),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<AuthorityError> for EngineError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Unavailable(msg) => EngineError::AuthorityUnavailable(msg),
            AuthorityError::CredentialsUnavailable(msg) => {
                EngineError::AuthorityUnavailable(format!("credentials: {msg}"))
            }
            AuthorityError::Rejected { kind, reason } => {
                EngineError::AuthorityRejected { kind, reason }
            }
            AuthorityError::Validation(msg) => EngineError::Validation(msg),
        }
    }
}
