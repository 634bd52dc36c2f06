//! The persistence boundary.
//!
//! One trait at use-case granularity so every implementation can make the
//! issuance commit (stock check → document insert → stock movement) a
//! single serializable unit. That commit is the only place the engine
//! needs true isolation; everything else is plain reads and stamped
//! updates.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use facturo_documents::{AuthorizationStamp, Document, DocumentId, DocumentType};
use facturo_inventory::{ProductId, StockItem};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemorySalesStore;
pub use postgres::PostgresSalesStore;

/// Sales store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A line asked for more than is on hand; nothing was mutated.
    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: Decimal,
        available: Decimal,
    },

    /// The (type-family, number) uniqueness constraint fired. The caller
    /// reallocates and retries.
    #[error("document number '{number}' already exists")]
    DuplicateNumber { number: String },

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// Illegal state transition or a lost race (e.g. serialization
    /// failure, stock consumed since commit).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

/// Persistence capability for documents, stock and voucher bookkeeping.
#[async_trait]
pub trait SalesStore: Send + Sync {
    /// Insert or replace a stock item (seeding; stock CRUD lives outside
    /// the engine).
    async fn put_stock_item(&self, item: StockItem) -> Result<(), StoreError>;

    async fn stock_on_hand(&self, product_id: ProductId) -> Result<Decimal, StoreError>;

    /// Highest already-issued sequence integer for a type family.
    async fn highest_number(&self, doc_type: DocumentType) -> Result<Option<u64>, StoreError>;

    async fn number_exists(
        &self,
        doc_type: DocumentType,
        number: &str,
    ) -> Result<bool, StoreError>;

    /// Atomically: verify stock, insert the document and its lines, apply
    /// the type's stock effect. All-or-nothing; duplicate numbers fail
    /// with [`StoreError::DuplicateNumber`] and mutate nothing.
    async fn commit_sale(&self, document: &Document) -> Result<(), StoreError>;

    async fn fetch_document(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// Record a granted authorization and advance the family's voucher
    /// bookkeeping. Returns the updated document.
    async fn apply_authorization(
        &self,
        id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<Document, StoreError>;

    /// Atomically: stamp the credit note as authorized and flip the
    /// original to cancelled. Returns `(original, credit_note)` as stored.
    async fn commit_cancellation(
        &self,
        original_id: DocumentId,
        credit_note_id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<(Document, Document), StoreError>;

    /// Compensate a committed sale: delete the document and reverse its
    /// stock effect. Used when a mandatory authorization falls through.
    async fn rollback_sale(&self, id: DocumentId) -> Result<(), StoreError>;

    /// Last voucher number this deployment saw authorized for a family.
    async fn last_authorized_voucher(
        &self,
        doc_type: DocumentType,
    ) -> Result<Option<u64>, StoreError>;
}
