//! `facturo-documents` — fiscal documents: types, lifecycle, VAT breakdown.

pub mod doc_type;
pub mod document;
pub mod tax;

pub use doc_type::{DocumentClass, DocumentType, StockEffect};
pub use document::{
    AssociatedDocument, AuthorizationStamp, Document, DocumentId, DocumentLine, DocumentStatus,
};
pub use tax::{rate_code, vat_summary, DocumentTotals, RateLine};
