//! Compensating cancellation.
//!
//! Cancelling an authorized invoice issues a full-reversal credit note of
//! the matching family, routes it through the same issuance pipeline and
//! authorization workflow, and flips the original to cancelled only once
//! the credit note itself authorized. Any authorization failure rolls the
//! credit note back; the original is never touched on failure.

use chrono::Utc;
use tracing::{info, warn};

use facturo_authority::AuthorityApi;
use facturo_core::{DomainResult, EntityId};
use facturo_documents::{
    AssociatedDocument, Document, DocumentId, DocumentLine, DocumentStatus, DocumentType,
};

use crate::error::EngineError;
use crate::issuance::{AuthorityCall, SalesEngine};
use crate::store::SalesStore;

impl<S: SalesStore, A: AuthorityApi> SalesEngine<S, A> {
    /// Reverse a previously authorized invoice with a linked credit note.
    ///
    /// Returns the authorized credit note. The credit note restores the
    /// original's stock.
    pub async fn cancel(&self, document_id: DocumentId) -> Result<Document, EngineError> {
        let original = self.store.fetch_document(document_id).await?;

        if original.status() == DocumentStatus::Cancelled {
            return Err(EngineError::CancellationConflict);
        }
        if !original.doc_type().is_invoice() {
            return Err(EngineError::Validation(
                "only invoices are reversed with a credit note".to_string(),
            ));
        }
        let class = original.doc_type().class().ok_or_else(|| {
            EngineError::Validation("document has no fiscal class".to_string())
        })?;
        let voucher_number = original.voucher_number().ok_or_else(|| {
            EngineError::Validation(
                "cannot cancel a document that was never authorized".to_string(),
            )
        })?;

        let credit_type = DocumentType::credit_note_for(class);
        let associated = AssociatedDocument {
            external_code: original.doc_type().external_code(),
            sales_point: self.config().sales_point,
            voucher_number,
        };

        // Full reversal only: mirror the original's lines.
        let lines: Vec<DocumentLine> = original
            .lines()
            .iter()
            .map(|line| {
                DocumentLine::new(
                    line.line_no(),
                    line.product_id(),
                    line.description(),
                    line.quantity(),
                    line.unit_price(),
                    line.vat_rate(),
                )
            })
            .collect::<DomainResult<_>>()?;

        let buyer = original.buyer().clone();
        let issue_date = Utc::now().date_naive();
        let credit_note = self
            .allocate_and_commit(credit_type, |number| {
                Document::issue(
                    DocumentId::new(EntityId::new()),
                    credit_type,
                    number,
                    issue_date,
                    buyer.clone(),
                    lines.clone(),
                    Some(associated),
                )
            })
            .await?;

        // The flip to cancelled rides on the credit note's authorization;
        // anything short of a grant undoes the credit note entirely.
        match self.call_authority(&credit_note).await {
            Ok(AuthorityCall::Granted(stamp)) => {
                let (original, credit_note) = self
                    .store
                    .commit_cancellation(original.id_typed(), credit_note.id_typed(), &stamp)
                    .await?;
                info!(
                    original = %original.number(),
                    credit_note = %credit_note.number(),
                    voucher = stamp.voucher_number,
                    "document cancelled"
                );
                Ok(credit_note)
            }
            Ok(AuthorityCall::Unavailable { reason }) => {
                self.undo_credit_note(&credit_note).await?;
                Err(EngineError::AuthorityUnavailable(reason))
            }
            Ok(AuthorityCall::Rejected { kind, reason }) => {
                self.undo_credit_note(&credit_note).await?;
                Err(EngineError::AuthorityRejected { kind, reason })
            }
            Err(e) => {
                self.undo_credit_note(&credit_note).await?;
                Err(e)
            }
        }
    }

    async fn undo_credit_note(&self, credit_note: &Document) -> Result<(), EngineError> {
        warn!(
            credit_note = %credit_note.number(),
            "credit note did not authorize; rolling it back"
        );
        Ok(self.store.rollback_sale(credit_note.id_typed()).await?)
    }
}
