//! Gap-tolerant, collision-free document numbering.
//!
//! The allocator reads the highest issued integer for a family, advances
//! it, and re-checks existence immediately before use. That check-then-act
//! window is real: true uniqueness comes from the store's (type-family,
//! number) constraint, whose violation at commit time sends the engine
//! back here for the next integer.

use tracing::warn;

use facturo_documents::DocumentType;

use crate::error::EngineError;
use crate::store::SalesStore;

/// Bound on both the pre-check loop and the allocate-and-commit loop.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 5;

/// Allocates the next human-facing number for a type family.
pub struct NumberAllocator<'a, S: SalesStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SalesStore + ?Sized> NumberAllocator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Next free number for `doc_type`, starting at 1 for a fresh family.
    pub async fn next_number(&self, doc_type: DocumentType) -> Result<String, EngineError> {
        let highest = self.store.highest_number(doc_type).await?;
        let mut next = highest.unwrap_or(0) + 1;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = doc_type.format_number(next);
            if !self.store.number_exists(doc_type, &candidate).await? {
                return Ok(candidate);
            }
            warn!(?doc_type, %candidate, "document number collision, advancing");
            next += 1;
        }

        Err(EngineError::AllocationFailed {
            doc_type,
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySalesStore;
    use chrono::NaiveDate;
    use facturo_core::EntityId;
    use facturo_documents::{Document, DocumentId, DocumentLine};
    use facturo_inventory::{ProductId, StockItem};
    use facturo_parties::{Buyer, BuyerId, ReceiverId, TaxCondition};
    use rust_decimal_macros::dec;

    async fn store_with_invoice(number_int: u64) -> InMemorySalesStore {
        let store = InMemorySalesStore::new();
        let product_id = ProductId::new(EntityId::new());
        store
            .put_stock_item(StockItem::new(product_id, "Widget", dec!(100)).unwrap())
            .await
            .unwrap();

        let buyer = Buyer::new(
            BuyerId::new(EntityId::new()),
            "Jane Doe",
            TaxCondition::FinalConsumer,
            ReceiverId::Anonymous,
        )
        .unwrap();
        let line =
            DocumentLine::new(1, product_id, "Widget", dec!(1), dec!(10), dec!(21)).unwrap();
        let document = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceA,
            DocumentType::InvoiceA.format_number(number_int),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            buyer,
            vec![line],
            None,
        )
        .unwrap();
        store.commit_sale(&document).await.unwrap();
        store
    }

    #[tokio::test]
    async fn fresh_family_starts_at_one() {
        let store = InMemorySalesStore::new();
        let allocator = NumberAllocator::new(&store);
        let number = allocator.next_number(DocumentType::InvoiceA).await.unwrap();
        assert_eq!(number, "FA-00000001");
    }

    #[tokio::test]
    async fn allocation_continues_after_the_highest() {
        let store = store_with_invoice(7).await;
        let allocator = NumberAllocator::new(&store);
        let number = allocator.next_number(DocumentType::InvoiceA).await.unwrap();
        assert_eq!(number, "FA-00000008");
    }

    #[tokio::test]
    async fn families_do_not_share_sequences() {
        let store = store_with_invoice(3).await;
        let allocator = NumberAllocator::new(&store);
        let number = allocator
            .next_number(DocumentType::CreditNoteA)
            .await
            .unwrap();
        assert_eq!(number, "NCA-00000001");
    }
}
