//! In-memory sales store.
//!
//! Intended for tests/dev. A single lock over the whole state makes every
//! commit serializable; not optimized for performance.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use facturo_documents::{
    AuthorizationStamp, Document, DocumentId, DocumentType, StockEffect,
};
use facturo_inventory::{ProductId, StockItem};

use super::{SalesStore, StoreError};

#[derive(Debug, Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    numbers: HashSet<(DocumentType, String)>,
    stock: HashMap<ProductId, StockItem>,
    last_vouchers: HashMap<DocumentType, u64>,
}

#[derive(Debug, Default)]
pub struct InMemorySalesStore {
    state: RwLock<State>,
}

impl InMemorySalesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Requested quantity per product, lines on the same product combined.
    fn requested_per_product(document: &Document) -> Vec<(ProductId, Decimal)> {
        let mut totals: Vec<(ProductId, Decimal)> = Vec::new();
        for line in document.lines() {
            match totals.iter_mut().find(|(id, _)| *id == line.product_id()) {
                Some((_, qty)) => *qty += line.quantity(),
                None => totals.push((line.product_id(), line.quantity())),
            }
        }
        totals
    }
}

#[async_trait]
impl SalesStore for InMemorySalesStore {
    async fn put_stock_item(&self, item: StockItem) -> Result<(), StoreError> {
        self.write()?.stock.insert(item.product_id(), item);
        Ok(())
    }

    async fn stock_on_hand(&self, product_id: ProductId) -> Result<Decimal, StoreError> {
        self.read()?
            .stock
            .get(&product_id)
            .map(|item| item.on_hand())
            .ok_or(StoreError::ProductNotFound(product_id))
    }

    async fn highest_number(&self, doc_type: DocumentType) -> Result<Option<u64>, StoreError> {
        Ok(self
            .read()?
            .numbers
            .iter()
            .filter(|(t, _)| *t == doc_type)
            .filter_map(|(_, number)| doc_type.parse_number(number))
            .max())
    }

    async fn number_exists(
        &self,
        doc_type: DocumentType,
        number: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .read()?
            .numbers
            .contains(&(doc_type, number.to_string())))
    }

    async fn commit_sale(&self, document: &Document) -> Result<(), StoreError> {
        let mut state = self.write()?;

        let key = (document.doc_type(), document.number().to_string());
        if state.numbers.contains(&key) {
            return Err(StoreError::DuplicateNumber { number: key.1 });
        }

        let requested = Self::requested_per_product(document);
        match document.doc_type().stock_effect() {
            StockEffect::Deduct => {
                // Verify everything before mutating anything.
                for (product_id, quantity) in &requested {
                    let item = state
                        .stock
                        .get(product_id)
                        .ok_or(StoreError::ProductNotFound(*product_id))?;
                    if !item.can_fulfill(*quantity) {
                        return Err(StoreError::InsufficientStock {
                            product_id: *product_id,
                            requested: *quantity,
                            available: item.on_hand(),
                        });
                    }
                }
                for (product_id, quantity) in &requested {
                    let item = state
                        .stock
                        .get_mut(product_id)
                        .ok_or(StoreError::ProductNotFound(*product_id))?;
                    item.deduct(*quantity)
                        .map_err(|e| StoreError::Conflict(e.to_string()))?;
                }
            }
            StockEffect::Restock => {
                for (product_id, _) in &requested {
                    if !state.stock.contains_key(product_id) {
                        return Err(StoreError::ProductNotFound(*product_id));
                    }
                }
                for (product_id, quantity) in &requested {
                    let item = state
                        .stock
                        .get_mut(product_id)
                        .ok_or(StoreError::ProductNotFound(*product_id))?;
                    item.restock(*quantity)
                        .map_err(|e| StoreError::Conflict(e.to_string()))?;
                }
            }
            StockEffect::None => {}
        }

        state.numbers.insert(key);
        state
            .documents
            .insert(document.id_typed(), document.clone());
        Ok(())
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.read()?
            .documents
            .get(&id)
            .cloned()
            .ok_or(StoreError::DocumentNotFound(id))
    }

    async fn apply_authorization(
        &self,
        id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<Document, StoreError> {
        let mut state = self.write()?;

        let document = state
            .documents
            .get_mut(&id)
            .ok_or(StoreError::DocumentNotFound(id))?;
        document
            .apply_authorization(stamp.clone())
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        let updated = document.clone();

        let family = updated.doc_type();
        let entry = state.last_vouchers.entry(family).or_insert(0);
        *entry = (*entry).max(stamp.voucher_number);

        Ok(updated)
    }

    async fn commit_cancellation(
        &self,
        original_id: DocumentId,
        credit_note_id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<(Document, Document), StoreError> {
        let mut state = self.write()?;

        // Stage both transitions on clones, then write back together.
        let mut original = state
            .documents
            .get(&original_id)
            .cloned()
            .ok_or(StoreError::DocumentNotFound(original_id))?;
        let mut credit_note = state
            .documents
            .get(&credit_note_id)
            .cloned()
            .ok_or(StoreError::DocumentNotFound(credit_note_id))?;

        credit_note
            .apply_authorization(stamp.clone())
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        original
            .mark_cancelled()
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        let family = credit_note.doc_type();
        let entry = state.last_vouchers.entry(family).or_insert(0);
        *entry = (*entry).max(stamp.voucher_number);

        state.documents.insert(original_id, original.clone());
        state.documents.insert(credit_note_id, credit_note.clone());
        Ok((original, credit_note))
    }

    async fn rollback_sale(&self, id: DocumentId) -> Result<(), StoreError> {
        let mut state = self.write()?;

        let document = state
            .documents
            .get(&id)
            .cloned()
            .ok_or(StoreError::DocumentNotFound(id))?;

        let requested = Self::requested_per_product(&document);
        match document.doc_type().stock_effect() {
            // The sale deducted; give the goods back.
            StockEffect::Deduct => {
                for (product_id, quantity) in &requested {
                    let item = state
                        .stock
                        .get_mut(product_id)
                        .ok_or(StoreError::ProductNotFound(*product_id))?;
                    item.restock(*quantity)
                        .map_err(|e| StoreError::Conflict(e.to_string()))?;
                }
            }
            // The sale restocked; take the goods out again, refusing if a
            // concurrent sale already consumed them.
            StockEffect::Restock => {
                for (product_id, quantity) in &requested {
                    let item = state
                        .stock
                        .get(product_id)
                        .ok_or(StoreError::ProductNotFound(*product_id))?;
                    if !item.can_fulfill(*quantity) {
                        return Err(StoreError::Conflict(format!(
                            "restocked goods for {product_id} were consumed since commit"
                        )));
                    }
                }
                for (product_id, quantity) in &requested {
                    let item = state
                        .stock
                        .get_mut(product_id)
                        .ok_or(StoreError::ProductNotFound(*product_id))?;
                    item.deduct(*quantity)
                        .map_err(|e| StoreError::Conflict(e.to_string()))?;
                }
            }
            StockEffect::None => {}
        }

        state
            .numbers
            .remove(&(document.doc_type(), document.number().to_string()));
        state.documents.remove(&id);
        Ok(())
    }

    async fn last_authorized_voucher(
        &self,
        doc_type: DocumentType,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self.read()?.last_vouchers.get(&doc_type).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use facturo_core::EntityId;
    use facturo_documents::DocumentLine;
    use facturo_parties::{Buyer, BuyerId, ReceiverId, TaxCondition};
    use rust_decimal_macros::dec;

    fn buyer() -> Buyer {
        Buyer::new(
            BuyerId::new(EntityId::new()),
            "Jane Doe",
            TaxCondition::FinalConsumer,
            ReceiverId::Anonymous,
        )
        .unwrap()
    }

    async fn seeded_store(product_id: ProductId, on_hand: Decimal) -> InMemorySalesStore {
        let store = InMemorySalesStore::new();
        let item = StockItem::new(product_id, "Widget", on_hand).unwrap();
        store.put_stock_item(item).await.unwrap();
        store
    }

    fn invoice(product_id: ProductId, number_int: u64, quantity: Decimal) -> Document {
        let line = DocumentLine::new(
            1,
            product_id,
            "Widget",
            quantity,
            dec!(10.00),
            dec!(21),
        )
        .unwrap();
        Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(number_int),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            buyer(),
            vec![line],
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn commit_sale_deducts_stock_and_registers_number() {
        let product_id = ProductId::new(EntityId::new());
        let store = seeded_store(product_id, dec!(10)).await;

        let document = invoice(product_id, 1, dec!(4));
        store.commit_sale(&document).await.unwrap();

        assert_eq!(store.stock_on_hand(product_id).await.unwrap(), dec!(6));
        assert!(store
            .number_exists(DocumentType::InvoiceB, "FB-00000001")
            .await
            .unwrap());
        assert_eq!(
            store.highest_number(DocumentType::InvoiceB).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn oversell_leaves_everything_untouched() {
        let product_id = ProductId::new(EntityId::new());
        let store = seeded_store(product_id, dec!(3)).await;

        let document = invoice(product_id, 1, dec!(4));
        let err = store.commit_sale(&document).await.unwrap_err();
        match err {
            StoreError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, dec!(4));
                assert_eq!(available, dec!(3));
            }
            _ => panic!("Expected InsufficientStock"),
        }

        assert_eq!(store.stock_on_hand(product_id).await.unwrap(), dec!(3));
        assert!(store
            .fetch_document(document.id_typed())
            .await
            .is_err());
        assert_eq!(
            store.highest_number(DocumentType::InvoiceB).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn lines_on_the_same_product_are_checked_combined() {
        let product_id = ProductId::new(EntityId::new());
        let store = seeded_store(product_id, dec!(5)).await;

        let lines = vec![
            DocumentLine::new(1, product_id, "Widget", dec!(3), dec!(10), dec!(21)).unwrap(),
            DocumentLine::new(2, product_id, "Widget", dec!(3), dec!(10), dec!(21)).unwrap(),
        ];
        let document = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(1),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            buyer(),
            lines,
            None,
        )
        .unwrap();

        let err = store.commit_sale(&document).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));
        assert_eq!(store.stock_on_hand(product_id).await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn duplicate_number_is_refused_without_stock_movement() {
        let product_id = ProductId::new(EntityId::new());
        let store = seeded_store(product_id, dec!(10)).await;

        store.commit_sale(&invoice(product_id, 1, dec!(2))).await.unwrap();
        let err = store
            .commit_sale(&invoice(product_id, 1, dec!(2)))
            .await
            .unwrap_err();
        match err {
            StoreError::DuplicateNumber { number } => assert_eq!(number, "FB-00000001"),
            _ => panic!("Expected DuplicateNumber"),
        }
        // Only the first sale moved stock.
        assert_eq!(store.stock_on_hand(product_id).await.unwrap(), dec!(8));
    }

    #[tokio::test]
    async fn rollback_reverses_the_stock_effect() {
        let product_id = ProductId::new(EntityId::new());
        let store = seeded_store(product_id, dec!(10)).await;

        let document = invoice(product_id, 1, dec!(4));
        store.commit_sale(&document).await.unwrap();
        assert_eq!(store.stock_on_hand(product_id).await.unwrap(), dec!(6));

        store.rollback_sale(document.id_typed()).await.unwrap();
        assert_eq!(store.stock_on_hand(product_id).await.unwrap(), dec!(10));
        assert!(!store
            .number_exists(DocumentType::InvoiceB, "FB-00000001")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn authorization_updates_document_and_voucher_bookkeeping() {
        let product_id = ProductId::new(EntityId::new());
        let store = seeded_store(product_id, dec!(10)).await;

        let document = invoice(product_id, 1, dec!(1));
        store.commit_sale(&document).await.unwrap();

        let stamp = AuthorizationStamp {
            code: "7000001".to_string(),
            expires_on: NaiveDate::from_ymd_opt(2024, 6, 25).unwrap(),
            voucher_number: 12,
        };
        let updated = store
            .apply_authorization(document.id_typed(), &stamp)
            .await
            .unwrap();
        assert_eq!(updated.voucher_number(), Some(12));
        assert_eq!(
            store
                .last_authorized_voucher(DocumentType::InvoiceB)
                .await
                .unwrap(),
            Some(12)
        );

        // Immutable once set.
        let err = store
            .apply_authorization(document.id_typed(), &stamp)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
