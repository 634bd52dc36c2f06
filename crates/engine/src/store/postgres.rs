//! Postgres-backed sales store.
//!
//! The issuance commit runs in a `SERIALIZABLE` transaction and the
//! `(doc_type, number)` unique constraint backs the number allocator:
//! a constraint violation surfaces as [`StoreError::DuplicateNumber`] and
//! the engine reallocates.
//!
//! ## Error Mapping
//!
//! | PostgreSQL error code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` (unique violation) | `DuplicateNumber` | concurrent allocation of the same number |
//! | `40001` (serialization failure) | `Conflict` | concurrent serializable commits collided |
//! | other | `Backend` | connection trouble, bad schema, etc. |
//!
//! ## Thread Safety
//!
//! `PostgresSalesStore` is `Send + Sync`; all operations go through the
//! SQLx connection pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use facturo_core::EntityId;
use facturo_documents::{
    AssociatedDocument, AuthorizationStamp, Document, DocumentId, DocumentLine, DocumentStatus,
    DocumentType, StockEffect,
};
use facturo_inventory::{ProductId, StockItem};
use facturo_parties::Buyer;

use super::{SalesStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id UUID PRIMARY KEY,
        doc_type TEXT NOT NULL,
        number TEXT NOT NULL,
        issue_date DATE NOT NULL,
        status TEXT NOT NULL,
        paid NUMERIC(14, 2) NOT NULL DEFAULT 0,
        buyer JSONB NOT NULL,
        authorization_code TEXT,
        authorization_expires DATE,
        voucher_number BIGINT,
        associated_external_code INT,
        associated_sales_point INT,
        associated_voucher BIGINT,
        CONSTRAINT documents_family_number_key UNIQUE (doc_type, number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_lines (
        document_id UUID NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
        line_no INT NOT NULL,
        product_id UUID NOT NULL,
        description TEXT NOT NULL,
        quantity NUMERIC(14, 3) NOT NULL,
        unit_price NUMERIC(14, 2) NOT NULL,
        vat_rate NUMERIC(5, 2) NOT NULL,
        PRIMARY KEY (document_id, line_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_items (
        product_id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        on_hand NUMERIC(14, 3) NOT NULL CHECK (on_hand >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS family_vouchers (
        doc_type TEXT PRIMARY KEY,
        last_voucher BIGINT NOT NULL
    )
    "#,
];

/// Postgres-backed sales store.
#[derive(Debug, Clone)]
pub struct PostgresSalesStore {
    pool: Arc<PgPool>,
}

impl PostgresSalesStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables this store needs, if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| backend("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn begin_serializable(
        &self,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("begin", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("set_isolation", e))?;
        Ok(tx)
    }

    async fn move_stock(
        tx: &mut Transaction<'static, Postgres>,
        product_id: ProductId,
        quantity: Decimal,
        effect: StockEffect,
    ) -> Result<(), StoreError> {
        let uuid: Uuid = *product_id.0.as_uuid();
        let rows = match effect {
            StockEffect::Deduct => sqlx::query(
                "UPDATE stock_items SET on_hand = on_hand - $2 \
                 WHERE product_id = $1 AND on_hand >= $2",
            )
            .bind(uuid)
            .bind(quantity)
            .execute(&mut **tx)
            .await
            .map_err(|e| backend("deduct_stock", e))?
            .rows_affected(),
            StockEffect::Restock => sqlx::query(
                "UPDATE stock_items SET on_hand = on_hand + $2 WHERE product_id = $1",
            )
            .bind(uuid)
            .bind(quantity)
            .execute(&mut **tx)
            .await
            .map_err(|e| backend("restock", e))?
            .rows_affected(),
            StockEffect::None => return Ok(()),
        };

        if rows == 0 {
            // Distinguish a missing product from an oversell.
            let available: Option<Decimal> =
                sqlx::query_scalar("SELECT on_hand FROM stock_items WHERE product_id = $1")
                    .bind(uuid)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| backend("stock_lookup", e))?;
            return match available {
                None => Err(StoreError::ProductNotFound(product_id)),
                Some(available) => Err(StoreError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available,
                }),
            };
        }
        Ok(())
    }

    async fn advance_family_voucher(
        tx: &mut Transaction<'static, Postgres>,
        doc_type: DocumentType,
        voucher_number: u64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO family_vouchers (doc_type, last_voucher) VALUES ($1, $2) \
             ON CONFLICT (doc_type) DO UPDATE \
             SET last_voucher = GREATEST(family_vouchers.last_voucher, EXCLUDED.last_voucher)",
        )
        .bind(type_tag(doc_type))
        .bind(to_i64(voucher_number)?)
        .execute(&mut **tx)
        .await
        .map_err(|e| backend("advance_voucher", e))?;
        Ok(())
    }

    /// Guarded authorization update: refuses double stamps and cancelled
    /// documents, mirroring the domain invariants at the storage level.
    async fn stamp_document(
        tx: &mut Transaction<'static, Postgres>,
        id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<DocumentType, StoreError> {
        let row = sqlx::query(
            "SELECT doc_type, status, authorization_code FROM documents WHERE id = $1 FOR UPDATE",
        )
        .bind(*id.0.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| backend("stamp_lookup", e))?
        .ok_or(StoreError::DocumentNotFound(id))?;

        let doc_type = type_from_tag(&row.try_get::<String, _>("doc_type").map_err(row_err)?)?;
        let status: String = row.try_get("status").map_err(row_err)?;
        let existing: Option<String> = row.try_get("authorization_code").map_err(row_err)?;

        if existing.is_some() {
            return Err(StoreError::Conflict(
                "authorization code is immutable once set".to_string(),
            ));
        }
        if status == "cancelled" {
            return Err(StoreError::Conflict(
                "cannot authorize a cancelled document".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE documents SET authorization_code = $2, authorization_expires = $3, \
             voucher_number = $4, \
             status = CASE WHEN status = 'pending' THEN 'authorized' ELSE status END \
             WHERE id = $1",
        )
        .bind(*id.0.as_uuid())
        .bind(&stamp.code)
        .bind(stamp.expires_on)
        .bind(to_i64(stamp.voucher_number)?)
        .execute(&mut **tx)
        .await
        .map_err(|e| backend("stamp_update", e))?;

        Ok(doc_type)
    }

    async fn fetch_in_tx(
        tx: &mut Transaction<'static, Postgres>,
        id: DocumentId,
    ) -> Result<Document, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(*id.0.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| backend("fetch_document", e))?
            .ok_or(StoreError::DocumentNotFound(id))?;

        let line_rows = sqlx::query(
            "SELECT line_no, product_id, description, quantity, unit_price, vat_rate \
             FROM document_lines WHERE document_id = $1 ORDER BY line_no",
        )
        .bind(*id.0.as_uuid())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| backend("fetch_lines", e))?;

        document_from_rows(&row, &line_rows)
    }
}

#[async_trait]
impl SalesStore for PostgresSalesStore {
    #[instrument(skip(self, item), fields(product_id = %item.product_id()))]
    async fn put_stock_item(&self, item: StockItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stock_items (product_id, name, on_hand) VALUES ($1, $2, $3) \
             ON CONFLICT (product_id) DO UPDATE SET name = EXCLUDED.name, \
             on_hand = EXCLUDED.on_hand",
        )
        .bind(*item.product_id().0.as_uuid())
        .bind(item.name())
        .bind(item.on_hand())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("put_stock_item", e))?;
        Ok(())
    }

    async fn stock_on_hand(&self, product_id: ProductId) -> Result<Decimal, StoreError> {
        sqlx::query_scalar("SELECT on_hand FROM stock_items WHERE product_id = $1")
            .bind(*product_id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend("stock_on_hand", e))?
            .ok_or(StoreError::ProductNotFound(product_id))
    }

    async fn highest_number(&self, doc_type: DocumentType) -> Result<Option<u64>, StoreError> {
        let numbers: Vec<String> =
            sqlx::query_scalar("SELECT number FROM documents WHERE doc_type = $1")
                .bind(type_tag(doc_type))
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| backend("highest_number", e))?;

        Ok(numbers
            .iter()
            .filter_map(|n| doc_type.parse_number(n))
            .max())
    }

    async fn number_exists(
        &self,
        doc_type: DocumentType,
        number: &str,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM documents WHERE doc_type = $1 AND number = $2)",
        )
        .bind(type_tag(doc_type))
        .bind(number)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| backend("number_exists", e))
    }

    #[instrument(skip(self, document), fields(number = %document.number()))]
    async fn commit_sale(&self, document: &Document) -> Result<(), StoreError> {
        let mut tx = self.begin_serializable().await?;

        let mut requested: Vec<(ProductId, Decimal)> = Vec::new();
        for line in document.lines() {
            match requested.iter_mut().find(|(id, _)| *id == line.product_id()) {
                Some((_, qty)) => *qty += line.quantity(),
                None => requested.push((line.product_id(), line.quantity())),
            }
        }
        for (product_id, quantity) in requested {
            Self::move_stock(&mut tx, product_id, quantity, document.doc_type().stock_effect())
                .await?;
        }

        let buyer = serde_json::to_value(document.buyer())
            .map_err(|e| StoreError::Backend(format!("serialize buyer: {e}")))?;
        let associated = document.associated();
        sqlx::query(
            "INSERT INTO documents (id, doc_type, number, issue_date, status, paid, buyer, \
             associated_external_code, associated_sales_point, associated_voucher) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(*document.id_typed().0.as_uuid())
        .bind(type_tag(document.doc_type()))
        .bind(document.number())
        .bind(document.issue_date())
        .bind(status_tag(document.status()))
        .bind(document.paid())
        .bind(buyer)
        .bind(associated.map(|a| i32::from(a.external_code)))
        .bind(associated.map(|a| i32::from(a.sales_point)))
        .bind(associated.map(|a| to_i64(a.voucher_number)).transpose()?)
        .execute(&mut *tx)
        .await
        .map_err(|e| match sqlstate(&e).as_deref() {
            Some("23505") => StoreError::DuplicateNumber {
                number: document.number().to_string(),
            },
            _ => backend("insert_document", e),
        })?;

        for line in document.lines() {
            sqlx::query(
                "INSERT INTO document_lines (document_id, line_no, product_id, description, \
                 quantity, unit_price, vat_rate) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(*document.id_typed().0.as_uuid())
            .bind(i32::try_from(line.line_no()).unwrap_or(i32::MAX))
            .bind(*line.product_id().0.as_uuid())
            .bind(line.description())
            .bind(line.quantity())
            .bind(line.unit_price())
            .bind(line.vat_rate())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("insert_line", e))?;
        }

        tx.commit().await.map_err(map_commit_error)
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Document, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("begin", e))?;
        let document = Self::fetch_in_tx(&mut tx, id).await?;
        tx.commit().await.map_err(map_commit_error)?;
        Ok(document)
    }

    #[instrument(skip(self, stamp), fields(document_id = %id))]
    async fn apply_authorization(
        &self,
        id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<Document, StoreError> {
        let mut tx = self.begin_serializable().await?;
        let doc_type = Self::stamp_document(&mut tx, id, stamp).await?;
        Self::advance_family_voucher(&mut tx, doc_type, stamp.voucher_number).await?;
        let document = Self::fetch_in_tx(&mut tx, id).await?;
        tx.commit().await.map_err(map_commit_error)?;
        Ok(document)
    }

    #[instrument(skip(self, stamp), fields(original = %original_id, credit_note = %credit_note_id))]
    async fn commit_cancellation(
        &self,
        original_id: DocumentId,
        credit_note_id: DocumentId,
        stamp: &AuthorizationStamp,
    ) -> Result<(Document, Document), StoreError> {
        let mut tx = self.begin_serializable().await?;

        let credit_type = Self::stamp_document(&mut tx, credit_note_id, stamp).await?;
        Self::advance_family_voucher(&mut tx, credit_type, stamp.voucher_number).await?;

        let rows = sqlx::query(
            "UPDATE documents SET status = 'cancelled' WHERE id = $1 AND status <> 'cancelled'",
        )
        .bind(*original_id.0.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("cancel_original", e))?
        .rows_affected();
        if rows == 0 {
            // Either gone or already cancelled; both abort the commit.
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM documents WHERE id = $1)")
                    .bind(*original_id.0.as_uuid())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| backend("cancel_lookup", e))?;
            return Err(if exists {
                StoreError::Conflict("document is already cancelled".to_string())
            } else {
                StoreError::DocumentNotFound(original_id)
            });
        }

        let original = Self::fetch_in_tx(&mut tx, original_id).await?;
        let credit_note = Self::fetch_in_tx(&mut tx, credit_note_id).await?;
        tx.commit().await.map_err(map_commit_error)?;
        Ok((original, credit_note))
    }

    #[instrument(skip(self), fields(document_id = %id))]
    async fn rollback_sale(&self, id: DocumentId) -> Result<(), StoreError> {
        let mut tx = self.begin_serializable().await?;

        let document = Self::fetch_in_tx(&mut tx, id).await?;
        let reverse = match document.doc_type().stock_effect() {
            StockEffect::Deduct => StockEffect::Restock,
            StockEffect::Restock => StockEffect::Deduct,
            StockEffect::None => StockEffect::None,
        };

        let mut requested: Vec<(ProductId, Decimal)> = Vec::new();
        for line in document.lines() {
            match requested.iter_mut().find(|(pid, _)| *pid == line.product_id()) {
                Some((_, qty)) => *qty += line.quantity(),
                None => requested.push((line.product_id(), line.quantity())),
            }
        }
        for (product_id, quantity) in requested {
            Self::move_stock(&mut tx, product_id, quantity, reverse)
                .await
                .map_err(|e| match e {
                    StoreError::InsufficientStock { product_id, .. } => StoreError::Conflict(
                        format!("restocked goods for {product_id} were consumed since commit"),
                    ),
                    other => other,
                })?;
        }

        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(*id.0.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete_document", e))?;

        tx.commit().await.map_err(map_commit_error)
    }

    async fn last_authorized_voucher(
        &self,
        doc_type: DocumentType,
    ) -> Result<Option<u64>, StoreError> {
        let voucher: Option<i64> =
            sqlx::query_scalar("SELECT last_voucher FROM family_vouchers WHERE doc_type = $1")
                .bind(type_tag(doc_type))
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| backend("last_authorized_voucher", e))?;
        Ok(voucher.and_then(|v| u64::try_from(v).ok()))
    }
}

fn document_from_rows(
    row: &sqlx::postgres::PgRow,
    line_rows: &[sqlx::postgres::PgRow],
) -> Result<Document, StoreError> {
    let id = DocumentId::new(EntityId::from_uuid(row.try_get("id").map_err(row_err)?));
    let doc_type = type_from_tag(&row.try_get::<String, _>("doc_type").map_err(row_err)?)?;
    let number: String = row.try_get("number").map_err(row_err)?;
    let issue_date: NaiveDate = row.try_get("issue_date").map_err(row_err)?;
    let status = status_from_tag(&row.try_get::<String, _>("status").map_err(row_err)?)?;
    let paid: Decimal = row.try_get("paid").map_err(row_err)?;

    let buyer_value: serde_json::Value = row.try_get("buyer").map_err(row_err)?;
    let buyer: Buyer = serde_json::from_value(buyer_value)
        .map_err(|e| StoreError::Backend(format!("deserialize buyer: {e}")))?;

    let authorization = match row
        .try_get::<Option<String>, _>("authorization_code")
        .map_err(row_err)?
    {
        Some(code) => Some(AuthorizationStamp {
            code,
            expires_on: row
                .try_get::<Option<NaiveDate>, _>("authorization_expires")
                .map_err(row_err)?
                .ok_or_else(|| StoreError::Backend("stamp missing expiry".to_string()))?,
            voucher_number: row
                .try_get::<Option<i64>, _>("voucher_number")
                .map_err(row_err)?
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| StoreError::Backend("stamp missing voucher".to_string()))?,
        }),
        None => None,
    };

    let associated = match row
        .try_get::<Option<i32>, _>("associated_external_code")
        .map_err(row_err)?
    {
        Some(external_code) => Some(AssociatedDocument {
            external_code: u16::try_from(external_code)
                .map_err(|_| StoreError::Backend("bad associated code".to_string()))?,
            sales_point: row
                .try_get::<Option<i32>, _>("associated_sales_point")
                .map_err(row_err)?
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| StoreError::Backend("bad associated sales point".to_string()))?,
            voucher_number: row
                .try_get::<Option<i64>, _>("associated_voucher")
                .map_err(row_err)?
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| StoreError::Backend("bad associated voucher".to_string()))?,
        }),
        None => None,
    };

    let mut lines = Vec::with_capacity(line_rows.len());
    for line_row in line_rows {
        let line = DocumentLine::new(
            u32::try_from(line_row.try_get::<i32, _>("line_no").map_err(row_err)?)
                .map_err(|_| StoreError::Backend("bad line number".to_string()))?,
            ProductId::new(EntityId::from_uuid(
                line_row.try_get("product_id").map_err(row_err)?,
            )),
            line_row.try_get::<String, _>("description").map_err(row_err)?,
            line_row.try_get::<Decimal, _>("quantity").map_err(row_err)?,
            line_row.try_get::<Decimal, _>("unit_price").map_err(row_err)?,
            line_row.try_get::<Decimal, _>("vat_rate").map_err(row_err)?,
        )
        .map_err(|e| StoreError::Backend(format!("stored line invalid: {e}")))?;
        lines.push(line);
    }

    Document::restore(
        id, doc_type, number, issue_date, buyer, lines, status, paid, authorization, associated,
    )
    .map_err(|e| StoreError::Backend(format!("stored document invalid: {e}")))
}

fn type_tag(doc_type: DocumentType) -> &'static str {
    match doc_type {
        DocumentType::InvoiceA => "invoice_a",
        DocumentType::InvoiceB => "invoice_b",
        DocumentType::InvoiceC => "invoice_c",
        DocumentType::DebitNoteA => "debit_note_a",
        DocumentType::DebitNoteB => "debit_note_b",
        DocumentType::DebitNoteC => "debit_note_c",
        DocumentType::CreditNoteA => "credit_note_a",
        DocumentType::CreditNoteB => "credit_note_b",
        DocumentType::CreditNoteC => "credit_note_c",
        DocumentType::DeliveryNote => "delivery_note",
    }
}

fn type_from_tag(tag: &str) -> Result<DocumentType, StoreError> {
    DocumentType::ALL
        .into_iter()
        .find(|t| type_tag(*t) == tag)
        .ok_or_else(|| StoreError::Backend(format!("unknown document type tag '{tag}'")))
}

fn status_tag(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Authorized => "authorized",
        DocumentStatus::Paid => "paid",
        DocumentStatus::Cancelled => "cancelled",
    }
}

fn status_from_tag(tag: &str) -> Result<DocumentStatus, StoreError> {
    match tag {
        "pending" => Ok(DocumentStatus::Pending),
        "authorized" => Ok(DocumentStatus::Authorized),
        "paid" => Ok(DocumentStatus::Paid),
        "cancelled" => Ok(DocumentStatus::Cancelled),
        other => Err(StoreError::Backend(format!("unknown status tag '{other}'"))),
    }
}

fn sqlstate(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    }
}

fn map_commit_error(error: sqlx::Error) -> StoreError {
    match sqlstate(&error).as_deref() {
        Some("40001") => StoreError::Conflict("serializable commit collided; retry".to_string()),
        Some("23505") => StoreError::DuplicateNumber {
            number: error.to_string(),
        },
        _ => backend("commit", error),
    }
}

fn backend(operation: &str, error: sqlx::Error) -> StoreError {
    match sqlstate(&error).as_deref() {
        Some("40001") => StoreError::Conflict("serializable commit collided; retry".to_string()),
        _ => StoreError::Backend(format!("{operation}: {error}")),
    }
}

fn row_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("row decode: {error}"))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend("voucher number overflow".to_string()))
}
