use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_core::{round2, DomainError, DomainResult, Entity, EntityId};
use facturo_inventory::ProductId;
use facturo_parties::Buyer;

use crate::doc_type::DocumentType;

/// Document identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub EntityId);

impl DocumentId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Document status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Authorized,
    Paid,
    Cancelled,
}

/// One line of a document. Created once, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    line_no: u32,
    product_id: ProductId,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    vat_rate: Decimal,
    subtotal: Decimal,
}

impl DocumentLine {
    pub fn new(
        line_no: u32,
        product_id: ProductId,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        vat_rate: Decimal,
    ) -> DomainResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(DomainError::validation("line description cannot be empty"));
        }
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("line quantity must be positive"));
        }
        if unit_price <= Decimal::ZERO {
            return Err(DomainError::validation("line unit price must be positive"));
        }
        if vat_rate < Decimal::ZERO || vat_rate > Decimal::ONE_HUNDRED {
            return Err(DomainError::validation("line tax rate out of range"));
        }

        Ok(Self {
            line_no,
            product_id,
            description,
            quantity,
            unit_price,
            vat_rate,
            subtotal: round2(quantity * unit_price),
        })
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn vat_rate(&self) -> Decimal {
        self.vat_rate
    }

    /// quantity × unit price, rounded to 2 decimals.
    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }
}

/// The authority's proof that a document is fiscally valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationStamp {
    pub code: String,
    pub expires_on: NaiveDate,
    pub voucher_number: u64,
}

/// Reference to the original document a credit/debit note reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedDocument {
    pub external_code: u16,
    pub sales_point: u16,
    pub voucher_number: u64,
}

/// Entity: Document.
///
/// Invariants: the gross total equals the rounded sum of its lines'
/// subtotals; the authorization code is immutable once set; an associated
/// reference exists exactly on credit/debit notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    doc_type: DocumentType,
    number: String,
    issue_date: NaiveDate,
    buyer: Buyer,
    status: DocumentStatus,
    lines: Vec<DocumentLine>,
    total: Decimal,
    paid: Decimal,
    authorization: Option<AuthorizationStamp>,
    associated: Option<AssociatedDocument>,
}

impl Document {
    /// Create a new document in `Pending` status.
    pub fn issue(
        id: DocumentId,
        doc_type: DocumentType,
        number: impl Into<String>,
        issue_date: NaiveDate,
        buyer: Buyer,
        lines: Vec<DocumentLine>,
        associated: Option<AssociatedDocument>,
    ) -> DomainResult<Self> {
        let number = number.into();
        if doc_type.parse_number(&number).is_none() {
            return Err(DomainError::validation(format!(
                "number '{number}' does not belong to the {:?} sequence",
                doc_type
            )));
        }
        if lines.is_empty() {
            return Err(DomainError::validation(
                "cannot issue a document without lines",
            ));
        }

        let needs_associated = doc_type.is_credit_note() || doc_type.is_debit_note();
        if needs_associated && associated.is_none() {
            return Err(DomainError::validation(
                "credit/debit notes must reference the document they adjust",
            ));
        }
        if !needs_associated && associated.is_some() {
            return Err(DomainError::validation(
                "only credit/debit notes carry an associated reference",
            ));
        }

        let total = round2(lines.iter().map(|l| l.subtotal()).sum());

        Ok(Self {
            id,
            doc_type,
            number,
            issue_date,
            buyer,
            status: DocumentStatus::Pending,
            lines,
            total,
            paid: Decimal::ZERO,
            authorization: None,
            associated,
        })
    }

    /// Rebuild a document from storage.
    ///
    /// Trusts persisted status/payment/authorization state; everything else
    /// goes through [`Document::issue`]. The total is recomputed from the
    /// lines so the totals invariant stays honest.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: DocumentId,
        doc_type: DocumentType,
        number: String,
        issue_date: NaiveDate,
        buyer: Buyer,
        lines: Vec<DocumentLine>,
        status: DocumentStatus,
        paid: Decimal,
        authorization: Option<AuthorizationStamp>,
        associated: Option<AssociatedDocument>,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::invariant("stored document has no lines"));
        }
        let total = round2(lines.iter().map(|l| l.subtotal()).sum());
        if paid < Decimal::ZERO || paid > total {
            return Err(DomainError::invariant("stored paid amount out of range"));
        }
        Ok(Self {
            id,
            doc_type,
            number,
            issue_date,
            buyer,
            status,
            lines,
            total,
            paid,
            authorization,
            associated,
        })
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn buyer(&self) -> &Buyer {
        &self.buyer
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn paid(&self) -> Decimal {
        self.paid
    }

    pub fn outstanding(&self) -> Decimal {
        self.total - self.paid
    }

    pub fn authorization(&self) -> Option<&AuthorizationStamp> {
        self.authorization.as_ref()
    }

    pub fn associated(&self) -> Option<&AssociatedDocument> {
        self.associated.as_ref()
    }

    /// The authority's voucher number, once authorized.
    pub fn voucher_number(&self) -> Option<u64> {
        self.authorization.as_ref().map(|s| s.voucher_number)
    }

    /// Whether this document still needs (and can take) an authorization.
    pub fn awaiting_authorization(&self) -> bool {
        self.doc_type.requires_authorization()
            && self.authorization.is_none()
            && self.status != DocumentStatus::Cancelled
    }

    /// Record a granted authorization. The code is immutable once set.
    pub fn apply_authorization(&mut self, stamp: AuthorizationStamp) -> DomainResult<()> {
        if !self.doc_type.requires_authorization() {
            return Err(DomainError::invariant(
                "document type does not take authorization",
            ));
        }
        if self.authorization.is_some() {
            return Err(DomainError::invariant(
                "authorization code is immutable once set",
            ));
        }
        if self.status == DocumentStatus::Cancelled {
            return Err(DomainError::conflict(
                "cannot authorize a cancelled document",
            ));
        }

        self.authorization = Some(stamp);
        if self.status == DocumentStatus::Pending {
            self.status = DocumentStatus::Authorized;
        }
        Ok(())
    }

    /// Accumulate a payment; the document flips to `Paid` at the total.
    pub fn register_payment(&mut self, amount: Decimal) -> DomainResult<()> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.status == DocumentStatus::Cancelled {
            return Err(DomainError::invariant(
                "cannot register payment on a cancelled document",
            ));
        }

        let new_paid = self.paid + amount;
        if new_paid > self.total {
            return Err(DomainError::invariant("cannot overpay document"));
        }

        self.paid = new_paid;
        if self.paid == self.total {
            self.status = DocumentStatus::Paid;
        }
        Ok(())
    }

    /// Flip to `Cancelled`. Only the cancellation workflow calls this,
    /// after the reversing credit note has authorized.
    pub fn mark_cancelled(&mut self) -> DomainResult<()> {
        if self.status == DocumentStatus::Cancelled {
            return Err(DomainError::conflict("document is already cancelled"));
        }
        self.status = DocumentStatus::Cancelled;
        Ok(())
    }
}

impl Entity for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facturo_parties::{BuyerId, ReceiverId, TaxCondition};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_document_id() -> DocumentId {
        DocumentId::new(EntityId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(EntityId::new())
    }

    fn test_buyer() -> Buyer {
        Buyer::new(
            BuyerId::new(EntityId::new()),
            "Jane Doe",
            TaxCondition::FinalConsumer,
            ReceiverId::NationalId("12345678".to_string()),
        )
        .unwrap()
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn test_line(no: u32, quantity: Decimal, unit_price: Decimal) -> DocumentLine {
        DocumentLine::new(
            no,
            test_product_id(),
            format!("item {no}"),
            quantity,
            unit_price,
            dec!(21),
        )
        .unwrap()
    }

    fn test_invoice(lines: Vec<DocumentLine>) -> Document {
        Document::issue(
            test_document_id(),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(1),
            test_date(),
            test_buyer(),
            lines,
            None,
        )
        .unwrap()
    }

    fn test_stamp() -> AuthorizationStamp {
        AuthorizationStamp {
            code: "71234567890123".to_string(),
            expires_on: NaiveDate::from_ymd_opt(2024, 6, 25).unwrap(),
            voucher_number: 5,
        }
    }

    #[test]
    fn total_is_rounded_sum_of_line_subtotals() {
        let doc = test_invoice(vec![
            test_line(1, dec!(3), dec!(33.33)),
            test_line(2, dec!(1), dec!(0.01)),
        ]);
        assert_eq!(doc.total(), dec!(100.00));
        assert_eq!(doc.status(), DocumentStatus::Pending);
    }

    #[test]
    fn document_without_lines_is_rejected() {
        let err = Document::issue(
            test_document_id(),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(1),
            test_date(),
            test_buyer(),
            vec![],
            None,
        )
        .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("without lines") => {}
            _ => panic!("Expected Validation error for empty lines"),
        }
    }

    #[test]
    fn number_must_belong_to_the_type_sequence() {
        let err = Document::issue(
            test_document_id(),
            DocumentType::InvoiceB,
            "FA-00000001",
            test_date(),
            test_buyer(),
            vec![test_line(1, dec!(1), dec!(10))],
            None,
        )
        .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("sequence") => {}
            _ => panic!("Expected Validation error for foreign number"),
        }
    }

    #[test]
    fn credit_note_requires_associated_reference() {
        let err = Document::issue(
            test_document_id(),
            DocumentType::CreditNoteB,
            DocumentType::CreditNoteB.format_number(1),
            test_date(),
            test_buyer(),
            vec![test_line(1, dec!(1), dec!(10))],
            None,
        )
        .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("reference") => {}
            _ => panic!("Expected Validation error for missing association"),
        }
    }

    #[test]
    fn plain_invoice_refuses_associated_reference() {
        let err = Document::issue(
            test_document_id(),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(1),
            test_date(),
            test_buyer(),
            vec![test_line(1, dec!(1), dec!(10))],
            Some(AssociatedDocument {
                external_code: 6,
                sales_point: 1,
                voucher_number: 1,
            }),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for unexpected association"),
        }
    }

    #[test]
    fn authorization_moves_pending_to_authorized() {
        let mut doc = test_invoice(vec![test_line(1, dec!(1), dec!(100))]);
        doc.apply_authorization(test_stamp()).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Authorized);
        assert_eq!(doc.voucher_number(), Some(5));
    }

    #[test]
    fn authorization_code_is_immutable() {
        let mut doc = test_invoice(vec![test_line(1, dec!(1), dec!(100))]);
        doc.apply_authorization(test_stamp()).unwrap();

        let err = doc.apply_authorization(test_stamp()).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("immutable") => {}
            _ => panic!("Expected InvariantViolation for double authorization"),
        }
    }

    #[test]
    fn delivery_note_takes_no_authorization() {
        let mut doc = Document::issue(
            test_document_id(),
            DocumentType::DeliveryNote,
            DocumentType::DeliveryNote.format_number(1),
            test_date(),
            test_buyer(),
            vec![test_line(1, dec!(1), dec!(100))],
            None,
        )
        .unwrap();
        assert!(!doc.awaiting_authorization());
        assert!(doc.apply_authorization(test_stamp()).is_err());
    }

    #[test]
    fn paying_to_total_marks_document_paid() {
        let mut doc = test_invoice(vec![test_line(1, dec!(2), dec!(100))]);
        doc.register_payment(dec!(50)).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Pending);
        assert_eq!(doc.outstanding(), dec!(150));

        doc.register_payment(dec!(150)).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Paid);
        assert_eq!(doc.outstanding(), dec!(0));
    }

    #[test]
    fn cannot_overpay_document() {
        let mut doc = test_invoice(vec![test_line(1, dec!(1), dec!(100))]);
        let err = doc.register_payment(dec!(100.01)).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("overpay") => {}
            _ => panic!("Expected InvariantViolation for overpayment"),
        }
    }

    #[test]
    fn cannot_pay_cancelled_document() {
        let mut doc = test_invoice(vec![test_line(1, dec!(1), dec!(100))]);
        doc.mark_cancelled().unwrap();
        assert!(doc.register_payment(dec!(10)).is_err());
    }

    #[test]
    fn cancelling_twice_is_a_conflict() {
        let mut doc = test_invoice(vec![test_line(1, dec!(1), dec!(100))]);
        doc.mark_cancelled().unwrap();
        let err = doc.mark_cancelled().unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("already cancelled") => {}
            _ => panic!("Expected Conflict for double cancellation"),
        }
    }

    #[test]
    fn restore_recomputes_the_total() {
        let lines = vec![test_line(1, dec!(2), dec!(10.55))];
        let doc = Document::restore(
            test_document_id(),
            DocumentType::InvoiceB,
            "FB-00000007".to_string(),
            test_date(),
            test_buyer(),
            lines,
            DocumentStatus::Authorized,
            dec!(0),
            Some(test_stamp()),
            None,
        )
        .unwrap();
        assert_eq!(doc.total(), dec!(21.10));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 500,
            ..ProptestConfig::default()
        })]

        /// Property: for any valid set of lines, the document total is the
        /// rounded sum of the line subtotals.
        #[test]
        fn total_always_matches_lines(
            line_specs in prop::collection::vec((1i64..1_000i64, 1i64..100_000i64), 1..8)
        ) {
            let lines: Vec<DocumentLine> = line_specs
                .iter()
                .enumerate()
                .map(|(i, (qty, price_cents))| {
                    test_line(
                        (i + 1) as u32,
                        Decimal::from(*qty),
                        Decimal::new(*price_cents, 2),
                    )
                })
                .collect();

            let expected: Decimal = lines.iter().map(|l| l.subtotal()).sum();
            let doc = test_invoice(lines);
            prop_assert_eq!(doc.total(), facturo_core::round2(expected));
        }
    }
}
