//! Authorization workflow: pending document → authorized voucher.

use rust_decimal::Decimal;
use tracing::{error, info};

use facturo_documents::{
    rate_code, vat_summary, Document, DocumentClass, DocumentType,
};
use facturo_parties::{Buyer, ReceiverId, TaxCondition};

use crate::client::{
    AssociatedVoucher, AuthorityApi, AuthorizationGrant, AuthorizationPayload, ReceiverRef,
    VatRateEntry, CONCEPT_GOODS, NATIONAL_ID_KIND, TAX_ID_KIND, UNIDENTIFIED_KIND,
};
use crate::error::AuthorityError;

/// Requests an authorization code for a single document.
pub struct AuthorizationWorkflow<'a, A: AuthorityApi + ?Sized> {
    authority: &'a A,
    sales_point: u16,
}

impl<'a, A: AuthorityApi + ?Sized> AuthorizationWorkflow<'a, A> {
    pub fn new(authority: &'a A, sales_point: u16) -> Self {
        Self {
            authority,
            sales_point,
        }
    }

    /// Assemble and submit the authorization request for `document`.
    ///
    /// The document is read-only here; the issuance transaction decides
    /// what to do with the outcome.
    pub async fn authorize(
        &self,
        document: &Document,
    ) -> Result<AuthorizationGrant, AuthorityError> {
        let doc_type = document.doc_type();
        if !doc_type.requires_authorization() {
            return Err(AuthorityError::Validation(format!(
                "{doc_type:?} documents are not submitted for authorization"
            )));
        }
        let external_code = doc_type.external_code();

        let receiver = resolve_receiver(doc_type, document.buyer())?;

        // Credential and health trouble both mean "try again later".
        self.authority.check_service().await?;

        let last = self
            .authority
            .last_voucher_number(self.sales_point, external_code)
            .await?;
        let voucher = last + 1;

        let totals = vat_summary(document.lines())?;
        if (totals.gross - document.total()).abs() > Decimal::new(1, 2) {
            return Err(AuthorityError::Validation(format!(
                "document total {} does not match computed gross {}",
                document.total(),
                totals.gross
            )));
        }

        let associated = if doc_type.is_credit_note() || doc_type.is_debit_note() {
            let reference = document.associated().ok_or_else(|| {
                AuthorityError::Validation(
                    "credit/debit note is missing its associated reference".to_string(),
                )
            })?;
            Some(AssociatedVoucher {
                external_code: reference.external_code,
                sales_point: reference.sales_point,
                voucher_number: reference.voucher_number,
            })
        } else {
            None
        };

        let vat_breakdown = totals
            .rate_lines
            .iter()
            .map(|rl| {
                Ok(VatRateEntry {
                    rate_code: rate_code(rl.rate_percent)?,
                    base: rl.net,
                    amount: rl.tax,
                })
            })
            .collect::<Result<Vec<_>, AuthorityError>>()?;

        let payload = AuthorizationPayload {
            sales_point: self.sales_point,
            external_code,
            concept: CONCEPT_GOODS,
            receiver,
            voucher_from: voucher,
            voucher_to: voucher,
            issue_date: document.issue_date().format("%Y%m%d").to_string(),
            net_total: totals.net,
            vat_total: totals.tax,
            gross_total: totals.gross,
            vat_breakdown,
            associated,
        };

        info!(
            doc_type = ?doc_type,
            sales_point = self.sales_point,
            external_code,
            voucher,
            "submitting voucher for authorization"
        );

        match self.authority.authorize(&payload).await {
            Ok(grant) => {
                info!(
                    doc_type = ?doc_type,
                    voucher = grant.voucher_number,
                    expires_on = %grant.expires_on,
                    "authorization granted"
                );
                Ok(grant)
            }
            Err(e) => {
                error!(
                    doc_type = ?doc_type,
                    sales_point = self.sales_point,
                    external_code,
                    error = %e,
                    "authorization failed"
                );
                Err(e)
            }
        }
    }
}

/// Cross the buyer's declared condition with the document class.
///
/// Class-A documents demand a registered-business buyer identified by tax
/// id; consumer-grade documents take the national id, or the
/// no-identification sentinel when the buyer provides none.
fn resolve_receiver(doc_type: DocumentType, buyer: &Buyer) -> Result<ReceiverRef, AuthorityError> {
    let class = doc_type.class().ok_or_else(|| {
        AuthorityError::Validation(format!("{doc_type:?} has no fiscal class"))
    })?;

    match class {
        DocumentClass::A => match (buyer.tax_condition(), buyer.receiver()) {
            (TaxCondition::RegisteredBusiness, ReceiverId::TaxId(number)) => Ok(ReceiverRef {
                kind_code: TAX_ID_KIND,
                number: number.clone(),
            }),
            _ => Err(AuthorityError::Validation(
                "class-A documents require a registered business buyer with a tax id".to_string(),
            )),
        },
        DocumentClass::B | DocumentClass::C => Ok(match buyer.receiver() {
            ReceiverId::TaxId(number) => ReceiverRef {
                kind_code: TAX_ID_KIND,
                number: number.clone(),
            },
            ReceiverId::NationalId(number) => ReceiverRef {
                kind_code: NATIONAL_ID_KIND,
                number: number.clone(),
            },
            ReceiverId::Anonymous => ReceiverRef {
                kind_code: UNIDENTIFIED_KIND,
                number: "0".to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use facturo_core::EntityId;
    use facturo_documents::{AssociatedDocument, DocumentId, DocumentLine};
    use facturo_inventory::ProductId;
    use facturo_parties::BuyerId;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Scripted authority: records the submitted payload, answers by plan.
    #[derive(Default)]
    struct ScriptedAuthority {
        healthy: Mutex<bool>,
        last_voucher: Mutex<u64>,
        response: Mutex<Option<Result<AuthorizationGrant, AuthorityError>>>,
        submitted: Mutex<Option<AuthorizationPayload>>,
    }

    impl ScriptedAuthority {
        fn healthy_with(last_voucher: u64) -> Self {
            let authority = Self::default();
            *authority.healthy.lock().unwrap() = true;
            *authority.last_voucher.lock().unwrap() = last_voucher;
            authority
        }

        fn grant_next(&self, voucher_number: u64) {
            *self.response.lock().unwrap() = Some(Ok(AuthorizationGrant {
                code: "70000000000042".to_string(),
                expires_on: NaiveDate::from_ymd_opt(2024, 6, 25).unwrap(),
                voucher_number,
            }));
        }
    }

    #[async_trait]
    impl AuthorityApi for ScriptedAuthority {
        async fn check_service(&self) -> Result<(), AuthorityError> {
            if *self.healthy.lock().unwrap() {
                Ok(())
            } else {
                Err(AuthorityError::Unavailable("service degraded".to_string()))
            }
        }

        async fn last_voucher_number(
            &self,
            _sales_point: u16,
            _external_code: u16,
        ) -> Result<u64, AuthorityError> {
            Ok(*self.last_voucher.lock().unwrap())
        }

        async fn authorize(
            &self,
            payload: &AuthorizationPayload,
        ) -> Result<AuthorizationGrant, AuthorityError> {
            *self.submitted.lock().unwrap() = Some(payload.clone());
            self.response
                .lock()
                .unwrap()
                .take()
                .expect("unplanned authorize call")
        }
    }

    fn consumer_buyer() -> Buyer {
        Buyer::new(
            BuyerId::new(EntityId::new()),
            "Jane Doe",
            TaxCondition::FinalConsumer,
            ReceiverId::NationalId("12345678".to_string()),
        )
        .unwrap()
    }

    fn business_buyer() -> Buyer {
        Buyer::new(
            BuyerId::new(EntityId::new()),
            "Acme SRL",
            TaxCondition::RegisteredBusiness,
            ReceiverId::TaxId("30500010912".to_string()),
        )
        .unwrap()
    }

    fn line(rate: Decimal) -> DocumentLine {
        DocumentLine::new(
            1,
            ProductId::new(EntityId::new()),
            "item",
            dec!(1),
            dec!(1210.00),
            rate,
        )
        .unwrap()
    }

    fn invoice_b(buyer: Buyer) -> Document {
        Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(3),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            buyer,
            vec![line(dec!(21))],
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn assembles_a_single_voucher_payload() {
        let authority = ScriptedAuthority::healthy_with(7);
        authority.grant_next(8);
        let workflow = AuthorizationWorkflow::new(&authority, 4);

        let grant = workflow.authorize(&invoice_b(consumer_buyer())).await.unwrap();
        assert_eq!(grant.voucher_number, 8);

        let payload = authority.submitted.lock().unwrap().clone().unwrap();
        assert_eq!(payload.sales_point, 4);
        assert_eq!(payload.external_code, 6);
        assert_eq!(payload.concept, CONCEPT_GOODS);
        assert_eq!(payload.voucher_from, 8);
        assert_eq!(payload.voucher_to, 8);
        assert_eq!(payload.issue_date, "20240615");
        assert_eq!(payload.net_total, dec!(1000.00));
        assert_eq!(payload.vat_total, dec!(210.00));
        assert_eq!(payload.gross_total, dec!(1210.00));
        assert_eq!(payload.receiver.kind_code, NATIONAL_ID_KIND);
        assert_eq!(payload.receiver.number, "12345678");
        assert_eq!(payload.vat_breakdown.len(), 1);
        assert_eq!(payload.vat_breakdown[0].rate_code, 5);
        assert!(payload.associated.is_none());
    }

    #[tokio::test]
    async fn class_a_demands_a_registered_business() {
        let authority = ScriptedAuthority::healthy_with(0);
        let workflow = AuthorizationWorkflow::new(&authority, 1);

        let doc = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceA,
            DocumentType::InvoiceA.format_number(1),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            consumer_buyer(),
            vec![line(dec!(21))],
            None,
        )
        .unwrap();

        let err = workflow.authorize(&doc).await.unwrap_err();
        match err {
            AuthorityError::Validation(msg) => assert!(msg.contains("class-A")),
            _ => panic!("Expected Validation error for consumer on class A"),
        }
        // Nothing was submitted.
        assert!(authority.submitted.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn class_a_uses_the_tax_id() {
        let authority = ScriptedAuthority::healthy_with(0);
        authority.grant_next(1);
        let workflow = AuthorizationWorkflow::new(&authority, 1);

        let doc = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceA,
            DocumentType::InvoiceA.format_number(1),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            business_buyer(),
            vec![line(dec!(21))],
            None,
        )
        .unwrap();

        workflow.authorize(&doc).await.unwrap();
        let payload = authority.submitted.lock().unwrap().clone().unwrap();
        assert_eq!(payload.receiver.kind_code, TAX_ID_KIND);
        assert_eq!(payload.receiver.number, "30500010912");
    }

    #[tokio::test]
    async fn credit_note_carries_the_associated_block() {
        let authority = ScriptedAuthority::healthy_with(0);
        authority.grant_next(1);
        let workflow = AuthorizationWorkflow::new(&authority, 2);

        let doc = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::CreditNoteA,
            DocumentType::CreditNoteA.format_number(1),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            business_buyer(),
            vec![line(dec!(21))],
            Some(AssociatedDocument {
                external_code: 1,
                sales_point: 2,
                voucher_number: 5,
            }),
        )
        .unwrap();

        workflow.authorize(&doc).await.unwrap();
        let payload = authority.submitted.lock().unwrap().clone().unwrap();
        let associated = payload.associated.unwrap();
        assert_eq!(associated.external_code, 1);
        assert_eq!(associated.sales_point, 2);
        assert_eq!(associated.voucher_number, 5);
    }

    #[tokio::test]
    async fn degraded_service_stops_before_submission() {
        let authority = ScriptedAuthority::default();
        let workflow = AuthorizationWorkflow::new(&authority, 1);

        let err = workflow.authorize(&invoice_b(consumer_buyer())).await.unwrap_err();
        match err {
            AuthorityError::Unavailable(_) => {}
            _ => panic!("Expected Unavailable for degraded service"),
        }
        assert!(authority.submitted.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn unsupported_rate_is_a_validation_failure() {
        let authority = ScriptedAuthority::healthy_with(0);
        let workflow = AuthorizationWorkflow::new(&authority, 1);

        let doc = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::InvoiceB,
            DocumentType::InvoiceB.format_number(1),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            consumer_buyer(),
            vec![line(dec!(13))],
            None,
        )
        .unwrap();

        let err = workflow.authorize(&doc).await.unwrap_err();
        match err {
            AuthorityError::Validation(msg) => assert!(msg.contains("unsupported")),
            _ => panic!("Expected Validation error for unsupported rate"),
        }
    }

    #[tokio::test]
    async fn delivery_notes_are_refused() {
        let authority = ScriptedAuthority::healthy_with(0);
        let workflow = AuthorizationWorkflow::new(&authority, 1);

        let doc = Document::issue(
            DocumentId::new(EntityId::new()),
            DocumentType::DeliveryNote,
            DocumentType::DeliveryNote.format_number(1),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            consumer_buyer(),
            vec![line(dec!(21))],
            None,
        )
        .unwrap();

        let err = workflow.authorize(&doc).await.unwrap_err();
        match err {
            AuthorityError::Validation(_) => {}
            _ => panic!("Expected Validation error for delivery note"),
        }
    }
}
