//! The issuance transaction.
//!
//! Stock check, number allocation, document/line persistence and the stock
//! movement form one atomic unit against the store. The authorization call
//! happens after that unit committed, under a bounded timeout, and its
//! outcome never rolls the sale back: an unreachable authority leaves the
//! document pending, a rejection leaves it persisted and unauthorized.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use facturo_authority::{
    AuthorityApi, AuthorityError, AuthorizationWorkflow, RejectionKind,
};
use facturo_core::{DomainError, EntityId};
use facturo_documents::{
    rate_code, AssociatedDocument, AuthorizationStamp, Document, DocumentId, DocumentLine,
    DocumentType, StockEffect,
};
use facturo_inventory::ProductId;
use facturo_parties::Buyer;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::numbering::{NumberAllocator, MAX_ALLOCATION_ATTEMPTS};
use crate::store::{SalesStore, StoreError};

/// One requested line of a sale.
#[derive(Debug, Clone)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Falls back to the configured default rate.
    pub vat_rate: Option<Decimal>,
}

/// A sale entering the engine.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub buyer: Buyer,
    pub document_type: DocumentType,
    pub issue_date: NaiveDate,
    pub lines: Vec<LineRequest>,
    /// Required for directly-issued credit/debit notes.
    pub associated: Option<AssociatedDocument>,
}

/// What happened on the authorization leg of an issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationAttempt {
    /// The document type does not take authorization.
    NotRequired,
    Granted,
    /// Authority unreachable/degraded/timed out; the document stays
    /// pending and can be re-authorized later.
    Unavailable { reason: String },
    /// The authority refused; the commercial document persists
    /// unauthorized and the caller reacts on the kind.
    Rejected { kind: RejectionKind, reason: String },
}

/// The issued document plus the authorization outcome.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub document: Document,
    pub authorization: AuthorizationAttempt,
}

/// Outcome of a single authority call, before any persistence.
#[derive(Debug, Clone)]
pub(crate) enum AuthorityCall {
    Granted(AuthorizationStamp),
    Unavailable { reason: String },
    Rejected { kind: RejectionKind, reason: String },
}

/// Caller-facing engine: issue, re-authorize, cancel.
pub struct SalesEngine<S: SalesStore, A: AuthorityApi> {
    pub(crate) store: Arc<S>,
    authority: Arc<A>,
    config: EngineConfig,
}

impl<S: SalesStore, A: AuthorityApi> SalesEngine<S, A> {
    pub fn new(store: Arc<S>, authority: Arc<A>, config: EngineConfig) -> Self {
        Self {
            store,
            authority,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Issue a sales document.
    ///
    /// Validation and the stock pre-check abort before any mutation. Once
    /// the sale committed, authorization failures are reported on the
    /// outcome, never as an error that would suggest the sale was lost.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssueOutcome, EngineError> {
        let doc_type = request.document_type;
        let lines = self.build_lines(&request)?;

        if doc_type.requires_authorization() {
            // Abort on rates the authority would refuse before touching
            // stock or sequences.
            for line in &lines {
                rate_code(line.vat_rate())?;
            }
        }

        self.precheck_stock(doc_type, &lines).await?;

        let document = self
            .allocate_and_commit(doc_type, |number| {
                Document::issue(
                    DocumentId::new(EntityId::new()),
                    doc_type,
                    number,
                    request.issue_date,
                    request.buyer.clone(),
                    lines.clone(),
                    request.associated,
                )
            })
            .await?;

        info!(
            doc_type = ?doc_type,
            number = %document.number(),
            total = %document.total(),
            "document issued"
        );

        if !doc_type.requires_authorization() {
            return Ok(IssueOutcome {
                document,
                authorization: AuthorizationAttempt::NotRequired,
            });
        }

        let (document, authorization) = self.run_authorization(document).await?;
        Ok(IssueOutcome {
            document,
            authorization,
        })
    }

    /// Manual retry for a document left pending by an unreachable
    /// authority. There is no background daemon; an operator triggers this.
    pub async fn reauthorize(&self, id: DocumentId) -> Result<IssueOutcome, EngineError> {
        let document = self.store.fetch_document(id).await?;

        if !document.doc_type().requires_authorization() {
            return Err(EngineError::Validation(
                "document type does not take authorization".to_string(),
            ));
        }
        if document.authorization().is_some() {
            return Err(EngineError::Validation(
                "document is already authorized".to_string(),
            ));
        }
        if !document.awaiting_authorization() {
            return Err(EngineError::Validation(
                "document can no longer be authorized".to_string(),
            ));
        }

        let (document, authorization) = self.run_authorization(document).await?;
        Ok(IssueOutcome {
            document,
            authorization,
        })
    }

    fn build_lines(&self, request: &IssueRequest) -> Result<Vec<DocumentLine>, EngineError> {
        if request.lines.is_empty() {
            return Err(EngineError::Validation(
                "a sale needs at least one line".to_string(),
            ));
        }

        request
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                DocumentLine::new(
                    u32::try_from(i + 1).unwrap_or(u32::MAX),
                    line.product_id,
                    line.description.clone(),
                    line.quantity,
                    line.unit_price,
                    line.vat_rate.unwrap_or(self.config.default_vat_rate),
                )
                .map_err(EngineError::from)
            })
            .collect()
    }

    /// Every line's product must cover the requested quantity before
    /// anything mutates. The commit re-verifies under isolation; this
    /// check gives the caller a clean early abort.
    async fn precheck_stock(
        &self,
        doc_type: DocumentType,
        lines: &[DocumentLine],
    ) -> Result<(), EngineError> {
        if doc_type.stock_effect() != StockEffect::Deduct {
            return Ok(());
        }

        let mut requested: Vec<(ProductId, Decimal)> = Vec::new();
        for line in lines {
            match requested.iter_mut().find(|(id, _)| *id == line.product_id()) {
                Some((_, qty)) => *qty += line.quantity(),
                None => requested.push((line.product_id(), line.quantity())),
            }
        }

        for (product_id, quantity) in requested {
            let available = self.store.stock_on_hand(product_id).await?;
            if available < quantity {
                return Err(EngineError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Allocate a number and commit, retrying on the store's uniqueness
    /// constraint up to the allocation bound.
    pub(crate) async fn allocate_and_commit<F>(
        &self,
        doc_type: DocumentType,
        build: F,
    ) -> Result<Document, EngineError>
    where
        F: Fn(String) -> Result<Document, DomainError>,
    {
        let allocator = NumberAllocator::new(self.store.as_ref());

        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let number = allocator.next_number(doc_type).await?;
            let candidate = build(number)?;

            match self.store.commit_sale(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(StoreError::DuplicateNumber { number }) => {
                    warn!(attempt, %number, "number taken at commit, reallocating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::AllocationFailed {
            doc_type,
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    /// One authorization call under the configured timeout. Persists
    /// nothing; callers decide what a grant means for storage.
    pub(crate) async fn call_authority(
        &self,
        document: &Document,
    ) -> Result<AuthorityCall, EngineError> {
        let workflow =
            AuthorizationWorkflow::new(self.authority.as_ref(), self.config.sales_point);

        let outcome = tokio::time::timeout(
            self.config.authorize_timeout(),
            workflow.authorize(document),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                warn!(
                    number = %document.number(),
                    timeout_secs = self.config.authorize_timeout_secs,
                    "authorization call abandoned at the timeout boundary"
                );
                Ok(AuthorityCall::Unavailable {
                    reason: "authorization call timed out".to_string(),
                })
            }
            Ok(Ok(grant)) => Ok(AuthorityCall::Granted(AuthorizationStamp {
                code: grant.code,
                expires_on: grant.expires_on,
                voucher_number: grant.voucher_number,
            })),
            Ok(Err(AuthorityError::Rejected { kind, reason })) => {
                error!(
                    number = %document.number(),
                    ?kind,
                    %reason,
                    "authority rejected the document"
                );
                Ok(AuthorityCall::Rejected { kind, reason })
            }
            Ok(Err(AuthorityError::Validation(msg))) => Err(EngineError::Validation(msg)),
            Ok(Err(e)) => {
                warn!(
                    number = %document.number(),
                    error = %e,
                    "authority unavailable"
                );
                Ok(AuthorityCall::Unavailable {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Authorization leg of an issuance: a grant is stamped onto the
    /// stored document; everything else leaves it pending.
    async fn run_authorization(
        &self,
        document: Document,
    ) -> Result<(Document, AuthorizationAttempt), EngineError> {
        match self.call_authority(&document).await? {
            AuthorityCall::Granted(stamp) => {
                let updated = self
                    .store
                    .apply_authorization(document.id_typed(), &stamp)
                    .await?;
                Ok((updated, AuthorizationAttempt::Granted))
            }
            AuthorityCall::Unavailable { reason } => {
                Ok((document, AuthorizationAttempt::Unavailable { reason }))
            }
            AuthorityCall::Rejected { kind, reason } => {
                Ok((document, AuthorizationAttempt::Rejected { kind, reason }))
            }
        }
    }
}
