//! Wire-level types and the injected RPC capability.
//!
//! The transport (scheduling, HTTP, SOAP envelopes) is an external
//! collaborator; this module fixes the shapes both sides agree on.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::credentials::SigningCredentials;
use crate::error::{AuthorityError, RpcError};

/// Concept code for goods sales; the only concept this engine submits.
pub const CONCEPT_GOODS: u16 = 1;

/// Receiver-document kind codes on the wire.
pub const TAX_ID_KIND: u16 = 80;
pub const NATIONAL_ID_KIND: u16 = 96;
pub const UNIDENTIFIED_KIND: u16 = 99;

/// Bearer token granted by the authority's authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken(pub String);

/// Aggregated health report: healthy only if every layer reports OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub application: bool,
    pub database: bool,
    pub authentication: bool,
}

impl ServerStatus {
    pub fn healthy(&self) -> bool {
        self.application && self.database && self.authentication
    }
}

/// How the buyer is identified on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverRef {
    pub kind_code: u16,
    pub number: String,
}

/// One entry of the per-rate VAT array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatRateEntry {
    pub rate_code: u16,
    pub base: Decimal,
    pub amount: Decimal,
}

/// Mandatory reference block on credit/debit notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedVoucher {
    pub external_code: u16,
    pub sales_point: u16,
    pub voucher_number: u64,
}

/// A single-voucher authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationPayload {
    pub sales_point: u16,
    pub external_code: u16,
    pub concept: u16,
    pub receiver: ReceiverRef,
    /// Equal for single-document calls.
    pub voucher_from: u64,
    pub voucher_to: u64,
    /// Issue date rendered `YYYYMMDD`.
    pub issue_date: String,
    pub net_total: Decimal,
    pub vat_total: Decimal,
    pub gross_total: Decimal,
    pub vat_breakdown: Vec<VatRateEntry>,
    pub associated: Option<AssociatedVoucher>,
}

/// What the authority grants on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub code: String,
    pub expires_on: chrono::NaiveDate,
    pub voucher_number: u64,
}

/// The blocking RPC capability an external collaborator provides.
///
/// One call per operation; no batching. The engine layers session and
/// retry semantics on top (see [`crate::session::AuthorityClient`]).
#[async_trait]
pub trait AuthorityRpc: Send + Sync {
    async fn authenticate(
        &self,
        credentials: &SigningCredentials,
    ) -> Result<AccessToken, RpcError>;

    async fn server_status(&self) -> Result<ServerStatus, RpcError>;

    async fn last_voucher_number(
        &self,
        token: Option<&AccessToken>,
        sales_point: u16,
        external_code: u16,
    ) -> Result<u64, RpcError>;

    async fn authorize(
        &self,
        token: Option<&AccessToken>,
        payload: &AuthorizationPayload,
    ) -> Result<AuthorizationGrant, RpcError>;
}

/// What the authorization workflow needs from the client.
///
/// Split from [`AuthorityRpc`] so workflows never see tokens or session
/// state, and tests can script outcomes directly.
#[async_trait]
pub trait AuthorityApi: Send + Sync {
    /// Ok only when every health layer reports OK.
    async fn check_service(&self) -> Result<(), AuthorityError>;

    async fn last_voucher_number(
        &self,
        sales_point: u16,
        external_code: u16,
    ) -> Result<u64, AuthorityError>;

    async fn authorize(
        &self,
        payload: &AuthorizationPayload,
    ) -> Result<AuthorizationGrant, AuthorityError>;
}
