//! `facturo-authority` — the national tax authority boundary.
//!
//! Owns signing-credential resolution, the authority session/client, and
//! the workflow that turns a pending document into an authorized voucher.

pub mod client;
pub mod credentials;
pub mod error;
pub mod session;
pub mod workflow;

pub use client::{
    AccessToken, AuthorityApi, AuthorityRpc, AuthorizationGrant, AuthorizationPayload,
    AssociatedVoucher, ReceiverRef, ServerStatus, VatRateEntry, CONCEPT_GOODS,
    NATIONAL_ID_KIND, TAX_ID_KIND, UNIDENTIFIED_KIND,
};
pub use credentials::{
    resolve_pair, CredentialError, CredentialKind, CredentialProvider, Environment,
    InMemoryCredentialStore, SigningCredentials, TaxCredential,
};
pub use error::{AuthorityError, RejectionKind, RpcError};
pub use session::AuthorityClient;
pub use workflow::AuthorizationWorkflow;
