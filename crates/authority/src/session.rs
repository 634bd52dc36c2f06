//! The authority client: session lifecycle over the injected transport.
//!
//! One client is constructed at startup and injected wherever needed; the
//! lazily-built session (signing credentials + access token) lives behind
//! a lock inside it, with [`AuthorityClient::reset`] for test isolation.
//! An access token is only required in the production environment.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::{
    AccessToken, AuthorityApi, AuthorityRpc, AuthorizationGrant, AuthorizationPayload,
    ServerStatus,
};
use crate::credentials::{resolve_pair, CredentialProvider, Environment, SigningCredentials};
use crate::error::{AuthorityError, RpcError};

#[derive(Debug, Clone)]
struct Session {
    signing: SigningCredentials,
    token: Option<AccessToken>,
}

/// Client for the national tax authority.
pub struct AuthorityClient<R: AuthorityRpc> {
    rpc: R,
    environment: Environment,
    credentials: Arc<dyn CredentialProvider>,
    session: Mutex<Option<Session>>,
}

impl<R: AuthorityRpc> AuthorityClient<R> {
    pub fn new(rpc: R, environment: Environment, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            rpc,
            environment,
            credentials,
            session: Mutex::new(None),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Drop the cached session; the next call rebuilds it from scratch.
    pub async fn reset(&self) {
        *self.session.lock().await = None;
    }

    /// Return the cached session, building it on first use.
    async fn current_session(&self) -> Result<Session, AuthorityError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let session = self.build_session().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Rebuild the session, forcing re-authentication.
    async fn reauthenticate(&self) -> Result<Session, AuthorityError> {
        debug!("re-authenticating against the tax authority");
        let mut slot = self.session.lock().await;
        let session = self.build_session().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn build_session(&self) -> Result<Session, AuthorityError> {
        let signing = resolve_pair(self.credentials.as_ref(), self.environment)?;

        let token = match self.environment {
            Environment::Production => {
                let token = self
                    .rpc
                    .authenticate(&signing)
                    .await
                    .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;
                Some(token)
            }
            Environment::Development => None,
        };

        Ok(Session { signing, token })
    }

    pub async fn server_status(&self) -> Result<ServerStatus, AuthorityError> {
        self.rpc
            .server_status()
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl<R: AuthorityRpc> AuthorityApi for AuthorityClient<R> {
    async fn check_service(&self) -> Result<(), AuthorityError> {
        let status = self.server_status().await?;
        if !status.healthy() {
            return Err(AuthorityError::Unavailable(format!(
                "authority service degraded (application: {}, database: {}, authentication: {})",
                status.application, status.database, status.authentication
            )));
        }
        Ok(())
    }

    async fn last_voucher_number(
        &self,
        sales_point: u16,
        external_code: u16,
    ) -> Result<u64, AuthorityError> {
        let session = self.current_session().await?;

        match self
            .rpc
            .last_voucher_number(session.token.as_ref(), sales_point, external_code)
            .await
        {
            Ok(n) => Ok(n),
            Err(RpcError::Unauthenticated(reason)) => {
                warn!(%reason, "token refused on voucher lookup, re-authenticating once");
                let session = self.reauthenticate().await?;
                self.rpc
                    .last_voucher_number(session.token.as_ref(), sales_point, external_code)
                    .await
                    .map_err(|e| AuthorityError::Unavailable(e.to_string()))
            }
            Err(e) => Err(AuthorityError::Unavailable(e.to_string())),
        }
    }

    async fn authorize(
        &self,
        payload: &AuthorizationPayload,
    ) -> Result<AuthorizationGrant, AuthorityError> {
        let session = self.current_session().await?;

        let first = self
            .rpc
            .authorize(session.token.as_ref(), payload)
            .await;

        let result = match first {
            Err(RpcError::Unauthenticated(reason)) => {
                warn!(%reason, "token refused on authorization, re-authenticating once");
                let session = self.reauthenticate().await?;
                self.rpc.authorize(session.token.as_ref(), payload).await
            }
            other => other,
        };

        result.map_err(|e| match e {
            RpcError::Rejected { code, message } => AuthorityError::Rejected {
                kind: RpcError::rejection_kind(code),
                reason: format!("code {code}: {message}"),
            },
            other => AuthorityError::Unavailable(other.to_string()),
        })
    }
}
