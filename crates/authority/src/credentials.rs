//! Signing-credential resolution with environment fallback.
//!
//! The workflow never learns where credentials live (file, secret store,
//! database row); it sees one capability: resolve the active certificate
//! and private key for the current deployment environment, falling back to
//! environment-agnostic entries.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deployment environment the engine runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

/// Kind of signing material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Certificate,
    PrivateKey,
}

/// One stored credential. Read-only from the engine's perspective;
/// managed by an external configuration collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxCredential {
    pub kind: CredentialKind,
    /// `None` means the entry applies to any environment.
    pub environment: Option<Environment>,
    pub content: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no active {kind:?} credential for {environment:?}")]
    Unavailable {
        kind: CredentialKind,
        environment: Environment,
    },
}

/// Capability: resolve signing material. Pure read.
pub trait CredentialProvider: Send + Sync {
    fn resolve(
        &self,
        kind: CredentialKind,
        environment: Environment,
    ) -> Result<String, CredentialError>;
}

/// The certificate/key pair a session signs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningCredentials {
    pub certificate: String,
    pub private_key: String,
}

/// Resolve both halves of the signing pair, or fail as a unit.
pub fn resolve_pair(
    provider: &dyn CredentialProvider,
    environment: Environment,
) -> Result<SigningCredentials, CredentialError> {
    let certificate = provider.resolve(CredentialKind::Certificate, environment)?;
    let private_key = provider.resolve(CredentialKind::PrivateKey, environment)?;
    Ok(SigningCredentials {
        certificate,
        private_key,
    })
}

/// In-memory credential store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<Vec<TaxCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, credential: TaxCredential) {
        self.entries
            .write()
            .expect("credential store lock poisoned")
            .push(credential);
    }
}

impl CredentialProvider for InMemoryCredentialStore {
    fn resolve(
        &self,
        kind: CredentialKind,
        environment: Environment,
    ) -> Result<String, CredentialError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CredentialError::Unavailable { kind, environment })?;

        let newest = |tagged: Option<Environment>| {
            entries
                .iter()
                .filter(|c| c.active && c.kind == kind && c.environment == tagged)
                .max_by_key(|c| c.created_at)
                .map(|c| c.content.clone())
        };

        // Environment-scoped lookup first, untagged entries as fallback.
        newest(Some(environment))
            .or_else(|| newest(None))
            .ok_or(CredentialError::Unavailable { kind, environment })
    }
}
