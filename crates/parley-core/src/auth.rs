//! Credential verification.
//!
//! The relay never interprets credentials itself; it hands them to an
//! [`IdentityVerifier`] and trusts the identity that comes back. Latency
//! and failure modes of the verifier are the engine's problem (it applies
//! a timeout), not this trait's.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::presence::Identity;

/// Verification failure.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The credential is missing, malformed, expired, or revoked.
    #[error("Invalid credential")]
    InvalidCredential,

    /// The verifier backend could not be reached.
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),
}

/// Verifies a bearer credential and resolves it to a stable identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `credential`, returning the identity it proves.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidCredential`] if the credential does
    /// not prove any identity.
    async fn verify(&self, credential: &str) -> Result<Identity, VerifyError>;
}

/// Verifier backed by a fixed token table.
///
/// Intended for development and tests; production deployments plug in a
/// real token verifier behind the same trait.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    /// Create an empty verifier (rejects everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verifier from a token -> identity table.
    #[must_use]
    pub fn from_tokens(tokens: HashMap<String, Identity>) -> Self {
        Self { tokens }
    }

    /// Add a token mapping.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<Identity>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, VerifyError> {
        self.tokens
            .get(credential)
            .cloned()
            .ok_or(VerifyError::InvalidCredential)
    }
}
