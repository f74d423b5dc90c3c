//! # Fiscal Authority Client
//!
//! The seam between the engine and the tax authority (AdE). Transport,
//! authentication and payload format live behind [`FiscalAuthorityClient`].
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  submit(sale)        ──► Ok(ack)  progressive + transaction id         │
//! │  cancel(void, sale)  ──► Err(Rejected)   definitive refusal            │
//! │                      ──► Err(Transient)  outcome unknown               │
//! │                                                                         │
//! │  lookup(token)       ──► Some(ack)  the authority accepted this token  │
//! │                      ──► None       it never saw (or accepted) it      │
//! │                                                                         │
//! │  Every call carries the document's submission_token. Sending the same  │
//! │  token twice yields the same ack: at most one fiscal effect per token. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scontrino_core::ReceiptDocument;

/// What the authority returns on acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityAck {
    /// Fiscal progressive number assigned by the authority.
    pub ade_progressive: String,
    pub ade_transaction_id: String,
}

/// Failed authority call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// The authority definitively refused the document.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Timeout, network failure, authority unavailable.
    /// The document may or may not have been registered.
    #[error("transient: {0}")]
    Transient(String),
}

/// Client for the tax authority's document endpoints.
#[async_trait]
pub trait FiscalAuthorityClient: Send + Sync {
    /// Registers a SALE.
    async fn submit(&self, document: &ReceiptDocument) -> Result<AuthorityAck, AuthorityError>;

    /// Registers the cancellation of `sale` by `void`.
    async fn cancel(
        &self,
        void: &ReceiptDocument,
        sale: &ReceiptDocument,
    ) -> Result<AuthorityAck, AuthorityError>;

    /// Asks whether the authority accepted a submission token.
    async fn lookup(&self, submission_token: &str) -> Result<Option<AuthorityAck>, AuthorityError>;
}

/// Runs an authority call with an upper bound on its duration.
///
/// An elapsed timer is indistinguishable from a lost response, so it is
/// reported as [`AuthorityError::Transient`].
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, AuthorityError>
where
    F: Future<Output = Result<T, AuthorityError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AuthorityError::Transient(format!(
            "no response within {}s",
            timeout.as_secs()
        ))),
    }
}
