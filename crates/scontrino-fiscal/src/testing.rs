//! Scripted in-memory authority for tests.
//!
//! Behaves like an authority that deduplicates by submission token: a token
//! that was accepted once always yields the same ack.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use scontrino_core::ReceiptDocument;

use crate::authority::{AuthorityAck, AuthorityError, FiscalAuthorityClient};

/// What the next submit/cancel call does.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Accept,
    Reject(&'static str),
    Transient(&'static str),
    /// Registers the document but the response never arrives.
    AcceptButLoseResponse,
    /// Never answers.
    Hang,
}

#[derive(Debug, Default)]
struct State {
    script: VecDeque<Scripted>,
    accepted: HashMap<String, AuthorityAck>,
    issued: u32,
    submit_calls: usize,
    cancel_calls: usize,
    lookup_calls: usize,
    lookup_error: Option<&'static str>,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedAuthority {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl ScriptedAuthority {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every call waits `latency` before answering.
    pub(crate) fn with_latency(latency: Duration) -> Self {
        ScriptedAuthority {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Queues outcomes for the next submit/cancel calls; once the queue is
    /// empty every call is accepted.
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Scripted>) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    pub(crate) fn fail_lookups(&self, reason: &'static str) {
        self.state.lock().unwrap().lookup_error = Some(reason);
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    pub(crate) fn cancel_calls(&self) -> usize {
        self.state.lock().unwrap().cancel_calls
    }

    pub(crate) fn lookup_calls(&self) -> usize {
        self.state.lock().unwrap().lookup_calls
    }

    /// Number of distinct documents the authority registered.
    pub(crate) fn registered(&self) -> usize {
        self.state.lock().unwrap().accepted.len()
    }

    async fn answer(&self, token: &str) -> Result<AuthorityAck, AuthorityError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.state.lock().unwrap().script.pop_front();
        match next.unwrap_or(Scripted::Accept) {
            Scripted::Accept => Ok(self.register(token)),
            Scripted::AcceptButLoseResponse => {
                self.register(token);
                Err(AuthorityError::Transient("connection reset".into()))
            }
            Scripted::Reject(reason) => Err(AuthorityError::Rejected(reason.into())),
            Scripted::Transient(reason) => Err(AuthorityError::Transient(reason.into())),
            Scripted::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn register(&self, token: &str) -> AuthorityAck {
        let mut state = self.state.lock().unwrap();
        if let Some(ack) = state.accepted.get(token) {
            return ack.clone();
        }

        state.issued += 1;
        let ack = AuthorityAck {
            ade_progressive: format!("DCW2024/{:04}", state.issued),
            ade_transaction_id: format!("tx-{}", state.issued),
        };
        state.accepted.insert(token.to_string(), ack.clone());
        ack
    }
}

#[async_trait]
impl FiscalAuthorityClient for ScriptedAuthority {
    async fn submit(&self, document: &ReceiptDocument) -> Result<AuthorityAck, AuthorityError> {
        self.state.lock().unwrap().submit_calls += 1;
        self.answer(&document.submission_token).await
    }

    async fn cancel(
        &self,
        void: &ReceiptDocument,
        _sale: &ReceiptDocument,
    ) -> Result<AuthorityAck, AuthorityError> {
        self.state.lock().unwrap().cancel_calls += 1;
        self.answer(&void.submission_token).await
    }

    async fn lookup(&self, submission_token: &str) -> Result<Option<AuthorityAck>, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        state.lookup_calls += 1;

        if let Some(reason) = state.lookup_error {
            return Err(AuthorityError::Transient(reason.into()));
        }

        Ok(state.accepted.get(submission_token).cloned())
    }
}
