//! # Idempotency Guard
//!
//! At most one effect per client idempotency key, scoped per business.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  execute(business, key, operation, run)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  try_claim(key) ──► Claimed ──► run() ──► definitive? ──► complete()   │
//! │       │                                      │                          │
//! │       │                                      └── transient ──► release()│
//! │       ▼                                                                 │
//! │  Existing                                                              │
//! │   ├── other operation  → IdempotencyKeyConflict                        │
//! │   ├── completed        → replay cached outcome (run() never called)    │
//! │   ├── in flight        → ConcurrentRetry                               │
//! │   └── in flight, lease expired → take_over() ──► run() ...             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The claim record stands in for a row lock: no database transaction is
//! held open across the authority call inside `run`.

use std::future::Future;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use scontrino_core::validation::validate_uuid;
use scontrino_core::{IdempotencyRecord, IdempotencyState};
use scontrino_db::{ClaimOutcome, Database};

use crate::error::{FiscalError, FiscalResult};

/// Wraps a mutating operation so client retries replay its outcome.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    db: Database,
    lease: chrono::Duration,
}

impl IdempotencyGuard {
    /// `lease` is how long an in-flight claim is honored before another
    /// request may take it over.
    pub fn new(db: Database, lease: chrono::Duration) -> Self {
        IdempotencyGuard { db, lease }
    }

    /// Runs `run` at most once per `(business_id, idempotency_key)`.
    ///
    /// `operation` fingerprints the request; the same key sent with a
    /// different fingerprint is a client bug and fails with
    /// `IdempotencyKeyConflict`.
    pub async fn execute<T, F, Fut>(
        &self,
        business_id: &str,
        idempotency_key: &str,
        operation: &str,
        run: F,
    ) -> FiscalResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = FiscalResult<T>>,
    {
        validate_uuid("idempotency_key", idempotency_key)?;

        let repo = self.db.idempotency();
        let claim = match repo
            .try_claim(business_id, idempotency_key, operation, Utc::now())
            .await?
        {
            ClaimOutcome::Claimed(claim) => claim,
            ClaimOutcome::Existing(existing) => {
                if existing.operation != operation {
                    warn!(
                        business_id,
                        idempotency_key,
                        stored = %existing.operation,
                        requested = operation,
                        "Idempotency key reused for another operation"
                    );
                    return Err(FiscalError::IdempotencyKeyConflict {
                        idempotency_key: idempotency_key.to_string(),
                    });
                }

                match existing.state {
                    IdempotencyState::Completed => return replay(&existing),
                    IdempotencyState::InFlight => self.take_over_if_abandoned(existing).await?,
                }
            }
        };

        let outcome = run().await;
        self.settle(&claim, &outcome).await;
        outcome
    }

    async fn take_over_if_abandoned(
        &self,
        existing: IdempotencyRecord,
    ) -> FiscalResult<IdempotencyRecord> {
        let now = Utc::now();
        let busy = || FiscalError::ConcurrentRetry {
            resource: format!("idempotency key {}", existing.idempotency_key),
        };

        if now - existing.updated_at < self.lease {
            debug!(
                business_id = %existing.business_id,
                idempotency_key = %existing.idempotency_key,
                "Duplicate request while original is in flight"
            );
            return Err(busy());
        }

        match self.db.idempotency().take_over(&existing, now).await? {
            Some(claim) => {
                warn!(
                    business_id = %claim.business_id,
                    idempotency_key = %claim.idempotency_key,
                    since = %existing.updated_at,
                    "Taking over abandoned idempotency claim"
                );
                Ok(claim)
            }
            None => Err(busy()),
        }
    }

    /// Caches definitive outcomes; gives the key back otherwise.
    ///
    /// Bookkeeping failures are logged and never replace the outcome the
    /// caller is about to receive.
    async fn settle<T: Serialize>(&self, claim: &IdempotencyRecord, outcome: &FiscalResult<T>) {
        let repo = self.db.idempotency();

        let definitive = match outcome {
            Ok(_) => true,
            Err(err) => err.is_definitive(),
        };

        if definitive {
            match serde_json::to_string(outcome) {
                Ok(json) => match repo.complete(claim, &json, Utc::now()).await {
                    Ok(()) => {
                        debug!(
                            business_id = %claim.business_id,
                            idempotency_key = %claim.idempotency_key,
                            "Idempotent outcome cached"
                        );
                        return;
                    }
                    Err(e) => {
                        warn!(
                            idempotency_key = %claim.idempotency_key,
                            error = %e,
                            "Could not cache idempotent outcome"
                        );
                        return;
                    }
                },
                Err(e) => {
                    warn!(
                        idempotency_key = %claim.idempotency_key,
                        error = %e,
                        "Could not serialize idempotent outcome, releasing key"
                    );
                }
            }
        }

        match repo.release(claim).await {
            Ok(true) => debug!(
                idempotency_key = %claim.idempotency_key,
                "Idempotency key released for retry"
            ),
            Ok(false) => warn!(
                idempotency_key = %claim.idempotency_key,
                "Idempotency claim was taken over before release"
            ),
            Err(e) => warn!(
                idempotency_key = %claim.idempotency_key,
                error = %e,
                "Could not release idempotency key"
            ),
        }
    }
}

fn replay<T: DeserializeOwned>(record: &IdempotencyRecord) -> FiscalResult<T> {
    let raw = record.result.as_deref().ok_or_else(|| {
        FiscalError::Persistence(format!(
            "completed idempotency record {} has no result",
            record.idempotency_key
        ))
    })?;

    debug!(
        business_id = %record.business_id,
        idempotency_key = %record.idempotency_key,
        "Replaying cached outcome"
    );

    serde_json::from_str::<FiscalResult<T>>(raw)
        .map_err(|e| FiscalError::Persistence(format!("unreadable cached outcome: {}", e)))?
}
