//! # Idempotency Repository
//!
//! Client-supplied idempotency keys, scoped per business.
//!
//! ## Claim Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  try_claim(key) ──► INSERT … ON CONFLICT DO NOTHING                    │
//! │       │                                                                 │
//! │       ├── inserted   → Claimed  (state = in_flight, our claim_token)   │
//! │       └── conflict   → Existing (whatever the first request left)      │
//! │                                                                         │
//! │  Claimed ──► complete(result)   in_flight → completed (cached)         │
//! │          └─► release()          row deleted, key usable again          │
//! │                                                                         │
//! │  Existing in_flight but stale ──► take_over()  CAS on claim_token      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `complete` and `release` only act on the claim the caller holds, so a
//! request whose lease was taken over cannot overwrite the new owner.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use scontrino_core::{IdempotencyRecord, IdempotencyState};

use crate::error::{DbError, DbResult};

/// How many times `try_claim` retries when the conflicting row disappears
/// between the insert and the read.
const CLAIM_ATTEMPTS: usize = 3;

#[derive(Debug, FromRow)]
struct RecordRow {
    business_id: String,
    idempotency_key: String,
    operation: String,
    state: IdempotencyState,
    claim_token: String,
    result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecordRow> for IdempotencyRecord {
    fn from(row: RecordRow) -> Self {
        IdempotencyRecord {
            business_id: row.business_id,
            idempotency_key: row.idempotency_key,
            operation: row.operation,
            state: row.state,
            claim_token: row.claim_token,
            result: row.result,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Outcome of [`IdempotencyRepository::try_claim`].
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The key was free; the caller now owns it.
    Claimed(IdempotencyRecord),
    /// The key was already taken by an earlier request.
    Existing(IdempotencyRecord),
}

/// Repository for idempotency records.
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: SqlitePool,
}

impl IdempotencyRepository {
    /// Creates a new IdempotencyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        IdempotencyRepository { pool }
    }

    /// Gets the record for a key.
    pub async fn get(
        &self,
        business_id: &str,
        idempotency_key: &str,
    ) -> DbResult<Option<IdempotencyRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT business_id, idempotency_key, operation, state,
                   claim_token, result, created_at, updated_at
            FROM idempotency_records
            WHERE business_id = ?1 AND idempotency_key = ?2
            "#,
        )
        .bind(business_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(IdempotencyRecord::from))
    }

    /// Claims a key for `operation`, or returns whoever holds it.
    pub async fn try_claim(
        &self,
        business_id: &str,
        idempotency_key: &str,
        operation: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ClaimOutcome> {
        for _ in 0..CLAIM_ATTEMPTS {
            let claim_token = Uuid::new_v4().to_string();

            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_records (
                    business_id, idempotency_key, operation, state,
                    claim_token, result, created_at, updated_at
                ) VALUES (?1, ?2, ?3, 'in_flight', ?4, NULL, ?5, ?5)
                ON CONFLICT (business_id, idempotency_key) DO NOTHING
                "#,
            )
            .bind(business_id)
            .bind(idempotency_key)
            .bind(operation)
            .bind(&claim_token)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                debug!(business_id, idempotency_key, operation, "Idempotency key claimed");
                return Ok(ClaimOutcome::Claimed(IdempotencyRecord {
                    business_id: business_id.to_string(),
                    idempotency_key: idempotency_key.to_string(),
                    operation: operation.to_string(),
                    state: IdempotencyState::InFlight,
                    claim_token,
                    result: None,
                    created_at: now,
                    updated_at: now,
                }));
            }

            if let Some(existing) = self.get(business_id, idempotency_key).await? {
                return Ok(ClaimOutcome::Existing(existing));
            }
            // Released between our insert and our read; try again
        }

        Err(DbError::Internal(format!(
            "idempotency key {} kept changing hands",
            idempotency_key
        )))
    }

    /// Stores the definitive outcome of a claimed key.
    pub async fn complete(
        &self,
        claim: &IdempotencyRecord,
        result: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records SET
                state = 'completed',
                result = ?4,
                updated_at = ?5
            WHERE business_id = ?1
              AND idempotency_key = ?2
              AND claim_token = ?3
              AND state = 'in_flight'
            "#,
        )
        .bind(&claim.business_id)
        .bind(&claim.idempotency_key)
        .bind(&claim.claim_token)
        .bind(result)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::stale(&claim.idempotency_key, "claimed by this request"));
        }

        Ok(())
    }

    /// Gives a claimed key back so the client can retry with it.
    ///
    /// Returns `false` if the claim was no longer ours.
    pub async fn release(&self, claim: &IdempotencyRecord) -> DbResult<bool> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE business_id = ?1
              AND idempotency_key = ?2
              AND claim_token = ?3
              AND state = 'in_flight'
            "#,
        )
        .bind(&claim.business_id)
        .bind(&claim.idempotency_key)
        .bind(&claim.claim_token)
        .execute(&self.pool)
        .await?;

        Ok(deleted.rows_affected() == 1)
    }

    /// Takes over an in-flight claim whose owner is presumed dead.
    ///
    /// Compare-and-set on the claim token seen by the caller: of several
    /// requests racing for the same stale claim, exactly one gets `Some`.
    pub async fn take_over(
        &self,
        stale: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> DbResult<Option<IdempotencyRecord>> {
        let claim_token = Uuid::new_v4().to_string();

        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records SET
                claim_token = ?4,
                updated_at = ?5
            WHERE business_id = ?1
              AND idempotency_key = ?2
              AND claim_token = ?3
              AND state = 'in_flight'
            "#,
        )
        .bind(&stale.business_id)
        .bind(&stale.idempotency_key)
        .bind(&stale.claim_token)
        .bind(&claim_token)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        debug!(
            business_id = %stale.business_id,
            idempotency_key = %stale.idempotency_key,
            "Stale idempotency claim taken over"
        );

        Ok(Some(IdempotencyRecord {
            claim_token,
            updated_at: now,
            ..stale.clone()
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
