//! # Reconciliation Sweep
//!
//! Background task that resolves documents whose authority outcome is still
//! open: crashed requests, lost responses, transient failures.
//!
//! ## Sweep Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation Sweep                                 │
//! │                                                                         │
//! │  every poll_interval:                                                  │
//! │                                                                         │
//! │  1. Load: PENDING / SUBMITTED / FAILED(retryable)                      │
//! │           untouched for grace_period, oldest first, batch_size         │
//! │                                                                         │
//! │  2. Claim: begin_attempt (compare-and-set; live requests win)          │
//! │                                                                         │
//! │  3. Lookup: authority.lookup(submission_token)                         │
//! │       ├── known     → commit confirmation locally      (Recovered)     │
//! │       ├── unknown, attempts exhausted → FAILED final   (Exhausted)     │
//! │       └── unknown   → resubmit with the same token                     │
//! │                         (Confirmed / Retrying / Rejected)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FiscalConfig;
use crate::error::FiscalResult;
use crate::state_machine::ReceiptStateMachine;

/// What the sweep did with one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The authority already had it; only the local commit was missing.
    Recovered,
    /// Resubmitted and accepted.
    Confirmed,
    /// Still unknown; left FAILED(retryable) for the next sweep.
    Retrying,
    /// Resubmitted and definitively refused.
    Rejected,
    /// Out of attempts; left for an operator.
    Exhausted,
    /// A live request moved it first.
    Skipped,
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub recovered: usize,
    pub confirmed: usize,
    pub retrying: usize,
    pub rejected: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Recovered => self.recovered += 1,
            SweepOutcome::Confirmed => self.confirmed += 1,
            SweepOutcome::Retrying => self.retrying += 1,
            SweepOutcome::Rejected => self.rejected += 1,
            SweepOutcome::Exhausted => self.exhausted += 1,
            SweepOutcome::Skipped => self.skipped += 1,
        }
    }
}

// =============================================================================
// Reconciliation Sweep
// =============================================================================

/// Periodically resolves documents with an open outcome.
pub struct ReconciliationSweep {
    machine: Arc<ReceiptStateMachine>,
    grace_period: chrono::Duration,
    poll_interval: Duration,
    batch_size: u32,
    max_attempts: i64,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running sweep.
#[derive(Clone)]
pub struct ReconciliationHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconciliationHandle {
    /// Triggers graceful shutdown. The current document finishes first.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(()).await.is_err() {
            debug!("Reconciliation sweep already stopped");
        }
    }
}

impl ReconciliationSweep {
    /// Creates a new sweep and returns a handle.
    pub fn new(
        machine: Arc<ReceiptStateMachine>,
        config: &FiscalConfig,
    ) -> (Self, ReconciliationHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let sweep = ReconciliationSweep {
            machine,
            grace_period: config.grace_period(),
            poll_interval: config.poll_interval(),
            batch_size: config.reconciliation.batch_size,
            max_attempts: config.reconciliation.max_attempts,
            shutdown_rx,
        };

        (sweep, ReconciliationHandle { shutdown_tx })
    }

    /// Creates a sweep and runs it on the current tokio runtime.
    pub fn spawn(
        machine: Arc<ReceiptStateMachine>,
        config: &FiscalConfig,
    ) -> (JoinHandle<()>, ReconciliationHandle) {
        let (sweep, handle) = Self::new(machine, config);
        (tokio::spawn(sweep.run()), handle)
    }

    /// Runs the sweep loop until shutdown.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            grace_secs = self.grace_period.num_seconds(),
            "Reconciliation sweep starting"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Reconciliation sweep shutting down");
                    break;
                }
            }
        }

        info!("Reconciliation sweep stopped");
    }

    /// Examines one batch of documents untouched for the grace period.
    pub async fn run_once(&self) -> FiscalResult<SweepReport> {
        self.sweep_untouched_since(Utc::now() - self.grace_period).await
    }

    async fn sweep_untouched_since(&self, cutoff: DateTime<Utc>) -> FiscalResult<SweepReport> {
        let docs = self
            .machine
            .database()
            .receipts()
            .list_unresolved(cutoff, self.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: docs.len(),
            ..SweepReport::default()
        };

        if docs.is_empty() {
            debug!("No documents to reconcile");
            return Ok(report);
        }

        for doc in docs {
            let document_id = doc.id.clone();
            match self.machine.reconcile(doc, self.max_attempts).await {
                Ok(outcome) => {
                    debug!(document_id = %document_id, ?outcome, "Document reconciled");
                    report.record(outcome);
                }
                Err(e) => {
                    warn!(document_id = %document_id, error = %e, "Could not reconcile document");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            recovered = report.recovered,
            confirmed = report.confirmed,
            retrying = report.retrying,
            exhausted = report.exhausted,
            "Reconciliation sweep finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedAuthority};
    use rust_decimal_macros::dec;
    use scontrino_core::{CartCalculator, CartLine, DocumentStatus, ReceiptDocument};
    use scontrino_db::{Database, DbConfig};

    struct Fixture {
        machine: Arc<ReceiptStateMachine>,
        authority: Arc<ScriptedAuthority>,
        sweep: ReconciliationSweep,
    }

    async fn setup(max_attempts: i64) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let authority = Arc::new(ScriptedAuthority::new());
        let mut config = FiscalConfig::default();
        config.reconciliation.max_attempts = max_attempts;

        let machine = Arc::new(ReceiptStateMachine::new(db, authority.clone(), &config));
        let (sweep, _handle) = ReconciliationSweep::new(machine.clone(), &config);

        Fixture {
            machine,
            authority,
            sweep,
        }
    }

    fn cart() -> Vec<CartLine> {
        vec![CartLine::new("Cornetto", dec!(2), dec!(1.30), "10%")]
    }

    /// Sweeps as if the grace period had already passed.
    async fn sweep_now(f: &Fixture) -> SweepReport {
        f.sweep
            .sweep_untouched_since(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_grace_period_protects_recent_documents() {
        let f = setup(10).await;
        f.authority.script([Scripted::Transient("timeout")]);
        f.machine.create_sale("biz-1", &cart()).await.unwrap_err();

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn test_lost_response_is_recovered_without_resubmitting() {
        let f = setup(10).await;
        f.authority.script([Scripted::AcceptButLoseResponse]);
        let err = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();
        let document_id = err.document_id().unwrap().to_string();

        let report = sweep_now(&f).await;
        assert_eq!(report.examined, 1);
        assert_eq!(report.recovered, 1);
        assert_eq!(f.authority.submit_calls(), 1);
        assert_eq!(f.authority.lookup_calls(), 1);

        let doc = f.machine.get_document("biz-1", &document_id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Confirmed);
        assert_eq!(doc.ade_progressive.as_deref(), Some("DCW2024/0001"));

        // Nothing left to do
        assert_eq!(sweep_now(&f).await.examined, 0);
    }

    #[tokio::test]
    async fn test_crash_after_submit_is_resubmitted() {
        let f = setup(10).await;
        let repo = f.machine.database().receipts();

        // A request died between SUBMITTED and the authority call
        let totals = CartCalculator::calculate(&cart()).unwrap();
        let sale = ReceiptDocument::new_sale("biz-1", totals.lines, totals.total, Utc::now());
        repo.insert_document(&sale).await.unwrap();
        repo.begin_attempt(&sale, Utc::now()).await.unwrap();

        let report = sweep_now(&f).await;
        assert_eq!(report.confirmed, 1);
        assert_eq!(f.authority.submit_calls(), 1);

        let doc = f.machine.get_document("biz-1", &sale.id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Confirmed);
        assert_eq!(doc.attempts, 2);
    }

    #[tokio::test]
    async fn test_lost_void_response_voids_sale() {
        let f = setup(10).await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        f.authority.script([Scripted::AcceptButLoseResponse]);

        let key = uuid::Uuid::new_v4().to_string();
        let err = f.machine.void_sale("biz-1", &sale.id, &key).await.unwrap_err();
        let void_id = err.document_id().unwrap().to_string();

        let report = sweep_now(&f).await;
        assert_eq!(report.recovered, 1);

        let void = f.machine.get_document("biz-1", &void_id).await.unwrap();
        assert_eq!(void.status, DocumentStatus::Confirmed);
        let sale = f.machine.get_document("biz-1", &sale.id).await.unwrap();
        assert_eq!(sale.status, DocumentStatus::Voided);

        // The client's retry now finds the confirmed void
        let replay = f.machine.void_sale("biz-1", &sale.id, &key).await.unwrap();
        assert_eq!(replay.id, void_id);
        assert_eq!(f.authority.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_still_failing_documents_stay_retryable() {
        let f = setup(10).await;
        f.authority.script([
            Scripted::Transient("timeout"),
            Scripted::Transient("timeout"),
        ]);
        let err = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();

        let report = sweep_now(&f).await;
        assert_eq!(report.retrying, 1);

        let doc = f
            .machine
            .get_document("biz-1", err.document_id().unwrap())
            .await
            .unwrap();
        assert!(doc.is_retryable_failure());
        assert_eq!(doc.attempts, 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_counts_as_attempt() {
        let f = setup(10).await;
        f.authority.script([Scripted::Transient("timeout")]);
        f.machine.create_sale("biz-1", &cart()).await.unwrap_err();
        f.authority.fail_lookups("lookup endpoint down");

        let report = sweep_now(&f).await;
        assert_eq!(report.retrying, 1);
        assert_eq!(f.authority.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_documents_need_an_operator() {
        let f = setup(1).await;
        f.authority.script([Scripted::Transient("timeout")]);
        let err = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();

        let report = sweep_now(&f).await;
        assert_eq!(report.exhausted, 1);

        let doc = f
            .machine
            .get_document("biz-1", err.document_id().unwrap())
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(!doc.retryable);
        assert_eq!(doc.failure_reason.as_deref(), Some("gave up after 2 attempts"));
        assert_eq!(f.authority.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_spawned_sweep_shuts_down() {
        let f = setup(10).await;
        let (task, handle) = ReconciliationSweep::spawn(f.machine.clone(), &FiscalConfig::default());

        handle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
