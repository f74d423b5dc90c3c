//! # Engine Startup
//!
//! Wires the fiscal engine together for a process entry point. Nothing here
//! is global: the caller owns the returned [`FiscalEngine`].
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Engine Startup                                  │
//! │                                                                         │
//! │  1. Validate FiscalConfig ────────────────────────────────────────────► │
//! │                                                                         │
//! │  2. Connect to Database ──────────────────────────────────────────────► │
//! │     • SQLite with WAL mode                                              │
//! │     • Run pending migrations                                            │
//! │                                                                         │
//! │  3. Build ReceiptStateMachine ────────────────────────────────────────► │
//! │     • injected authority client                                         │
//! │                                                                         │
//! │  4. Spawn ReconciliationSweep ────────────────────────────────────────► │
//! │                                                                         │
//! │  5. Hand out ReceiptApi ──────────────────────────────────────────────► │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use scontrino_db::Database;

use crate::api::ReceiptApi;
use crate::authority::FiscalAuthorityClient;
use crate::config::FiscalConfig;
use crate::error::FiscalResult;
use crate::reconcile::{ReconciliationHandle, ReconciliationSweep};
use crate::state_machine::ReceiptStateMachine;

/// A running fiscal engine.
pub struct FiscalEngine {
    api: ReceiptApi,
    db: Database,
    sweep: ReconciliationHandle,
    sweep_task: JoinHandle<()>,
}

impl FiscalEngine {
    /// Connects to the database and starts the reconciliation sweep.
    pub async fn start(
        config: &FiscalConfig,
        authority: Arc<dyn FiscalAuthorityClient>,
    ) -> FiscalResult<Self> {
        config.validate()?;

        let db = Database::new(config.database_config()).await?;
        info!(path = ?config.database.path, "Database connected and migrations applied");

        Ok(Self::with_database(db, config, authority))
    }

    /// Starts the engine on an already-open database.
    pub fn with_database(
        db: Database,
        config: &FiscalConfig,
        authority: Arc<dyn FiscalAuthorityClient>,
    ) -> Self {
        let machine = Arc::new(ReceiptStateMachine::new(db.clone(), authority, config));
        let (sweep_task, sweep) = ReconciliationSweep::spawn(machine.clone(), config);

        info!("Fiscal engine started");

        FiscalEngine {
            api: ReceiptApi::new(machine),
            db,
            sweep,
            sweep_task,
        }
    }

    pub fn api(&self) -> &ReceiptApi {
        &self.api
    }

    /// Stops the sweep and closes the pool.
    pub async fn shutdown(self) {
        self.sweep.shutdown().await;
        if let Err(e) = self.sweep_task.await {
            warn!(error = %e, "Reconciliation task ended abnormally");
        }
        self.db.close().await;
        info!("Fiscal engine stopped");
    }
}
