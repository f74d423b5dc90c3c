//! # scontrino-db: Database Layer for Scontrino
//!
//! Local SQLite storage for fiscal documents, their line snapshots and the
//! idempotency records that guard VOID requests.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scontrino Data Flow                              │
//! │                                                                         │
//! │  ReceiptApi / ReceiptStateMachine (scontrino-fiscal)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  scontrino-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ ReceiptRepo    │   │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ IdempotencyRepo│   │ 001_init.sql │  │   │
//! │  │   │               │    │ HistoryRepo    │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (scontrino.db)                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scontrino_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("scontrino.db")).await?;
//! let doc = db.receipts().get_by_id("biz-1", &document_id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::history::{HistoryQuery, HistoryRepository};
pub use repository::idempotency::{ClaimOutcome, IdempotencyRepository};
pub use repository::receipt::ReceiptRepository;
