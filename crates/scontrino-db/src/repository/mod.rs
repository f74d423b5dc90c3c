//! # Repository Module
//!
//! Database repository implementations for Scontrino.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories                                         │
//! │                                                                         │
//! │  ReceiptStateMachine / ReconciliationSweep                             │
//! │       │                                                                 │
//! │       │  db.receipts().begin_attempt(&doc, now)                        │
//! │       ▼                                                                 │
//! │  ReceiptRepository                                                     │
//! │  ├── insert_document(&doc)          documents + line snapshots         │
//! │  ├── get_by_id(business, id)        always scoped to a business        │
//! │  ├── begin_attempt / mark_failed    guarded (compare-and-set) updates  │
//! │  └── confirm_sale / confirm_void    one transaction per confirmation   │
//! │                                                                         │
//! │  IdempotencyRepository              claim → complete | release         │
//! │  HistoryRepository                  filtered, newest-first listing     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every status UPDATE names the status it expects to move from. Zero rows
//! affected means another request got there first and surfaces as
//! [`DbError::StaleTransition`](crate::DbError::StaleTransition).

pub mod history;
pub mod idempotency;
pub mod receipt;
