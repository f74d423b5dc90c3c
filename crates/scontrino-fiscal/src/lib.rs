//! # scontrino-fiscal: Receipt Lifecycle Engine for Scontrino
//!
//! Turns a merchant's cart into an immutable fiscal document, submits it to
//! the tax authority exactly once, survives partial failure of that
//! submission, and voids confirmed receipts idempotently under client
//! retries.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fiscal Engine Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  ReceiptApi (merchant UI surface)                │  │
//! │  │      create_sale • void_sale • retry_submission • search         │  │
//! │  └──────────────┬─────────────────────────────────┬─────────────────┘  │
//! │                 │                                 │                     │
//! │  ┌──────────────▼───────────────┐   ┌─────────────▼──────────────────┐ │
//! │  │     ReceiptStateMachine      │   │     ReceiptSearchEngine        │ │
//! │  │                              │   │                                │ │
//! │  │  CartCalculator (core)       │   │  date / progressive filters    │ │
//! │  │  IdempotencyGuard (voids)    │   │  newest first, no PENDING      │ │
//! │  │  guarded status transitions  │   │                                │ │
//! │  └──────┬───────────────▲───────┘   └────────────────────────────────┘ │
//! │         │               │                                               │
//! │  ┌──────▼────────┐  ┌───┴──────────────────┐                           │
//! │  │ FiscalAuthor- │  │ ReconciliationSweep  │  background task:         │
//! │  │ ityClient     │  │                      │  lookup by submission     │
//! │  │ (trait)       │  │                      │  token, then resubmit     │
//! │  └───────────────┘  └──────────────────────┘                           │
//! │                                                                         │
//! │  Persistence: scontrino-db (SQLite)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Merchant-facing operations and the tagged `ApiError`
//! - [`state_machine`] - SALE/VOID lifecycle
//! - [`idempotency`] - Client idempotency keys
//! - [`reconcile`] - Background reconciliation sweep
//! - [`search`] - History search
//! - [`authority`] - Tax authority client trait
//! - [`engine`] - Process wiring
//! - [`config`] - Configuration loading
//! - [`telemetry`] - Tracing bootstrap
//! - [`error`] - Error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod api;
pub mod authority;
pub mod config;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod reconcile;
pub mod search;
pub mod state_machine;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{ApiError, ApiResult, ReceiptApi, ReceiptResponse};
pub use authority::{AuthorityAck, AuthorityError, FiscalAuthorityClient};
pub use config::FiscalConfig;
pub use engine::FiscalEngine;
pub use error::{ErrorCode, FiscalError, FiscalResult};
pub use idempotency::IdempotencyGuard;
pub use reconcile::{ReconciliationHandle, ReconciliationSweep, SweepOutcome, SweepReport};
pub use search::ReceiptSearchEngine;
pub use state_machine::ReceiptStateMachine;
pub use telemetry::init_tracing;
