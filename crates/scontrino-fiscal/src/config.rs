//! # Fiscal Configuration
//!
//! Configuration for the receipt lifecycle engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SCONTRINO_DATABASE_PATH=/var/lib/scontrino/receipts.db             │
//! │     SCONTRINO_AUTHORITY_TIMEOUT_SECS=20                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/scontrino/scontrino.toml (Linux)                         │
//! │     ~/Library/Application Support/it.scontrino.scontrino/... (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # scontrino.toml
//! [database]
//! path = "scontrino.db"
//! max_connections = 5
//!
//! [authority]
//! timeout_secs = 15
//!
//! [reconciliation]
//! grace_period_secs = 60   # must exceed the authority timeout
//! poll_interval_secs = 30
//! batch_size = 50
//! max_attempts = 10
//!
//! [idempotency]
//! in_flight_lease_secs = 120
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use scontrino_db::DbConfig;

use crate::error::{FiscalError, FiscalResult};

// =============================================================================
// Database Settings
// =============================================================================

/// Where receipts are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("scontrino.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Authority Settings
// =============================================================================

/// Calls to the fiscal authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritySettings {
    /// Upper bound on a single submit/cancel/lookup call (seconds).
    /// A call that runs longer is treated as a transient failure.
    #[serde(default = "default_authority_timeout")]
    pub timeout_secs: u64,
}

fn default_authority_timeout() -> u64 {
    15
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        AuthoritySettings {
            timeout_secs: default_authority_timeout(),
        }
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

/// Background sweep over documents with an open outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// How long a document must sit untouched before the sweep picks it up.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Interval between sweeps (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Documents examined per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Submission attempts before a document is handed to an operator.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
}

fn default_grace_period() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_attempts() -> i64 {
    10
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            grace_period_secs: default_grace_period(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

// =============================================================================
// Idempotency Settings
// =============================================================================

/// Client idempotency keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    /// An in-flight claim older than this belongs to a dead request and may
    /// be taken over (seconds).
    #[serde(default = "default_in_flight_lease")]
    pub in_flight_lease_secs: u64,
}

fn default_in_flight_lease() -> u64 {
    120
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        IdempotencySettings {
            in_flight_lease_secs: default_in_flight_lease(),
        }
    }
}

// =============================================================================
// Fiscal Configuration
// =============================================================================

/// Complete configuration of the fiscal engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiscalConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub authority: AuthoritySettings,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,

    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

impl FiscalConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (scontrino.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> FiscalResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading fiscal config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FiscalResult<()> {
        if self.database.max_connections == 0 {
            return Err(FiscalError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.authority.timeout_secs == 0 {
            return Err(FiscalError::Config(
                "authority.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.reconciliation.batch_size == 0 {
            return Err(FiscalError::Config(
                "reconciliation.batch_size must be greater than 0".into(),
            ));
        }

        if self.reconciliation.max_attempts <= 0 {
            return Err(FiscalError::Config(
                "reconciliation.max_attempts must be greater than 0".into(),
            ));
        }

        if self.reconciliation.poll_interval_secs == 0 {
            return Err(FiscalError::Config(
                "reconciliation.poll_interval_secs must be greater than 0".into(),
            ));
        }

        // The sweep must never race a request that is still waiting on the
        // authority
        if self.reconciliation.grace_period_secs <= self.authority.timeout_secs {
            return Err(FiscalError::Config(format!(
                "reconciliation.grace_period_secs ({}) must exceed authority.timeout_secs ({})",
                self.reconciliation.grace_period_secs, self.authority.timeout_secs
            )));
        }

        if self.idempotency.in_flight_lease_secs <= self.authority.timeout_secs {
            return Err(FiscalError::Config(format!(
                "idempotency.in_flight_lease_secs ({}) must exceed authority.timeout_secs ({})",
                self.idempotency.in_flight_lease_secs, self.authority.timeout_secs
            )));
        }

        Ok(())
    }

    /// Applies `SCONTRINO_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SCONTRINO_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        override_number(&lookup, "SCONTRINO_DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_number(&lookup, "SCONTRINO_AUTHORITY_TIMEOUT_SECS", &mut self.authority.timeout_secs);
        override_number(&lookup, "SCONTRINO_RECONCILIATION_GRACE_PERIOD_SECS", &mut self.reconciliation.grace_period_secs);
        override_number(&lookup, "SCONTRINO_RECONCILIATION_POLL_INTERVAL_SECS", &mut self.reconciliation.poll_interval_secs);
        override_number(&lookup, "SCONTRINO_RECONCILIATION_BATCH_SIZE", &mut self.reconciliation.batch_size);
        override_number(&lookup, "SCONTRINO_RECONCILIATION_MAX_ATTEMPTS", &mut self.reconciliation.max_attempts);
        override_number(&lookup, "SCONTRINO_IDEMPOTENCY_IN_FLIGHT_LEASE_SECS", &mut self.idempotency.in_flight_lease_secs);
    }

    /// Returns the default config file location for this platform.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("it", "scontrino", "scontrino")
            .map(|dirs| dirs.config_dir().join("scontrino.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database pool configuration for these settings.
    pub fn database_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone()).max_connections(self.database.max_connections)
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_secs(self.authority.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.poll_interval_secs)
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconciliation.grace_period_secs as i64)
    }

    pub fn in_flight_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idempotency.in_flight_lease_secs as i64)
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable config override"),
        }
    }
}
