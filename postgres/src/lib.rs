//! `PostgreSQL` stores for Marquee.
//!
//! Implements the store contracts from `marquee-core` on top of sqlx:
//!
//! - [`PostgresLedger`]: showtime requests and published showtimes. A status
//!   transition runs in one transaction that locks the request row, takes a
//!   per-(screen, date) advisory lock, re-checks approved overlaps, then
//!   updates and publishes. Approvals on one screen and date are therefore
//!   serialized in the database, not in the process.
//! - [`PostgresRegistrationStore`]: owner registrations and user roles
//! - [`PostgresEntitlementStore`]: streaming entitlements; the upsert itself
//!   refuses to replace a purchase
//!
//! # Example
//!
//! ```no_run
//! use marquee_postgres::{connect, migrate, PostgresConfig, PostgresLedger};
//!
//! # async fn example() -> Result<(), marquee_core::ledger::LedgerError> {
//! let config = PostgresConfig::from_env();
//! let pool = connect(&config).await?;
//! migrate(&pool).await?;
//! let ledger = PostgresLedger::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entitlement;
mod ledger;
mod registration;
mod rows;

pub use config::PostgresConfig;
pub use entitlement::PostgresEntitlementStore;
pub use ledger::PostgresLedger;
pub use registration::PostgresRegistrationStore;

use marquee_core::ledger::LedgerError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`LedgerError::Unavailable`] if the database cannot be reached.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, LedgerError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.database_url)
        .await
        .map_err(|e| LedgerError::Unavailable(format!("Failed to connect: {e}")))
}

/// Run the bundled migrations.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), LedgerError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Migration failed: {e}")))
}

/// Map a sqlx error onto the store error taxonomy.
///
/// Connection-level failures are `Unavailable`, decoding failures are
/// `Serialization`, everything else is `Database`.
pub(crate) fn store_error(context: &str, error: &sqlx::Error) -> LedgerError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            LedgerError::Unavailable(format!("{context}: {error}"))
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => LedgerError::Serialization(format!("{context}: {error}")),
        _ => LedgerError::Database(format!("{context}: {error}")),
    }
}
