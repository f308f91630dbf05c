//! `PostgreSQL` storage for the studyhall reservation engine.
//!
//! [`PostgresStore`] implements every storage trait from `studyhall-core` on
//! one connection pool:
//!
//! - `ReservationStore`: check-then-insert and guarded status changes run in
//!   `SERIALIZABLE` transactions, retried on serialization failures
//! - `MembershipStore`: counter increment and identity binding commit together
//! - `DraftStore`: registration drafts with batched purge
//!
//! # Example
//!
//! ```ignore
//! use studyhall_postgres::PostgresStore;
//!
//! let store = PostgresStore::connect("postgres://localhost/studyhall", 10).await?;
//! store.migrate().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod memberships;
mod reservations;
mod rows;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use studyhall_core::error::StoreError;

/// Attempts for a `SERIALIZABLE` transaction before reporting contention.
const SERIALIZABLE_ATTEMPTS: u32 = 5;

/// Serialization failures retried inside the store
pub const STORE_SERIALIZATION_RETRIES_TOTAL: &str = "studyhall_store_serialization_retries_total";

/// Connection pool sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// PostgreSQL-backed store for reservations, memberships and drafts.
///
/// # Schema
///
/// Created by [`PostgresStore::migrate`] from `migrations/`:
/// `seats`, `reservations`, `members`, `sequence_counters`,
/// `registration_drafts`.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool with default settings apart from its size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let settings = PoolSettings {
            max_connections,
            ..PoolSettings::default()
        };
        Self::connect_with(database_url, &settings).await
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached
    /// within `settings.connect_timeout`.
    pub async fn connect_with(
        database_url: &str,
        settings: &PoolSettings,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("set isolation level", e))?;
        Ok(tx)
    }
}

/// Run `attempt` until it stops failing with contention, at most
/// [`SERIALIZABLE_ATTEMPTS`] times.
async fn with_serializable_retry<T, F, Fut>(
    operation: &'static str,
    mut attempt: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(StoreError::Contention(message)) if tries < SERIALIZABLE_ATTEMPTS => {
                metrics::counter!(STORE_SERIALIZATION_RETRIES_TOTAL, "operation" => operation)
                    .increment(1);
                tracing::debug!(operation, tries, %message, "Serialization conflict, retrying");
                tokio::time::sleep(Duration::from_millis(u64::from(tries) * 10)).await;
                tries += 1;
            }
            other => return other,
        }
    }
}

/// Map a driver error onto the engine's storage error kinds.
///
/// `40001` serialization failure, `40P01` deadlock and `55P03` lock timeout
/// are contention; decode problems are corruption; everything else is an
/// outage.
fn db_error(context: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001" | "40P01" | "55P03") => {
                StoreError::Contention(format!("{context}: {err}"))
            }
            _ => StoreError::Unavailable(format!("{context}: {err}")),
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(format!("{context}: {err}")),
        _ => StoreError::Unavailable(format!("{context}: {err}")),
    }
}

/// Convert a row limit for `LIMIT $n`.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_outages() {
        let err = db_error("get", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(message) if message.starts_with("get: ")));
    }

    #[test]
    fn decode_errors_are_corruption() {
        let err = db_error("get", sqlx::Error::ColumnNotFound("seat".to_string()));
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn limits_saturate() {
        assert_eq!(sql_limit(500), 500);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn contention_is_retried_then_reported() {
        let mut calls = 0;
        let result: Result<(), StoreError> = with_serializable_retry("test", || {
            calls += 1;
            async { Err(StoreError::Contention("40001".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Contention(_))));
        assert_eq!(calls, SERIALIZABLE_ATTEMPTS);
    }

    #[tokio::test]
    async fn outages_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), StoreError> = with_serializable_retry("test", || {
            calls += 1;
            async { Err(StoreError::Unavailable("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls, 1);
    }
}
