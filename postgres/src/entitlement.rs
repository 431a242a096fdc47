//! `PostgreSQL` entitlement store.

use crate::rows::{column, from_db_int, to_db_int};
use crate::store_error;
use marquee_core::entitlement::{EntitlementKind, EntitlementStore, StreamingEntitlement};
use marquee_core::ledger::{LedgerError, StoreFuture};
use marquee_core::types::{MovieId, UserId};
use sqlx::postgres::{PgPool, PgRow};

/// Entitlements keyed by (user, movie) in `streaming_entitlements`.
#[derive(Clone)]
pub struct PostgresEntitlementStore {
    pool: PgPool,
}

impl PostgresEntitlementStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, entitlement: StreamingEntitlement) -> Result<StreamingEntitlement, LedgerError> {
        let rent_days = entitlement
            .kind
            .rent_duration_days()
            .map(|days| to_db_int(days, "rent days"))
            .transpose()?;

        // A purchase on record fails the WHERE and returns no row
        let row = sqlx::query(
            "INSERT INTO streaming_entitlements (user_id, movie_id, kind, rent_days, purchased_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, movie_id) DO UPDATE \
             SET kind = EXCLUDED.kind, rent_days = EXCLUDED.rent_days, \
                 purchased_at = EXCLUDED.purchased_at \
             WHERE streaming_entitlements.kind <> 'buy' \
             RETURNING user_id, movie_id, kind, rent_days, purchased_at",
        )
        .bind(*entitlement.user_id.as_uuid())
        .bind(*entitlement.movie_id.as_uuid())
        .bind(entitlement.kind.label())
        .bind(rent_days)
        .bind(entitlement.purchased_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("record entitlement", &e))?;

        if let Some(row) = row {
            return entitlement_from_row(&row);
        }
        self.fetch(entitlement.user_id, entitlement.movie_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Database("entitlement vanished after conflicting insert".into())
            })
    }

    async fn fetch(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> Result<Option<StreamingEntitlement>, LedgerError> {
        let row = sqlx::query(
            "SELECT user_id, movie_id, kind, rent_days, purchased_at \
             FROM streaming_entitlements WHERE user_id = $1 AND movie_id = $2",
        )
        .bind(*user_id.as_uuid())
        .bind(*movie_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("fetch entitlement", &e))?;
        row.as_ref().map(entitlement_from_row).transpose()
    }
}

fn entitlement_from_row(row: &PgRow) -> Result<StreamingEntitlement, LedgerError> {
    let label: String = column(row, "kind")?;
    let rent_days: Option<i32> = column(row, "rent_days")?;
    let kind = match (label.as_str(), rent_days) {
        ("buy", _) => EntitlementKind::Buy,
        ("rent", Some(days)) => EntitlementKind::Rent {
            days: from_db_int(days, "rent days")?,
        },
        (other, _) => {
            return Err(LedgerError::Serialization(format!(
                "invalid entitlement kind: {other}"
            )));
        },
    };
    Ok(StreamingEntitlement {
        user_id: UserId::from_uuid(column(row, "user_id")?),
        movie_id: MovieId::from_uuid(column(row, "movie_id")?),
        kind,
        purchased_at: column(row, "purchased_at")?,
    })
}

impl EntitlementStore for PostgresEntitlementStore {
    fn record_entitlement(
        &self,
        entitlement: StreamingEntitlement,
    ) -> StoreFuture<'_, StreamingEntitlement, LedgerError> {
        Box::pin(self.upsert(entitlement))
    }

    fn fetch_entitlement(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> StoreFuture<'_, Option<StreamingEntitlement>, LedgerError> {
        Box::pin(self.fetch(user_id, movie_id))
    }
}
