//! `PostgreSQL` showtime ledger.

use crate::rows::{
    column, entry_from_row, from_db_int, interval_from_row, status_from_row, to_db_int,
    StatusColumns,
};
use crate::store_error;
use chrono::NaiveDate;
use marquee_core::interval::Interval;
use marquee_core::ledger::{
    LedgerError, ShowtimeLedger, ShowtimeTransition, StoreFuture, TransitionOutcome,
};
use marquee_core::types::{
    LedgerEntry, MovieId, PublishedShowtime, RequestId, ScreenFormat, ScreenId, ShowtimeId,
    ShowtimeRequest, TheatreId, TierPricing, UserId,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::time::Instant;

const REQUEST_COLUMNS: &str = "id, theatre_id, screen_id, movie_id, movie_title, \
     movie_duration_minutes, show_date, start_time, occupied_from, occupied_until, format, \
     languages, pricing, status, decided_by, decided_at, rejection_reason, decision_id, \
     submitted_by, submitted_at";

/// Showtime ledger backed by `showtime_requests` and `published_showtimes`.
///
/// Pending intervals are stored as the caller sized them; approved intervals
/// are rewritten from the published showtime.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a ledger over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Every published showtime on a (screen, date), earliest first.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the query fails.
    pub async fn published_showtimes(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
    ) -> Result<Vec<PublishedShowtime>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, theatre_id, screen_id, movie_id, movie_title, show_date, start_time, \
             occupied_from, occupied_until, format, languages, pricing, published_at \
             FROM published_showtimes WHERE screen_id = $1 AND show_date = $2 \
             ORDER BY occupied_from",
        )
        .bind(*screen_id.as_uuid())
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list published showtimes", &e))?;

        rows.iter().map(published_from_row).collect()
    }

    async fn fetch_intervals(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, movie_title, occupied_from, occupied_until, status \
             FROM showtime_requests \
             WHERE screen_id = $1 AND show_date = $2 AND status IN ('pending', 'approved') \
             ORDER BY occupied_from, submitted_at",
        )
        .bind(*screen_id.as_uuid())
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list intervals", &e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn insert_request(
        &self,
        request: ShowtimeRequest,
        interval: Interval,
    ) -> Result<RequestId, LedgerError> {
        let status = StatusColumns::of(&request.status);
        let sql = format!(
            "INSERT INTO showtime_requests ({REQUEST_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             ON CONFLICT (id) DO NOTHING"
        );

        sqlx::query(&sql)
            .bind(*request.id.as_uuid())
            .bind(*request.theatre_id.as_uuid())
            .bind(*request.screen_id.as_uuid())
            .bind(*request.movie_id.as_uuid())
            .bind(&request.movie_title)
            .bind(to_db_int(request.movie_duration_minutes, "movie duration")?)
            .bind(request.date)
            .bind(request.start_time)
            .bind(interval.start())
            .bind(interval.end())
            .bind(request.format.as_str())
            .bind(&request.languages)
            .bind(Json(request.pricing))
            .bind(status.label)
            .bind(status.decided_by)
            .bind(status.decided_at)
            .bind(status.rejection_reason)
            .bind(status.decision_id)
            .bind(*request.submitted_by.as_uuid())
            .bind(request.submitted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("create pending request", &e))?;

        tracing::debug!(request_id = %request.id, "Pending request stored");
        Ok(request.id)
    }

    async fn fetch_request(&self, request_id: RequestId) -> Result<Option<ShowtimeRequest>, LedgerError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM showtime_requests WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*request_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("load request", &e))?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn fetch_pending(&self) -> Result<Vec<ShowtimeRequest>, LedgerError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM showtime_requests \
             WHERE status = 'pending' ORDER BY submitted_at, id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("list pending requests", &e))?;
        rows.iter().map(request_from_row).collect()
    }

    #[tracing::instrument(skip(self, transition), fields(%request_id))]
    async fn apply_transition(
        &self,
        request_id: RequestId,
        transition: ShowtimeTransition,
    ) -> Result<TransitionOutcome, LedgerError> {
        let started = Instant::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transition", &e))?;

        let sql = format!("SELECT {REQUEST_COLUMNS} FROM showtime_requests WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(*request_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error("lock request", &e))?;
        let Some(row) = row else {
            return Err(LedgerError::RequestNotFound(request_id.to_string()));
        };
        let mut request = request_from_row(&row)?;
        if !request.is_pending() {
            return Ok(TransitionOutcome::AlreadyDecided(request.status));
        }

        match &transition {
            ShowtimeTransition::Approve { showtime, .. } => {
                if let Some(blocking) = lock_and_find_overlap(&mut tx, &request, showtime).await? {
                    metrics::counter!("marquee_postgres_stale_transitions_total").increment(1);
                    tracing::warn!(
                        %request_id,
                        blocking = %blocking.request_id,
                        "Approval refused: overlapping showtime already approved"
                    );
                    return Ok(TransitionOutcome::Stale { blocking });
                }
                let target = transition.target_status();
                let status = StatusColumns::of(&target);
                update_status(&mut tx, request_id, &status, Some(showtime)).await?;
                insert_published(&mut tx, showtime).await?;
            },
            ShowtimeTransition::Reject { .. } => {
                let target = transition.target_status();
                let status = StatusColumns::of(&target);
                update_status(&mut tx, request_id, &status, None).await?;
            },
        }

        tx.commit()
            .await
            .map_err(|e| store_error("commit transition", &e))?;

        request.status = transition.target_status();
        metrics::histogram!("marquee_postgres_transition_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(%request_id, status = request.status.label(), "Transition committed");
        Ok(TransitionOutcome::Committed(request))
    }
}

/// Serialize approvals on the request's (screen, date), then look for an
/// approved interval the new showtime would overlap.
async fn lock_and_find_overlap(
    tx: &mut Transaction<'static, Postgres>,
    request: &ShowtimeRequest,
    showtime: &PublishedShowtime,
) -> Result<Option<LedgerEntry>, LedgerError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || '/' || $2::text, 0))")
        .bind(*request.screen_id.as_uuid())
        .bind(request.date)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error("lock ledger", &e))?;

    let row = sqlx::query(
        "SELECT id, movie_title, occupied_from, occupied_until, status \
         FROM showtime_requests \
         WHERE screen_id = $1 AND show_date = $2 AND status = 'approved' AND id <> $3 \
           AND occupied_from < $5 AND $4 < occupied_until \
         ORDER BY occupied_from LIMIT 1",
    )
    .bind(*request.screen_id.as_uuid())
    .bind(request.date)
    .bind(*request.id.as_uuid())
    .bind(showtime.interval.start())
    .bind(showtime.interval.end())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| store_error("check overlap", &e))?;

    row.as_ref().map(entry_from_row).transpose()
}

async fn update_status(
    tx: &mut Transaction<'static, Postgres>,
    request_id: RequestId,
    status: &StatusColumns<'_>,
    showtime: Option<&PublishedShowtime>,
) -> Result<(), LedgerError> {
    let result = sqlx::query(
        "UPDATE showtime_requests \
         SET status = $2, decided_by = $3, decided_at = $4, rejection_reason = $5, \
             decision_id = $6, \
             occupied_from = COALESCE($7, occupied_from), \
             occupied_until = COALESCE($8, occupied_until) \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(*request_id.as_uuid())
    .bind(status.label)
    .bind(status.decided_by)
    .bind(status.decided_at)
    .bind(status.rejection_reason)
    .bind(status.decision_id)
    .bind(showtime.map(|s| s.interval.start()))
    .bind(showtime.map(|s| s.interval.end()))
    .execute(&mut **tx)
    .await
    .map_err(|e| store_error("update status", &e))?;

    // The row is locked FOR UPDATE, so this only trips on a schema mismatch
    if result.rows_affected() != 1 {
        return Err(LedgerError::Database(format!(
            "status update touched {} rows",
            result.rows_affected()
        )));
    }
    Ok(())
}

async fn insert_published(
    tx: &mut Transaction<'static, Postgres>,
    showtime: &PublishedShowtime,
) -> Result<(), LedgerError> {
    sqlx::query(
        "INSERT INTO published_showtimes \
         (id, theatre_id, screen_id, movie_id, movie_title, show_date, start_time, \
          occupied_from, occupied_until, format, languages, pricing, published_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(*showtime.request_id.as_uuid())
    .bind(*showtime.theatre_id.as_uuid())
    .bind(*showtime.screen_id.as_uuid())
    .bind(*showtime.movie_id.as_uuid())
    .bind(&showtime.movie_title)
    .bind(showtime.date)
    .bind(showtime.start_time)
    .bind(showtime.interval.start())
    .bind(showtime.interval.end())
    .bind(showtime.format.as_str())
    .bind(&showtime.languages)
    .bind(Json(showtime.pricing))
    .bind(showtime.published_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| store_error("publish showtime", &e))?;
    Ok(())
}

fn format_from_row(row: &PgRow) -> Result<ScreenFormat, LedgerError> {
    let label: String = column(row, "format")?;
    ScreenFormat::parse(&label)
        .ok_or_else(|| LedgerError::Serialization(format!("unknown screen format: {label}")))
}

fn request_from_row(row: &PgRow) -> Result<ShowtimeRequest, LedgerError> {
    let Json(pricing): Json<TierPricing> = column(row, "pricing")?;
    Ok(ShowtimeRequest {
        id: RequestId::from_uuid(column(row, "id")?),
        theatre_id: TheatreId::from_uuid(column(row, "theatre_id")?),
        screen_id: ScreenId::from_uuid(column(row, "screen_id")?),
        movie_id: MovieId::from_uuid(column(row, "movie_id")?),
        movie_title: column(row, "movie_title")?,
        movie_duration_minutes: from_db_int(column(row, "movie_duration_minutes")?, "movie duration")?,
        date: column(row, "show_date")?,
        start_time: column(row, "start_time")?,
        format: format_from_row(row)?,
        languages: column(row, "languages")?,
        pricing,
        status: status_from_row(row)?,
        submitted_by: UserId::from_uuid(column(row, "submitted_by")?),
        submitted_at: column(row, "submitted_at")?,
    })
}

fn published_from_row(row: &PgRow) -> Result<PublishedShowtime, LedgerError> {
    let request_id = RequestId::from_uuid(column(row, "id")?);
    let Json(pricing): Json<TierPricing> = column(row, "pricing")?;
    Ok(PublishedShowtime {
        id: ShowtimeId::for_request(request_id),
        request_id,
        theatre_id: TheatreId::from_uuid(column(row, "theatre_id")?),
        screen_id: ScreenId::from_uuid(column(row, "screen_id")?),
        movie_id: MovieId::from_uuid(column(row, "movie_id")?),
        movie_title: column(row, "movie_title")?,
        date: column(row, "show_date")?,
        start_time: column(row, "start_time")?,
        interval: interval_from_row(row)?,
        format: format_from_row(row)?,
        languages: column(row, "languages")?,
        pricing,
        published_at: column(row, "published_at")?,
    })
}

impl ShowtimeLedger for PostgresLedger {
    fn list_intervals(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
    ) -> StoreFuture<'_, Vec<LedgerEntry>, LedgerError> {
        Box::pin(self.fetch_intervals(screen_id, date))
    }

    fn create_pending_request(
        &self,
        request: ShowtimeRequest,
        occupied: Interval,
    ) -> StoreFuture<'_, RequestId, LedgerError> {
        Box::pin(self.insert_request(request, occupied))
    }

    fn load_request(
        &self,
        request_id: RequestId,
    ) -> StoreFuture<'_, Option<ShowtimeRequest>, LedgerError> {
        Box::pin(self.fetch_request(request_id))
    }

    fn list_pending_requests(&self) -> StoreFuture<'_, Vec<ShowtimeRequest>, LedgerError> {
        Box::pin(self.fetch_pending())
    }

    fn transition_request(
        &self,
        request_id: RequestId,
        transition: ShowtimeTransition,
    ) -> StoreFuture<'_, TransitionOutcome, LedgerError> {
        Box::pin(self.apply_transition(request_id, transition))
    }
}
