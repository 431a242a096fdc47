//! `PostgreSQL` registration store.

use crate::rows::{column, status_from_row, StatusColumns};
use crate::store_error;
use marquee_core::ledger::{LedgerError, StoreFuture};
use marquee_core::registration::{RegistrationOutcome, RegistrationStore, RegistrationTransition};
use marquee_core::types::{
    OwnerProfile, OwnerRegistrationRequest, RegistrationId, RequestStatus, Role, UserId,
};
use sqlx::postgres::{PgPool, PgRow};

const REGISTRATION_COLUMNS: &str = "id, submitted_by, business_name, contact_name, \
     contact_email, phone, city, status, decided_by, decided_at, rejection_reason, decision_id, \
     submitted_at";

/// Registration store over `owner_registrations` and `user_roles`.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Set a user's role directly. Used to seed administrators.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the write fails.
    pub async fn assign_role(&self, user_id: UserId, role: Role) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(*user_id.as_uuid())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("assign role", &e))?;
        Ok(())
    }

    async fn insert(&self, registration: OwnerRegistrationRequest) -> Result<RegistrationId, LedgerError> {
        let status = StatusColumns::of(&registration.status);
        let sql = format!(
            "INSERT INTO owner_registrations ({REGISTRATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(*registration.id.as_uuid())
            .bind(*registration.submitted_by.as_uuid())
            .bind(&registration.profile.business_name)
            .bind(&registration.profile.contact_name)
            .bind(&registration.profile.contact_email)
            .bind(&registration.profile.phone)
            .bind(&registration.profile.city)
            .bind(status.label)
            .bind(status.decided_by)
            .bind(status.decided_at)
            .bind(status.rejection_reason)
            .bind(status.decision_id)
            .bind(registration.submitted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("create registration", &e))?;
        Ok(registration.id)
    }

    async fn fetch(&self, registration_id: RegistrationId) -> Result<Option<OwnerRegistrationRequest>, LedgerError> {
        let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM owner_registrations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*registration_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("load registration", &e))?;
        row.as_ref().map(registration_from_row).transpose()
    }

    async fn fetch_pending(&self) -> Result<Vec<OwnerRegistrationRequest>, LedgerError> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM owner_registrations \
             WHERE status = 'pending' ORDER BY submitted_at, id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("list pending registrations", &e))?;
        rows.iter().map(registration_from_row).collect()
    }

    #[tracing::instrument(skip(self, transition), fields(%registration_id))]
    async fn apply_transition(
        &self,
        registration_id: RegistrationId,
        transition: RegistrationTransition,
    ) -> Result<RegistrationOutcome, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transition", &e))?;

        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM owner_registrations WHERE id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(*registration_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error("lock registration", &e))?;
        let Some(row) = row else {
            return Err(LedgerError::RequestNotFound(registration_id.to_string()));
        };
        let mut registration = registration_from_row(&row)?;
        if !registration.status.is_pending() {
            return Ok(RegistrationOutcome::AlreadyDecided(registration.status));
        }

        let target = transition.target_status();
        let status = StatusColumns::of(&target);
        sqlx::query(
            "UPDATE owner_registrations \
             SET status = $2, decided_by = $3, decided_at = $4, rejection_reason = $5, \
                 decision_id = $6 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(*registration_id.as_uuid())
        .bind(status.label)
        .bind(status.decided_by)
        .bind(status.decided_at)
        .bind(status.rejection_reason)
        .bind(status.decision_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("update registration", &e))?;

        if matches!(target, RequestStatus::Approved(_)) {
            // Only viewers are promoted; an admin keeps their role
            sqlx::query(
                "INSERT INTO user_roles (user_id, role) VALUES ($1, 'theatre_owner') \
                 ON CONFLICT (user_id) DO UPDATE SET role = 'theatre_owner' \
                 WHERE user_roles.role = 'viewer'",
            )
            .bind(*registration.submitted_by.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("promote owner", &e))?;
        }

        tx.commit()
            .await
            .map_err(|e| store_error("commit registration", &e))?;

        registration.status = target;
        tracing::info!(
            %registration_id,
            status = registration.status.label(),
            "Registration transition committed"
        );
        Ok(RegistrationOutcome::Committed(registration))
    }

    async fn fetch_role(&self, user_id: UserId) -> Result<Role, LedgerError> {
        let label: Option<String> = sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = $1")
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("load role", &e))?;

        match label {
            None => Ok(Role::Viewer),
            Some(label) => Role::parse(&label)
                .ok_or_else(|| LedgerError::Serialization(format!("unknown role: {label}"))),
        }
    }
}

fn registration_from_row(row: &PgRow) -> Result<OwnerRegistrationRequest, LedgerError> {
    Ok(OwnerRegistrationRequest {
        id: RegistrationId::from_uuid(column(row, "id")?),
        submitted_by: UserId::from_uuid(column(row, "submitted_by")?),
        profile: OwnerProfile {
            business_name: column(row, "business_name")?,
            contact_name: column(row, "contact_name")?,
            contact_email: column(row, "contact_email")?,
            phone: column(row, "phone")?,
            city: column(row, "city")?,
        },
        status: status_from_row(row)?,
        submitted_at: column(row, "submitted_at")?,
    })
}

impl RegistrationStore for PostgresRegistrationStore {
    fn create_registration(
        &self,
        registration: OwnerRegistrationRequest,
    ) -> StoreFuture<'_, RegistrationId, LedgerError> {
        Box::pin(self.insert(registration))
    }

    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<OwnerRegistrationRequest>, LedgerError> {
        Box::pin(self.fetch(registration_id))
    }

    fn list_pending_registrations(
        &self,
    ) -> StoreFuture<'_, Vec<OwnerRegistrationRequest>, LedgerError> {
        Box::pin(self.fetch_pending())
    }

    fn transition_registration(
        &self,
        registration_id: RegistrationId,
        transition: RegistrationTransition,
    ) -> StoreFuture<'_, RegistrationOutcome, LedgerError> {
        Box::pin(self.apply_transition(registration_id, transition))
    }

    fn role_of(&self, user_id: UserId) -> StoreFuture<'_, Role, LedgerError> {
        Box::pin(self.fetch_role(user_id))
    }
}
