//! `MembershipStore` and `DraftStore` on `PostgreSQL`.
//!
//! Identity assignment locks the period's counter row with an upsert, binds
//! the new value to the user and commits both together. A caller that loses
//! a same-user race rolls back, so its increment never becomes visible.

use crate::rows::{self, MEMBER_COLUMNS};
use crate::{PostgresStore, db_error, sql_limit};
use chrono::{DateTime, Utc};
use studyhall_core::error::StoreError;
use studyhall_core::membership::{MembershipIdentity, PeriodKey};
use studyhall_core::store::{AssignOutcome, DraftStore, MembershipStore, StoreFuture};
use studyhall_core::types::{RegistrationDraft, UserId};

/// How long an assignment waits for the counter row before reporting contention.
const COUNTER_LOCK_TIMEOUT: &str = "2s";

impl PostgresStore {
    async fn load_identity(
        &self,
        user_id: UserId,
    ) -> Result<Option<MembershipIdentity>, StoreError> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE user_id = $1");
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("load identity", e))?
            .as_ref()
            .map(rows::identity)
            .transpose()
    }

    async fn try_assign(
        &self,
        user_id: UserId,
        period: &PeriodKey,
        issued_at: DateTime<Utc>,
    ) -> Result<AssignOutcome, StoreError> {
        if let Some(existing) = self.load_identity(user_id).await? {
            return Ok(AssignOutcome::Existing(existing));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin assignment", e))?;
        sqlx::query(&format!("SET LOCAL lock_timeout = '{COUNTER_LOCK_TIMEOUT}'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("set lock timeout", e))?;

        let (value,): (i32,) = sqlx::query_as(
            "INSERT INTO sequence_counters (period, last_value) VALUES ($1, 1) \
             ON CONFLICT (period) DO UPDATE SET last_value = sequence_counters.last_value + 1 \
             RETURNING last_value",
        )
        .bind(period.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("advance counter", e))?;
        let sequence = u32::try_from(value)
            .map_err(|_| StoreError::Corrupt(format!("counter {period} at {value}")))?;

        let identity = MembershipIdentity::new(user_id, period.clone(), sequence, issued_at);
        let bound = sqlx::query(
            "INSERT INTO members (user_id, period, sequence, identifier, issued_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(*user_id.as_uuid())
        .bind(identity.period.as_str())
        .bind(value)
        .bind(&identity.identifier)
        .bind(identity.issued_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("bind identity", e))?;

        if bound.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| db_error("roll back lost assignment", e))?;
            return match self.load_identity(user_id).await? {
                Some(existing) => Ok(AssignOutcome::Existing(existing)),
                None => Err(StoreError::Contention(format!(
                    "identity for {user_id} bound concurrently but not visible yet"
                ))),
            };
        }

        tx.commit().await.map_err(|e| db_error("commit assignment", e))?;
        Ok(AssignOutcome::Assigned(identity))
    }
}

impl MembershipStore for PostgresStore {
    fn identity_of(&self, user_id: UserId) -> StoreFuture<'_, Option<MembershipIdentity>> {
        Box::pin(async move { self.load_identity(user_id).await })
    }

    fn assign_identity(
        &self,
        user_id: UserId,
        period: PeriodKey,
        issued_at: DateTime<Utc>,
    ) -> StoreFuture<'_, AssignOutcome> {
        Box::pin(async move { self.try_assign(user_id, &period, issued_at).await })
    }

    fn counter_value(&self, period: PeriodKey) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let value: Option<(i32,)> =
                sqlx::query_as("SELECT last_value FROM sequence_counters WHERE period = $1")
                    .bind(period.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| db_error("counter value", e))?;
            match value {
                None => Ok(0),
                Some((value,)) => u32::try_from(value)
                    .map_err(|_| StoreError::Corrupt(format!("counter {period} at {value}"))),
            }
        })
    }
}

impl DraftStore for PostgresStore {
    fn save_draft(&self, draft: RegistrationDraft) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO registration_drafts (id, contact, created_at, expires_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(*draft.id.as_uuid())
            .bind(&draft.contact)
            .bind(draft.created_at)
            .bind(draft.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("save draft", e))?;
            Ok(())
        })
    }

    fn purge_expired_drafts(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM registration_drafts WHERE id IN (\
                 SELECT id FROM registration_drafts WHERE expires_at <= $1 \
                 ORDER BY expires_at LIMIT $2 FOR UPDATE SKIP LOCKED)",
            )
            .bind(now)
            .bind(sql_limit(limit))
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("purge drafts", e))?;
            Ok(result.rows_affected())
        })
    }
}
