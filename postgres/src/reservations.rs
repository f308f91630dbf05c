//! `ReservationStore` on `PostgreSQL`.

use crate::rows::{self, RESERVATION_COLUMNS};
use crate::{PostgresStore, db_error, sql_limit, with_serializable_retry};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgConnection;
use studyhall_core::error::StoreError;
use studyhall_core::status::StatusChange;
use studyhall_core::store::{
    ApplyOutcome, InsertOutcome, OccupancyQuery, ReservationStore, StoreFuture,
};
use studyhall_core::types::{
    Reservation, ReservationId, ResourceType, Seat, SeatLabel, TimeSlot, UserId,
};

/// SQL for "holds its seat": paid, or an open cash hold created at or after
/// the bind parameter `$n` (the instant minus the cash window).
fn occupying(cutoff_param: usize) -> String {
    format!(
        "seat IS NOT NULL AND lifecycle <> 'cancelled' AND (\
         payment_status IN ('completed', 'cash_collected') \
         OR (payment_status = 'cash_pending' AND created_at >= ${cutoff_param}))"
    )
}

/// The earliest of the owner's other reservations holding a membership for
/// dates overlapping `reservation`: paid and not over, or a cash hold created
/// at or after `cutoff`.
async fn membership_holder(
    conn: &mut PgConnection,
    reservation: &Reservation,
    cutoff: DateTime<Utc>,
) -> Result<Option<Reservation>, StoreError> {
    let sql = format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations \
         WHERE user_id = $1 AND id <> $2 AND start_date <= $4 AND end_date >= $3 \
         AND lifecycle NOT IN ('cancelled', 'expired') AND (\
         payment_status IN ('completed', 'cash_collected') \
         OR (payment_status = 'cash_pending' AND created_at >= $5)) \
         ORDER BY start_date, id LIMIT 1"
    );
    sqlx::query(&sql)
        .bind(*reservation.user_id.as_uuid())
        .bind(*reservation.id.as_uuid())
        .bind(reservation.range.start())
        .bind(reservation.range.end())
        .bind(cutoff)
        .fetch_optional(conn)
        .await
        .map_err(|e| db_error("membership holder", e))?
        .as_ref()
        .map(rows::reservation)
        .transpose()
}

/// Where to look for a seat holder.
struct SeatProbe<'a> {
    resource_type: &'a ResourceType,
    time_slot: TimeSlot,
    seat: &'a SeatLabel,
    start: NaiveDate,
    end: NaiveDate,
    exclude: ReservationId,
    cutoff: DateTime<Utc>,
}

impl<'a> SeatProbe<'a> {
    fn for_reservation(
        reservation: &'a Reservation,
        seat: &'a SeatLabel,
        cutoff: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_type: &reservation.resource_type,
            time_slot: reservation.time_slot,
            seat,
            start: reservation.range.start(),
            end: reservation.range.end(),
            exclude: reservation.id,
            cutoff,
        }
    }

    /// The earliest occupying reservation overlapping the probe, if any.
    async fn holder(&self, conn: &mut PgConnection) -> Result<Option<Reservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE resource_type = $1 AND time_slot = $2 AND seat = $3 AND id <> $4 \
             AND start_date <= $6 AND end_date >= $5 AND {} \
             ORDER BY start_date, id LIMIT 1",
            occupying(7)
        );
        sqlx::query(&sql)
            .bind(self.resource_type.as_str())
            .bind(self.time_slot.as_str())
            .bind(self.seat.as_str())
            .bind(*self.exclude.as_uuid())
            .bind(self.start)
            .bind(self.end)
            .bind(self.cutoff)
            .fetch_optional(conn)
            .await
            .map_err(|e| db_error("seat holder", e))?
            .as_ref()
            .map(rows::reservation)
            .transpose()
    }
}

async fn write_status(conn: &mut PgConnection, next: &Reservation) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE reservations SET payment_status = $2, lifecycle = $3, external_reference = $4, \
         note = $5, confirmed_by = $6, confirmed_at = $7, cancelled_by = $8, updated_at = $9 \
         WHERE id = $1",
    )
    .bind(*next.id.as_uuid())
    .bind(next.payment_status.as_str())
    .bind(next.lifecycle.as_str())
    .bind(next.external_reference.as_deref())
    .bind(next.note.as_deref())
    .bind(next.confirmed_by.map(|u| *u.as_uuid()))
    .bind(next.confirmed_at)
    .bind(next.cancelled_by.map(|u| *u.as_uuid()))
    .bind(next.updated_at)
    .execute(conn)
    .await
    .map_err(|e| db_error("update reservation", e))?;
    Ok(())
}

impl PostgresStore {
    async fn try_insert(
        &self,
        reservation: &Reservation,
        today: NaiveDate,
        cash_window: Duration,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.begin_serializable().await?;

        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = $1 AND lifecycle <> 'cancelled' \
             AND payment_status IN ('completed', 'cash_collected') \
             AND start_date <= $2 AND end_date >= $2 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let active = sqlx::query(&sql)
            .bind(*reservation.user_id.as_uuid())
            .bind(today)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("active membership", e))?;
        if let Some(row) = active {
            return Ok(InsertOutcome::ActiveMembership {
                existing: rows::reservation(&row)?,
            });
        }
        let cutoff = reservation.created_at - cash_window;
        if let Some(existing) = membership_holder(&mut tx, reservation, cutoff).await? {
            return Ok(InsertOutcome::ActiveMembership { existing });
        }

        if let Some(seat) = &reservation.seat {
            let probe = SeatProbe::for_reservation(reservation, seat, cutoff);
            if let Some(holder) = probe.holder(&mut tx).await? {
                return Ok(InsertOutcome::SeatTaken { holder });
            }
        }

        let amount = i64::try_from(reservation.amount.minor()).map_err(|_| {
            StoreError::Corrupt(format!("amount {} out of range", reservation.amount.minor()))
        })?;
        sqlx::query(&format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(*reservation.id.as_uuid())
        .bind(*reservation.user_id.as_uuid())
        .bind(&reservation.holder_name)
        .bind(reservation.resource_type.as_str())
        .bind(reservation.time_slot.as_str())
        .bind(reservation.range.start())
        .bind(reservation.range.end())
        .bind(reservation.seat.as_ref().map(SeatLabel::as_str))
        .bind(amount)
        .bind(reservation.payment_method.as_str())
        .bind(reservation.payment_status.as_str())
        .bind(reservation.lifecycle.as_str())
        .bind(reservation.external_reference.as_deref())
        .bind(reservation.note.as_deref())
        .bind(reservation.confirmed_by.map(|u| *u.as_uuid()))
        .bind(reservation.confirmed_at)
        .bind(reservation.cancelled_by.map(|u| *u.as_uuid()))
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("insert reservation", e))?;

        tx.commit().await.map_err(|e| db_error("commit insert", e))?;
        Ok(InsertOutcome::Inserted(reservation.clone()))
    }

    async fn try_apply(
        &self,
        id: ReservationId,
        change: &StatusChange,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.begin_serializable().await?;

        let sql =
            format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("lock reservation", e))?
        else {
            return Ok(ApplyOutcome::Missing);
        };
        let current = rows::reservation(&row)?;
        if !change.permits(&current) {
            return Ok(ApplyOutcome::Rejected(current));
        }

        if let Some((at, cash_window)) = change.membership_recheck() {
            if let Some(existing) = membership_holder(&mut tx, &current, at - cash_window).await? {
                let Some(lost) = change.lost_claim() else {
                    return Ok(ApplyOutcome::MembershipHeld { current, existing });
                };
                let failed = lost.apply_to(&current);
                write_status(&mut tx, &failed).await?;
                tx.commit().await.map_err(|e| db_error("commit membership loss", e))?;
                return Ok(ApplyOutcome::MembershipHeld {
                    current: failed,
                    existing,
                });
            }
        }

        if let (Some((at, cash_window)), Some(seat)) = (change.seat_recheck(), &current.seat) {
            let probe = SeatProbe::for_reservation(&current, seat, at - cash_window);
            let holder = probe.holder(&mut tx).await?;
            if let (Some(holder), Some(lost)) = (holder, change.lost_claim()) {
                let failed = lost.apply_to(&current);
                write_status(&mut tx, &failed).await?;
                tx.commit().await.map_err(|e| db_error("commit seat loss", e))?;
                return Ok(ApplyOutcome::SeatTaken {
                    current: failed,
                    holder,
                });
            }
        }

        let next = change.apply_to(&current);
        write_status(&mut tx, &next).await?;
        tx.commit().await.map_err(|e| db_error("commit status change", e))?;
        Ok(ApplyOutcome::Applied(next))
    }

    async fn list_ids<'q>(
        &self,
        context: &'static str,
        sql: &'q str,
        bind: impl FnOnce(sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>)
            -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<ReservationId>, StoreError> {
        bind(sqlx::query(sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(context, e))?
            .iter()
            .map(rows::reservation_id)
            .collect()
    }
}

impl ReservationStore for PostgresStore {
    fn insert_if_free(
        &self,
        reservation: Reservation,
        today: NaiveDate,
        cash_window: Duration,
    ) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            with_serializable_retry("insert_if_free", || {
                self.try_insert(&reservation, today, cash_window)
            })
            .await
        })
    }

    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
            sqlx::query(&sql)
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("get reservation", e))?
                .as_ref()
                .map(rows::reservation)
                .transpose()
        })
    }

    fn find_by_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE user_id = $1 \
                 ORDER BY created_at DESC, id"
            );
            sqlx::query(&sql)
                .bind(*user_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("find reservations by user", e))?
                .iter()
                .map(rows::reservation)
                .collect()
        })
    }

    fn occupying_overlaps(&self, query: OccupancyQuery) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations \
                 WHERE resource_type = $1 AND time_slot = $2 \
                 AND start_date <= $4 AND end_date >= $3 AND {} \
                 ORDER BY seat, start_date",
                occupying(5)
            );
            sqlx::query(&sql)
                .bind(query.resource_type.as_str())
                .bind(query.time_slot.as_str())
                .bind(query.range.start())
                .bind(query.range.end())
                .bind(query.now - query.cash_window)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("occupancy", e))?
                .iter()
                .map(rows::reservation)
                .collect()
        })
    }

    fn apply(&self, id: ReservationId, change: StatusChange) -> StoreFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            with_serializable_retry("apply", || self.try_apply(id, &change)).await
        })
    }

    fn stale_cash_holds(
        &self,
        now: DateTime<Utc>,
        cash_window: Duration,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(async move {
            self.list_ids(
                "stale cash holds",
                "SELECT id FROM reservations \
                 WHERE payment_status = 'cash_pending' AND lifecycle <> 'cancelled' \
                 AND created_at < $1 ORDER BY created_at, id LIMIT $2",
                |q| q.bind(now - cash_window).bind(sql_limit(limit)),
            )
            .await
        })
    }

    fn due_for_activation(
        &self,
        today: NaiveDate,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(async move {
            self.list_ids(
                "due for activation",
                "SELECT id FROM reservations \
                 WHERE payment_status IN ('completed', 'cash_collected') \
                 AND lifecycle = 'not_yet_active' AND start_date <= $1 AND end_date >= $1 \
                 ORDER BY created_at, id LIMIT $2",
                |q| q.bind(today).bind(sql_limit(limit)),
            )
            .await
        })
    }

    fn due_for_expiry(
        &self,
        today: NaiveDate,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(async move {
            self.list_ids(
                "due for expiry",
                "SELECT id FROM reservations \
                 WHERE payment_status IN ('completed', 'cash_collected') \
                 AND lifecycle IN ('not_yet_active', 'active') AND end_date < $1 \
                 ORDER BY created_at, id LIMIT $2",
                |q| q.bind(today).bind(sql_limit(limit)),
            )
            .await
        })
    }

    fn seats(&self, resource_type: ResourceType) -> StoreFuture<'_, Vec<Seat>> {
        Box::pin(async move {
            sqlx::query(
                "SELECT resource_type, label, class FROM seats \
                 WHERE resource_type = $1 ORDER BY label",
            )
            .bind(resource_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("seats", e))?
            .iter()
            .map(rows::seat)
            .collect()
        })
    }

    fn upsert_seats(&self, seats: Vec<Seat>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("begin seat upsert", e))?;
            let mut added = 0;
            for seat in &seats {
                let (inserted,): (bool,) = sqlx::query_as(
                    "INSERT INTO seats (resource_type, label, class) VALUES ($1, $2, $3) \
                     ON CONFLICT (resource_type, label) DO UPDATE SET class = EXCLUDED.class \
                     RETURNING (xmax = 0)",
                )
                .bind(seat.resource_type.as_str())
                .bind(seat.label.as_str())
                .bind(seat.class.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error("upsert seat", e))?;
                if inserted {
                    added += 1;
                }
            }
            tx.commit().await.map_err(|e| db_error("commit seat upsert", e))?;
            Ok(added)
        })
    }
}
