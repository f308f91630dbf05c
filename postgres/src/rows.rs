//! Row decoding.
//!
//! Text columns hold the lowercase `as_str` forms of the core enums; a value
//! that no longer parses is reported as [`StoreError::Corrupt`].

use crate::db_error;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use studyhall_core::error::StoreError;
use studyhall_core::membership::{MembershipIdentity, PeriodKey};
use studyhall_core::types::{
    DateRange, LifecycleStatus, Money, PaymentMethod, PaymentStatus, Reservation, ReservationId,
    ResourceType, Seat, SeatClass, SeatLabel, TimeSlot, UserId,
};
use uuid::Uuid;

/// Columns selected whenever a full reservation is read.
pub(crate) const RESERVATION_COLUMNS: &str = "id, user_id, holder_name, resource_type, time_slot, \
     start_date, end_date, seat, amount_minor, payment_method, payment_status, lifecycle, \
     external_reference, note, confirmed_by, confirmed_at, cancelled_by, created_at, updated_at";

/// Columns selected whenever an identity is read.
pub(crate) const MEMBER_COLUMNS: &str = "user_id, period, sequence, identifier, issued_at";

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name).map_err(|e| db_error(name, e))
}

pub(crate) fn reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    let amount: i64 = column(row, "amount_minor")?;
    let amount = u64::try_from(amount)
        .map_err(|_| StoreError::Corrupt(format!("negative amount {amount}")))?;
    let seat: Option<String> = column(row, "seat")?;

    Ok(Reservation {
        id: ReservationId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        holder_name: column(row, "holder_name")?,
        resource_type: ResourceType::new(column::<String>(row, "resource_type")?)?,
        time_slot: TimeSlot::parse(&column::<String>(row, "time_slot")?)?,
        range: DateRange::new(
            column::<NaiveDate>(row, "start_date")?,
            column::<NaiveDate>(row, "end_date")?,
        )?,
        seat: seat.map(SeatLabel::new).transpose()?,
        amount: Money::from_minor(amount),
        payment_method: PaymentMethod::parse(&column::<String>(row, "payment_method")?)?,
        payment_status: PaymentStatus::parse(&column::<String>(row, "payment_status")?)?,
        lifecycle: LifecycleStatus::parse(&column::<String>(row, "lifecycle")?)?,
        external_reference: column(row, "external_reference")?,
        note: column(row, "note")?,
        confirmed_by: column::<Option<Uuid>>(row, "confirmed_by")?.map(UserId::from_uuid),
        confirmed_at: column::<Option<DateTime<Utc>>>(row, "confirmed_at")?,
        cancelled_by: column::<Option<Uuid>>(row, "cancelled_by")?.map(UserId::from_uuid),
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

pub(crate) fn reservation_id(row: &PgRow) -> Result<ReservationId, StoreError> {
    Ok(ReservationId::from_uuid(column(row, "id")?))
}

pub(crate) fn seat(row: &PgRow) -> Result<Seat, StoreError> {
    Ok(Seat {
        resource_type: ResourceType::new(column::<String>(row, "resource_type")?)?,
        label: SeatLabel::new(column::<String>(row, "label")?)?,
        class: SeatClass::parse(&column::<String>(row, "class")?)?,
    })
}

pub(crate) fn identity(row: &PgRow) -> Result<MembershipIdentity, StoreError> {
    let sequence: i32 = column(row, "sequence")?;
    let sequence = u32::try_from(sequence)
        .map_err(|_| StoreError::Corrupt(format!("negative sequence {sequence}")))?;
    let period = PeriodKey::parse(&column::<String>(row, "period")?)?;
    let identity = MembershipIdentity::new(
        UserId::from_uuid(column(row, "user_id")?),
        period,
        sequence,
        column(row, "issued_at")?,
    );

    let stored: String = column(row, "identifier")?;
    if stored != identity.identifier {
        return Err(StoreError::Corrupt(format!(
            "identifier {stored} does not match {}",
            identity.identifier
        )));
    }
    Ok(identity)
}
