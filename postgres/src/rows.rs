//! Row decoding.
//!
//! Queries are built at runtime, so every column is read with
//! [`Row::try_get`] and checked on the way into the domain types.

use crate::error::map_sqlx;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tutorlane_core::audit::{AuditAction, AuditSubject, ModerationLogEntry};
use tutorlane_core::booking::BookingStatus;
use tutorlane_core::model::{Booking, CourseMonth, Enrollment, MonthPayment, RecurringCourse, Slot};
use tutorlane_core::payment::PaymentStatus;
use tutorlane_core::store::StoreError;
use tutorlane_core::types::{
    BookingId, Capacity, CourseId, CourseMonthId, EnrollmentId, LogEntryId, Money, PaymentId,
    SlotId, UserId, Version,
};
use uuid::Uuid;

type Result<T> = std::result::Result<T, StoreError>;

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(map_sqlx)
}

fn uuid(row: &PgRow, column: &str) -> Result<Uuid> {
    get(row, column)
}

fn money(row: &PgRow, column: &str) -> Result<Money> {
    let cents: i64 = get(row, column)?;
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Decode(format!("negative amount in {column}: {cents}")))
}

fn count(row: &PgRow, column: &str) -> Result<u32> {
    let value: i32 = get(row, column)?;
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("negative {column}: {value}")))
}

fn version(row: &PgRow) -> Result<Version> {
    let value: i64 = get(row, "version")?;
    u64::try_from(value)
        .map(Version::new)
        .map_err(|_| StoreError::Decode(format!("negative version: {value}")))
}

/// Convert a count or amount into a `BIGINT` bind value.
pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::Decode(format!("{what} out of range: {value}")))
}

/// Convert a small count into an `INTEGER` bind value.
pub(crate) fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Decode(format!("{what} out of range: {value}")))
}

pub(crate) fn slot(row: &PgRow) -> Result<Slot> {
    let capacity = count(row, "capacity")?;
    Ok(Slot {
        id: SlotId::from_uuid(uuid(row, "id")?),
        teacher_id: UserId::from_uuid(uuid(row, "teacher_id")?),
        starts_at: get(row, "starts_at")?,
        ends_at: get(row, "ends_at")?,
        capacity: Capacity::new(capacity)
            .ok_or_else(|| StoreError::Decode("slot capacity of zero".to_string()))?,
        unit_price: money(row, "unit_price")?,
        location_ref: get(row, "location_ref")?,
        version: version(row)?,
    })
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking> {
    let status: String = get(row, "status")?;
    let slot_id: Option<Uuid> = get(row, "slot_id")?;
    Ok(Booking {
        id: BookingId::from_uuid(uuid(row, "id")?),
        slot_id: slot_id.map(SlotId::from_uuid),
        student_id: UserId::from_uuid(uuid(row, "student_id")?),
        teacher_id: UserId::from_uuid(uuid(row, "teacher_id")?),
        requested_at: get(row, "requested_at")?,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown booking status '{status}'")))?,
        price: money(row, "price")?,
        meeting_ref: get(row, "meeting_ref")?,
        notes: get(row, "notes")?,
        version: version(row)?,
    })
}

pub(crate) fn course(row: &PgRow) -> Result<RecurringCourse> {
    Ok(RecurringCourse {
        id: CourseId::from_uuid(uuid(row, "id")?),
        teacher_id: UserId::from_uuid(uuid(row, "teacher_id")?),
        title: get(row, "title")?,
        price_per_month: money(row, "price_per_month")?,
        duration_months: count(row, "duration_months")?,
        archived: get(row, "archived")?,
        version: version(row)?,
    })
}

pub(crate) fn course_month(row: &PgRow) -> Result<CourseMonth> {
    Ok(CourseMonth {
        id: CourseMonthId::from_uuid(uuid(row, "id")?),
        course_id: CourseId::from_uuid(uuid(row, "course_id")?),
        month_index: count(row, "month_index")?,
        ready_for_payment: get(row, "ready_for_payment")?,
        window_start: get(row, "window_start")?,
        window_end: get(row, "window_end")?,
        version: version(row)?,
    })
}

pub(crate) fn enrollment(row: &PgRow) -> Result<Enrollment> {
    Ok(Enrollment {
        id: EnrollmentId::from_uuid(uuid(row, "id")?),
        course_id: CourseId::from_uuid(uuid(row, "course_id")?),
        student_id: UserId::from_uuid(uuid(row, "student_id")?),
        created_at: get(row, "created_at")?,
        approved: get(row, "approved")?,
        version: version(row)?,
    })
}

pub(crate) fn payment(row: &PgRow) -> Result<MonthPayment> {
    let status: String = get(row, "status")?;
    Ok(MonthPayment {
        id: PaymentId::from_uuid(uuid(row, "id")?),
        enrollment_id: EnrollmentId::from_uuid(uuid(row, "enrollment_id")?),
        course_month_id: CourseMonthId::from_uuid(uuid(row, "course_month_id")?),
        amount: money(row, "amount")?,
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown payment status '{status}'")))?,
        admin_note: get(row, "admin_note")?,
        payment_reference: get(row, "payment_reference")?,
        created_at: get(row, "created_at")?,
        paid_at: get(row, "paid_at")?,
        version: version(row)?,
    })
}

pub(crate) fn log_entry(row: &PgRow) -> Result<ModerationLogEntry> {
    let kind: String = get(row, "subject_kind")?;
    let action: String = get(row, "action")?;
    Ok(ModerationLogEntry {
        id: LogEntryId::from_uuid(uuid(row, "id")?),
        subject: AuditSubject::from_parts(&kind, uuid(row, "subject_id")?)
            .ok_or_else(|| StoreError::Decode(format!("unknown subject kind '{kind}'")))?,
        actor_id: UserId::from_uuid(uuid(row, "actor_id")?),
        actor_name: get(row, "actor_name")?,
        action: AuditAction::parse(&action)
            .ok_or_else(|| StoreError::Decode(format!("unknown audit action '{action}'")))?,
        note: get(row, "note")?,
        created_at: get(row, "created_at")?,
    })
}
