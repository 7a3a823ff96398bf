//! `PostgreSQL` ledger store for Tutorlane.
//!
//! This crate implements [`LedgerStore`] on top of a sqlx connection pool:
//!
//! - One database transaction per [`PostgresLedgerTx`], at `READ COMMITTED`
//! - `SELECT ... FOR UPDATE` on the slot row to serialize admissions, and on
//!   the enrollment row to hold off payment inserts while it is cancelled
//! - Version-checked updates and student-facing deletes
//!   (`WHERE id = $1 AND version = $2`)
//! - Constraints and triggers as a second line of defense (see `migrations/`)
//!
//! Statements run at `READ COMMITTED`: after the slot lock is granted, the
//! occupancy count sees every booking committed before it.
//!
//! # Example
//!
//! ```no_run
//! use tutorlane_postgres::PostgresLedgerStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresLedgerStore::connect("postgres://localhost/tutorlane", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
mod rows;

use crate::error::map_sqlx;
use crate::rows::{to_i32, to_i64};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::debug;
use tutorlane_core::audit::{AuditSubject, ModerationLogEntry};
use tutorlane_core::model::{Booking, CourseMonth, Enrollment, MonthPayment, RecurringCourse, Slot};
use tutorlane_core::payment::PaymentStatus;
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{
    BookingId, CourseId, CourseMonthId, EnrollmentId, PaymentId, SlotId, UserId, Version,
};

type Result<T> = std::result::Result<T, StoreError>;

const SLOT_COLUMNS: &str =
    "id, teacher_id, starts_at, ends_at, capacity, unit_price, location_ref, version";
const BOOKING_COLUMNS: &str = "id, slot_id, student_id, teacher_id, requested_at, status, price, \
     meeting_ref, notes, version";
const COURSE_COLUMNS: &str =
    "id, teacher_id, title, price_per_month, duration_months, archived, version";
const MONTH_COLUMNS: &str =
    "id, course_id, month_index, ready_for_payment, window_start, window_end, version";
const ENROLLMENT_COLUMNS: &str = "id, course_id, student_id, created_at, approved, version";
const PAYMENT_COLUMNS: &str = "id, enrollment_id, course_month_id, amount, status, admin_note, \
     payment_reference, created_at, paid_at, version";
const LOG_COLUMNS: &str =
    "id, subject_kind, subject_id, actor_id, actor_name, action, note, created_at";

/// Pool sizing and timeouts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound of open connections
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
    /// Server-side limit for a single statement
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            statement_timeout: Duration::from_secs(60),
        }
    }
}

/// `PostgreSQL` implementation of [`LedgerStore`].
#[derive(Clone, Debug)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let settings = PoolSettings {
            max_connections,
            min_connections: 0,
            ..PoolSettings::default()
        };
        Self::connect_with(database_url, &settings).await
    }

    /// Connect a new pool with explicit sizing and timeouts.
    ///
    /// The statement timeout is set per session, so a stuck statement aborts
    /// its transaction and surfaces as [`StoreError::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the URL is invalid or the database cannot be reached.
    pub async fn connect_with(database_url: &str, settings: &PoolSettings) -> Result<Self> {
        let options: PgConnectOptions = database_url
            .parse()
            .map_err(|e| StoreError::Connection(format!("Invalid database URL: {e}")))?;
        let statement_timeout = format!("{}ms", settings.statement_timeout.as_millis());
        let options = options.options([("statement_timeout", statement_timeout.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Some(settings.idle_timeout))
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;
        debug!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Ledger pool connected"
        );
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema migrations in `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }
}

impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresLedgerTx;

    async fn begin(&self) -> Result<PostgresLedgerTx> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(PostgresLedgerTx { tx })
    }

    async fn slot_occupancy(&self, slot_id: SlotId) -> Result<Option<(Slot, u32)>> {
        let row = sqlx::query(&format!(
            "SELECT {SLOT_COLUMNS}, \
                 (SELECT count(*)::INTEGER FROM bookings b \
                  WHERE b.slot_id = s.id AND b.status IN ('pending', 'paid')) AS occupied \
             FROM slots s WHERE s.id = $1"
        ))
        .bind(slot_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|row| {
            let slot = rows::slot(&row)?;
            let occupied: i32 = sqlx::Row::try_get(&row, "occupied").map_err(map_sqlx)?;
            let occupied = u32::try_from(occupied)
                .map_err(|_| StoreError::Decode(format!("negative occupancy: {occupied}")))?;
            Ok((slot, occupied))
        })
        .transpose()
    }
}

/// One database transaction. Dropping it rolls back.
pub struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresLedgerTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLedgerTx").finish_non_exhaustive()
    }
}

/// Turn the row count of a version-checked write into the new version.
fn bumped(rows_affected: u64, entity: &'static str, id: impl ToString, read: Version) -> Result<Version> {
    if rows_affected == 0 {
        metrics::counter!("ledger_version_conflicts_total", "entity" => entity).increment(1);
        debug!(entity, version = %read, "Version conflict");
        return Err(StoreError::version_conflict(entity, id));
    }
    Ok(read.next())
}

impl LedgerTx for PostgresLedgerTx {
    // ----- slots -----

    async fn find_slot(&mut self, id: SlotId) -> Result<Option<Slot>> {
        sqlx::query(&format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::slot)
            .transpose()
    }

    async fn lock_slot(&mut self, id: SlotId) -> Result<Option<Slot>> {
        sqlx::query(&format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::slot)
            .transpose()
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO slots ({SLOT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(slot.id.as_uuid())
        .bind(slot.teacher_id.as_uuid())
        .bind(slot.starts_at)
        .bind(slot.ends_at)
        .bind(to_i32(slot.capacity.value(), "capacity")?)
        .bind(to_i64(slot.unit_price.cents(), "unit_price")?)
        .bind(&slot.location_ref)
        .bind(to_i64(slot.version.value(), "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> Result<Version> {
        let result = sqlx::query(
            "UPDATE slots SET starts_at = $3, ends_at = $4, capacity = $5, unit_price = $6, \
                 location_ref = $7, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(slot.id.as_uuid())
        .bind(to_i64(slot.version.value(), "version")?)
        .bind(slot.starts_at)
        .bind(slot.ends_at)
        .bind(to_i32(slot.capacity.value(), "capacity")?)
        .bind(to_i64(slot.unit_price.cents(), "unit_price")?)
        .bind(&slot.location_ref)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "slot", slot.id, slot.version)
    }

    async fn delete_slot(&mut self, id: SlotId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM slots WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_occupying_bookings(&mut self, slot_id: SlotId) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM bookings WHERE slot_id = $1 AND status IN ('pending', 'paid')",
        )
        .bind(slot_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        u32::try_from(count).map_err(|_| StoreError::Decode(format!("occupancy out of range: {count}")))
    }

    // ----- bookings -----

    async fn find_booking(&mut self, id: BookingId) -> Result<Option<Booking>> {
        sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::booking)
            .transpose()
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(booking.id.as_uuid())
        .bind(booking.slot_id.map(|id| *id.as_uuid()))
        .bind(booking.student_id.as_uuid())
        .bind(booking.teacher_id.as_uuid())
        .bind(booking.requested_at)
        .bind(booking.status.as_str())
        .bind(to_i64(booking.price.cents(), "price")?)
        .bind(&booking.meeting_ref)
        .bind(&booking.notes)
        .bind(to_i64(booking.version.value(), "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<Version> {
        let result = sqlx::query(
            "UPDATE bookings SET slot_id = $3, status = $4, price = $5, meeting_ref = $6, \
                 notes = $7, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(booking.id.as_uuid())
        .bind(to_i64(booking.version.value(), "version")?)
        .bind(booking.slot_id.map(|id| *id.as_uuid()))
        .bind(booking.status.as_str())
        .bind(to_i64(booking.price.cents(), "price")?)
        .bind(&booking.meeting_ref)
        .bind(&booking.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "booking", booking.id, booking.version)
    }

    async fn delete_booking(&mut self, booking: &Booking) -> Result<()> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1 AND version = $2")
            .bind(booking.id.as_uuid())
            .bind(to_i64(booking.version.value(), "version")?)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "booking", booking.id, booking.version)?;
        Ok(())
    }

    async fn list_bookings_for_student(&mut self, student_id: UserId) -> Result<Vec<Booking>> {
        sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE student_id = $1 ORDER BY requested_at, id"
        ))
        .bind(student_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .iter()
        .map(rows::booking)
        .collect()
    }

    // ----- courses and months -----

    async fn find_course(&mut self, id: CourseId) -> Result<Option<RecurringCourse>> {
        sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM recurring_courses WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::course)
            .transpose()
    }

    async fn insert_course(&mut self, course: &RecurringCourse) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO recurring_courses ({COURSE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(course.id.as_uuid())
        .bind(course.teacher_id.as_uuid())
        .bind(&course.title)
        .bind(to_i64(course.price_per_month.cents(), "price_per_month")?)
        .bind(to_i32(course.duration_months, "duration_months")?)
        .bind(course.archived)
        .bind(to_i64(course.version.value(), "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_course(&mut self, course: &RecurringCourse) -> Result<Version> {
        let result = sqlx::query(
            "UPDATE recurring_courses SET title = $3, price_per_month = $4, duration_months = $5, \
                 archived = $6, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(course.id.as_uuid())
        .bind(to_i64(course.version.value(), "version")?)
        .bind(&course.title)
        .bind(to_i64(course.price_per_month.cents(), "price_per_month")?)
        .bind(to_i32(course.duration_months, "duration_months")?)
        .bind(course.archived)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "course", course.id, course.version)
    }

    async fn find_course_month(&mut self, id: CourseMonthId) -> Result<Option<CourseMonth>> {
        sqlx::query(&format!("SELECT {MONTH_COLUMNS} FROM course_months WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::course_month)
            .transpose()
    }

    async fn list_course_months(&mut self, course_id: CourseId) -> Result<Vec<CourseMonth>> {
        sqlx::query(&format!(
            "SELECT {MONTH_COLUMNS} FROM course_months WHERE course_id = $1 ORDER BY month_index"
        ))
        .bind(course_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .iter()
        .map(rows::course_month)
        .collect()
    }

    async fn insert_course_month(&mut self, month: &CourseMonth) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO course_months ({MONTH_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(month.id.as_uuid())
        .bind(month.course_id.as_uuid())
        .bind(to_i32(month.month_index, "month_index")?)
        .bind(month.ready_for_payment)
        .bind(month.window_start)
        .bind(month.window_end)
        .bind(to_i64(month.version.value(), "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_course_month(&mut self, month: &CourseMonth) -> Result<Version> {
        let result = sqlx::query(
            "UPDATE course_months SET ready_for_payment = $3, window_start = $4, window_end = $5, \
                 version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(month.id.as_uuid())
        .bind(to_i64(month.version.value(), "version")?)
        .bind(month.ready_for_payment)
        .bind(month.window_start)
        .bind(month.window_end)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "course_month", month.id, month.version)
    }

    async fn delete_course_month(&mut self, id: CourseMonthId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM course_months WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // ----- enrollments -----

    async fn find_enrollment(&mut self, id: EnrollmentId) -> Result<Option<Enrollment>> {
        sqlx::query(&format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::enrollment)
            .transpose()
    }

    async fn lock_enrollment(&mut self, id: EnrollmentId) -> Result<Option<Enrollment>> {
        sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::enrollment)
        .transpose()
    }

    async fn find_enrollment_by_pair(
        &mut self,
        course_id: CourseId,
        student_id: UserId,
    ) -> Result<Option<Enrollment>> {
        sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE course_id = $1 AND student_id = $2"
        ))
        .bind(course_id.as_uuid())
        .bind(student_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::enrollment)
        .transpose()
    }

    async fn insert_enrollment(&mut self, enrollment: &Enrollment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO enrollments ({ENROLLMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(enrollment.id.as_uuid())
        .bind(enrollment.course_id.as_uuid())
        .bind(enrollment.student_id.as_uuid())
        .bind(enrollment.created_at)
        .bind(enrollment.approved)
        .bind(to_i64(enrollment.version.value(), "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_enrollment(&mut self, enrollment: &Enrollment) -> Result<Version> {
        let result = sqlx::query(
            "UPDATE enrollments SET approved = $3, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(enrollment.id.as_uuid())
        .bind(to_i64(enrollment.version.value(), "version")?)
        .bind(enrollment.approved)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "enrollment", enrollment.id, enrollment.version)
    }

    async fn delete_enrollment(&mut self, id: EnrollmentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM enrollments WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // ----- month payments -----

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<MonthPayment>> {
        sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM month_payments WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .as_ref()
            .map(rows::payment)
            .transpose()
    }

    async fn find_pending_payment(
        &mut self,
        enrollment_id: EnrollmentId,
        course_month_id: CourseMonthId,
    ) -> Result<Option<MonthPayment>> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM month_payments \
             WHERE enrollment_id = $1 AND course_month_id = $2 AND status = $3"
        ))
        .bind(enrollment_id.as_uuid())
        .bind(course_month_id.as_uuid())
        .bind(PaymentStatus::Pending.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::payment)
        .transpose()
    }

    async fn list_payments_for_enrollment(
        &mut self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<MonthPayment>> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM month_payments WHERE enrollment_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(enrollment_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .iter()
        .map(rows::payment)
        .collect()
    }

    async fn insert_payment(&mut self, payment: &MonthPayment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO month_payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.enrollment_id.as_uuid())
        .bind(payment.course_month_id.as_uuid())
        .bind(to_i64(payment.amount.cents(), "amount")?)
        .bind(payment.status.as_str())
        .bind(&payment.admin_note)
        .bind(&payment.payment_reference)
        .bind(payment.created_at)
        .bind(payment.paid_at)
        .bind(to_i64(payment.version.value(), "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &MonthPayment) -> Result<Version> {
        let result = sqlx::query(
            "UPDATE month_payments SET amount = $3, status = $4, admin_note = $5, \
                 payment_reference = $6, paid_at = $7, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(payment.id.as_uuid())
        .bind(to_i64(payment.version.value(), "version")?)
        .bind(to_i64(payment.amount.cents(), "amount")?)
        .bind(payment.status.as_str())
        .bind(&payment.admin_note)
        .bind(&payment.payment_reference)
        .bind(payment.paid_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "payment", payment.id, payment.version)
    }

    async fn delete_payment(&mut self, payment: &MonthPayment) -> Result<()> {
        let result = sqlx::query("DELETE FROM month_payments WHERE id = $1 AND version = $2")
            .bind(payment.id.as_uuid())
            .bind(to_i64(payment.version.value(), "version")?)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        bumped(result.rows_affected(), "payment", payment.id, payment.version)?;
        Ok(())
    }

    // Pending rows stay behind, so the RESTRICT foreign key stops the
    // enrollment delete if one slipped past the caller's check.
    async fn delete_closed_payments(&mut self, enrollment_id: EnrollmentId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM month_payments WHERE enrollment_id = $1 AND status IN ($2, $3)",
        )
        .bind(enrollment_id.as_uuid())
        .bind(PaymentStatus::Rejected.as_str())
        .bind(PaymentStatus::Cancelled.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    // ----- moderation log -----

    async fn append_log(&mut self, entry: &ModerationLogEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO moderation_log ({LOG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(entry.id.as_uuid())
        .bind(entry.subject.kind())
        .bind(entry.subject.id())
        .bind(entry.actor_id.as_uuid())
        .bind(&entry.actor_name)
        .bind(entry.action.as_str())
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn list_log(&mut self, subject: AuditSubject) -> Result<Vec<ModerationLogEntry>> {
        sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM moderation_log \
             WHERE subject_kind = $1 AND subject_id = $2 ORDER BY seq"
        ))
        .bind(subject.kind())
        .bind(subject.id())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .iter()
        .map(rows::log_entry)
        .collect()
    }

    // ----- lifecycle -----

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx)?;
        metrics::counter!("ledger_commits_total").increment(1);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx)
    }
}
