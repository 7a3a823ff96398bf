//! Ledger store abstraction.
//!
//! The store is a transactional relational database. Every mutation the engine
//! performs happens inside one [`LedgerTx`], and the moderation log entry that
//! documents it is appended in the same transaction.
//!
//! # Optimistic versions
//!
//! `update_*` methods receive the row as it was read, including its
//! [`Version`]. The store writes the row only if the stored version still
//! matches, bumps it, and returns the new version. A mismatch yields
//! [`StoreError::VersionConflict`]. [`LedgerTx::delete_booking`] and
//! [`LedgerTx::delete_payment`] are checked the same way, so a row that an
//! admin settled after it was read is never removed.
//!
//! # Rollback
//!
//! Dropping a transaction without calling [`LedgerTx::commit`] rolls it back.
//! An abandoned request therefore never leaves a row without its audit entry.
//!
//! # Implementations
//!
//! - **`PostgresLedgerStore`** (production): row locks, constraints and triggers
//! - **`InMemoryLedgerStore`** (testing): one global lock, fully serializable

use crate::audit::{AuditSubject, ModerationLogEntry};
use crate::model::{Booking, CourseMonth, Enrollment, MonthPayment, RecurringCourse, Slot};
use crate::types::{
    BookingId, CourseId, CourseMonthId, EnrollmentId, PaymentId, SlotId, UserId, Version,
};
use std::future::Future;
use thiserror::Error;

/// Errors that can occur during ledger store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The row changed since it was read.
    #[error("Version conflict on {entity} {id}")]
    VersionConflict {
        /// Table or entity name
        entity: &'static str,
        /// Row id
        id: String,
    },

    /// A unique constraint rejected the write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Constraint name
        constraint: String,
    },

    /// A check constraint or trigger rejected the write.
    #[error("Check constraint violated: {constraint}")]
    CheckViolation {
        /// Constraint name
        constraint: String,
    },

    /// A foreign key rejected the write or delete.
    #[error("Foreign key violated: {constraint}")]
    ForeignKeyViolation {
        /// Constraint name
        constraint: String,
    },

    /// The database aborted the transaction to keep it serializable.
    #[error("Serialization failure")]
    SerializationFailure,

    /// A statement or pool acquisition timed out.
    #[error("Storage timeout")]
    Timeout,

    /// The database could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A row could not be mapped to a domain type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Returns `true` if repeating the same operation may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tutorlane_core::store::StoreError;
    /// assert!(StoreError::Timeout.is_transient());
    /// assert!(!StoreError::Decode("bad".into()).is_transient());
    /// ```
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::SerializationFailure
        )
    }

    /// Shorthand for a version conflict.
    #[must_use]
    pub fn version_conflict(entity: &'static str, id: impl ToString) -> Self {
        Self::VersionConflict {
            entity,
            id: id.to_string(),
        }
    }
}

/// A ledger store: hands out transactions and answers the admission pre-check.
pub trait LedgerStore: Send + Sync + 'static {
    /// Transaction type
    type Tx: LedgerTx;

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if no connection is available.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Slot and its current occupancy, read outside any write transaction.
    ///
    /// This is the cheap admission pre-check. Its answer may be stale by the
    /// time a transaction opens.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn slot_occupancy(
        &self,
        slot_id: SlotId,
    ) -> impl Future<Output = Result<Option<(Slot, u32)>, StoreError>> + Send;
}

/// Row operations inside one transaction.
///
/// All `update_*` methods check and bump the row version. All `find_*`
/// methods return `Ok(None)` for a missing row.
#[allow(missing_docs)]
pub trait LedgerTx: Send {
    // ----- slots -----

    fn find_slot(
        &mut self,
        id: SlotId,
    ) -> impl Future<Output = Result<Option<Slot>, StoreError>> + Send;

    /// Read a slot and hold its row lock until the transaction ends.
    ///
    /// Concurrent transactions locking the same slot are serialized, which is
    /// what makes the in-transaction occupancy count authoritative.
    fn lock_slot(
        &mut self,
        id: SlotId,
    ) -> impl Future<Output = Result<Option<Slot>, StoreError>> + Send;

    fn insert_slot(&mut self, slot: &Slot) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_slot(
        &mut self,
        slot: &Slot,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    /// Delete a slot. Bookings keep existing with `slot_id = None`.
    fn delete_slot(&mut self, id: SlotId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Count bookings of the slot in an occupying status.
    fn count_occupying_bookings(
        &mut self,
        slot_id: SlotId,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send;

    // ----- bookings -----

    fn find_booking(
        &mut self,
        id: BookingId,
    ) -> impl Future<Output = Result<Option<Booking>, StoreError>> + Send;

    fn insert_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    /// Delete the booking as it was read. Fails with
    /// [`StoreError::VersionConflict`] if it changed or vanished since.
    fn delete_booking(
        &mut self,
        booking: &Booking,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_bookings_for_student(
        &mut self,
        student_id: UserId,
    ) -> impl Future<Output = Result<Vec<Booking>, StoreError>> + Send;

    // ----- courses and months -----

    fn find_course(
        &mut self,
        id: CourseId,
    ) -> impl Future<Output = Result<Option<RecurringCourse>, StoreError>> + Send;

    fn insert_course(
        &mut self,
        course: &RecurringCourse,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_course(
        &mut self,
        course: &RecurringCourse,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    fn find_course_month(
        &mut self,
        id: CourseMonthId,
    ) -> impl Future<Output = Result<Option<CourseMonth>, StoreError>> + Send;

    /// Months of a course ordered by `month_index`.
    fn list_course_months(
        &mut self,
        course_id: CourseId,
    ) -> impl Future<Output = Result<Vec<CourseMonth>, StoreError>> + Send;

    fn insert_course_month(
        &mut self,
        month: &CourseMonth,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_course_month(
        &mut self,
        month: &CourseMonth,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    /// Delete a month together with all of its payments.
    fn delete_course_month(
        &mut self,
        id: CourseMonthId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    // ----- enrollments -----

    fn find_enrollment(
        &mut self,
        id: EnrollmentId,
    ) -> impl Future<Output = Result<Option<Enrollment>, StoreError>> + Send;

    /// Like [`Self::find_enrollment`], but holds a row lock until the
    /// transaction ends. Payment inserts for the enrollment wait for it.
    fn lock_enrollment(
        &mut self,
        id: EnrollmentId,
    ) -> impl Future<Output = Result<Option<Enrollment>, StoreError>> + Send;

    fn find_enrollment_by_pair(
        &mut self,
        course_id: CourseId,
        student_id: UserId,
    ) -> impl Future<Output = Result<Option<Enrollment>, StoreError>> + Send;

    /// Fails with [`StoreError::UniqueViolation`] if the pair is already enrolled.
    fn insert_enrollment(
        &mut self,
        enrollment: &Enrollment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_enrollment(
        &mut self,
        enrollment: &Enrollment,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    /// Fails with [`StoreError::ForeignKeyViolation`] while payments reference it.
    fn delete_enrollment(
        &mut self,
        id: EnrollmentId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    // ----- month payments -----

    fn find_payment(
        &mut self,
        id: PaymentId,
    ) -> impl Future<Output = Result<Option<MonthPayment>, StoreError>> + Send;

    /// The single pending payment for a month of an enrollment, if any.
    fn find_pending_payment(
        &mut self,
        enrollment_id: EnrollmentId,
        course_month_id: CourseMonthId,
    ) -> impl Future<Output = Result<Option<MonthPayment>, StoreError>> + Send;

    /// Payments of an enrollment ordered by creation time.
    fn list_payments_for_enrollment(
        &mut self,
        enrollment_id: EnrollmentId,
    ) -> impl Future<Output = Result<Vec<MonthPayment>, StoreError>> + Send;

    /// Fails with [`StoreError::UniqueViolation`] if a pending payment
    /// already exists for the same month of the same enrollment.
    fn insert_payment(
        &mut self,
        payment: &MonthPayment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_payment(
        &mut self,
        payment: &MonthPayment,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    /// Delete the payment as it was read. Fails with
    /// [`StoreError::VersionConflict`] if it changed or vanished since.
    fn delete_payment(
        &mut self,
        payment: &MonthPayment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the `Rejected` and `Cancelled` payments of the enrollment.
    /// Returns the count.
    fn delete_closed_payments(
        &mut self,
        enrollment_id: EnrollmentId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    // ----- moderation log -----

    fn append_log(
        &mut self,
        entry: &ModerationLogEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Entries about `subject`, oldest first.
    fn list_log(
        &mut self,
        subject: AuditSubject,
    ) -> impl Future<Output = Result<Vec<ModerationLogEntry>, StoreError>> + Send;

    // ----- lifecycle -----

    /// Make every write of this transaction durable.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every write of this transaction.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
