//! In-memory ledger store.
//!
//! One `tokio` mutex guards the whole ledger. A transaction holds that mutex
//! from `begin` until it ends and works on a private copy, which `commit`
//! writes back. Transactions are therefore fully serializable, and a dropped
//! transaction leaves no trace.
//!
//! The store emulates the constraints of the Postgres schema: unique
//! enrollment pairs, one pending payment per month and enrollment, unique
//! month indexes, the booking capacity trigger, `SET NULL` on slot deletion,
//! cascading month deletion and the `RESTRICT` on enrollment deletion.
//!
//! Because transactions never overlap, a lost insert race cannot happen on
//! its own. [`InMemoryLedgerStore::inject_enrollment_races`] and
//! [`InMemoryLedgerStore::inject_payment_races`] stage one: a rival row is
//! committed just before the insert, which then fails on the unique index.
//!
//! # Deadlocks
//!
//! A task holding a transaction must not open a second one or call
//! [`LedgerStore::slot_occupancy`]: both wait for the same mutex.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tutorlane_core::audit::{AuditSubject, ModerationLogEntry};
use tutorlane_core::model::{Booking, CourseMonth, Enrollment, MonthPayment, RecurringCourse, Slot};
use tutorlane_core::payment::PaymentStatus;
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{
    BookingId, CourseId, CourseMonthId, EnrollmentId, PaymentId, SlotId, UserId, Version,
};

/// Every table of the ledger.
///
/// Returned by [`InMemoryLedgerStore::snapshot`] so tests can assert on raw rows.
#[derive(Clone, Debug, Default)]
pub struct LedgerSnapshot {
    /// Slots by id
    pub slots: HashMap<SlotId, Slot>,
    /// Bookings by id
    pub bookings: HashMap<BookingId, Booking>,
    /// Courses by id
    pub courses: HashMap<CourseId, RecurringCourse>,
    /// Course months by id
    pub months: HashMap<CourseMonthId, CourseMonth>,
    /// Enrollments by id
    pub enrollments: HashMap<EnrollmentId, Enrollment>,
    /// Month payments by id
    pub payments: HashMap<PaymentId, MonthPayment>,
    /// Moderation log in append order
    pub log: Vec<ModerationLogEntry>,
}

impl LedgerSnapshot {
    /// Occupying bookings of a slot.
    #[must_use]
    pub fn occupancy(&self, slot_id: SlotId) -> u32 {
        let count = self
            .bookings
            .values()
            .filter(|b| b.slot_id == Some(slot_id) && b.status.occupies_capacity())
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Payments of an enrollment, in any status.
    #[must_use]
    pub fn payments_of(&self, enrollment_id: EnrollmentId) -> Vec<&MonthPayment> {
        self.payments
            .values()
            .filter(|p| p.enrollment_id == enrollment_id)
            .collect()
    }

    /// Enrollments for a course and student pair.
    #[must_use]
    pub fn enrollments_of(&self, course_id: CourseId, student_id: UserId) -> Vec<&Enrollment> {
        self.enrollments
            .values()
            .filter(|e| e.course_id == course_id && e.student_id == student_id)
            .collect()
    }

    /// Log entries about `subject`, oldest first.
    #[must_use]
    pub fn log_of(&self, subject: AuditSubject) -> Vec<&ModerationLogEntry> {
        self.log.iter().filter(|e| e.subject == subject).collect()
    }
}

/// Serializable in-memory [`LedgerStore`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerSnapshot>>,
    precheck_faults: Arc<AtomicU32>,
    precheck_calls: Arc<AtomicU64>,
    races: Races,
    commits: Arc<AtomicU64>,
}

#[derive(Clone, Debug, Default)]
struct Races {
    enrollments: Arc<AtomicU32>,
    payments: Arc<AtomicU32>,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` admission pre-checks fail with a timeout.
    pub fn inject_precheck_faults(&self, count: u32) {
        self.precheck_faults.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` enrollment inserts lose to a rival that enrolled
    /// the same pair first.
    pub fn inject_enrollment_races(&self, count: u32) {
        self.races.enrollments.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` pending payment inserts lose to a rival request
    /// for the same month.
    pub fn inject_payment_races(&self, count: u32) {
        self.races.payments.store(count, Ordering::SeqCst);
    }

    /// Number of admission pre-checks served, including failed ones.
    #[must_use]
    pub fn precheck_calls(&self) -> u64 {
        self.precheck_calls.load(Ordering::SeqCst)
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Copy of the committed ledger.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().await.clone()
    }

    fn take_fault(&self) -> bool {
        take(&self.precheck_faults)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(InMemoryTx {
            guard,
            work,
            races: self.races.clone(),
            commits: Arc::clone(&self.commits),
        })
    }

    async fn slot_occupancy(&self, slot_id: SlotId) -> Result<Option<(Slot, u32)>, StoreError> {
        self.precheck_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault() {
            return Err(StoreError::Timeout);
        }
        let state = self.state.lock().await;
        Ok(state
            .slots
            .get(&slot_id)
            .map(|slot| (slot.clone(), state.occupancy(slot_id))))
    }
}

/// Transaction over [`InMemoryLedgerStore`].
///
/// Holds the store mutex for its whole life.
pub struct InMemoryTx {
    guard: OwnedMutexGuard<LedgerSnapshot>,
    work: LedgerSnapshot,
    races: Races,
    commits: Arc<AtomicU64>,
}

impl std::fmt::Debug for InMemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTx").finish_non_exhaustive()
    }
}

// ============================================================================
// Row helpers
// ============================================================================

trait Row: Clone {
    type Id: Copy + Eq + Hash + Display;
    const TABLE: &'static str;

    fn id(&self) -> Self::Id;
    fn version(&self) -> Version;
    fn set_version(&mut self, version: Version);
}

macro_rules! impl_row {
    ($ty:ty, $id:ty, $table:literal) => {
        impl Row for $ty {
            type Id = $id;
            const TABLE: &'static str = $table;

            fn id(&self) -> $id {
                self.id
            }

            fn version(&self) -> Version {
                self.version
            }

            fn set_version(&mut self, version: Version) {
                self.version = version;
            }
        }
    };
}

impl_row!(Slot, SlotId, "slots");
impl_row!(Booking, BookingId, "bookings");
impl_row!(RecurringCourse, CourseId, "recurring_courses");
impl_row!(CourseMonth, CourseMonthId, "course_months");
impl_row!(Enrollment, EnrollmentId, "enrollments");
impl_row!(MonthPayment, PaymentId, "month_payments");

fn insert_row<R: Row>(table: &mut HashMap<R::Id, R>, row: &R) -> Result<(), StoreError> {
    if table.contains_key(&row.id()) {
        return Err(StoreError::UniqueViolation {
            constraint: format!("{}_pkey", R::TABLE),
        });
    }
    table.insert(row.id(), row.clone());
    Ok(())
}

fn update_row<R: Row>(table: &mut HashMap<R::Id, R>, row: &R) -> Result<Version, StoreError> {
    let stored = table
        .get_mut(&row.id())
        .filter(|stored| stored.version() == row.version())
        .ok_or_else(|| StoreError::version_conflict(R::TABLE, row.id()))?;
    let next = row.version().next();
    *stored = row.clone();
    stored.set_version(next);
    Ok(next)
}

fn delete_row<R: Row>(table: &mut HashMap<R::Id, R>, row: &R) -> Result<(), StoreError> {
    if table.get(&row.id()).is_none_or(|stored| stored.version() != row.version()) {
        return Err(StoreError::version_conflict(R::TABLE, row.id()));
    }
    table.remove(&row.id());
    Ok(())
}

fn sorted_by<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by_key(key);
    rows
}

fn created(payment: &MonthPayment) -> DateTime<Utc> {
    payment.created_at
}

impl LedgerTx for InMemoryTx {
    // ----- slots -----

    async fn find_slot(&mut self, id: SlotId) -> Result<Option<Slot>, StoreError> {
        Ok(self.work.slots.get(&id).cloned())
    }

    async fn lock_slot(&mut self, id: SlotId) -> Result<Option<Slot>, StoreError> {
        // The whole ledger is already locked by this transaction.
        Ok(self.work.slots.get(&id).cloned())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), StoreError> {
        if slot.ends_at <= slot.starts_at {
            return Err(StoreError::CheckViolation {
                constraint: "slots_time_order".to_string(),
            });
        }
        insert_row(&mut self.work.slots, slot)
    }

    async fn update_slot(&mut self, slot: &Slot) -> Result<Version, StoreError> {
        update_row(&mut self.work.slots, slot)
    }

    async fn delete_slot(&mut self, id: SlotId) -> Result<bool, StoreError> {
        if self.work.slots.remove(&id).is_none() {
            return Ok(false);
        }
        for booking in self.work.bookings.values_mut() {
            if booking.slot_id == Some(id) {
                booking.slot_id = None;
                booking.version = booking.version.next();
            }
        }
        Ok(true)
    }

    async fn count_occupying_bookings(&mut self, slot_id: SlotId) -> Result<u32, StoreError> {
        Ok(self.work.occupancy(slot_id))
    }

    // ----- bookings -----

    async fn find_booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.work.bookings.get(&id).cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if let Some(slot_id) = booking.slot_id {
            let slot = self
                .work
                .slots
                .get(&slot_id)
                .ok_or_else(|| StoreError::ForeignKeyViolation {
                    constraint: "bookings_slot_id_fkey".to_string(),
                })?;
            if slot.capacity.is_exhausted_by(self.work.occupancy(slot_id)) {
                return Err(StoreError::CheckViolation {
                    constraint: "bookings_slot_capacity".to_string(),
                });
            }
        }
        insert_row(&mut self.work.bookings, booking)
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<Version, StoreError> {
        update_row(&mut self.work.bookings, booking)
    }

    async fn delete_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        delete_row(&mut self.work.bookings, booking)
    }

    async fn list_bookings_for_student(
        &mut self,
        student_id: UserId,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<Booking> = self
            .work
            .bookings
            .values()
            .filter(|b| b.student_id == student_id)
            .cloned()
            .collect();
        Ok(sorted_by(rows, |b: &Booking| b.requested_at))
    }

    // ----- courses and months -----

    async fn find_course(&mut self, id: CourseId) -> Result<Option<RecurringCourse>, StoreError> {
        Ok(self.work.courses.get(&id).cloned())
    }

    async fn insert_course(&mut self, course: &RecurringCourse) -> Result<(), StoreError> {
        insert_row(&mut self.work.courses, course)
    }

    async fn update_course(&mut self, course: &RecurringCourse) -> Result<Version, StoreError> {
        update_row(&mut self.work.courses, course)
    }

    async fn find_course_month(
        &mut self,
        id: CourseMonthId,
    ) -> Result<Option<CourseMonth>, StoreError> {
        Ok(self.work.months.get(&id).cloned())
    }

    async fn list_course_months(
        &mut self,
        course_id: CourseId,
    ) -> Result<Vec<CourseMonth>, StoreError> {
        let rows: Vec<CourseMonth> = self
            .work
            .months
            .values()
            .filter(|m| m.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_by(rows, |m: &CourseMonth| m.month_index))
    }

    async fn insert_course_month(&mut self, month: &CourseMonth) -> Result<(), StoreError> {
        if !self.work.courses.contains_key(&month.course_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "course_months_course_id_fkey".to_string(),
            });
        }
        let taken = self
            .work
            .months
            .values()
            .any(|m| m.course_id == month.course_id && m.month_index == month.month_index);
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: "course_months_course_id_month_index_key".to_string(),
            });
        }
        insert_row(&mut self.work.months, month)
    }

    async fn update_course_month(&mut self, month: &CourseMonth) -> Result<Version, StoreError> {
        update_row(&mut self.work.months, month)
    }

    async fn delete_course_month(&mut self, id: CourseMonthId) -> Result<bool, StoreError> {
        if self.work.months.remove(&id).is_none() {
            return Ok(false);
        }
        self.work.payments.retain(|_, p| p.course_month_id != id);
        Ok(true)
    }

    // ----- enrollments -----

    async fn find_enrollment(
        &mut self,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.work.enrollments.get(&id).cloned())
    }

    async fn lock_enrollment(
        &mut self,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.work.enrollments.get(&id).cloned())
    }

    async fn find_enrollment_by_pair(
        &mut self,
        course_id: CourseId,
        student_id: UserId,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .work
            .enrollments
            .values()
            .find(|e| e.course_id == course_id && e.student_id == student_id)
            .cloned())
    }

    async fn insert_enrollment(&mut self, enrollment: &Enrollment) -> Result<(), StoreError> {
        let taken = self
            .work
            .enrollments
            .values()
            .any(|e| e.course_id == enrollment.course_id && e.student_id == enrollment.student_id);
        let lost_race = !taken && take(&self.races.enrollments);
        if lost_race {
            let rival = Enrollment {
                id: EnrollmentId::new(),
                ..enrollment.clone()
            };
            self.guard.enrollments.insert(rival.id, rival);
        }
        if taken || lost_race {
            return Err(StoreError::UniqueViolation {
                constraint: "enrollments_course_id_student_id_key".to_string(),
            });
        }
        insert_row(&mut self.work.enrollments, enrollment)
    }

    async fn update_enrollment(&mut self, enrollment: &Enrollment) -> Result<Version, StoreError> {
        update_row(&mut self.work.enrollments, enrollment)
    }

    async fn delete_enrollment(&mut self, id: EnrollmentId) -> Result<bool, StoreError> {
        if self.work.payments.values().any(|p| p.enrollment_id == id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "month_payments_enrollment_id_fkey".to_string(),
            });
        }
        Ok(self.work.enrollments.remove(&id).is_some())
    }

    // ----- month payments -----

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<MonthPayment>, StoreError> {
        Ok(self.work.payments.get(&id).cloned())
    }

    async fn find_pending_payment(
        &mut self,
        enrollment_id: EnrollmentId,
        course_month_id: CourseMonthId,
    ) -> Result<Option<MonthPayment>, StoreError> {
        Ok(self
            .work
            .payments
            .values()
            .find(|p| {
                p.enrollment_id == enrollment_id
                    && p.course_month_id == course_month_id
                    && p.status.blocks_rerequest()
            })
            .cloned())
    }

    async fn list_payments_for_enrollment(
        &mut self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<MonthPayment>, StoreError> {
        let rows: Vec<MonthPayment> = self
            .work
            .payments_of(enrollment_id)
            .into_iter()
            .cloned()
            .collect();
        Ok(sorted_by(rows, created))
    }

    async fn insert_payment(&mut self, payment: &MonthPayment) -> Result<(), StoreError> {
        if !self.work.enrollments.contains_key(&payment.enrollment_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "month_payments_enrollment_id_fkey".to_string(),
            });
        }
        if !self.work.months.contains_key(&payment.course_month_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "month_payments_course_month_id_fkey".to_string(),
            });
        }
        let duplicate_pending = payment.status == PaymentStatus::Pending
            && self.work.payments.values().any(|p| {
                p.enrollment_id == payment.enrollment_id
                    && p.course_month_id == payment.course_month_id
                    && p.status == PaymentStatus::Pending
            });
        let lost_race = payment.status == PaymentStatus::Pending
            && !duplicate_pending
            && take(&self.races.payments);
        if lost_race {
            let rival = MonthPayment {
                id: PaymentId::new(),
                ..payment.clone()
            };
            self.guard.payments.insert(rival.id, rival);
        }
        if duplicate_pending || lost_race {
            return Err(StoreError::UniqueViolation {
                constraint: "month_payments_one_pending".to_string(),
            });
        }
        insert_row(&mut self.work.payments, payment)
    }

    async fn update_payment(&mut self, payment: &MonthPayment) -> Result<Version, StoreError> {
        update_row(&mut self.work.payments, payment)
    }

    async fn delete_payment(&mut self, payment: &MonthPayment) -> Result<(), StoreError> {
        delete_row(&mut self.work.payments, payment)
    }

    async fn delete_closed_payments(
        &mut self,
        enrollment_id: EnrollmentId,
    ) -> Result<u64, StoreError> {
        let before = self.work.payments.len();
        self.work.payments.retain(|_, p| {
            p.enrollment_id != enrollment_id
                || !matches!(p.status, PaymentStatus::Rejected | PaymentStatus::Cancelled)
        });
        Ok((before - self.work.payments.len()) as u64)
    }

    // ----- moderation log -----

    async fn append_log(&mut self, entry: &ModerationLogEntry) -> Result<(), StoreError> {
        if self.work.log.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "moderation_log_pkey".to_string(),
            });
        }
        self.work.log.push(entry.clone());
        Ok(())
    }

    async fn list_log(
        &mut self,
        subject: AuditSubject,
    ) -> Result<Vec<ModerationLogEntry>, StoreError> {
        Ok(self.work.log_of(subject).into_iter().cloned().collect())
    }

    // ----- lifecycle -----

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.work);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
