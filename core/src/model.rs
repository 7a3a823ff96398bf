//! Ledger entities.
//!
//! Rows reference each other by id. Every mutable row carries a [`Version`]
//! that the store checks and bumps on each update.

use crate::booking::{BookingPolicy, BookingStatus};
use crate::payment::PaymentStatus;
use crate::types::{
    BookingId, Capacity, CourseId, CourseMonthId, EnrollmentId, Money, PaymentId, SlotId, UserId,
    Version,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A teacher-offered time window with a fixed number of seats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot identifier
    pub id: SlotId,
    /// Owning teacher
    pub teacher_id: UserId,
    /// Start of the session
    pub starts_at: DateTime<Utc>,
    /// End of the session (exclusive)
    pub ends_at: DateTime<Utc>,
    /// Maximum number of occupying bookings
    pub capacity: Capacity,
    /// Current price; copied into each booking at creation
    pub unit_price: Money,
    /// Room or meeting location
    pub location_ref: Option<String>,
    /// Optimistic concurrency stamp
    pub version: Version,
}

/// A student's claim on a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// `None` once the slot has been deleted
    pub slot_id: Option<SlotId>,
    /// Booking student
    pub student_id: UserId,
    /// Teacher of the slot at booking time
    pub teacher_id: UserId,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
    /// Current status
    pub status: BookingStatus,
    /// Price snapshot taken from the slot
    pub price: Money,
    /// Meeting link, filled in by an admin
    pub meeting_ref: Option<String>,
    /// Free text from the student
    pub notes: Option<String>,
    /// Optimistic concurrency stamp
    pub version: Version,
}

/// A course sold in monthly units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringCourse {
    /// Course identifier
    pub id: CourseId,
    /// Owning teacher
    pub teacher_id: UserId,
    /// Display title
    pub title: String,
    /// Price of one month, snapshotted into each payment request
    pub price_per_month: Money,
    /// Number of months created with the course
    pub duration_months: u32,
    /// Archived courses accept no new payment requests
    pub archived: bool,
    /// Optimistic concurrency stamp
    pub version: Version,
}

impl RecurringCourse {
    /// Whether the course is open for new payment requests.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.archived
    }
}

/// One payable month of a course.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseMonth {
    /// Month identifier
    pub id: CourseMonthId,
    /// Parent course
    pub course_id: CourseId,
    /// Position within the course, unique per course, starting at 1
    pub month_index: u32,
    /// Owner-controlled payment gate
    pub ready_for_payment: bool,
    /// Advisory start of the month
    pub window_start: Option<DateTime<Utc>>,
    /// Advisory end of the month
    pub window_end: Option<DateTime<Utc>>,
    /// Optimistic concurrency stamp
    pub version: Version,
}

/// The relationship between one student and one course.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    /// Enrollment identifier
    pub id: EnrollmentId,
    /// Course
    pub course_id: CourseId,
    /// Student
    pub student_id: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Admin gate, independent of payments
    pub approved: bool,
    /// Optimistic concurrency stamp
    pub version: Version,
}

/// A payment request or record for one month of one enrollment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthPayment {
    /// Payment identifier
    pub id: PaymentId,
    /// Owning enrollment
    pub enrollment_id: EnrollmentId,
    /// Month paid for
    pub course_month_id: CourseMonthId,
    /// Amount due; the course price at request time until an admin confirms another
    pub amount: Money,
    /// Current status
    pub status: PaymentStatus,
    /// Reason given by an admin on rejection or revocation
    pub admin_note: Option<String>,
    /// External reference of the reconciled transfer
    pub payment_reference: Option<String>,
    /// Request time
    pub created_at: DateTime<Utc>,
    /// Set on approval
    pub paid_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency stamp
    pub version: Version,
}

/// A booking together with its view-time flags.
///
/// `can_join` and `can_cancel` are derived from the clock when the view is
/// built. They are never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingView {
    /// The booking row
    pub booking: Booking,
    /// The slot, unless it has been deleted
    pub slot: Option<Slot>,
    /// Paid and inside the join window
    pub can_join: bool,
    /// Pending and before the cancellation cutoff
    pub can_cancel: bool,
}

impl BookingView {
    /// Derive the view flags for `booking` at `now`.
    #[must_use]
    pub fn build(
        booking: Booking,
        slot: Option<Slot>,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let (can_join, can_cancel) = slot.as_ref().map_or((false, true), |slot| {
            (
                policy.can_join(booking.status, slot.starts_at, slot.ends_at, now),
                policy.cancellation_open(slot.starts_at, now),
            )
        });
        let can_cancel = can_cancel && booking.status == BookingStatus::Pending;
        Self {
            booking,
            slot,
            can_join,
            can_cancel,
        }
    }
}
