//! Row builders and store seeding helpers.
//!
//! Rows are built relative to [`crate::test_clock`] time unless a start is
//! given explicitly.

use chrono::{DateTime, Duration, Utc};
use tutorlane_core::environment::{Actor, Clock, Role};
use tutorlane_core::model::{Booking, CourseMonth, RecurringCourse, Slot};
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{
    BookingId, Capacity, CourseId, CourseMonthId, Money, SlotId, UserId, Version,
};
use tutorlane_core::BookingStatus;

/// Default slot price in cents
pub const SLOT_PRICE_CENTS: u64 = 4_500;
/// Default monthly course price in cents
pub const MONTH_PRICE_CENTS: u64 = 12_000;

/// A student actor.
#[must_use]
pub fn student(name: &str) -> Actor {
    Actor::new(UserId::new(), name, vec![Role::Student])
}

/// A teacher actor.
#[must_use]
pub fn teacher(name: &str) -> Actor {
    Actor::new(UserId::new(), name, vec![Role::Teacher])
}

/// An admin actor.
#[must_use]
pub fn admin(name: &str) -> Actor {
    Actor::new(UserId::new(), name, vec![Role::Admin])
}

/// A one-hour slot starting a day after the test clock.
#[must_use]
pub fn slot(teacher_id: UserId, capacity: u32) -> Slot {
    slot_at(
        teacher_id,
        capacity,
        crate::test_clock().now() + Duration::days(1),
    )
}

/// A one-hour slot starting at `starts_at`. A zero capacity is raised to one.
#[must_use]
pub fn slot_at(teacher_id: UserId, capacity: u32, starts_at: DateTime<Utc>) -> Slot {
    Slot {
        id: SlotId::new(),
        teacher_id,
        starts_at,
        ends_at: starts_at + Duration::hours(1),
        capacity: Capacity::new(capacity.max(1)).unwrap_or(Capacity::MIN),
        unit_price: Money::from_cents(SLOT_PRICE_CENTS),
        location_ref: Some("room-1".to_string()),
        version: Version::INITIAL,
    }
}

/// A pending booking of `slot` by `student_id`.
#[must_use]
pub fn booking(slot: &Slot, student_id: UserId) -> Booking {
    Booking {
        id: BookingId::new(),
        slot_id: Some(slot.id),
        student_id,
        teacher_id: slot.teacher_id,
        requested_at: crate::test_clock().now(),
        status: BookingStatus::Pending,
        price: slot.unit_price,
        meeting_ref: None,
        notes: None,
        version: Version::INITIAL,
    }
}

/// A course with `months` months, none of them ready.
#[must_use]
pub fn course(teacher_id: UserId, months: u32) -> (RecurringCourse, Vec<CourseMonth>) {
    let course = RecurringCourse {
        id: CourseId::new(),
        teacher_id,
        title: "Algebra I".to_string(),
        price_per_month: Money::from_cents(MONTH_PRICE_CENTS),
        duration_months: months,
        archived: false,
        version: Version::INITIAL,
    };
    let months = (1..=months)
        .map(|month_index| CourseMonth {
            id: CourseMonthId::new(),
            course_id: course.id,
            month_index,
            ready_for_payment: false,
            window_start: None,
            window_end: None,
            version: Version::INITIAL,
        })
        .collect();
    (course, months)
}

/// Insert a slot and commit.
///
/// # Errors
///
/// Returns [`StoreError`] if the store rejects the slot.
pub async fn seed_slot<S: LedgerStore>(store: &S, slot: &Slot) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    tx.insert_slot(slot).await?;
    tx.commit().await
}

/// Insert a course with its months and commit.
///
/// # Errors
///
/// Returns [`StoreError`] if the store rejects a row.
pub async fn seed_course<S: LedgerStore>(
    store: &S,
    course: &RecurringCourse,
    months: &[CourseMonth],
) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    tx.insert_course(course).await?;
    for month in months {
        tx.insert_course_month(month).await?;
    }
    tx.commit().await
}
