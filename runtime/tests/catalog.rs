//! Integration tests for teacher-owned slots, courses and months.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration;
use common::Harness;
use tutorlane_core::environment::Clock;
use tutorlane_core::error::MarketplaceError;
use tutorlane_core::types::Money;
use tutorlane_runtime::{CourseDraft, SlotDraft};
use tutorlane_testing::fixtures;

fn draft(h: &Harness, capacity: u32) -> SlotDraft {
    let starts_at = h.clock.now() + Duration::days(2);
    SlotDraft {
        starts_at,
        ends_at: starts_at + Duration::minutes(45),
        capacity,
        unit_price: Money::from_cents(3_000),
        location_ref: None,
    }
}

#[tokio::test]
async fn slot_drafts_are_validated() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");

    let err = h.ledger.catalog().create_slot(&teacher, draft(&h, 0)).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)));

    let mut backwards = draft(&h, 2);
    backwards.ends_at = backwards.starts_at;
    let err = h.ledger.catalog().create_slot(&teacher, backwards).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)));

    let slot = h.ledger.catalog().create_slot(&teacher, draft(&h, 2)).await.unwrap();
    assert_eq!(slot.teacher_id, teacher.id);
    assert_eq!(slot.capacity.value(), 2);
    assert!(h.store.snapshot().await.slots.contains_key(&slot.id));
}

#[tokio::test]
async fn resize_cannot_drop_below_occupancy() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let slot = h.ledger.catalog().create_slot(&teacher, draft(&h, 3)).await.unwrap();
    for name in ["Bo", "Cy"] {
        h.ledger
            .bookings()
            .create(&fixtures::student(name), slot.id, None)
            .await
            .unwrap();
    }

    let err = h.ledger.catalog().resize_slot(&teacher, slot.id, 1).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::InvalidState { .. }));

    let resized = h.ledger.catalog().resize_slot(&teacher, slot.id, 2).await.unwrap();
    assert_eq!(resized.capacity.value(), 2);
    let err = h
        .ledger
        .bookings()
        .create(&fixtures::student("Dee"), slot.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::Full { .. }));
}

#[tokio::test]
async fn strangers_cannot_touch_a_slot() {
    let h = Harness::new();
    let slot = h
        .ledger
        .catalog()
        .create_slot(&fixtures::teacher("Ada"), draft(&h, 1))
        .await
        .unwrap();
    let mallory = fixtures::teacher("Mallory");

    let err = h.ledger.catalog().delete_slot(&mallory, slot.id).await.unwrap_err();
    assert!(err.is_not_found());
    let err = h
        .ledger
        .catalog()
        .update_slot_price(&mallory, slot.id, Money::from_cents(1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    h.ledger
        .catalog()
        .delete_slot(&fixtures::admin("Root"), slot.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn courses_start_with_closed_months_and_grow_on_demand() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let (course, months) = h
        .ledger
        .catalog()
        .create_course(
            &teacher,
            CourseDraft {
                title: "  Physics  ".to_string(),
                price_per_month: Money::from_cents(8_000),
                duration_months: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(course.title, "Physics");
    assert_eq!(months.len(), 2);
    assert!(months.iter().all(|m| !m.ready_for_payment));

    let third = h.ledger.catalog().add_course_month(&teacher, course.id).await.unwrap();
    assert_eq!(third.month_index, 3);

    let indexes: Vec<_> = h
        .ledger
        .catalog()
        .months(course.id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.month_index)
        .collect();
    assert_eq!(indexes, vec![1, 2, 3]);

    let err = h
        .ledger
        .catalog()
        .create_course(
            &teacher,
            CourseDraft {
                title: "Empty".to_string(),
                price_per_month: Money::from_cents(8_000),
                duration_months: 0,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)));
}

#[tokio::test]
async fn deleting_a_month_removes_its_payments() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let (course, months) = fixtures::course(teacher.id, 2);
    fixtures::seed_course(&h.store, &course, &months).await.unwrap();
    h.ledger
        .payments()
        .set_month_ready(&teacher, months[0].id, true)
        .await
        .unwrap();
    let payment = h
        .ledger
        .payments()
        .request(&fixtures::student("Bo"), course.id, months[0].id)
        .await
        .unwrap();

    h.ledger
        .catalog()
        .delete_course_month(&teacher, months[0].id)
        .await
        .unwrap();

    let snapshot = h.store.snapshot().await;
    assert!(!snapshot.months.contains_key(&months[0].id));
    assert!(!snapshot.payments.contains_key(&payment.id));
    assert!(snapshot.enrollments.contains_key(&payment.enrollment_id));
}
