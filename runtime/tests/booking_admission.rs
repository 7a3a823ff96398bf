//! Integration tests for slot admission and the booking lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::Harness;
use std::sync::Arc;
use tutorlane_core::audit::{AuditAction, AuditSubject};
use tutorlane_core::booking::BookingStatus;
use tutorlane_core::environment::Clock;
use tutorlane_core::error::MarketplaceError;
use tutorlane_core::notification::{Recipient, Template};
use tutorlane_core::store::StoreError;
use tutorlane_core::types::Money;
use tutorlane_runtime::NotificationWorker;
use tutorlane_testing::{RecordingNotificationGateway, fixtures};

// ============================================================================
// Admission
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_oversell_a_slot() {
    let Harness { ledger, store, outbox: _outbox, .. } = Harness::new();
    let ledger = Arc::new(ledger);
    let teacher = fixtures::teacher("Ada");
    let slot = fixtures::slot(teacher.id, 3);
    fixtures::seed_slot(&store, &slot).await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let student = fixtures::student(&format!("student-{i}"));
            tokio::spawn(async move { ledger.bookings().create(&student, slot.id, None).await })
        })
        .collect();

    let mut admitted = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(MarketplaceError::Full { slot_id }) => {
                assert_eq!(slot_id, slot.id);
                full += 1;
            }
            Err(other) => panic!("unexpected admission failure: {other}"),
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(full, 7);
    assert_eq!(store.snapshot().await.occupancy(slot.id), 3);
}

#[tokio::test]
async fn admitted_booking_snapshots_slot_and_is_audited() {
    let mut h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let student = fixtures::student("Bo");
    let slot = fixtures::slot(teacher.id, 2);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();

    let booking = h
        .ledger
        .bookings()
        .create(&student, slot.id, Some("first lesson".to_string()))
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.price, slot.unit_price);
    assert_eq!(booking.teacher_id, teacher.id);
    assert_eq!(booking.notes.as_deref(), Some("first lesson"));

    let history = h.ledger.history(AuditSubject::Booking(booking.id)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AuditAction::BookingRequested);
    assert_eq!(history[0].actor_id, student.id);

    let queued = h.queued_with(Template::BookingRequested);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].recipient, Recipient::User(teacher.id));
}

#[tokio::test]
async fn full_slot_is_rejected_without_a_write() {
    let h = Harness::new();
    let slot = fixtures::slot(fixtures::teacher("Ada").id, 1);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();
    h.ledger
        .bookings()
        .create(&fixtures::student("Bo"), slot.id, None)
        .await
        .unwrap();

    let commits = h.store.commits();
    let err = h
        .ledger
        .bookings()
        .create(&fixtures::student("Cy"), slot.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, MarketplaceError::Full { .. }));
    assert_eq!(err.to_string(), "this slot is fully booked");
    assert_eq!(h.store.commits(), commits);
}

#[tokio::test]
async fn missing_slot_is_not_found() {
    let h = Harness::new();
    let err = h
        .ledger
        .bookings()
        .create(&fixtures::student("Bo"), tutorlane_core::types::SlotId::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn precheck_retries_a_single_transient_failure() {
    let h = Harness::new();
    let slot = fixtures::slot(fixtures::teacher("Ada").id, 2);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();

    h.store.inject_precheck_faults(1);
    h.ledger
        .bookings()
        .create(&fixtures::student("Bo"), slot.id, None)
        .await
        .unwrap();
    assert_eq!(h.store.precheck_calls(), 2);

    h.store.inject_precheck_faults(2);
    let err = h
        .ledger
        .bookings()
        .create(&fixtures::student("Cy"), slot.id, None)
        .await
        .unwrap_err();
    assert_eq!(err, MarketplaceError::Storage(StoreError::Timeout));
    assert!(err.is_internal());
    assert_eq!(h.store.precheck_calls(), 4);
    assert_eq!(h.store.snapshot().await.occupancy(slot.id), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn student_cancellation_respects_the_cutoff() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let student = fixtures::student("Bo");
    let now = h.clock.now();

    let soon = fixtures::slot_at(teacher.id, 1, now + Duration::minutes(30));
    let later = fixtures::slot_at(teacher.id, 1, now + Duration::minutes(90));
    fixtures::seed_slot(&h.store, &soon).await.unwrap();
    fixtures::seed_slot(&h.store, &later).await.unwrap();

    let too_late = h.ledger.bookings().create(&student, soon.id, None).await.unwrap();
    let in_time = h.ledger.bookings().create(&student, later.id, None).await.unwrap();

    let err = h
        .ledger
        .bookings()
        .cancel_by_student(&student, too_late.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::InvalidState { .. }));
    assert!(err.to_string().contains("60 minutes"));

    h.ledger
        .bookings()
        .cancel_by_student(&student, in_time.id)
        .await
        .unwrap();

    let snapshot = h.store.snapshot().await;
    assert!(snapshot.bookings.contains_key(&too_late.id));
    assert!(!snapshot.bookings.contains_key(&in_time.id));
    let actions: Vec<_> = snapshot
        .log_of(AuditSubject::Booking(in_time.id))
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::BookingRequested, AuditAction::CancelledByStudent]
    );
}

#[tokio::test]
async fn cancellation_frees_the_seat() {
    let h = Harness::new();
    let slot = fixtures::slot(fixtures::teacher("Ada").id, 1);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();
    let bo = fixtures::student("Bo");
    let cy = fixtures::student("Cy");

    let booking = h.ledger.bookings().create(&bo, slot.id, None).await.unwrap();
    h.ledger.bookings().cancel_by_student(&bo, booking.id).await.unwrap();

    h.ledger.bookings().create(&cy, slot.id, None).await.unwrap();
    assert_eq!(h.store.snapshot().await.occupancy(slot.id), 1);
}

#[tokio::test]
async fn other_students_bookings_are_invisible() {
    let h = Harness::new();
    let slot = fixtures::slot(fixtures::teacher("Ada").id, 2);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();
    let owner = fixtures::student("Bo");
    let booking = h.ledger.bookings().create(&owner, slot.id, None).await.unwrap();

    let err = h
        .ledger
        .bookings()
        .cancel_by_student(&fixtures::student("Eve"), booking.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn paid_booking_is_only_cancelled_by_an_admin() {
    let mut h = Harness::new();
    let slot = fixtures::slot(fixtures::teacher("Ada").id, 1);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();
    let student = fixtures::student("Bo");
    let admin = fixtures::admin("Root");

    let booking = h.ledger.bookings().create(&student, slot.id, None).await.unwrap();
    let paid = h
        .ledger
        .bookings()
        .mark_paid(&admin, booking.id, Some("meet-42".to_string()))
        .await
        .unwrap();
    assert_eq!(paid.status, BookingStatus::Paid);
    assert_eq!(paid.meeting_ref.as_deref(), Some("meet-42"));

    let err = h
        .ledger
        .bookings()
        .cancel_by_student(&student, booking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::InvalidState { .. }));

    let err = h.ledger.bookings().mark_paid(&admin, booking.id, None).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::InvalidState { .. }));

    h.ledger
        .bookings()
        .cancel_by_admin(&admin, booking.id, Some("duplicate".to_string()))
        .await
        .unwrap();
    assert_eq!(h.store.snapshot().await.occupancy(slot.id), 0);

    let cancelled = h.queued_with(Template::BookingCancelledByAdmin);
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].recipient, Recipient::User(student.id));
    assert_eq!(cancelled[0].args.get("reason").map(String::as_str), Some("duplicate"));
}

// ============================================================================
// Views
// ============================================================================

#[tokio::test]
async fn join_window_opens_fifteen_minutes_around_the_session() {
    let h = Harness::new();
    let starts_at = Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap();
    let slot = fixtures::slot_at(fixtures::teacher("Ada").id, 1, starts_at);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();
    let student = fixtures::student("Bo");

    let booking = h.ledger.bookings().create(&student, slot.id, None).await.unwrap();
    h.ledger
        .bookings()
        .mark_paid(&fixtures::admin("Root"), booking.id, None)
        .await
        .unwrap();

    for (hour, minute, expected) in [(9, 44, false), (9, 46, true), (11, 14, true), (11, 16, false)] {
        h.clock
            .set(Utc.with_ymd_and_hms(2025, 1, 2, hour, minute, 0).unwrap());
        let view = h.ledger.bookings().view(booking.id).await.unwrap();
        assert_eq!(view.can_join, expected, "at {hour}:{minute:02}");
        assert!(!view.can_cancel);
    }
}

#[tokio::test]
async fn deleted_slot_leaves_its_bookings_detached() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let slot = fixtures::slot(teacher.id, 1);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();
    let student = fixtures::student("Bo");
    let booking = h.ledger.bookings().create(&student, slot.id, None).await.unwrap();

    h.ledger.catalog().delete_slot(&teacher, slot.id).await.unwrap();

    let views = h.ledger.bookings().views_for_student(student.id).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].booking.id, booking.id);
    assert_eq!(views[0].booking.slot_id, None);
    assert!(views[0].slot.is_none());
    assert!(views[0].can_cancel);
    assert!(!views[0].can_join);

    h.ledger.bookings().cancel_by_student(&student, booking.id).await.unwrap();
}

#[tokio::test]
async fn price_change_does_not_touch_existing_bookings() {
    let h = Harness::new();
    let teacher = fixtures::teacher("Ada");
    let slot = fixtures::slot(teacher.id, 2);
    fixtures::seed_slot(&h.store, &slot).await.unwrap();

    let first = h
        .ledger
        .bookings()
        .create(&fixtures::student("Bo"), slot.id, None)
        .await
        .unwrap();
    h.ledger
        .catalog()
        .update_slot_price(&teacher, slot.id, Money::from_cents(9_900))
        .await
        .unwrap();
    let second = h
        .ledger
        .bookings()
        .create(&fixtures::student("Cy"), slot.id, None)
        .await
        .unwrap();

    assert_eq!(first.price, slot.unit_price);
    assert_eq!(second.price, Money::from_cents(9_900));
    let stored = h.store.snapshot().await;
    assert_eq!(stored.bookings[&first.id].price, slot.unit_price);
}

// ============================================================================
// Notification isolation
// ============================================================================

#[tokio::test]
async fn gateway_outage_does_not_fail_the_booking() {
    let Harness { ledger, store, outbox, .. } = Harness::new();
    let gateway = Arc::new(RecordingNotificationGateway::new());
    gateway.fail_next(u32::MAX);
    let (shutdown, _) = tokio::sync::broadcast::channel(1);
    let worker = NotificationWorker::new(Arc::clone(&gateway), outbox, shutdown.subscribe())
        .with_retry(
            tutorlane_runtime::RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(std::time::Duration::from_millis(1))
                .build(),
        )
        .spawn();

    let slot = fixtures::slot(fixtures::teacher("Ada").id, 1);
    fixtures::seed_slot(&store, &slot).await.unwrap();
    let booking = ledger
        .bookings()
        .create(&fixtures::student("Bo"), slot.id, None)
        .await;
    assert!(booking.is_ok());

    drop(ledger);
    worker.await.unwrap();
    assert_eq!(gateway.attempts(), 2);
    assert!(gateway.delivered().is_empty());
    drop(shutdown);
}
