//! End-to-end tests of the marketplace facade over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use tutorlane::Marketplace;
use tutorlane_core::audit::{AuditAction, AuditSubject};
use tutorlane_core::environment::{Actor, Clock, Role};
use tutorlane_core::error::MarketplaceError;
use tutorlane_core::payment::PaymentStatus;
use tutorlane_core::types::{Money, UserId};
use tutorlane_runtime::{CourseDraft, Ledger, LedgerEnvironment, NotificationDispatcher, SlotDraft};
use tutorlane_testing::{FixedClock, InMemoryLedgerStore, StaticIdentityProvider, fixtures, test_clock};

struct World {
    app: Marketplace<InMemoryLedgerStore, StaticIdentityProvider, FixedClock>,
    identity: StaticIdentityProvider,
    clock: FixedClock,
    student: Actor,
    teacher: Actor,
    admin: Actor,
}

fn world() -> World {
    tutorlane_testing::init_test_tracing();
    let student = fixtures::student("Bo");
    let teacher = fixtures::teacher("Ada");
    let admin = fixtures::admin("Root");
    let identity = StaticIdentityProvider::new()
        .with(student.clone())
        .with(teacher.clone())
        .with(admin.clone());

    let clock = test_clock();
    let (dispatcher, _outbox) = NotificationDispatcher::channel(64);
    let ledger = Ledger::new(LedgerEnvironment::new(
        InMemoryLedgerStore::new(),
        clock.clone(),
        dispatcher,
    ));
    World {
        app: Marketplace::new(ledger, identity.clone()),
        identity,
        clock,
        student,
        teacher,
        admin,
    }
}

fn slot_draft(clock: &FixedClock) -> SlotDraft {
    let starts_at = clock.now() + Duration::days(3);
    SlotDraft {
        starts_at,
        ends_at: starts_at + Duration::hours(1),
        capacity: 2,
        unit_price: Money::from_cents(5_000),
        location_ref: Some("room-4".to_string()),
    }
}

#[tokio::test]
async fn roles_gate_every_operation() {
    let w = world();

    let err = w
        .app
        .create_slot(w.student.id, slot_draft(&w.clock))
        .await
        .unwrap_err();
    assert_eq!(err, MarketplaceError::Forbidden { required: Role::Teacher });

    let slot = w.app.create_slot(w.teacher.id, slot_draft(&w.clock)).await.unwrap();
    let err = w.app.create_booking(w.teacher.id, slot.id, None).await.unwrap_err();
    assert_eq!(err, MarketplaceError::Forbidden { required: Role::Student });

    let booking = w.app.create_booking(w.student.id, slot.id, None).await.unwrap();
    let err = w
        .app
        .mark_booking_paid(w.student.id, booking.id, None)
        .await
        .unwrap_err();
    assert_eq!(err, MarketplaceError::Forbidden { required: Role::Admin });

    let err = w
        .app
        .moderation_history(w.teacher.id, AuditSubject::Booking(booking.id))
        .await
        .unwrap_err();
    assert_eq!(err, MarketplaceError::Forbidden { required: Role::Admin });
}

#[tokio::test]
async fn unknown_callers_are_rejected() {
    let w = world();
    let (course, _) = fixtures::course(w.teacher.id, 1);
    let err = w.app.course_months(UserId::new(), course.id).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Identity(_)));
    assert!(err.is_internal());
}

#[tokio::test]
async fn bookings_are_visible_to_their_parties_only() {
    let w = world();
    let slot = w.app.create_slot(w.teacher.id, slot_draft(&w.clock)).await.unwrap();
    let booking = w
        .app
        .create_booking(w.student.id, slot.id, Some("first lesson".to_string()))
        .await
        .unwrap();

    for viewer in [w.student.id, w.teacher.id, w.admin.id] {
        let view = w.app.view_booking(viewer, booking.id).await.unwrap();
        assert_eq!(view.booking.id, booking.id);
        assert!(view.can_cancel);
        assert!(!view.can_join);
    }

    let mallory = fixtures::teacher("Mallory");
    let eve = fixtures::student("Eve");
    w.identity.insert(mallory.clone());
    w.identity.insert(eve.clone());
    for stranger in [mallory.id, eve.id] {
        let err = w.app.view_booking(stranger, booking.id).await.unwrap_err();
        assert!(err.is_not_found());
    }
    let err = w.app.cancel_booking(eve.id, booking.id).await.unwrap_err();
    assert!(err.is_not_found());

    let mine = w.app.my_bookings(w.student.id).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].booking.notes.as_deref(), Some("first lesson"));
}

#[tokio::test]
async fn paid_bookings_can_be_joined_in_the_window() {
    let w = world();
    let slot = w.app.create_slot(w.teacher.id, slot_draft(&w.clock)).await.unwrap();
    let booking = w.app.create_booking(w.student.id, slot.id, None).await.unwrap();
    w.app
        .mark_booking_paid(w.admin.id, booking.id, Some("https://meet/abc".to_string()))
        .await
        .unwrap();

    w.clock.set(slot.starts_at - Duration::minutes(10));
    let view = w.app.view_booking(w.student.id, booking.id).await.unwrap();
    assert!(view.can_join);
    assert!(!view.can_cancel);
    assert_eq!(view.booking.meeting_ref.as_deref(), Some("https://meet/abc"));

    let err = w.app.cancel_booking(w.student.id, booking.id).await.unwrap_err();
    assert!(err.is_conflict());
    w.app
        .admin_cancel_booking(w.admin.id, booking.id, Some("teacher ill".to_string()))
        .await
        .unwrap();
    assert!(w.app.my_bookings(w.student.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn month_payment_round_trip_through_the_facade() {
    let w = world();
    let (course, months) = w
        .app
        .create_course(
            w.teacher.id,
            CourseDraft {
                title: "Chemistry".to_string(),
                price_per_month: Money::from_cents(9_000),
                duration_months: 2,
            },
        )
        .await
        .unwrap();

    let err = w
        .app
        .request_month_payment(w.student.id, course.id, months[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::MonthNotReady { .. }));

    let err = w
        .app
        .set_month_ready(w.student.id, months[0].id, true)
        .await
        .unwrap_err();
    assert_eq!(err, MarketplaceError::Forbidden { required: Role::Teacher });
    w.app.set_month_ready(w.teacher.id, months[0].id, true).await.unwrap();

    let payment = w
        .app
        .request_month_payment(w.student.id, course.id, months[0].id)
        .await
        .unwrap();
    assert_eq!(payment.amount, Money::from_cents(9_000));

    let paid = w
        .app
        .approve_payment(w.admin.id, payment.id, Money::from_cents(8_500), "TRX-77")
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.amount, Money::from_cents(8_500));

    let err = w
        .app
        .cancel_enrollment(w.student.id, payment.enrollment_id)
        .await
        .unwrap_err();
    assert_eq!(err, MarketplaceError::HasPaidMonths);

    let enrollment = w
        .app
        .approve_enrollment(w.admin.id, payment.enrollment_id)
        .await
        .unwrap();
    assert!(enrollment.approved);

    let history = w
        .app
        .moderation_history(w.admin.id, AuditSubject::Enrollment(payment.enrollment_id))
        .await
        .unwrap();
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::PaymentRequested,
            AuditAction::MarkedPaid,
            AuditAction::EnrollmentApproved
        ]
    );
    assert_eq!(history[1].note.as_deref(), Some("TRX-77"));
    assert_eq!(history[1].actor_name, "Root");
}

#[tokio::test]
async fn explicit_enrollment_and_archiving() {
    let w = world();
    let (course, _) = w
        .app
        .create_course(
            w.teacher.id,
            CourseDraft {
                title: "History".to_string(),
                price_per_month: Money::from_cents(4_000),
                duration_months: 1,
            },
        )
        .await
        .unwrap();

    let first = w.app.enroll(w.student.id, course.id).await.unwrap();
    let again = w.app.enroll(w.student.id, course.id).await.unwrap();
    assert_eq!(first.id, again.id);
    w.app.cancel_enrollment(w.student.id, first.id).await.unwrap();

    w.app.archive_course(w.admin.id, course.id).await.unwrap();
    let err = w.app.enroll(w.student.id, course.id).await.unwrap_err();
    assert!(err.is_not_found());

    let added = w.app.add_course_month(w.teacher.id, course.id).await.unwrap();
    assert_eq!(added.month_index, 2);
    assert_eq!(w.app.course_months(w.student.id, course.id).await.unwrap().len(), 2);
}
