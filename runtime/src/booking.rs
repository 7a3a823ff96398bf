//! Booking lifecycle: creation, cancellation, payment and views.
//!
//! Each state change runs in one transaction that also appends its
//! moderation entry. Notifications go out only after commit.

use crate::audit::ModerationAuditLog;
use crate::capacity::SlotCapacityManager;
use crate::environment::LedgerEnvironment;
use crate::metrics::TransitionMetrics;
use std::sync::Arc;
use tracing::{debug, info};
use tutorlane_core::audit::{AuditAction, AuditSubject};
use tutorlane_core::booking::{BookingEvent, BookingOutcome};
use tutorlane_core::environment::{Actor, Clock};
use tutorlane_core::error::{Entity, MarketplaceError, Result};
use tutorlane_core::model::{Booking, BookingView};
use tutorlane_core::notification::{Notification, Template};
use tutorlane_core::store::{LedgerStore, LedgerTx};
use tutorlane_core::types::{BookingId, SlotId, UserId};

/// Owns booking state transitions and the window policy.
pub struct BookingLifecycle<S, C> {
    env: Arc<LedgerEnvironment<S, C>>,
    capacity: SlotCapacityManager<S, C>,
}

impl<S: LedgerStore, C: Clock> BookingLifecycle<S, C> {
    /// Create the lifecycle over a shared environment.
    #[must_use]
    pub fn new(env: Arc<LedgerEnvironment<S, C>>) -> Self {
        Self {
            capacity: SlotCapacityManager::new(Arc::clone(&env)),
            env,
        }
    }

    /// The capacity manager used for admissions.
    #[must_use]
    pub const fn capacity(&self) -> &SlotCapacityManager<S, C> {
        &self.capacity
    }

    /// Request a seat on `slot_id` for `student`.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Full`, see [`SlotCapacityManager::try_reserve`].
    pub async fn create(
        &self,
        student: &Actor,
        slot_id: SlotId,
        notes: Option<String>,
    ) -> Result<Booking> {
        self.capacity.try_reserve(student, slot_id, notes).await
    }

    /// Student cancellation of their own pending booking.
    ///
    /// Allowed only while the booking is `Pending` and the slot starts later
    /// than `now + cancel_before`. A booking whose slot was deleted has no
    /// window left to enforce and may always be cancelled while pending.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the booking does not exist or belongs to someone else
    /// - `InvalidState` if the booking is paid or the cutoff has passed
    pub async fn cancel_by_student(&self, student: &Actor, booking_id: BookingId) -> Result<()> {
        let now = self.env.now();
        let mut tx = self.env.store.begin().await?;
        let booking = find_owned(&mut tx, booking_id, Some(student.id)).await?;

        let outcome = booking.status.apply(BookingEvent::CancelByStudent)?;
        if let Some(slot_id) = booking.slot_id {
            if let Some(slot) = tx.find_slot(slot_id).await? {
                if !self.env.policy.cancellation_open(slot.starts_at, now) {
                    debug!(%booking_id, %slot_id, "Cancellation refused after cutoff");
                    return Err(MarketplaceError::invalid_state(format!(
                        "bookings can only be cancelled more than {} minutes before the session starts",
                        self.env.policy.cancel_before.num_minutes()
                    )));
                }
            }
        }

        ModerationAuditLog::record(
            &mut tx,
            student,
            AuditSubject::Booking(booking_id),
            AuditAction::CancelledByStudent,
            None,
            now,
        )
        .await?;
        apply_outcome(&mut tx, booking, outcome).await?;
        tx.commit().await?;

        TransitionMetrics::record_booking(BookingEvent::CancelByStudent.as_str());
        info!(%booking_id, student_id = %student.id, "Booking cancelled by student");
        Ok(())
    }

    /// Admin confirmation of a booking payment.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the booking does not exist
    /// - `InvalidState` if the booking is already paid
    pub async fn mark_paid(
        &self,
        admin: &Actor,
        booking_id: BookingId,
        meeting_ref: Option<String>,
    ) -> Result<Booking> {
        let now = self.env.now();
        let mut tx = self.env.store.begin().await?;
        let mut booking = find_owned(&mut tx, booking_id, None).await?;

        let outcome = booking.status.apply(BookingEvent::MarkPaid)?;
        if meeting_ref.is_some() {
            booking.meeting_ref = meeting_ref;
        }
        ModerationAuditLog::record(
            &mut tx,
            admin,
            AuditSubject::Booking(booking_id),
            AuditAction::MarkedPaid,
            None,
            now,
        )
        .await?;
        let booking = apply_outcome(&mut tx, booking, outcome)
            .await?
            .ok_or_else(|| MarketplaceError::invalid_state("booking was removed"))?;
        tx.commit().await?;

        TransitionMetrics::record_booking(BookingEvent::MarkPaid.as_str());
        info!(%booking_id, admin_id = %admin.id, "Booking marked paid");
        self.env.notify(
            Notification::to_user(booking.student_id, Template::BookingPaid)
                .with_arg("booking_id", booking_id),
        );
        Ok(booking)
    }

    /// Admin removal of a booking, pending or paid. No window rule applies.
    ///
    /// # Errors
    ///
    /// `NotFound` if the booking does not exist.
    pub async fn cancel_by_admin(
        &self,
        admin: &Actor,
        booking_id: BookingId,
        reason: Option<String>,
    ) -> Result<()> {
        let now = self.env.now();
        let mut tx = self.env.store.begin().await?;
        let booking = find_owned(&mut tx, booking_id, None).await?;
        let student_id = booking.student_id;

        let outcome = booking.status.apply(BookingEvent::CancelByAdmin)?;
        ModerationAuditLog::record(
            &mut tx,
            admin,
            AuditSubject::Booking(booking_id),
            AuditAction::CancelledByAdmin,
            reason.clone(),
            now,
        )
        .await?;
        apply_outcome(&mut tx, booking, outcome).await?;
        tx.commit().await?;

        TransitionMetrics::record_booking(BookingEvent::CancelByAdmin.as_str());
        info!(%booking_id, admin_id = %admin.id, "Booking cancelled by admin");
        let mut notification = Notification::to_user(student_id, Template::BookingCancelledByAdmin)
            .with_arg("booking_id", booking_id);
        if let Some(reason) = reason {
            notification = notification.with_arg("reason", reason);
        }
        self.env.notify(notification);
        Ok(())
    }

    /// The booking with its view-time `can_join` and `can_cancel` flags.
    ///
    /// # Errors
    ///
    /// `NotFound` if the booking does not exist.
    pub async fn view(&self, booking_id: BookingId) -> Result<BookingView> {
        let mut tx = self.env.store.begin().await?;
        let booking = find_owned(&mut tx, booking_id, None).await?;
        let slot = match booking.slot_id {
            Some(slot_id) => tx.find_slot(slot_id).await?,
            None => None,
        };
        tx.rollback().await?;
        Ok(BookingView::build(
            booking,
            slot,
            &self.env.policy,
            self.env.now(),
        ))
    }

    /// Views of every booking of a student, oldest request first.
    ///
    /// # Errors
    ///
    /// `Storage` if the read fails.
    pub async fn views_for_student(&self, student_id: UserId) -> Result<Vec<BookingView>> {
        let mut tx = self.env.store.begin().await?;
        let bookings = tx.list_bookings_for_student(student_id).await?;
        let mut views = Vec::with_capacity(bookings.len());
        let now = self.env.now();
        for booking in bookings {
            let slot = match booking.slot_id {
                Some(slot_id) => tx.find_slot(slot_id).await?,
                None => None,
            };
            views.push(BookingView::build(booking, slot, &self.env.policy, now));
        }
        tx.rollback().await?;
        Ok(views)
    }
}

/// Load a booking, hiding it from anyone but `owner` when one is given.
async fn find_owned<T: LedgerTx>(
    tx: &mut T,
    booking_id: BookingId,
    owner: Option<UserId>,
) -> Result<Booking> {
    tx.find_booking(booking_id)
        .await?
        .filter(|b| owner.is_none_or(|owner| b.student_id == owner))
        .ok_or_else(|| MarketplaceError::not_found(Entity::Booking, *booking_id.as_uuid()))
}

/// Persist the result of a transition. Returns the stored row unless it was removed.
async fn apply_outcome<T: LedgerTx>(
    tx: &mut T,
    mut booking: Booking,
    outcome: BookingOutcome,
) -> Result<Option<Booking>> {
    match outcome {
        BookingOutcome::Removed => {
            tx.delete_booking(&booking).await?;
            Ok(None)
        }
        BookingOutcome::Becomes(status) => {
            booking.status = status;
            booking.version = tx.update_booking(&booking).await?;
            Ok(Some(booking))
        }
    }
}
