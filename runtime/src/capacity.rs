//! Slot occupancy and admission.
//!
//! Admission is a double check:
//!
//! 1. **Pre-check**, outside any write transaction: read the slot and its
//!    occupancy. A full slot is rejected here without opening a transaction.
//!    Transient storage errors are retried once.
//! 2. **Authoritative check**, inside the write transaction: lock the slot row,
//!    count again, and insert only if there is still room.
//!
//! The lock serializes concurrent admissions on the same slot, so two requests
//! can never both see the last free seat. The store adds a capacity trigger as
//! a last line of defense; its rejection is reported as `Full` too.

use crate::audit::ModerationAuditLog;
use crate::environment::LedgerEnvironment;
use crate::metrics::AdmissionMetrics;
use crate::retry::retry_with_predicate;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tutorlane_core::audit::{AuditAction, AuditSubject};
use tutorlane_core::booking::BookingStatus;
use tutorlane_core::environment::{Actor, Clock};
use tutorlane_core::error::{Entity, MarketplaceError, Result};
use tutorlane_core::model::{Booking, Slot};
use tutorlane_core::notification::{Notification, Template};
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{BookingId, SlotId, Version};

/// Admits or rejects booking requests against slot capacity.
pub struct SlotCapacityManager<S, C> {
    env: Arc<LedgerEnvironment<S, C>>,
}

impl<S: LedgerStore, C: Clock> SlotCapacityManager<S, C> {
    /// Create a manager over a shared environment.
    #[must_use]
    pub const fn new(env: Arc<LedgerEnvironment<S, C>>) -> Self {
        Self { env }
    }

    /// The slot and its current occupancy, from the admission pre-check read.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the slot does not exist
    /// - `Storage` if the read fails after its retry
    pub async fn occupancy(&self, slot_id: SlotId) -> Result<(Slot, u32)> {
        let store = &self.env.store;
        retry_with_predicate(
            &self.env.precheck_retry,
            "slot_precheck",
            || store.slot_occupancy(slot_id),
            StoreError::is_transient,
        )
        .await?
        .ok_or_else(|| MarketplaceError::not_found(Entity::Slot, *slot_id.as_uuid()))
    }

    /// Reserve a seat for `student` and insert a pending booking.
    ///
    /// The booking snapshots the slot's price and teacher. On success a
    /// `BookingRequested` entry is committed with it and the teacher is
    /// notified after commit.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the slot does not exist
    /// - `Full` if either capacity check finds no free seat
    /// - `Storage` on any other storage failure
    pub async fn try_reserve(
        &self,
        student: &Actor,
        slot_id: SlotId,
        notes: Option<String>,
    ) -> Result<Booking> {
        let started = Instant::now();

        let (slot, occupied) = self.occupancy(slot_id).await?;
        if slot.capacity.is_exhausted_by(occupied) {
            AdmissionMetrics::record_full("precheck");
            debug!(%slot_id, occupied, capacity = %slot.capacity, "Slot full at pre-check");
            return Err(MarketplaceError::Full { slot_id });
        }

        let mut tx = self.env.store.begin().await?;
        let Some(slot) = tx.lock_slot(slot_id).await? else {
            tx.rollback().await?;
            return Err(MarketplaceError::not_found(Entity::Slot, *slot_id.as_uuid()));
        };
        let occupied = tx.count_occupying_bookings(slot_id).await?;
        if slot.capacity.is_exhausted_by(occupied) {
            tx.rollback().await?;
            AdmissionMetrics::record_full("transaction");
            debug!(%slot_id, occupied, capacity = %slot.capacity, "Slot filled before admission");
            return Err(MarketplaceError::Full { slot_id });
        }

        let now = self.env.now();
        let booking = Booking {
            id: BookingId::new(),
            slot_id: Some(slot.id),
            student_id: student.id,
            teacher_id: slot.teacher_id,
            requested_at: now,
            status: BookingStatus::Pending,
            price: slot.unit_price,
            meeting_ref: None,
            notes,
            version: Version::INITIAL,
        };
        tx.insert_booking(&booking).await.map_err(|e| match e {
            StoreError::CheckViolation { .. } => {
                AdmissionMetrics::record_full("constraint");
                MarketplaceError::Full { slot_id }
            }
            other => other.into(),
        })?;
        ModerationAuditLog::record(
            &mut tx,
            student,
            AuditSubject::Booking(booking.id),
            AuditAction::BookingRequested,
            None,
            now,
        )
        .await?;
        tx.commit().await?;

        AdmissionMetrics::record_admitted(started.elapsed());
        info!(
            booking_id = %booking.id,
            %slot_id,
            student_id = %student.id,
            seat = occupied + 1,
            capacity = %slot.capacity,
            "Booking admitted"
        );

        self.env.notify(
            Notification::to_user(slot.teacher_id, Template::BookingRequested)
                .with_arg("booking_id", booking.id)
                .with_arg("student", &student.name)
                .with_arg("starts_at", slot.starts_at.to_rfc3339()),
        );
        Ok(booking)
    }
}
