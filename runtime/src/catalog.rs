//! Slots, recurring courses and their months.
//!
//! Only the owning teacher or an admin may change an entry. Anyone else gets
//! `NotFound`, as if the entry did not exist.

use crate::environment::LedgerEnvironment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use tutorlane_core::environment::{Actor, Clock};
use tutorlane_core::error::{Entity, MarketplaceError, Result};
use tutorlane_core::model::{CourseMonth, RecurringCourse, Slot};
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{Capacity, CourseId, CourseMonthId, Money, SlotId, Version};

/// Input of [`Catalog::create_slot`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDraft {
    /// Session start
    pub starts_at: DateTime<Utc>,
    /// Session end, after the start
    pub ends_at: DateTime<Utc>,
    /// Seats, at least one
    pub capacity: u32,
    /// Price charged per booking
    pub unit_price: Money,
    /// Location or meeting reference
    pub location_ref: Option<String>,
}

/// Input of [`Catalog::create_course`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseDraft {
    /// Display title
    pub title: String,
    /// Price of one month
    pub price_per_month: Money,
    /// Months created up front
    pub duration_months: u32,
}

/// Teacher-owned catalog entries.
pub struct Catalog<S, C> {
    env: Arc<LedgerEnvironment<S, C>>,
}

impl<S: LedgerStore, C: Clock> Catalog<S, C> {
    /// Create a catalog over a shared environment.
    #[must_use]
    pub const fn new(env: Arc<LedgerEnvironment<S, C>>) -> Self {
        Self { env }
    }

    // ═══════════════════════════════════════════════════════════
    // Slots
    // ═══════════════════════════════════════════════════════════

    /// Offer a new slot owned by `teacher`.
    ///
    /// # Errors
    ///
    /// `Validation` if the capacity is zero or the slot does not end after it starts.
    pub async fn create_slot(&self, teacher: &Actor, draft: SlotDraft) -> Result<Slot> {
        let capacity = Capacity::new(draft.capacity).ok_or_else(|| {
            MarketplaceError::Validation("a slot needs at least one seat".to_string())
        })?;
        if draft.ends_at <= draft.starts_at {
            return Err(MarketplaceError::Validation(
                "a slot must end after it starts".to_string(),
            ));
        }

        let slot = Slot {
            id: SlotId::new(),
            teacher_id: teacher.id,
            starts_at: draft.starts_at,
            ends_at: draft.ends_at,
            capacity,
            unit_price: draft.unit_price,
            location_ref: draft.location_ref,
            version: Version::INITIAL,
        };
        let mut tx = self.env.store.begin().await?;
        tx.insert_slot(&slot).await?;
        tx.commit().await?;

        info!(slot_id = %slot.id, teacher_id = %teacher.id, capacity = %slot.capacity, "Slot created");
        Ok(slot)
    }

    /// Change the price of future bookings. Existing bookings keep their price.
    ///
    /// # Errors
    ///
    /// `NotFound` if the slot does not exist or the actor does not own it.
    pub async fn update_slot_price(
        &self,
        actor: &Actor,
        slot_id: SlotId,
        unit_price: Money,
    ) -> Result<Slot> {
        let mut tx = self.env.store.begin().await?;
        let mut slot = owned_slot(&mut tx, actor, slot_id, false).await?;
        slot.unit_price = unit_price;
        slot.version = tx.update_slot(&slot).await?;
        tx.commit().await?;

        info!(%slot_id, price = %unit_price, "Slot price updated");
        Ok(slot)
    }

    /// Change the capacity of a slot.
    ///
    /// The slot row is locked while the occupancy is counted, so no admission
    /// can slip in between the check and the write.
    ///
    /// # Errors
    ///
    /// - `Validation` if the capacity is zero
    /// - `NotFound` if the slot does not exist or the actor does not own it
    /// - `InvalidState` if more bookings than `capacity` already hold a seat
    pub async fn resize_slot(&self, actor: &Actor, slot_id: SlotId, capacity: u32) -> Result<Slot> {
        let capacity = Capacity::new(capacity).ok_or_else(|| {
            MarketplaceError::Validation("a slot needs at least one seat".to_string())
        })?;

        let mut tx = self.env.store.begin().await?;
        let mut slot = owned_slot(&mut tx, actor, slot_id, true).await?;
        let occupied = tx.count_occupying_bookings(slot_id).await?;
        if occupied > capacity.value() {
            return Err(MarketplaceError::invalid_state(format!(
                "{occupied} bookings already hold a seat on this slot"
            )));
        }
        slot.capacity = capacity;
        slot.version = tx.update_slot(&slot).await?;
        tx.commit().await?;

        info!(%slot_id, %capacity, occupied, "Slot resized");
        Ok(slot)
    }

    /// Delete a slot. Its bookings stay, detached from any slot.
    ///
    /// # Errors
    ///
    /// `NotFound` if the slot does not exist or the actor does not own it.
    pub async fn delete_slot(&self, actor: &Actor, slot_id: SlotId) -> Result<()> {
        let mut tx = self.env.store.begin().await?;
        owned_slot(&mut tx, actor, slot_id, true).await?;
        tx.delete_slot(slot_id).await?;
        tx.commit().await?;

        info!(%slot_id, actor_id = %actor.id, "Slot deleted");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    // Courses and months
    // ═══════════════════════════════════════════════════════════

    /// Create a course with `duration_months` months, none of them ready.
    ///
    /// # Errors
    ///
    /// `Validation` if the title is blank, the price is zero or there are no months.
    pub async fn create_course(
        &self,
        teacher: &Actor,
        draft: CourseDraft,
    ) -> Result<(RecurringCourse, Vec<CourseMonth>)> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(MarketplaceError::Validation("a course needs a title".to_string()));
        }
        if draft.price_per_month.is_zero() {
            return Err(MarketplaceError::Validation(
                "the monthly price must be positive".to_string(),
            ));
        }
        if draft.duration_months == 0 {
            return Err(MarketplaceError::Validation(
                "a course needs at least one month".to_string(),
            ));
        }

        let course = RecurringCourse {
            id: CourseId::new(),
            teacher_id: teacher.id,
            title: title.to_string(),
            price_per_month: draft.price_per_month,
            duration_months: draft.duration_months,
            archived: false,
            version: Version::INITIAL,
        };
        let months: Vec<CourseMonth> = (1..=draft.duration_months)
            .map(|index| new_month(course.id, index))
            .collect();

        let mut tx = self.env.store.begin().await?;
        tx.insert_course(&course).await?;
        for month in &months {
            tx.insert_course_month(month).await?;
        }
        tx.commit().await?;

        info!(course_id = %course.id, teacher_id = %teacher.id, months = months.len(), "Course created");
        Ok((course, months))
    }

    /// Append the next month to a course.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the course does not exist or the actor does not own it
    /// - `InvalidState` if another month was added concurrently
    pub async fn add_course_month(&self, actor: &Actor, course_id: CourseId) -> Result<CourseMonth> {
        let mut tx = self.env.store.begin().await?;
        owned_course(&mut tx, actor, course_id).await?;
        let next = tx
            .list_course_months(course_id)
            .await?
            .last()
            .map_or(1, |m| m.month_index.saturating_add(1));

        let month = new_month(course_id, next);
        match tx.insert_course_month(&month).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation { .. }) => {
                return Err(MarketplaceError::invalid_state(
                    "another month was added at the same time, try again",
                ));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        info!(%course_id, month_index = next, "Course month added");
        Ok(month)
    }

    /// Delete a month together with its payments.
    ///
    /// # Errors
    ///
    /// `NotFound` if the month does not exist or the actor does not own its course.
    pub async fn delete_course_month(&self, actor: &Actor, month_id: CourseMonthId) -> Result<()> {
        let mut tx = self.env.store.begin().await?;
        let month = tx
            .find_course_month(month_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found(Entity::CourseMonth, *month_id.as_uuid()))?;
        owned_course(&mut tx, actor, month.course_id)
            .await
            .map_err(|_| MarketplaceError::not_found(Entity::CourseMonth, *month_id.as_uuid()))?;
        tx.delete_course_month(month_id).await?;
        tx.commit().await?;

        info!(%month_id, course_id = %month.course_id, "Course month deleted");
        Ok(())
    }

    /// Close a course to new payment requests. Existing payments are untouched.
    ///
    /// # Errors
    ///
    /// `NotFound` if the course does not exist or the actor does not own it.
    pub async fn archive_course(&self, actor: &Actor, course_id: CourseId) -> Result<RecurringCourse> {
        let mut tx = self.env.store.begin().await?;
        let mut course = owned_course(&mut tx, actor, course_id).await?;
        if course.archived {
            tx.rollback().await?;
            return Ok(course);
        }
        course.archived = true;
        course.version = tx.update_course(&course).await?;
        tx.commit().await?;

        info!(%course_id, "Course archived");
        Ok(course)
    }

    /// Months of a course ordered by index.
    ///
    /// # Errors
    ///
    /// `NotFound` if the course does not exist.
    pub async fn months(&self, course_id: CourseId) -> Result<Vec<CourseMonth>> {
        let mut tx = self.env.store.begin().await?;
        if tx.find_course(course_id).await?.is_none() {
            return Err(MarketplaceError::not_found(Entity::Course, *course_id.as_uuid()));
        }
        let months = tx.list_course_months(course_id).await?;
        tx.rollback().await?;
        Ok(months)
    }
}

fn new_month(course_id: CourseId, month_index: u32) -> CourseMonth {
    CourseMonth {
        id: CourseMonthId::new(),
        course_id,
        month_index,
        ready_for_payment: false,
        window_start: None,
        window_end: None,
        version: Version::INITIAL,
    }
}

async fn owned_slot<T: LedgerTx>(
    tx: &mut T,
    actor: &Actor,
    slot_id: SlotId,
    lock: bool,
) -> Result<Slot> {
    let slot = if lock {
        tx.lock_slot(slot_id).await?
    } else {
        tx.find_slot(slot_id).await?
    };
    slot.filter(|s| actor.owns_or_admin(s.teacher_id))
        .ok_or_else(|| MarketplaceError::not_found(Entity::Slot, *slot_id.as_uuid()))
}

async fn owned_course<T: LedgerTx>(
    tx: &mut T,
    actor: &Actor,
    course_id: CourseId,
) -> Result<RecurringCourse> {
    tx.find_course(course_id)
        .await?
        .filter(|c| actor.owns_or_admin(c.teacher_id))
        .ok_or_else(|| MarketplaceError::not_found(Entity::Course, *course_id.as_uuid()))
}
