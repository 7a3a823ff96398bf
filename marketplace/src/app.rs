//! The caller-facing facade.
//!
//! Every operation takes the caller's [`UserId`], resolves it to an
//! [`Actor`] through the [`IdentityProvider`], checks the role the operation
//! needs and then runs the engine. Results pass through one boundary that
//! logs them by kind:
//!
//! - conflicts, missing rows and rejected input at `debug`
//! - storage and identity failures at `error`, with the operation and caller
//!
//! Ownership is checked by the engine. A caller who does not own the target
//! sees `NotFound`, the same as for a row that does not exist.

use tracing::{debug, error};
use tutorlane_core::audit::{AuditSubject, ModerationLogEntry};
use tutorlane_core::environment::{Actor, Clock, IdentityProvider, Role, SystemClock};
use tutorlane_core::error::{Entity, MarketplaceError, Result};
use tutorlane_core::model::{
    Booking, BookingView, CourseMonth, Enrollment, MonthPayment, RecurringCourse, Slot,
};
use tutorlane_core::store::LedgerStore;
use tutorlane_core::types::{
    BookingId, CourseId, CourseMonthId, EnrollmentId, Money, PaymentId, SlotId, UserId,
};
use tutorlane_runtime::{CourseDraft, Ledger, SlotDraft};

/// Authorization gate and boundary logging around a [`Ledger`].
pub struct Marketplace<S, I, C = SystemClock> {
    ledger: Ledger<S, C>,
    identity: I,
}

/// Log a finished operation by failure kind.
fn observe<T>(operation: &'static str, caller: UserId, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => debug!(operation, %caller, "Operation succeeded"),
        Err(err) if err.is_internal() => {
            error!(operation, %caller, error = %err, "Operation failed");
        }
        Err(err) => debug!(operation, %caller, reason = %err, "Operation rejected"),
    }
    result
}

fn require(actor: &Actor, role: Role) -> Result<()> {
    if actor.has_role(role) {
        Ok(())
    } else {
        Err(MarketplaceError::Forbidden { required: role })
    }
}

/// Catalog work is for teachers; admins may act on any teacher's behalf.
fn require_teacher(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        return Ok(());
    }
    require(actor, Role::Teacher)
}

impl<S, I, C> Marketplace<S, I, C>
where
    S: LedgerStore,
    I: IdentityProvider,
    C: Clock,
{
    /// Wrap a ledger with an identity provider.
    #[must_use]
    pub const fn new(ledger: Ledger<S, C>, identity: I) -> Self {
        Self { ledger, identity }
    }

    /// The wrapped engine.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger<S, C> {
        &self.ledger
    }

    async fn actor(&self, caller: UserId, role: Option<Role>) -> Result<Actor> {
        let actor = self.identity.resolve(caller).await?;
        if let Some(role) = role {
            require(&actor, role)?;
        }
        Ok(actor)
    }

    async fn teacher(&self, caller: UserId) -> Result<Actor> {
        let actor = self.actor(caller, None).await?;
        require_teacher(&actor)?;
        Ok(actor)
    }

    // ═══════════════════════════════════════════════════════════
    // Bookings
    // ═══════════════════════════════════════════════════════════

    /// Book a seat in a slot.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the student role, otherwise `NotFound` or `Full`.
    pub async fn create_booking(
        &self,
        caller: UserId,
        slot_id: SlotId,
        notes: Option<String>,
    ) -> Result<Booking> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.bookings().create(&student, slot_id, notes).await
        }
        .await;
        observe("create_booking", caller, result)
    }

    /// Cancel one's own pending booking before the cutoff.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound` or `InvalidState`.
    pub async fn cancel_booking(&self, caller: UserId, booking_id: BookingId) -> Result<()> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.bookings().cancel_by_student(&student, booking_id).await
        }
        .await;
        observe("cancel_booking", caller, result)
    }

    /// The caller's bookings with their view flags.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the student role.
    pub async fn my_bookings(&self, caller: UserId) -> Result<Vec<BookingView>> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.bookings().views_for_student(student.id).await
        }
        .await;
        observe("my_bookings", caller, result)
    }

    /// One booking, visible to its student, its teacher and admins.
    ///
    /// # Errors
    ///
    /// `NotFound` for anyone else.
    pub async fn view_booking(&self, caller: UserId, booking_id: BookingId) -> Result<BookingView> {
        let result = async {
            let actor = self.actor(caller, None).await?;
            let view = self.ledger.bookings().view(booking_id).await?;
            let booking = &view.booking;
            if booking.student_id == actor.id || actor.owns_or_admin(booking.teacher_id) {
                Ok(view)
            } else {
                Err(MarketplaceError::not_found(Entity::Booking, *booking_id.as_uuid()))
            }
        }
        .await;
        observe("view_booking", caller, result)
    }

    /// Confirm a booking payment.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admins, otherwise `NotFound` or `InvalidState`.
    pub async fn mark_booking_paid(
        &self,
        caller: UserId,
        booking_id: BookingId,
        meeting_ref: Option<String>,
    ) -> Result<Booking> {
        let result = async {
            let admin = self.actor(caller, Some(Role::Admin)).await?;
            self.ledger.bookings().mark_paid(&admin, booking_id, meeting_ref).await
        }
        .await;
        observe("mark_booking_paid", caller, result)
    }

    /// Remove a booking regardless of status or window.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admins, otherwise `NotFound`.
    pub async fn admin_cancel_booking(
        &self,
        caller: UserId,
        booking_id: BookingId,
        reason: Option<String>,
    ) -> Result<()> {
        let result = async {
            let admin = self.actor(caller, Some(Role::Admin)).await?;
            self.ledger.bookings().cancel_by_admin(&admin, booking_id, reason).await
        }
        .await;
        observe("admin_cancel_booking", caller, result)
    }

    // ═══════════════════════════════════════════════════════════
    // Enrollments and month payments
    // ═══════════════════════════════════════════════════════════

    /// Enroll in an active course, or return the existing enrollment.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn enroll(&self, caller: UserId, course_id: CourseId) -> Result<Enrollment> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.enrollments().enroll(&student, course_id).await
        }
        .await;
        observe("enroll", caller, result)
    }

    /// Request payment of one month. The returned row names both the payment
    /// and the enrollment it was filed under.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, `MonthNotReady` or `AlreadyRequested`.
    pub async fn request_month_payment(
        &self,
        caller: UserId,
        course_id: CourseId,
        month_id: CourseMonthId,
    ) -> Result<MonthPayment> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.payments().request(&student, course_id, month_id).await
        }
        .await;
        observe("request_month_payment", caller, result)
    }

    /// Withdraw one's own pending payment request.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound` or `InvalidState`.
    pub async fn cancel_month_payment(&self, caller: UserId, payment_id: PaymentId) -> Result<()> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.payments().cancel(&student, payment_id).await
        }
        .await;
        observe("cancel_month_payment", caller, result)
    }

    /// Cancel one's own enrollment.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, `HasPaidMonths` or `HasPendingPayments`.
    pub async fn cancel_enrollment(&self, caller: UserId, enrollment_id: EnrollmentId) -> Result<()> {
        let result = async {
            let student = self.actor(caller, Some(Role::Student)).await?;
            self.ledger.enrollments().cancel(&student, enrollment_id).await
        }
        .await;
        observe("cancel_enrollment", caller, result)
    }

    /// Confirm a month payment with the reconciled amount and reference.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `Validation`, `NotFound` or `InvalidState`.
    pub async fn approve_payment(
        &self,
        caller: UserId,
        payment_id: PaymentId,
        amount: Money,
        reference: &str,
    ) -> Result<MonthPayment> {
        let result = async {
            let admin = self.actor(caller, Some(Role::Admin)).await?;
            self.ledger
                .payments()
                .approve(&admin, payment_id, amount, reference)
                .await
        }
        .await;
        observe("approve_payment", caller, result)
    }

    /// Reject a pending month payment.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound` or `InvalidState`.
    pub async fn reject_payment(
        &self,
        caller: UserId,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<MonthPayment> {
        let result = async {
            let admin = self.actor(caller, Some(Role::Admin)).await?;
            self.ledger.payments().reject(&admin, payment_id, reason).await
        }
        .await;
        observe("reject_payment", caller, result)
    }

    /// Reverse a paid month payment.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound` or `InvalidState`.
    pub async fn revoke_payment(
        &self,
        caller: UserId,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<MonthPayment> {
        let result = async {
            let admin = self.actor(caller, Some(Role::Admin)).await?;
            self.ledger.payments().revoke(&admin, payment_id, reason).await
        }
        .await;
        observe("revoke_payment", caller, result)
    }

    /// Set the admin approval flag of an enrollment.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn approve_enrollment(
        &self,
        caller: UserId,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment> {
        let result = async {
            let admin = self.actor(caller, Some(Role::Admin)).await?;
            self.ledger.enrollments().approve(&admin, enrollment_id).await
        }
        .await;
        observe("approve_enrollment", caller, result)
    }

    /// Open or close a month for payment requests.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn set_month_ready(
        &self,
        caller: UserId,
        month_id: CourseMonthId,
        ready: bool,
    ) -> Result<CourseMonth> {
        let result = async {
            let actor = self.teacher(caller).await?;
            self.ledger.payments().set_month_ready(&actor, month_id, ready).await
        }
        .await;
        observe("set_month_ready", caller, result)
    }

    /// Moderation entries about a booking, enrollment or month, oldest first.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admins.
    pub async fn moderation_history(
        &self,
        caller: UserId,
        subject: AuditSubject,
    ) -> Result<Vec<ModerationLogEntry>> {
        let result = async {
            self.actor(caller, Some(Role::Admin)).await?;
            self.ledger.history(subject).await
        }
        .await;
        observe("moderation_history", caller, result)
    }

    // ═══════════════════════════════════════════════════════════
    // Catalog
    // ═══════════════════════════════════════════════════════════

    /// Offer a new slot.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `Validation`.
    pub async fn create_slot(&self, caller: UserId, draft: SlotDraft) -> Result<Slot> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().create_slot(&teacher, draft).await
        }
        .await;
        observe("create_slot", caller, result)
    }

    /// Change the price of future bookings of a slot.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn update_slot_price(
        &self,
        caller: UserId,
        slot_id: SlotId,
        unit_price: Money,
    ) -> Result<Slot> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().update_slot_price(&teacher, slot_id, unit_price).await
        }
        .await;
        observe("update_slot_price", caller, result)
    }

    /// Change the seat count of a slot.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `Validation`, `NotFound` or `InvalidState`.
    pub async fn resize_slot(&self, caller: UserId, slot_id: SlotId, capacity: u32) -> Result<Slot> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().resize_slot(&teacher, slot_id, capacity).await
        }
        .await;
        observe("resize_slot", caller, result)
    }

    /// Delete a slot. Its bookings stay, detached.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn delete_slot(&self, caller: UserId, slot_id: SlotId) -> Result<()> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().delete_slot(&teacher, slot_id).await
        }
        .await;
        observe("delete_slot", caller, result)
    }

    /// Create a course with its months, all closed for payment.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `Validation`.
    pub async fn create_course(
        &self,
        caller: UserId,
        draft: CourseDraft,
    ) -> Result<(RecurringCourse, Vec<CourseMonth>)> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().create_course(&teacher, draft).await
        }
        .await;
        observe("create_course", caller, result)
    }

    /// Append the next month to a course.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn add_course_month(&self, caller: UserId, course_id: CourseId) -> Result<CourseMonth> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().add_course_month(&teacher, course_id).await
        }
        .await;
        observe("add_course_month", caller, result)
    }

    /// Delete a month together with its payments.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn delete_course_month(&self, caller: UserId, month_id: CourseMonthId) -> Result<()> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().delete_course_month(&teacher, month_id).await
        }
        .await;
        observe("delete_course_month", caller, result)
    }

    /// Close a course to new payment requests.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn archive_course(&self, caller: UserId, course_id: CourseId) -> Result<RecurringCourse> {
        let result = async {
            let teacher = self.teacher(caller).await?;
            self.ledger.catalog().archive_course(&teacher, course_id).await
        }
        .await;
        observe("archive_course", caller, result)
    }

    /// Months of a course in order. Any known user may list them.
    ///
    /// # Errors
    ///
    /// `NotFound` if the course does not exist.
    pub async fn course_months(&self, caller: UserId, course_id: CourseId) -> Result<Vec<CourseMonth>> {
        let result = async {
            self.actor(caller, None).await?;
            self.ledger.catalog().months(course_id).await
        }
        .await;
        observe("course_months", caller, result)
    }
}
