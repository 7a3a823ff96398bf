//! Month payment requests and their admin settlement.
//!
//! A student requests payment for a ready month of an active course. Admins
//! approve, reject or later revoke it. Only a `Pending` payment blocks another
//! request for the same month, so a rejected month can be requested again.
//! Revoking a month's readiness leaves its pending requests payable.

use crate::audit::ModerationAuditLog;
use crate::enrollment::EnrollmentManager;
use crate::environment::LedgerEnvironment;
use crate::metrics::TransitionMetrics;
use std::sync::Arc;
use tracing::{debug, info};
use tutorlane_core::audit::{AuditAction, AuditSubject};
use tutorlane_core::environment::{Actor, Clock, Role};
use tutorlane_core::error::{Entity, MarketplaceError, Result};
use tutorlane_core::model::{CourseMonth, Enrollment, MonthPayment, RecurringCourse};
use tutorlane_core::notification::{Notification, Template};
use tutorlane_core::payment::{PaymentEvent, PaymentOutcome, PaymentStatus};
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{CourseId, CourseMonthId, Money, PaymentId, Version};

/// Owns the `MonthPayment` state machine and the month readiness gate.
pub struct MonthPaymentStateMachine<S, C> {
    env: Arc<LedgerEnvironment<S, C>>,
    enrollments: Arc<EnrollmentManager<S, C>>,
}

impl<S: LedgerStore, C: Clock> MonthPaymentStateMachine<S, C> {
    /// Create the state machine. Enrollments are created through `enrollments`.
    #[must_use]
    pub const fn new(
        env: Arc<LedgerEnvironment<S, C>>,
        enrollments: Arc<EnrollmentManager<S, C>>,
    ) -> Self {
        Self { env, enrollments }
    }

    /// Request payment of `month_id` of `course_id` by `student`.
    ///
    /// The course and month are validated before any enrollment is created, so
    /// a closed month never leaves an enrollment behind. The amount is the
    /// course price at request time. Admins are notified after commit.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the course is missing or archived, or the month is not
    ///   one of its months
    /// - `MonthNotReady` if the month is not open for payment
    /// - `AlreadyRequested` if a pending payment exists for this month
    pub async fn request(
        &self,
        student: &Actor,
        course_id: CourseId,
        month_id: CourseMonthId,
    ) -> Result<MonthPayment> {
        let mut tx = self.env.store.begin().await?;
        load_payable_month(&mut tx, course_id, month_id).await?;
        tx.rollback().await?;

        let enrollment = self.enrollments.get_or_create(course_id, student.id).await?;

        let mut tx = self.env.store.begin().await?;
        let (course, month) = load_payable_month(&mut tx, course_id, month_id).await?;
        if let Some(existing) = tx.find_pending_payment(enrollment.id, month_id).await? {
            tx.rollback().await?;
            return Err(already_requested(existing.id));
        }

        let now = self.env.now();
        let payment = MonthPayment {
            id: PaymentId::new(),
            enrollment_id: enrollment.id,
            course_month_id: month_id,
            amount: course.price_per_month,
            status: PaymentStatus::Pending,
            admin_note: None,
            payment_reference: None,
            created_at: now,
            paid_at: None,
            version: Version::INITIAL,
        };
        match tx.insert_payment(&payment).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation { .. }) => {
                // A concurrent request won the partial unique index.
                tx.rollback().await?;
                let mut tx = self.env.store.begin().await?;
                let existing = tx.find_pending_payment(enrollment.id, month_id).await?;
                tx.rollback().await?;
                return match existing {
                    Some(existing) => Err(already_requested(existing.id)),
                    None => Err(MarketplaceError::invalid_state(
                        "the payment request conflicted with another change, try again",
                    )),
                };
            }
            Err(StoreError::ForeignKeyViolation { constraint }) => {
                // The enrollment was cancelled after it was read.
                debug!(enrollment_id = %enrollment.id, %constraint, "Enrollment vanished during request");
                return Err(MarketplaceError::invalid_state(
                    "the enrollment was cancelled while the payment was requested, try again",
                ));
            }
            Err(e) => return Err(e.into()),
        }
        ModerationAuditLog::record(
            &mut tx,
            student,
            AuditSubject::Enrollment(enrollment.id),
            AuditAction::PaymentRequested,
            Some(format!("month {}", month.month_index)),
            now,
        )
        .await?;
        tx.commit().await?;

        TransitionMetrics::record_request("created");
        info!(
            payment_id = %payment.id,
            enrollment_id = %enrollment.id,
            %course_id,
            month_index = month.month_index,
            "Month payment requested"
        );
        self.env.notify(
            Notification::to_role(Role::Admin, Template::PaymentRequested)
                .with_arg("payment_id", payment.id)
                .with_arg("student", &student.name)
                .with_arg("course", &course.title)
                .with_arg("month_index", month.month_index),
        );
        Ok(payment)
    }

    /// Student withdrawal of their own pending request. The row is deleted.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the payment does not exist or belongs to someone else
    /// - `InvalidState` unless the payment is pending
    pub async fn cancel(&self, student: &Actor, payment_id: PaymentId) -> Result<()> {
        let mut tx = self.env.store.begin().await?;
        let (payment, enrollment) = load_payment(&mut tx, payment_id).await?;
        if enrollment.student_id != student.id {
            return Err(MarketplaceError::not_found(Entity::Payment, *payment_id.as_uuid()));
        }

        let outcome = payment.status.apply(PaymentEvent::CancelByStudent)?;
        ModerationAuditLog::record(
            &mut tx,
            student,
            AuditSubject::Enrollment(enrollment.id),
            AuditAction::PaymentCancelled,
            None,
            self.env.now(),
        )
        .await?;
        persist(&mut tx, payment, outcome).await?;
        tx.commit().await?;

        TransitionMetrics::record_payment(PaymentEvent::CancelByStudent.as_str());
        info!(%payment_id, student_id = %student.id, "Month payment cancelled by student");
        Ok(())
    }

    /// Admin confirmation that `amount` was received under `reference`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the reference is blank or the amount is zero
    /// - `NotFound` if the payment does not exist
    /// - `InvalidState` unless the payment is pending
    pub async fn approve(
        &self,
        admin: &Actor,
        payment_id: PaymentId,
        amount: Money,
        reference: &str,
    ) -> Result<MonthPayment> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MarketplaceError::Validation(
                "a payment reference is required".to_string(),
            ));
        }
        if amount.is_zero() {
            return Err(MarketplaceError::Validation(
                "the paid amount must be positive".to_string(),
            ));
        }

        let now = self.env.now();
        let mut tx = self.env.store.begin().await?;
        let (mut payment, enrollment) = load_payment(&mut tx, payment_id).await?;
        let outcome = payment.status.apply(PaymentEvent::Approve)?;
        payment.amount = amount;
        payment.paid_at = Some(now);
        payment.payment_reference = Some(reference.to_string());
        ModerationAuditLog::record(
            &mut tx,
            admin,
            AuditSubject::Enrollment(enrollment.id),
            AuditAction::MarkedPaid,
            Some(reference.to_string()),
            now,
        )
        .await?;
        let payment = persisted(persist(&mut tx, payment, outcome).await?)?;
        tx.commit().await?;

        TransitionMetrics::record_payment(PaymentEvent::Approve.as_str());
        info!(%payment_id, admin_id = %admin.id, "Month payment approved");
        self.env.notify(
            Notification::to_user(enrollment.student_id, Template::PaymentApproved)
                .with_arg("payment_id", payment_id),
        );
        Ok(payment)
    }

    /// Admin rejection of a pending request with a reason for the student.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the payment does not exist
    /// - `InvalidState` unless the payment is pending
    pub async fn reject(
        &self,
        admin: &Actor,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<MonthPayment> {
        self.settle(
            admin,
            payment_id,
            PaymentEvent::Reject,
            (AuditAction::Rejected, Template::PaymentRejected),
            reason,
        )
        .await
    }

    /// Admin reversal of a paid payment. The record stays as `Cancelled`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the payment does not exist
    /// - `InvalidState` unless the payment is paid
    pub async fn revoke(
        &self,
        admin: &Actor,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<MonthPayment> {
        self.settle(
            admin,
            payment_id,
            PaymentEvent::AdminRevoke,
            (AuditAction::Revoked, Template::PaymentRevoked),
            reason,
        )
        .await
    }

    /// Open or close `month_id` for payment requests.
    ///
    /// Only the owning teacher or an admin may toggle it; anyone else sees
    /// `NotFound`. Setting the current value changes nothing and logs nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` if the month does not exist or the actor does not own it.
    pub async fn set_month_ready(
        &self,
        actor: &Actor,
        month_id: CourseMonthId,
        ready: bool,
    ) -> Result<CourseMonth> {
        let mut tx = self.env.store.begin().await?;
        let not_found = || MarketplaceError::not_found(Entity::CourseMonth, *month_id.as_uuid());
        let mut month = tx.find_course_month(month_id).await?.ok_or_else(not_found)?;
        let owned = tx
            .find_course(month.course_id)
            .await?
            .is_some_and(|course| actor.owns_or_admin(course.teacher_id));
        if !owned {
            return Err(not_found());
        }
        if month.ready_for_payment == ready {
            tx.rollback().await?;
            debug!(%month_id, ready, "Month readiness unchanged");
            return Ok(month);
        }

        month.ready_for_payment = ready;
        month.version = tx.update_course_month(&month).await?;
        ModerationAuditLog::record(
            &mut tx,
            actor,
            AuditSubject::CourseMonth(month_id),
            AuditAction::MonthReadinessChanged,
            Some(if ready { "ready" } else { "not ready" }.to_string()),
            self.env.now(),
        )
        .await?;
        tx.commit().await?;

        info!(%month_id, ready, actor_id = %actor.id, "Month readiness changed");
        Ok(month)
    }

    async fn settle(
        &self,
        admin: &Actor,
        payment_id: PaymentId,
        event: PaymentEvent,
        (action, template): (AuditAction, Template),
        reason: &str,
    ) -> Result<MonthPayment> {
        let reason = reason.trim();
        let note = (!reason.is_empty()).then(|| reason.to_string());

        let mut tx = self.env.store.begin().await?;
        let (mut payment, enrollment) = load_payment(&mut tx, payment_id).await?;
        let outcome = payment.status.apply(event)?;
        payment.admin_note.clone_from(&note);
        ModerationAuditLog::record(
            &mut tx,
            admin,
            AuditSubject::Enrollment(enrollment.id),
            action,
            note.clone(),
            self.env.now(),
        )
        .await?;
        let payment = persisted(persist(&mut tx, payment, outcome).await?)?;
        tx.commit().await?;

        TransitionMetrics::record_payment(event.as_str());
        info!(%payment_id, admin_id = %admin.id, event = event.as_str(), "Month payment settled");
        let mut notification =
            Notification::to_user(enrollment.student_id, template).with_arg("payment_id", payment_id);
        if let Some(reason) = note {
            notification = notification.with_arg("reason", reason);
        }
        self.env.notify(notification);
        Ok(payment)
    }
}

fn already_requested(payment_id: PaymentId) -> MarketplaceError {
    TransitionMetrics::record_request("already_requested");
    debug!(%payment_id, "Pending payment already exists");
    MarketplaceError::AlreadyRequested { payment_id }
}

/// The active course and its ready month.
async fn load_payable_month<T: LedgerTx>(
    tx: &mut T,
    course_id: CourseId,
    month_id: CourseMonthId,
) -> Result<(RecurringCourse, CourseMonth)> {
    let course = tx
        .find_course(course_id)
        .await?
        .filter(RecurringCourse::is_active)
        .ok_or_else(|| MarketplaceError::not_found(Entity::Course, *course_id.as_uuid()))?;
    let month = tx
        .find_course_month(month_id)
        .await?
        .filter(|m| m.course_id == course_id)
        .ok_or_else(|| MarketplaceError::not_found(Entity::CourseMonth, *month_id.as_uuid()))?;
    if !month.ready_for_payment {
        TransitionMetrics::record_request("month_not_ready");
        return Err(MarketplaceError::MonthNotReady { month_id });
    }
    Ok((course, month))
}

/// A payment together with its enrollment.
async fn load_payment<T: LedgerTx>(
    tx: &mut T,
    payment_id: PaymentId,
) -> Result<(MonthPayment, Enrollment)> {
    let not_found = || MarketplaceError::not_found(Entity::Payment, *payment_id.as_uuid());
    let payment = tx.find_payment(payment_id).await?.ok_or_else(not_found)?;
    let enrollment = tx
        .find_enrollment(payment.enrollment_id)
        .await?
        .ok_or_else(not_found)?;
    Ok((payment, enrollment))
}

async fn persist<T: LedgerTx>(
    tx: &mut T,
    mut payment: MonthPayment,
    outcome: PaymentOutcome,
) -> Result<Option<MonthPayment>> {
    match outcome {
        PaymentOutcome::Removed => {
            tx.delete_payment(&payment).await?;
            Ok(None)
        }
        PaymentOutcome::Becomes(status) => {
            payment.status = status;
            payment.version = tx.update_payment(&payment).await?;
            Ok(Some(payment))
        }
    }
}

fn persisted(payment: Option<MonthPayment>) -> Result<MonthPayment> {
    payment.ok_or_else(|| MarketplaceError::invalid_state("payment was removed"))
}
