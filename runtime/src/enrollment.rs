//! Student × course enrollments.

use crate::audit::ModerationAuditLog;
use crate::environment::LedgerEnvironment;
use crate::metrics::TransitionMetrics;
use std::sync::Arc;
use tracing::{debug, info};
use tutorlane_core::audit::{AuditAction, AuditSubject};
use tutorlane_core::environment::{Actor, Clock};
use tutorlane_core::error::{Entity, MarketplaceError, Result};
use tutorlane_core::model::{Enrollment, MonthPayment};
use tutorlane_core::payment::PaymentStatus;
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::{CourseId, EnrollmentId, UserId, Version};

/// Creates, approves and cancels enrollments. One per (course, student).
pub struct EnrollmentManager<S, C> {
    env: Arc<LedgerEnvironment<S, C>>,
}

impl<S: LedgerStore, C: Clock> EnrollmentManager<S, C> {
    /// Create a manager over a shared environment.
    #[must_use]
    pub const fn new(env: Arc<LedgerEnvironment<S, C>>) -> Self {
        Self { env }
    }

    /// Return the enrollment of `student_id` in `course_id`, creating it if needed.
    ///
    /// Idempotent. When a concurrent call inserts the same pair first, the
    /// store's unique index rejects this insert and the winner's row is read
    /// back and returned instead.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the course does not exist
    /// - `Storage` on storage failure
    pub async fn get_or_create(&self, course_id: CourseId, student_id: UserId) -> Result<Enrollment> {
        let mut tx = self.env.store.begin().await?;
        if tx.find_course(course_id).await?.is_none() {
            return Err(MarketplaceError::not_found(Entity::Course, *course_id.as_uuid()));
        }
        if let Some(existing) = tx.find_enrollment_by_pair(course_id, student_id).await? {
            tx.rollback().await?;
            return Ok(existing);
        }

        let enrollment = Enrollment {
            id: EnrollmentId::new(),
            course_id,
            student_id,
            created_at: self.env.now(),
            approved: false,
            version: Version::INITIAL,
        };
        match tx.insert_enrollment(&enrollment).await {
            Ok(()) => {
                tx.commit().await?;
                TransitionMetrics::record_enrollment();
                info!(enrollment_id = %enrollment.id, %course_id, %student_id, "Enrollment created");
                Ok(enrollment)
            }
            Err(StoreError::UniqueViolation { constraint }) => {
                tx.rollback().await?;
                debug!(%course_id, %student_id, %constraint, "Enrollment created concurrently, re-reading");
                let mut tx = self.env.store.begin().await?;
                let existing = tx.find_enrollment_by_pair(course_id, student_id).await?;
                tx.rollback().await?;
                existing.ok_or_else(|| StoreError::UniqueViolation { constraint }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Explicit enroll action: like [`Self::get_or_create`] but only for active courses.
    ///
    /// # Errors
    ///
    /// `NotFound` if the course does not exist or is archived.
    pub async fn enroll(&self, student: &Actor, course_id: CourseId) -> Result<Enrollment> {
        let mut tx = self.env.store.begin().await?;
        let active = tx
            .find_course(course_id)
            .await?
            .is_some_and(|course| course.is_active());
        tx.rollback().await?;
        if !active {
            return Err(MarketplaceError::not_found(Entity::Course, *course_id.as_uuid()));
        }
        self.get_or_create(course_id, student.id).await
    }

    /// Student cancellation of their own enrollment.
    ///
    /// Rejected while any month is paid, then while any payment is pending.
    /// Otherwise the remaining rejected and cancelled payments are deleted
    /// together with the enrollment.
    ///
    /// The enrollment row stays locked from the check to the commit, so a
    /// payment request cannot slip in between and be deleted with it.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the enrollment does not exist or belongs to someone else
    /// - `HasPaidMonths` if a payment is paid
    /// - `HasPendingPayments` if a payment is pending
    pub async fn cancel(&self, student: &Actor, enrollment_id: EnrollmentId) -> Result<()> {
        let mut tx = self.env.store.begin().await?;
        let enrollment = tx
            .lock_enrollment(enrollment_id)
            .await?
            .filter(|e| e.student_id == student.id)
            .ok_or_else(|| MarketplaceError::not_found(Entity::Enrollment, *enrollment_id.as_uuid()))?;

        let payments = tx.list_payments_for_enrollment(enrollment.id).await?;
        check_cancellable(&payments)?;

        let removed = tx.delete_closed_payments(enrollment.id).await?;
        ModerationAuditLog::record(
            &mut tx,
            student,
            AuditSubject::Enrollment(enrollment.id),
            AuditAction::EnrollmentCancelled,
            Some(format!("removed {removed} closed payment records")),
            self.env.now(),
        )
        .await?;
        match tx.delete_enrollment(enrollment.id).await {
            Ok(_) => {}
            Err(StoreError::ForeignKeyViolation { constraint }) => {
                debug!(%enrollment_id, %constraint, "Payments still reference the enrollment");
                return Err(MarketplaceError::HasPendingPayments);
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        info!(%enrollment_id, student_id = %student.id, removed, "Enrollment cancelled");
        Ok(())
    }

    /// Admin approval of an enrollment. Approving twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` if the enrollment does not exist.
    pub async fn approve(&self, admin: &Actor, enrollment_id: EnrollmentId) -> Result<Enrollment> {
        let mut tx = self.env.store.begin().await?;
        let mut enrollment = tx
            .find_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found(Entity::Enrollment, *enrollment_id.as_uuid()))?;
        if enrollment.approved {
            tx.rollback().await?;
            return Ok(enrollment);
        }

        enrollment.approved = true;
        enrollment.version = tx.update_enrollment(&enrollment).await?;
        ModerationAuditLog::record(
            &mut tx,
            admin,
            AuditSubject::Enrollment(enrollment_id),
            AuditAction::EnrollmentApproved,
            None,
            self.env.now(),
        )
        .await?;
        tx.commit().await?;

        info!(%enrollment_id, admin_id = %admin.id, "Enrollment approved");
        Ok(enrollment)
    }

    /// An enrollment and its payments, oldest payment first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the enrollment does not exist.
    pub async fn with_payments(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<(Enrollment, Vec<MonthPayment>)> {
        let mut tx = self.env.store.begin().await?;
        let enrollment = tx
            .find_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found(Entity::Enrollment, *enrollment_id.as_uuid()))?;
        let payments = tx.list_payments_for_enrollment(enrollment_id).await?;
        tx.rollback().await?;
        Ok((enrollment, payments))
    }
}

/// Paid months block first, then pending requests.
fn check_cancellable(payments: &[MonthPayment]) -> Result<()> {
    if payments.iter().any(|p| p.status == PaymentStatus::Paid) {
        return Err(MarketplaceError::HasPaidMonths);
    }
    if payments.iter().any(|p| p.status == PaymentStatus::Pending) {
        return Err(MarketplaceError::HasPendingPayments);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tutorlane_core::types::{CourseMonthId, Money, PaymentId};

    fn payment(status: PaymentStatus) -> MonthPayment {
        MonthPayment {
            id: PaymentId::new(),
            enrollment_id: EnrollmentId::new(),
            course_month_id: CourseMonthId::new(),
            amount: Money::from_cents(100),
            status,
            admin_note: None,
            payment_reference: None,
            created_at: Utc::now(),
            paid_at: None,
            version: Version::INITIAL,
        }
    }

    #[test]
    fn paid_months_are_reported_before_pending_ones() {
        let both = [payment(PaymentStatus::Pending), payment(PaymentStatus::Paid)];
        assert_eq!(check_cancellable(&both), Err(MarketplaceError::HasPaidMonths));

        let pending = [payment(PaymentStatus::Rejected), payment(PaymentStatus::Pending)];
        assert_eq!(
            check_cancellable(&pending),
            Err(MarketplaceError::HasPendingPayments)
        );

        let settled = [payment(PaymentStatus::Rejected), payment(PaymentStatus::Cancelled)];
        assert_eq!(check_cancellable(&settled), Ok(()));
    }
}
