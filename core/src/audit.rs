//! Moderation log entries.
//!
//! The log is append-only: entries are written in the same transaction as the
//! action they document and are never updated or deleted afterwards.

use crate::types::{BookingId, CourseMonthId, EnrollmentId, LogEntryId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The entity a log entry is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditSubject {
    /// A booking
    Booking(BookingId),
    /// An enrollment, also used for its month payments
    Enrollment(EnrollmentId),
    /// A course month (readiness changes)
    CourseMonth(CourseMonthId),
}

impl AuditSubject {
    /// Storage name of the subject kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Booking(_) => "booking",
            Self::Enrollment(_) => "enrollment",
            Self::CourseMonth(_) => "course_month",
        }
    }

    /// Raw identifier of the subject.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Booking(id) => *id.as_uuid(),
            Self::Enrollment(id) => *id.as_uuid(),
            Self::CourseMonth(id) => *id.as_uuid(),
        }
    }

    /// Rebuild a subject from its storage columns.
    #[must_use]
    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "booking" => Some(Self::Booking(BookingId::from_uuid(id))),
            "enrollment" => Some(Self::Enrollment(EnrollmentId::from_uuid(id))),
            "course_month" => Some(Self::CourseMonth(CourseMonthId::from_uuid(id))),
            _ => None,
        }
    }
}

impl fmt::Display for AuditSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// What happened to the subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    /// A student requested a booking
    BookingRequested,
    /// A student cancelled a pending booking
    CancelledByStudent,
    /// An admin removed a booking
    CancelledByAdmin,
    /// An admin confirmed a booking or month payment
    MarkedPaid,
    /// A student requested a month payment
    PaymentRequested,
    /// A student withdrew a pending month payment
    PaymentCancelled,
    /// An admin rejected a month payment
    Rejected,
    /// An admin reversed a paid month payment
    Revoked,
    /// A student cancelled an enrollment
    EnrollmentCancelled,
    /// An admin approved an enrollment
    EnrollmentApproved,
    /// A month was opened or closed for payment
    MonthReadinessChanged,
}

impl AuditAction {
    /// Storage name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingRequested => "BookingRequested",
            Self::CancelledByStudent => "CancelledByStudent",
            Self::CancelledByAdmin => "CancelledByAdmin",
            Self::MarkedPaid => "MarkedPaid",
            Self::PaymentRequested => "PaymentRequested",
            Self::PaymentCancelled => "PaymentCancelled",
            Self::Rejected => "Rejected",
            Self::Revoked => "Revoked",
            Self::EnrollmentCancelled => "EnrollmentCancelled",
            Self::EnrollmentApproved => "EnrollmentApproved",
            Self::MonthReadinessChanged => "MonthReadinessChanged",
        }
    }

    /// Parse an action from its storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BookingRequested" => Some(Self::BookingRequested),
            "CancelledByStudent" => Some(Self::CancelledByStudent),
            "CancelledByAdmin" => Some(Self::CancelledByAdmin),
            "MarkedPaid" => Some(Self::MarkedPaid),
            "PaymentRequested" => Some(Self::PaymentRequested),
            "PaymentCancelled" => Some(Self::PaymentCancelled),
            "Rejected" => Some(Self::Rejected),
            "Revoked" => Some(Self::Revoked),
            "EnrollmentCancelled" => Some(Self::EnrollmentCancelled),
            "EnrollmentApproved" => Some(Self::EnrollmentApproved),
            "MonthReadinessChanged" => Some(Self::MonthReadinessChanged),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable moderation log record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationLogEntry {
    /// Entry identifier
    pub id: LogEntryId,
    /// The entity acted upon
    pub subject: AuditSubject,
    /// Who acted
    pub actor_id: UserId,
    /// Display name of the actor at the time of the action
    pub actor_name: String,
    /// What was done
    pub action: AuditAction,
    /// Optional free text (reason, reference)
    pub note: Option<String>,
    /// When it was done
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips_through_columns() {
        let subject = AuditSubject::Enrollment(EnrollmentId::new());
        assert_eq!(
            AuditSubject::from_parts(subject.kind(), subject.id()),
            Some(subject)
        );
        assert_eq!(AuditSubject::from_parts("slot", Uuid::new_v4()), None);
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::CancelledByStudent.as_str(), "CancelledByStudent");
        assert_eq!(AuditAction::parse("MarkedPaid"), Some(AuditAction::MarkedPaid));
        assert_eq!(AuditAction::parse("markedpaid"), None);
    }
}
