//! Booking state machine and the time-window policy around it.
//!
//! ```text
//!   Pending ──MarkPaid──────────▶ Paid
//!      │                           │
//!      ├──CancelByStudent──▶ [removed]
//!      └──CancelByAdmin────▶ [removed] ◀──CancelByAdmin──┘
//! ```
//!
//! Both live states occupy one unit of slot capacity. `Paid` is terminal for the
//! student: only an admin can remove a paid booking.

use crate::transition::InvalidTransition;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Requested by the student, awaiting manual payment reconciliation
    Pending,
    /// Payment confirmed by an admin
    Paid,
}

/// Inputs the booking state machine understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingEvent {
    /// Admin confirmed the payment
    MarkPaid,
    /// The booking student withdrew the request
    CancelByStudent,
    /// An admin removed the booking
    CancelByAdmin,
}

/// Result of applying a [`BookingEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingOutcome {
    /// The booking stays, possibly in a new status
    Becomes(BookingStatus),
    /// The booking row is deleted
    Removed,
}

impl BookingStatus {
    /// Every status counts against slot capacity.
    #[must_use]
    pub const fn occupies_capacity(self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    /// Apply an event, rejecting any pair the machine does not define.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when `event` is not valid in this status.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutorlane_core::booking::{BookingEvent, BookingOutcome, BookingStatus};
    ///
    /// assert_eq!(
    ///     BookingStatus::Pending.apply(BookingEvent::MarkPaid),
    ///     Ok(BookingOutcome::Becomes(BookingStatus::Paid)),
    /// );
    /// assert!(BookingStatus::Paid.apply(BookingEvent::CancelByStudent).is_err());
    /// ```
    pub fn apply(self, event: BookingEvent) -> Result<BookingOutcome, InvalidTransition> {
        match (self, event) {
            (Self::Pending, BookingEvent::MarkPaid) => Ok(BookingOutcome::Becomes(Self::Paid)),
            (Self::Pending, BookingEvent::CancelByStudent)
            | (Self::Pending | Self::Paid, BookingEvent::CancelByAdmin) => {
                Ok(BookingOutcome::Removed)
            }
            (from, event) => Err(InvalidTransition::new(
                "booking",
                from.as_str(),
                event.as_str(),
            )),
        }
    }

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BookingEvent {
    /// Stable name used in transition errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarkPaid => "mark_paid",
            Self::CancelByStudent => "cancel_by_student",
            Self::CancelByAdmin => "cancel_by_admin",
        }
    }
}

// ============================================================================
// Time windows
// ============================================================================

/// Cancellation and join windows for bookings.
///
/// Both flags are computed from the clock at view time and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// A student may cancel only while the slot starts later than `now + cancel_before`
    pub cancel_before: Duration,
    /// Slack around the slot during which a paid booking may join
    pub join_window: Duration,
}

impl BookingPolicy {
    /// Default cancellation cutoff in minutes
    pub const DEFAULT_CANCEL_BEFORE_MINUTES: i64 = 60;
    /// Default join slack in minutes
    pub const DEFAULT_JOIN_WINDOW_MINUTES: i64 = 15;

    /// Build a policy from minute values.
    #[must_use]
    pub const fn from_minutes(cancel_before: i64, join_window: i64) -> Self {
        Self {
            cancel_before: Duration::minutes(cancel_before),
            join_window: Duration::minutes(join_window),
        }
    }

    /// True while the slot start is strictly after `now + cancel_before`.
    #[must_use]
    pub fn cancellation_open(&self, slot_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        slot_start > now + self.cancel_before
    }

    /// True iff the booking is paid and `now` lies in
    /// `[start - join_window, end + join_window]`.
    #[must_use]
    pub fn can_join(
        &self,
        status: BookingStatus,
        slot_start: DateTime<Utc>,
        slot_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        status == BookingStatus::Paid
            && now >= slot_start - self.join_window
            && now <= slot_end + self.join_window
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::from_minutes(
            Self::DEFAULT_CANCEL_BEFORE_MINUTES,
            Self::DEFAULT_JOIN_WINDOW_MINUTES,
        )
    }
}
