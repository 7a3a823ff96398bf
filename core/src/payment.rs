//! Month payment state machine.
//!
//! ```text
//!   Pending ──Approve──────▶ Paid ──AdminRevoke──▶ Cancelled
//!      │
//!      ├──Reject───────────▶ Rejected
//!      └──CancelByStudent──▶ [removed]
//! ```
//!
//! Only `Pending` holds the per-month request guard: a `Rejected` or `Cancelled`
//! payment does not stop the student from requesting the same month again.

use crate::transition::InvalidTransition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted status of a month payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Requested by the student, waiting for an admin
    Pending,
    /// Refused by an admin
    Rejected,
    /// Reconciled by an admin
    Paid,
    /// A paid payment reversed by an admin
    Cancelled,
}

/// Inputs the payment state machine understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentEvent {
    /// Admin confirmed money arrived
    Approve,
    /// Admin refused the request
    Reject,
    /// Student withdrew the request
    CancelByStudent,
    /// Admin reversed a paid month
    AdminRevoke,
}

/// Result of applying a [`PaymentEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The payment row stays in the given status
    Becomes(PaymentStatus),
    /// The payment row is deleted
    Removed,
}

impl PaymentStatus {
    /// All statuses, in storage order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Rejected, Self::Paid, Self::Cancelled];

    /// Apply an event, rejecting any pair the machine does not define.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when `event` is not valid in this status.
    pub fn apply(self, event: PaymentEvent) -> Result<PaymentOutcome, InvalidTransition> {
        match (self, event) {
            (Self::Pending, PaymentEvent::Approve) => Ok(PaymentOutcome::Becomes(Self::Paid)),
            (Self::Pending, PaymentEvent::Reject) => Ok(PaymentOutcome::Becomes(Self::Rejected)),
            (Self::Pending, PaymentEvent::CancelByStudent) => Ok(PaymentOutcome::Removed),
            (Self::Paid, PaymentEvent::AdminRevoke) => Ok(PaymentOutcome::Becomes(Self::Cancelled)),
            (from, event) => Err(InvalidTransition::new(
                "payment",
                from.as_str(),
                event.as_str(),
            )),
        }
    }

    /// True only for `Pending`: the one status that blocks a new request for the same month.
    #[must_use]
    pub const fn blocks_rerequest(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// No event leaves these statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "rejected" => Some(Self::Rejected),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentEvent {
    /// Stable name used in transition errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::CancelByStudent => "cancel_by_student",
            Self::AdminRevoke => "admin_revoke",
        }
    }
}
