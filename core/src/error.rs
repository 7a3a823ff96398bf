//! Error types for marketplace operations.

use crate::environment::{IdentityError, Role};
use crate::store::StoreError;
use crate::transition::InvalidTransition;
use crate::types::{CourseMonthId, PaymentId, SlotId};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketplaceError>;

/// Entities that can be reported missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A slot
    Slot,
    /// A booking
    Booking,
    /// A recurring course
    Course,
    /// A month of a course
    CourseMonth,
    /// An enrollment
    Enrollment,
    /// A month payment
    Payment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Slot => "slot",
            Self::Booking => "booking",
            Self::Course => "course",
            Self::CourseMonth => "course month",
            Self::Enrollment => "enrollment",
            Self::Payment => "payment",
        })
    }
}

/// Every way a marketplace operation can fail.
///
/// Messages name the specific condition so a caller can guide the user to the
/// next action. Storage and identity failures are internal; callers should
/// surface them as an opaque server error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketplaceError {
    // ═══════════════════════════════════════════════════════════
    // Not found
    // ═══════════════════════════════════════════════════════════
    /// A referenced entity does not exist (or is not visible to the caller).
    #[error("{entity} not found")]
    NotFound {
        /// Kind of entity
        entity: Entity,
        /// Requested id
        id: Uuid,
    },

    // ═══════════════════════════════════════════════════════════
    // Capacity and state conflicts
    // ═══════════════════════════════════════════════════════════
    /// The slot has no free seat.
    #[error("this slot is fully booked")]
    Full {
        /// The full slot
        slot_id: SlotId,
    },

    /// The entity is not in a state that allows the action.
    #[error("{reason}")]
    InvalidState {
        /// User-facing description of the conflict
        reason: String,
    },

    /// The month is not open for payment yet.
    #[error("this month is not open for payment yet")]
    MonthNotReady {
        /// The gated month
        month_id: CourseMonthId,
    },

    /// A pending payment already exists for this month.
    #[error("a payment for this month is already pending")]
    AlreadyRequested {
        /// The existing pending payment
        payment_id: PaymentId,
    },

    /// The enrollment has paid months.
    #[error("this enrollment has paid months and cannot be cancelled")]
    HasPaidMonths,

    /// The enrollment still has pending payments.
    #[error("cancel the pending payments of this enrollment first")]
    HasPendingPayments,

    // ═══════════════════════════════════════════════════════════
    // Caller errors
    // ═══════════════════════════════════════════════════════════
    /// The caller lacks a role.
    #[error("this action requires the {required} role")]
    Forbidden {
        /// Missing role
        required: Role,
    },

    /// Input rejected before touching the store.
    #[error("invalid input: {0}")]
    Validation(String),

    // ═══════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════
    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// Identity provider failure.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl MarketplaceError {
    /// Shorthand for [`MarketplaceError::NotFound`].
    #[must_use]
    pub const fn not_found(entity: Entity, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Shorthand for [`MarketplaceError::InvalidState`].
    #[must_use]
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Returns `true` for expected, user-recoverable conflicts.
    ///
    /// These are logged at debug level, never as errors.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tutorlane_core::error::MarketplaceError;
    /// assert!(MarketplaceError::HasPaidMonths.is_conflict());
    /// assert!(!MarketplaceError::Validation("x".into()).is_conflict());
    /// ```
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Full { .. }
                | Self::InvalidState { .. }
                | Self::MonthNotReady { .. }
                | Self::AlreadyRequested { .. }
                | Self::HasPaidMonths
                | Self::HasPendingPayments
        )
    }

    /// Returns `true` if a referenced entity was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for failures the caller must see as an opaque server error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Identity(_))
    }
}

/// A version conflict means another request changed the row first. The caller
/// can reload and retry, so it is a state conflict rather than a storage fault.
impl From<StoreError> for MarketplaceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => {
                Self::invalid_state("this record was changed by someone else, reload and try again")
            }
            other => Self::Storage(other),
        }
    }
}

impl From<InvalidTransition> for MarketplaceError {
    fn from(err: InvalidTransition) -> Self {
        Self::invalid_state(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_messages_name_the_condition() {
        let full = MarketplaceError::Full {
            slot_id: SlotId::new(),
        };
        assert_eq!(full.to_string(), "this slot is fully booked");

        let dup = MarketplaceError::AlreadyRequested {
            payment_id: PaymentId::new(),
        };
        assert_eq!(dup.to_string(), "a payment for this month is already pending");

        let missing = MarketplaceError::not_found(Entity::CourseMonth, Uuid::nil());
        assert_eq!(missing.to_string(), "course month not found");
    }

    #[test]
    fn classification() {
        let storage = MarketplaceError::from(StoreError::Timeout);
        assert!(storage.is_internal());
        assert!(!storage.is_conflict());

        let raced = MarketplaceError::from(StoreError::version_conflict("payment", PaymentId::new()));
        assert!(raced.is_conflict());
        assert!(!raced.is_internal());

        let transition = InvalidTransition::new("booking", "paid", "cancel_by_student");
        let err = MarketplaceError::from(transition);
        assert!(err.is_conflict());
        assert!(err.to_string().contains("paid"));
    }
}
