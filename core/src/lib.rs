//! # Tutorlane Core
//!
//! Domain model, closed state machines and collaborator traits for the
//! Tutorlane ledger engine.
//!
//! The engine coordinates three things that must hold under concurrent
//! access:
//!
//! - **Slot bookings**: occupancy of a slot never exceeds its capacity
//! - **Course months**: a month can be paid only once its owner marks it ready
//! - **Month payments**: at most one pending request per month and enrollment,
//!   with admin approval and an append-only moderation trail
//!
//! This crate holds no I/O. Storage, notification delivery, identity and time
//! are traits implemented elsewhere:
//!
//! - [`store::LedgerStore`] / [`store::LedgerTx`]: transactional rows with
//!   optimistic versions
//! - [`notification::NotificationGateway`]: best-effort delivery
//! - [`environment::IdentityProvider`]: roles and display names
//! - [`environment::Clock`]: the current time
//!
//! ## State machines
//!
//! Status fields are closed enums with a single `apply` function that accepts
//! only the `(state, event)` pairs the machine defines:
//!
//! ```
//! use tutorlane_core::payment::{PaymentEvent, PaymentOutcome, PaymentStatus};
//!
//! let next = PaymentStatus::Pending.apply(PaymentEvent::Reject);
//! assert_eq!(next, Ok(PaymentOutcome::Becomes(PaymentStatus::Rejected)));
//!
//! // A rejected request does not block asking again.
//! assert!(!PaymentStatus::Rejected.blocks_rerequest());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod audit;
pub mod booking;
pub mod environment;
pub mod error;
pub mod model;
pub mod notification;
pub mod payment;
pub mod store;
pub mod transition;
pub mod types;

pub use audit::{AuditAction, AuditSubject, ModerationLogEntry};
pub use booking::{BookingEvent, BookingOutcome, BookingPolicy, BookingStatus};
pub use environment::{Actor, Clock, IdentityError, IdentityProvider, Role, SystemClock};
pub use error::{Entity, MarketplaceError};
pub use model::{Booking, BookingView, CourseMonth, Enrollment, MonthPayment, RecurringCourse, Slot};
pub use notification::{
    Notification, NotificationError, NotificationGateway, Recipient, Template, TemplateArgs,
};
pub use payment::{PaymentEvent, PaymentOutcome, PaymentStatus};
pub use store::{LedgerStore, LedgerTx, StoreError};
pub use transition::InvalidTransition;
pub use types::{
    BookingId, Capacity, CourseId, CourseMonthId, EnrollmentId, LogEntryId, Money, PaymentId,
    SlotId, UserId, Version,
};
