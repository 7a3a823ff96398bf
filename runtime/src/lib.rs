//! # Tutorlane Runtime
//!
//! The ledger engine: admission of bookings against slot capacity, the booking
//! and month payment state machines, enrollments, the moderation log and the
//! outbound notification queue.
//!
//! ## Core Components
//!
//! - **`SlotCapacityManager`**: double-checked admission that never oversells a slot
//! - **`BookingLifecycle`**: booking transitions and the cancel/join windows
//! - **`EnrollmentManager`**: one enrollment per student and course
//! - **`MonthPaymentStateMachine`**: payment requests, settlement and the readiness gate
//! - **`Catalog`**: teacher-owned slots, courses and months
//! - **`NotificationDispatcher`** / **`NotificationWorker`**: post-commit delivery
//!
//! Every state change is one store transaction that also appends its
//! moderation entry. Notifications are queued only after the commit.
//!
//! ## Example
//!
//! ```ignore
//! use tutorlane_runtime::{Ledger, LedgerEnvironment, NotificationDispatcher};
//!
//! let (dispatcher, rx) = NotificationDispatcher::channel(1024);
//! let ledger = Ledger::new(LedgerEnvironment::new(store, SystemClock, dispatcher));
//!
//! let booking = ledger.bookings().create(&student, slot_id, None).await?;
//! ```

use std::sync::Arc;
use tutorlane_core::audit::{AuditSubject, ModerationLogEntry};
use tutorlane_core::environment::{Clock, SystemClock};
use tutorlane_core::error::Result;
use tutorlane_core::store::LedgerStore;

/// Moderation log access
pub mod audit;

/// Booking state transitions and views
pub mod booking;

/// Slot admission
pub mod capacity;

/// Slots, courses and months
pub mod catalog;

/// Development notification gateway
pub mod console;

/// Outbound notification queue and worker
pub mod dispatch;

/// Enrollments
pub mod enrollment;

/// Shared engine dependencies
pub mod environment;

/// Prometheus metrics for observability
pub mod metrics;

/// Month payments and readiness
pub mod payment;

/// Retry logic with exponential backoff
pub mod retry;

pub use audit::ModerationAuditLog;
pub use booking::BookingLifecycle;
pub use capacity::SlotCapacityManager;
pub use catalog::{Catalog, CourseDraft, SlotDraft};
pub use console::ConsoleNotificationGateway;
pub use dispatch::{DEFAULT_QUEUE_CAPACITY, NotificationDispatcher, NotificationWorker};
pub use enrollment::EnrollmentManager;
pub use environment::LedgerEnvironment;
pub use payment::MonthPaymentStateMachine;
pub use retry::RetryPolicy;

/// The engine components wired over one shared environment.
pub struct Ledger<S, C = SystemClock> {
    env: Arc<LedgerEnvironment<S, C>>,
    bookings: BookingLifecycle<S, C>,
    enrollments: Arc<EnrollmentManager<S, C>>,
    payments: MonthPaymentStateMachine<S, C>,
    catalog: Catalog<S, C>,
}

impl<S: LedgerStore, C: Clock> Ledger<S, C> {
    /// Wire every component over `env`.
    #[must_use]
    pub fn new(env: LedgerEnvironment<S, C>) -> Self {
        let env = Arc::new(env);
        let enrollments = Arc::new(EnrollmentManager::new(Arc::clone(&env)));
        Self {
            bookings: BookingLifecycle::new(Arc::clone(&env)),
            payments: MonthPaymentStateMachine::new(Arc::clone(&env), Arc::clone(&enrollments)),
            catalog: Catalog::new(Arc::clone(&env)),
            enrollments,
            env,
        }
    }

    /// Shared environment.
    #[must_use]
    pub fn environment(&self) -> &LedgerEnvironment<S, C> {
        &self.env
    }

    /// Booking lifecycle.
    #[must_use]
    pub const fn bookings(&self) -> &BookingLifecycle<S, C> {
        &self.bookings
    }

    /// Enrollment manager.
    #[must_use]
    pub fn enrollments(&self) -> &EnrollmentManager<S, C> {
        &self.enrollments
    }

    /// Month payment state machine.
    #[must_use]
    pub const fn payments(&self) -> &MonthPaymentStateMachine<S, C> {
        &self.payments
    }

    /// Catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog<S, C> {
        &self.catalog
    }

    /// Moderation entries about `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// `Storage` if the log cannot be read.
    pub async fn history(&self, subject: AuditSubject) -> Result<Vec<ModerationLogEntry>> {
        ModerationAuditLog::history(&self.env.store, subject).await
    }
}
