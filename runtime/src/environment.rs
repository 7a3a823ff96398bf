//! Shared dependencies of the engine components.

use crate::dispatch::NotificationDispatcher;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use tutorlane_core::booking::BookingPolicy;
use tutorlane_core::environment::{Clock, SystemClock};
use tutorlane_core::notification::Notification;
use tutorlane_core::store::LedgerStore;

/// Everything an engine component needs: the store, time, policy and the
/// outbound notification queue.
///
/// Components hold it behind an `Arc`; it carries no per-request state.
#[derive(Debug)]
pub struct LedgerEnvironment<S, C = SystemClock> {
    /// Ledger store
    pub store: S,
    /// Time source
    pub clock: C,
    /// Cancellation and join windows
    pub policy: BookingPolicy,
    /// Retry policy of the admission pre-check
    pub precheck_retry: RetryPolicy,
    notifications: NotificationDispatcher,
}

impl<S: LedgerStore, C: Clock> LedgerEnvironment<S, C> {
    /// Create an environment with the default policy.
    #[must_use]
    pub fn new(store: S, clock: C, notifications: NotificationDispatcher) -> Self {
        Self {
            store,
            clock,
            policy: BookingPolicy::default(),
            precheck_retry: RetryPolicy::admission_precheck(),
            notifications,
        }
    }

    /// Replace the booking policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the pre-check retry policy.
    #[must_use]
    pub fn with_precheck_retry(mut self, retry: RetryPolicy) -> Self {
        self.precheck_retry = retry;
        self
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Queue a notification. Call only after the transaction has committed.
    pub fn notify(&self, notification: Notification) {
        self.notifications.dispatch(notification);
    }
}
