//! Mock collaborators: clock, notification gateway and identity provider.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tutorlane_core::environment::{Actor, Clock, IdentityError, IdentityProvider, Role};
use tutorlane_core::notification::{
    Notification, NotificationError, NotificationGateway, Recipient, Template, TemplateArgs,
};
use tutorlane_core::types::UserId;

/// Settable clock for deterministic tests.
///
/// Clones share the same instant, so a test can keep a handle and move time
/// while the engine holds another.
///
/// # Example
///
/// ```
/// use tutorlane_testing::mocks::FixedClock;
/// use tutorlane_core::environment::Clock;
/// use chrono::{Duration, Utc};
///
/// let clock = FixedClock::new(Utc::now());
/// let before = clock.now();
/// clock.advance(Duration::minutes(5));
/// assert_eq!(clock.now() - before, Duration::minutes(5));
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    millis: Arc<AtomicI64>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
        }
    }

    /// Jump to `time`.
    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
    }

    /// Move forward (or back, with a negative duration).
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

// ============================================================================
// Notifications
// ============================================================================

/// Gateway that records every delivery.
///
/// Can be told to fail the next `n` deliveries, to exercise retries and the
/// isolation of notification failures from business results.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotificationGateway {
    delivered: Arc<Mutex<Vec<Notification>>>,
    failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl RecordingNotificationGateway {
    /// Create a gateway that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Successfully delivered notifications, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Delivered notifications using `template`.
    #[must_use]
    pub fn delivered_with(&self, template: Template) -> Vec<Notification> {
        self.delivered()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }

    /// Every delivery attempt, failed or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record(&self, notification: Notification) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(NotificationError::Delivery("injected failure".to_string()));
        }
        self.delivered
            .lock()
            .map_err(|_| NotificationError::Delivery("recorder poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

impl NotificationGateway for RecordingNotificationGateway {
    fn notify_user(
        &self,
        user: UserId,
        template: Template,
        args: &TemplateArgs,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send {
        let notification = Notification {
            recipient: Recipient::User(user),
            template,
            args: args.clone(),
        };
        let result = self.record(notification);
        async move { result }
    }

    fn notify_role(
        &self,
        role: Role,
        template: Template,
        args: &TemplateArgs,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send {
        let notification = Notification {
            recipient: Recipient::Role(role),
            template,
            args: args.clone(),
        };
        let result = self.record(notification);
        async move { result }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Identity provider backed by a fixed user table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: Arc<Mutex<HashMap<UserId, Actor>>>,
}

impl StaticIdentityProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn insert(&self, actor: Actor) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(actor.id, actor);
        }
    }

    /// Register a user and return it, builder style.
    #[must_use]
    pub fn with(self, actor: Actor) -> Self {
        self.insert(actor);
        self
    }

    fn lookup(&self, user: UserId) -> Result<Actor, IdentityError> {
        self.users
            .lock()
            .map_err(|_| IdentityError::Unavailable("user table poisoned".to_string()))?
            .get(&user)
            .cloned()
            .ok_or(IdentityError::UnknownUser(user))
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn display_name(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<String, IdentityError>> + Send {
        let result = self.lookup(user).map(|actor| actor.name);
        async move { result }
    }

    fn roles(&self, user: UserId) -> impl Future<Output = Result<Vec<Role>, IdentityError>> + Send {
        let result = self.lookup(user).map(|actor| actor.roles);
        async move { result }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn clones_share_time() {
        let clock = test_clock();
        let handle = clock.clone();
        handle.advance(Duration::hours(1));
        assert_eq!(clock.now(), handle.now());
    }

    #[tokio::test]
    async fn recording_gateway_fails_on_request() {
        let gateway = RecordingNotificationGateway::new();
        gateway.fail_next(1);
        let args = TemplateArgs::new();

        assert!(gateway
            .notify_role(Role::Admin, Template::PaymentRequested, &args)
            .await
            .is_err());
        assert!(gateway
            .notify_role(Role::Admin, Template::PaymentRequested, &args)
            .await
            .is_ok());
        assert_eq!(gateway.attempts(), 2);
        assert_eq!(gateway.delivered().len(), 1);
    }

    #[tokio::test]
    async fn static_identity_resolves_actors() {
        let id = UserId::new();
        let identity =
            StaticIdentityProvider::new().with(Actor::new(id, "Ada", vec![Role::Teacher]));

        let actor = identity.resolve(id).await.unwrap();
        assert_eq!(actor.name, "Ada");
        assert!(identity.has_role(id, Role::Teacher).await.unwrap());
        assert!(!identity.has_role(id, Role::Admin).await.unwrap());
        assert!(matches!(
            identity.roles(UserId::new()).await,
            Err(IdentityError::UnknownUser(_))
        ));
    }
}
