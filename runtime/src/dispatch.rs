//! Outbound notification queue and its delivery worker.
//!
//! Business operations push a [`Notification`] after their transaction has
//! committed. The push never waits: if the queue is full or the worker is gone
//! the message is dropped, logged and counted. A separate
//! [`NotificationWorker`] drains the queue and delivers through a
//! [`NotificationGateway`], retrying a bounded number of times.
//!
//! ```text
//! engine ──try_send──▶ [ bounded mpsc ] ──▶ NotificationWorker ──▶ gateway
//!                 (drop + warn when full)        (bounded retry)
//! ```

use crate::metrics::NotificationMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tutorlane_core::notification::{Notification, NotificationError, NotificationGateway};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Sending half of the notification queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Create a dispatcher and the receiver its worker will drain.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a notification without waiting.
    ///
    /// Returns `true` if the message was queued. A `false` result has already
    /// been logged and counted; callers do not need to act on it.
    pub fn dispatch(&self, notification: Notification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => {
                NotificationMetrics::record_queued();
                true
            }
            Err(mpsc::error::TrySendError::Full(n)) => {
                NotificationMetrics::record_dropped("full");
                warn!(
                    template = %n.template,
                    recipient = %n.recipient,
                    "Notification queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                NotificationMetrics::record_dropped("closed");
                warn!(
                    template = %n.template,
                    recipient = %n.recipient,
                    "Notification worker stopped, dropping message"
                );
                false
            }
        }
    }
}

/// Background task delivering queued notifications.
///
/// Runs until the shutdown signal fires or every dispatcher is dropped. On
/// shutdown it delivers what is already queued, without retries, then stops.
pub struct NotificationWorker<G> {
    gateway: Arc<G>,
    rx: mpsc::Receiver<Notification>,
    shutdown: broadcast::Receiver<()>,
    retry: RetryPolicy,
}

impl<G: NotificationGateway> NotificationWorker<G> {
    /// Create a worker.
    #[must_use]
    pub fn new(
        gateway: Arc<G>,
        rx: mpsc::Receiver<Notification>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            gateway,
            rx,
            shutdown,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the delivery retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Spawn the worker as a background task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Deliver until shutdown.
    pub async fn run(mut self) {
        info!("Notification worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Notification worker received shutdown signal");
                    self.drain().await;
                    break;
                }
                next = self.rx.recv() => {
                    let Some(notification) = next else {
                        debug!("Notification queue closed");
                        break;
                    };
                    self.deliver(&notification, &self.retry).await;
                }
            }
        }

        info!("Notification worker stopped");
    }

    async fn drain(&mut self) {
        let mut drained = 0_usize;
        while let Ok(notification) = self.rx.try_recv() {
            self.deliver(&notification, &RetryPolicy::never()).await;
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "Delivered queued notifications before shutdown");
        }
    }

    async fn deliver(&self, notification: &Notification, retry: &RetryPolicy) {
        let gateway = &self.gateway;
        let result = retry_with_predicate(
            retry,
            "notification_delivery",
            || gateway.deliver(notification),
            |err: &NotificationError| matches!(err, NotificationError::Delivery(_)),
        )
        .await;

        match result {
            Ok(()) => {
                NotificationMetrics::record_delivered();
                debug!(
                    template = %notification.template,
                    recipient = %notification.recipient,
                    "Notification delivered"
                );
            }
            Err(e) => {
                NotificationMetrics::record_failed();
                warn!(
                    template = %notification.template,
                    recipient = %notification.recipient,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tutorlane_core::environment::Role;
    use tutorlane_core::notification::Template;
    use tutorlane_core::types::UserId;
    use tutorlane_testing::RecordingNotificationGateway;

    fn note() -> Notification {
        Notification::to_role(Role::Admin, Template::PaymentRequested).with_arg("month", 1)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (dispatcher, _rx) = NotificationDispatcher::channel(1);
        assert!(dispatcher.dispatch(note()));
        assert!(!dispatcher.dispatch(note()));
    }

    #[test]
    fn closed_queue_drops() {
        let (dispatcher, rx) = NotificationDispatcher::channel(4);
        drop(rx);
        assert!(!dispatcher.dispatch(note()));
    }

    #[tokio::test]
    async fn worker_retries_then_delivers() {
        let gateway = Arc::new(RecordingNotificationGateway::new());
        gateway.fail_next(2);
        let (dispatcher, rx) = NotificationDispatcher::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = NotificationWorker::new(Arc::clone(&gateway), rx, shutdown_rx)
            .with_retry(fast_retry())
            .spawn();

        dispatcher.dispatch(Notification::to_user(UserId::new(), Template::BookingPaid));
        drop(dispatcher);
        handle.await.unwrap();
        drop(shutdown_tx);

        assert_eq!(gateway.attempts(), 3);
        assert_eq!(gateway.delivered().len(), 1);
    }

    #[tokio::test]
    async fn worker_gives_up_after_budget() {
        let gateway = Arc::new(RecordingNotificationGateway::new());
        gateway.fail_next(10);
        let (dispatcher, rx) = NotificationDispatcher::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = NotificationWorker::new(Arc::clone(&gateway), rx, shutdown_rx)
            .with_retry(fast_retry())
            .spawn();

        dispatcher.dispatch(note());
        drop(dispatcher);
        handle.await.unwrap();

        assert_eq!(gateway.attempts(), 3);
        assert!(gateway.delivered().is_empty());
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let gateway = Arc::new(RecordingNotificationGateway::new());
        let (dispatcher, rx) = NotificationDispatcher::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for _ in 0..3 {
            dispatcher.dispatch(note());
        }
        shutdown_tx.send(()).unwrap();

        NotificationWorker::new(Arc::clone(&gateway), rx, shutdown_rx)
            .run()
            .await;

        assert_eq!(gateway.delivered().len(), 3);
    }
}
