//! Prometheus metrics for the ledger engine.
//!
//! Covers:
//! - Slot admissions and capacity rejections
//! - Booking and payment transitions
//! - Notification queue and delivery
//! - Retries
//! - Ledger store commits and version conflicts (recorded by the store crates)
//!
//! # Example
//!
//! ```rust,no_run
//! use tutorlane_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves the exposition text over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the call
    /// logs a warning and leaves [`MetricsServer::handle`] empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            // ExporterError implements neither Debug nor Display
            if exporter.await.is_err() {
                tracing::warn!(%addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Admission
    describe_counter!(
        "bookings_admitted_total",
        "Bookings inserted after passing both capacity checks"
    );
    describe_counter!(
        "bookings_rejected_full_total",
        "Booking requests rejected because the slot was full, by check stage"
    );
    describe_histogram!(
        "booking_admission_duration_seconds",
        "Time from admission pre-check to commit"
    );

    // Transitions
    describe_counter!(
        "booking_transitions_total",
        "Committed booking state transitions, by event"
    );
    describe_counter!(
        "payment_transitions_total",
        "Committed month payment state transitions, by event"
    );
    describe_counter!(
        "payment_requests_total",
        "Month payment requests, by outcome"
    );
    describe_counter!(
        "enrollments_created_total",
        "Enrollments created by get-or-create"
    );

    // Notifications
    describe_counter!(
        "notifications_queued_total",
        "Notifications accepted by the outbound queue"
    );
    describe_counter!(
        "notifications_dropped_total",
        "Notifications dropped because the queue was full or closed"
    );
    describe_counter!(
        "notifications_delivered_total",
        "Notifications delivered by the worker"
    );
    describe_counter!(
        "notifications_failed_total",
        "Notifications given up on after retries"
    );

    // Retries
    describe_counter!("retry_attempts_total", "Retries performed, by operation");
    describe_counter!(
        "retry_successes_total",
        "Operations that succeeded after at least one retry"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Operations that failed after exhausting retries"
    );

    // Store
    describe_counter!("ledger_commits_total", "Committed ledger transactions");
    describe_counter!(
        "ledger_version_conflicts_total",
        "Updates refused because the row version moved"
    );
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record an admitted booking.
    pub fn record_admitted(duration: Duration) {
        counter!("bookings_admitted_total").increment(1);
        histogram!("booking_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a full-slot rejection at `stage` (`precheck` or `transaction`).
    pub fn record_full(stage: &'static str) {
        counter!("bookings_rejected_full_total", "stage" => stage).increment(1);
    }
}

/// Transition metrics recorder.
pub struct TransitionMetrics;

impl TransitionMetrics {
    /// Record a committed booking transition.
    pub fn record_booking(event: &'static str) {
        counter!("booking_transitions_total", "event" => event).increment(1);
    }

    /// Record a committed payment transition.
    pub fn record_payment(event: &'static str) {
        counter!("payment_transitions_total", "event" => event).increment(1);
    }

    /// Record the outcome of a payment request.
    pub fn record_request(outcome: &'static str) {
        counter!("payment_requests_total", "outcome" => outcome).increment(1);
    }

    /// Record a new enrollment.
    pub fn record_enrollment() {
        counter!("enrollments_created_total").increment(1);
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a queued notification.
    pub fn record_queued() {
        counter!("notifications_queued_total").increment(1);
    }

    /// Record a dropped notification.
    pub fn record_dropped(reason: &'static str) {
        counter!("notifications_dropped_total", "reason" => reason).increment(1);
    }

    /// Record a delivered notification.
    pub fn record_delivered() {
        counter!("notifications_delivered_total").increment(1);
    }

    /// Record a notification given up on.
    pub fn record_failed() {
        counter!("notifications_failed_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt(operation: &'static str) {
        counter!("retry_attempts_total", "operation" => operation).increment(1);
    }

    /// Record a successful retry.
    pub fn record_success(operation: &'static str) {
        counter!("retry_successes_total", "operation" => operation).increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted(operation: &'static str) {
        counter!("retry_exhausted_total", "operation" => operation).increment(1);
    }
}
