//! Shared harness for the engine integration tests.

#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::mpsc;
use tutorlane_core::notification::{Notification, Template};
use tutorlane_runtime::{Ledger, LedgerEnvironment, NotificationDispatcher, RetryPolicy};
use tutorlane_testing::{FixedClock, InMemoryLedgerStore, test_clock};

pub type TestLedger = Ledger<InMemoryLedgerStore, FixedClock>;

pub struct Harness {
    pub ledger: TestLedger,
    pub store: InMemoryLedgerStore,
    pub clock: FixedClock,
    pub outbox: mpsc::Receiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        tutorlane_testing::init_test_tracing();
        let store = InMemoryLedgerStore::new();
        let clock = test_clock();
        let (dispatcher, outbox) = NotificationDispatcher::channel(256);
        let env = LedgerEnvironment::new(store.clone(), clock.clone(), dispatcher).with_precheck_retry(
            RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );
        Self {
            ledger: Ledger::new(env),
            store,
            clock,
            outbox,
        }
    }

    /// Every notification queued so far.
    pub fn queued(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.outbox.try_recv() {
            out.push(n);
        }
        out
    }

    /// Queued notifications using `template`.
    pub fn queued_with(&mut self, template: Template) -> Vec<Notification> {
        self.queued()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }
}
