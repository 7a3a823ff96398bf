//! # Tutorlane Testing
//!
//! Test doubles for the Tutorlane ledger engine.
//!
//! This crate provides:
//! - [`InMemoryLedgerStore`]: a serializable ledger store with the same
//!   constraints as the Postgres schema, plus fault injection
//! - [`FixedClock`]: settable, shared time
//! - [`RecordingNotificationGateway`]: captures deliveries, can fail on demand
//! - [`StaticIdentityProvider`]: fixed user and role table
//! - [`fixtures`]: row builders and seeding helpers
//!
//! ## Example
//!
//! ```
//! use tutorlane_testing::{fixtures, InMemoryLedgerStore};
//! use tutorlane_core::types::UserId;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryLedgerStore::new();
//! let slot = fixtures::slot(UserId::new(), 3);
//! fixtures::seed_slot(&store, &slot).await.unwrap();
//!
//! assert_eq!(store.snapshot().await.occupancy(slot.id), 0);
//! # });
//! ```

pub mod fixtures;
pub mod memory;
pub mod mocks;

// Re-export commonly used items
pub use memory::{InMemoryLedgerStore, InMemoryTx, LedgerSnapshot};
pub use mocks::{FixedClock, RecordingNotificationGateway, StaticIdentityProvider, test_clock};

/// Install a test tracing subscriber once; later calls are no-ops.
///
/// Honors `RUST_LOG`, defaulting to `debug` for the Tutorlane crates.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tutorlane=debug")),
        )
        .with_test_writer()
        .try_init();
}
