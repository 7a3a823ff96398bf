//! # Tutorlane
//!
//! A tutoring marketplace ledger: students book seats in teacher slots and pay
//! for recurring courses month by month, while admins reconcile payments.
//!
//! This crate is the outermost layer:
//!
//! - [`Marketplace`]: resolves callers, checks roles and logs outcomes around
//!   the engine in `tutorlane-runtime`
//! - [`Config`]: environment configuration for the service host
//!
//! ## Example
//!
//! ```ignore
//! use tutorlane::Marketplace;
//!
//! let marketplace = Marketplace::new(ledger, identity);
//! let booking = marketplace.create_booking(student_id, slot_id, None).await?;
//! ```

pub mod app;
pub mod config;

pub use app::Marketplace;
pub use config::Config;
