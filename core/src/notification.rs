//! Outbound notifications.
//!
//! Notifications are fire-and-forget. They are built after a transaction has
//! committed, handed to a queue, and delivered by a worker. A delivery failure
//! never changes the outcome of the business operation that produced it.

use crate::environment::Role;
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Message templates. The gateway localizes them; the engine only names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Template {
    /// A student requested one of the teacher's slots
    BookingRequested,
    /// An admin confirmed a booking payment
    BookingPaid,
    /// An admin removed a booking
    BookingCancelledByAdmin,
    /// A student asked to pay a course month
    PaymentRequested,
    /// An admin confirmed a month payment
    PaymentApproved,
    /// An admin rejected a month payment
    PaymentRejected,
    /// An admin reversed a paid month
    PaymentRevoked,
}

impl Template {
    /// Resource key of the template.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::BookingRequested => "booking.requested",
            Self::BookingPaid => "booking.paid",
            Self::BookingCancelledByAdmin => "booking.cancelled_by_admin",
            Self::PaymentRequested => "payment.requested",
            Self::PaymentApproved => "payment.approved",
            Self::PaymentRejected => "payment.rejected",
            Self::PaymentRevoked => "payment.revoked",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Who receives a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// One user
    User(UserId),
    /// Every holder of a role
    Role(Role),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Role(role) => write!(f, "role:{role}"),
        }
    }
}

/// Template arguments, already rendered to strings.
pub type TemplateArgs = BTreeMap<String, String>;

/// A message waiting for delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Target
    pub recipient: Recipient,
    /// Template to render
    pub template: Template,
    /// Template arguments
    pub args: TemplateArgs,
}

impl Notification {
    /// Notification for a single user.
    #[must_use]
    pub const fn to_user(user: UserId, template: Template) -> Self {
        Self {
            recipient: Recipient::User(user),
            template,
            args: BTreeMap::new(),
        }
    }

    /// Notification for every holder of a role.
    #[must_use]
    pub const fn to_role(role: Role, template: Template) -> Self {
        Self {
            recipient: Recipient::Role(role),
            template,
            args: BTreeMap::new(),
        }
    }

    /// Add a template argument.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.args.insert(key.into(), value.to_string());
        self
    }
}

/// Delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// The transport refused or failed the message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The recipient has no reachable address.
    #[error("no address for {0}")]
    UnknownRecipient(Recipient),
}

/// Transport for notifications (email, push, console).
pub trait NotificationGateway: Send + Sync + 'static {
    /// Deliver a message to one user.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if delivery fails.
    fn notify_user(
        &self,
        user: UserId,
        template: Template,
        args: &TemplateArgs,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send;

    /// Deliver a message to every holder of a role.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if delivery fails.
    fn notify_role(
        &self,
        role: Role,
        template: Template,
        args: &TemplateArgs,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send;

    /// Route a [`Notification`] to the matching method.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if delivery fails.
    fn deliver(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send {
        async move {
            match notification.recipient {
                Recipient::User(user) => {
                    self.notify_user(user, notification.template, &notification.args)
                        .await
                }
                Recipient::Role(role) => {
                    self.notify_role(role, notification.template, &notification.args)
                        .await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_rendered_on_build() {
        let n = Notification::to_role(Role::Admin, Template::PaymentRequested)
            .with_arg("month", 3)
            .with_arg("course", "Algebra");
        assert_eq!(n.args.get("month").map(String::as_str), Some("3"));
        assert_eq!(n.recipient.to_string(), "role:admin");
        assert_eq!(n.template.key(), "payment.requested");
    }
}
