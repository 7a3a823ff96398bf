//! Injected collaborators: time and identity.
//!
//! The engine never calls `Utc::now()` directly and never asks a session who
//! the caller is. Both come in through these traits so tests can pin them.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Clock trait for time operations.
///
/// Abstracting time allows tests to move "now" across cancellation and join
/// windows without sleeping.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Marketplace roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Books slots and pays for course months
    Student,
    /// Offers slots and owns courses
    Teacher,
    /// Reconciles payments and moderates
    Admin,
}

impl Role {
    /// Storage and template name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }

    /// Parse a role name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "teacher" => Some(Self::Teacher),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved caller of an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User id
    pub id: UserId,
    /// Display name, copied into audit entries
    pub name: String,
    /// Granted roles
    pub roles: Vec<Role>,
}

impl Actor {
    /// Build an actor.
    #[must_use]
    pub fn new(id: UserId, name: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id,
            name: name.into(),
            roles,
        }
    }

    /// Whether the actor holds `role`.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Whether the actor is an admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Owners and admins may mutate an owned resource.
    #[must_use]
    pub fn owns_or_admin(&self, owner: UserId) -> bool {
        self.id == owner || self.is_admin()
    }
}

/// Errors from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The provider does not know the user.
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// The provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Identity and role lookups, consulted only for authorization gating.
///
/// The caller id is passed explicitly to every operation; the provider only
/// answers who that user is and what they may do.
pub trait IdentityProvider: Send + Sync {
    /// Display name of a user.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the user is unknown or the provider fails.
    fn display_name(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<String, IdentityError>> + Send;

    /// Roles granted to a user.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the user is unknown or the provider fails.
    fn roles(&self, user: UserId) -> impl Future<Output = Result<Vec<Role>, IdentityError>> + Send;

    /// Whether `user` holds `role`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the user is unknown or the provider fails.
    fn has_role(
        &self,
        user: UserId,
        role: Role,
    ) -> impl Future<Output = Result<bool, IdentityError>> + Send {
        async move { Ok(self.roles(user).await?.contains(&role)) }
    }

    /// Resolve the full [`Actor`] for a user.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the user is unknown or the provider fails.
    fn resolve(&self, user: UserId) -> impl Future<Output = Result<Actor, IdentityError>> + Send {
        async move {
            let name = self.display_name(user).await?;
            let roles = self.roles(user).await?;
            Ok(Actor::new(user, name, roles))
        }
    }
}
