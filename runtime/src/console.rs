//! Console notification gateway for development.
//!
//! Logs each delivery instead of sending it.

use tracing::info;
use tutorlane_core::environment::Role;
use tutorlane_core::notification::{NotificationError, NotificationGateway, Template, TemplateArgs};
use tutorlane_core::types::UserId;

/// Gateway that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotificationGateway;

impl ConsoleNotificationGateway {
    /// Create a console gateway.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NotificationGateway for ConsoleNotificationGateway {
    async fn notify_user(
        &self,
        user: UserId,
        template: Template,
        args: &TemplateArgs,
    ) -> Result<(), NotificationError> {
        info!(%user, template = template.key(), ?args, "📧 notification to user");
        Ok(())
    }

    async fn notify_role(
        &self,
        role: Role,
        template: Template,
        args: &TemplateArgs,
    ) -> Result<(), NotificationError> {
        info!(%role, template = template.key(), ?args, "📧 notification to role");
        Ok(())
    }
}
