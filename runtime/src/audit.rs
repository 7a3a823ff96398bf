//! Moderation audit log.
//!
//! Entries are appended inside the caller's transaction, so an action and its
//! record commit or roll back together. Nothing here updates or deletes.

use chrono::{DateTime, Utc};
use tutorlane_core::audit::{AuditAction, AuditSubject, ModerationLogEntry};
use tutorlane_core::environment::Actor;
use tutorlane_core::error::Result;
use tutorlane_core::store::{LedgerStore, LedgerTx, StoreError};
use tutorlane_core::types::LogEntryId;

/// Append-only access to the moderation log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModerationAuditLog;

impl ModerationAuditLog {
    /// Append an entry for `action` by `actor` on `subject` inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails; the caller's transaction
    /// must then be abandoned.
    pub async fn record<T: LedgerTx>(
        tx: &mut T,
        actor: &Actor,
        subject: AuditSubject,
        action: AuditAction,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> std::result::Result<ModerationLogEntry, StoreError> {
        let entry = ModerationLogEntry {
            id: LogEntryId::new(),
            subject,
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            action,
            note,
            created_at: at,
        };
        tx.append_log(&entry).await?;
        tracing::debug!(%subject, %action, actor = %actor.id, "Moderation entry appended");
        Ok(entry)
    }

    /// Entries about `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn history<S: LedgerStore>(
        store: &S,
        subject: AuditSubject,
    ) -> Result<Vec<ModerationLogEntry>> {
        let mut tx = store.begin().await?;
        let entries = tx.list_log(subject).await?;
        tx.rollback().await?;
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tutorlane_core::environment::Clock;
    use tutorlane_core::types::BookingId;
    use tutorlane_testing::{InMemoryLedgerStore, fixtures, test_clock};

    #[tokio::test]
    async fn entries_commit_with_their_transaction() {
        let store = InMemoryLedgerStore::new();
        let admin = fixtures::admin("Root");
        let subject = AuditSubject::Booking(BookingId::new());
        let now = test_clock().now();

        let mut tx = store.begin().await.unwrap();
        ModerationAuditLog::record(&mut tx, &admin, subject, AuditAction::CancelledByAdmin, None, now)
            .await
            .unwrap();
        drop(tx);
        assert!(ModerationAuditLog::history(&store, subject).await.unwrap().is_empty());

        let mut tx = store.begin().await.unwrap();
        ModerationAuditLog::record(
            &mut tx,
            &admin,
            subject,
            AuditAction::CancelledByAdmin,
            Some("duplicate".to_string()),
            now,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let history = ModerationAuditLog::history(&store, subject).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor_name, "Root");
        assert_eq!(history[0].note.as_deref(), Some("duplicate"));
    }
}
