//! Mapping of `sqlx` errors onto [`StoreError`].

use tutorlane_core::store::StoreError;

// SQLSTATE codes the engine branches on.
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const QUERY_CANCELED: &str = "57014";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Classify a `sqlx` error.
///
/// Constraint violations keep the constraint name so callers can tell the
/// capacity trigger apart from other checks.
#[must_use]
pub fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            let constraint = db.constraint().unwrap_or_default().to_string();
            match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => StoreError::UniqueViolation { constraint },
                Some(CHECK_VIOLATION) => StoreError::CheckViolation { constraint },
                Some(FOREIGN_KEY_VIOLATION) => StoreError::ForeignKeyViolation { constraint },
                Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => StoreError::SerializationFailure,
                Some(QUERY_CANCELED | LOCK_NOT_AVAILABLE) => StoreError::Timeout,
                _ => StoreError::Database(db.message().to_string()),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed => StoreError::Connection("connection pool closed".to_string()),
        sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
        sqlx::Error::Tls(e) => StoreError::Connection(e.to_string()),
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }) => StoreError::Decode(e.to_string()),
        other => StoreError::Database(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_transient() {
        assert_eq!(map_sqlx(sqlx::Error::PoolTimedOut), StoreError::Timeout);
        assert!(map_sqlx(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn decode_errors_are_permanent() {
        let err = map_sqlx(sqlx::Error::ColumnNotFound("capacity".to_string()));
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(!err.is_transient());
    }
}
