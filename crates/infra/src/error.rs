//! Database error model.
//!
//! SQLx errors are mapped with the name of the operation that failed:
//!
//! | SQLx error | DbError |
//! |------------|---------|
//! | `Database` | `Database` (SQLSTATE code kept) |
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | `Connection` |
//! | anything else | `Database` without a code |

use thiserror::Error;

/// Result type for the database helpers.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// No connection string was configured.
    #[error("database url is not configured")]
    MissingDatabaseUrl,

    /// A table or column name cannot be used as an identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Records handed to the bulk loader are not uniform objects.
    #[error("invalid records: {0}")]
    InvalidRecords(String),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },

    #[error("connection error in {operation}: {message}")]
    Connection {
        operation: &'static str,
        message: String,
    },
}

impl DbError {
    pub fn invalid_records(msg: impl Into<String>) -> Self {
        Self::InvalidRecords(msg.into())
    }

    /// SQLSTATE code, when the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Database(db_err) => DbError::Database {
            operation,
            code: db_err.code().map(|c| c.into_owned()),
            message: db_err.message().to_string(),
        },
        sqlx::Error::PoolClosed => DbError::Connection {
            operation,
            message: "connection pool closed".to_string(),
        },
        sqlx::Error::PoolTimedOut => DbError::Connection {
            operation,
            message: "timed out acquiring a connection".to_string(),
        },
        err @ (sqlx::Error::Io(_) | sqlx::Error::Tls(_)) => DbError::Connection {
            operation,
            message: err.to_string(),
        },
        other => DbError::Database {
            operation,
            code: None,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_connection() {
        let err = map_sqlx_error("bulk_insert", sqlx::Error::PoolClosed);
        assert!(matches!(
            err,
            DbError::Connection {
                operation: "bulk_insert",
                ..
            }
        ));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn other_errors_keep_operation_in_message() {
        let err = map_sqlx_error("create_scope", sqlx::Error::RowNotFound);
        assert!(err.to_string().starts_with("database error in create_scope"));
    }
}
