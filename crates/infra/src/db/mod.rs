//! Database adapters (connection pool, bulk loading, transaction scopes).

pub mod bulk_copy;
pub mod transaction;

pub use bulk_copy::{BulkInsertOptions, CopyPlan, bulk_insert};
pub use transaction::{IsolationLevel, TransactionOptions, TransactionScopeFactory};

use opstools_core::DatabaseSettings;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{DbError, DbResult, map_sqlx_error};

/// Open a Postgres pool from settings.
#[tracing::instrument(skip(settings), fields(max_connections = settings.max_connections), err)]
pub async fn connect(settings: &DatabaseSettings) -> DbResult<PgPool> {
    let url = settings.url.as_deref().ok_or(DbError::MissingDatabaseUrl)?;

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Quote a possibly schema-qualified identifier: `dbo.events` → `"dbo"."events"`.
pub(crate) fn quote_qualified(name: &str) -> DbResult<String> {
    let parts = name
        .split('.')
        .map(quote_identifier)
        .collect::<DbResult<Vec<_>>>()?;
    Ok(parts.join("."))
}

/// Quote a single identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> DbResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains('\0') {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", trimmed.replace('"', "\"\"")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_schema_and_table() {
        assert_eq!(quote_qualified("dbo.events").unwrap(), r#""dbo"."events""#);
        assert_eq!(quote_qualified("events").unwrap(), r#""events""#);
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(quote_identifier(r#"we"ird"#).unwrap(), r#""we""ird""#);
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(matches!(
            quote_qualified("dbo."),
            Err(DbError::InvalidIdentifier(_))
        ));
        assert!(quote_identifier("  ").is_err());
    }

    #[tokio::test]
    async fn connect_without_url_fails_fast() {
        let err = connect(&DatabaseSettings::default()).await.unwrap_err();
        assert!(matches!(err, DbError::MissingDatabaseUrl));
    }
}
