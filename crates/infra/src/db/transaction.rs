//! Transaction scopes with a fixed isolation level and a long statement timeout.
//!
//! The timeout ceiling is ordinary configuration ([`TransactionSettings`]):
//! requested timeouts are clamped to `maximum_timeout`, and a zero ceiling
//! means requests pass through unchanged.

use std::fmt;
use std::time::Duration;

use opstools_core::TransactionSettings;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{DbResult, map_sqlx_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword for `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    /// Statement timeout inside the scope. Zero disables it.
    pub timeout: Duration,
}

impl TransactionOptions {
    pub fn new(isolation: IsolationLevel, timeout: Duration) -> Self {
        Self { isolation, timeout }
    }

    /// Statements run right after `BEGIN`.
    pub fn setup_statements(&self) -> [String; 2] {
        [
            format!("SET TRANSACTION ISOLATION LEVEL {}", self.isolation.as_sql()),
            format!("SET LOCAL statement_timeout = '{}ms'", timeout_millis(self.timeout)),
        ]
    }
}

/// Opens Postgres transactions configured from [`TransactionSettings`].
#[derive(Debug, Clone)]
pub struct TransactionScopeFactory {
    pool: PgPool,
    settings: TransactionSettings,
}

impl TransactionScopeFactory {
    pub fn new(pool: PgPool, settings: TransactionSettings) -> Self {
        Self { pool, settings }
    }

    /// Replace the timeout ceiling. `Duration::ZERO` removes it.
    pub fn with_maximum_timeout(mut self, maximum: Duration) -> Self {
        self.settings = self.settings.with_maximum_timeout(maximum);
        self
    }

    pub fn maximum_timeout(&self) -> Option<Duration> {
        self.settings
            .is_bounded()
            .then_some(self.settings.maximum_timeout)
    }

    /// Read committed, timed out at the configured default or else the ceiling.
    ///
    /// With neither configured the statement timeout is disabled.
    pub fn default_options(&self) -> TransactionOptions {
        TransactionOptions::new(IsolationLevel::ReadCommitted, self.settings.effective_default())
    }

    /// `options` with its timeout clamped to the ceiling.
    pub fn resolve(&self, options: TransactionOptions) -> TransactionOptions {
        TransactionOptions {
            timeout: self.settings.clamp(options.timeout),
            ..options
        }
    }

    /// Begin a read committed transaction with [`default_options`](Self::default_options).
    pub async fn create_scope(&self) -> DbResult<Transaction<'static, Postgres>> {
        self.create_scope_with(self.default_options()).await
    }

    /// Begin a transaction with explicit options.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    #[tracing::instrument(
        skip(self, options),
        fields(isolation = %options.isolation, timeout_ms = tracing::field::Empty),
        err
    )]
    pub async fn create_scope_with(
        &self,
        options: TransactionOptions,
    ) -> DbResult<Transaction<'static, Postgres>> {
        let options = self.resolve(options);
        tracing::Span::current().record("timeout_ms", timeout_millis(options.timeout));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_scope", e))?;

        for statement in options.setup_statements() {
            sqlx::query(&statement)
                .persistent(false)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("create_scope", e))?;
        }

        Ok(tx)
    }
}

/// Milliseconds for `statement_timeout`, capped to what Postgres accepts.
fn timeout_millis(timeout: Duration) -> i64 {
    timeout.as_millis().min(i32::MAX as u128) as i64
}
