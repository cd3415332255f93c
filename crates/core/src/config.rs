//! Settings loaded from the environment.
//!
//! Every variable is optional; defaults are applied where a value is absent.
//! Present but malformed values fail fast with [`ConfigError`].

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Env var: metrics namespace key (metric name prefix).
pub const ENV_METRICS_KEY: &str = "OPSTOOLS_METRICS_KEY";
/// Env var: service label override.
pub const ENV_SERVICE_NAME: &str = "OPSTOOLS_SERVICE_NAME";
/// Env var: Postgres connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Env var: pool size.
pub const ENV_DB_MAX_CONNECTIONS: &str = "OPSTOOLS_DB_MAX_CONNECTIONS";
/// Env var: rows per COPY batch.
pub const ENV_BULK_BATCH_SIZE: &str = "OPSTOOLS_BULK_BATCH_SIZE";
/// Env var: explicit transaction timeout in seconds (unset = use the ceiling).
pub const ENV_TX_TIMEOUT_SECS: &str = "OPSTOOLS_TX_TIMEOUT_SECS";
/// Env var: transaction timeout ceiling in seconds (0 = unbounded).
pub const ENV_TX_MAX_TIMEOUT_SECS: &str = "OPSTOOLS_TX_MAX_TIMEOUT_SECS";

pub const DEFAULT_METRICS_KEY: &str = "opstools";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BULK_BATCH_SIZE: usize = 1000;

/// Top-level settings for the ops tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Prefix for metric names, e.g. `billing` → `billing_job_counter`.
    pub metrics_key: String,
    /// Explicit service label. `None` means "derive from the process".
    pub service_name: Option<String>,
    pub database: DatabaseSettings,
    pub transactions: TransactionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
    pub bulk_batch_size: usize,
}

/// Transaction timeout policy.
///
/// `maximum_timeout == Duration::ZERO` means there is no ceiling. Without an
/// explicit `default_timeout`, scopes run up to the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionSettings {
    pub default_timeout: Option<Duration>,
    pub maximum_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metrics_key: DEFAULT_METRICS_KEY.to_string(),
            service_name: None,
            database: DatabaseSettings::default(),
            transactions: TransactionSettings::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
        }
    }
}

impl TransactionSettings {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_maximum_timeout(mut self, maximum: Duration) -> Self {
        self.maximum_timeout = maximum;
        self
    }

    pub fn is_bounded(&self) -> bool {
        !self.maximum_timeout.is_zero()
    }

    /// Clamp `requested` to the configured ceiling.
    pub fn clamp(&self, requested: Duration) -> Duration {
        if self.is_bounded() {
            requested.min(self.maximum_timeout)
        } else {
            requested
        }
    }

    /// The timeout a scope gets when the caller does not ask for one.
    ///
    /// An explicit default is clamped to the ceiling; otherwise the ceiling
    /// itself is used, and `Duration::ZERO` (no timeout) when there is none.
    pub fn effective_default(&self) -> Duration {
        match self.default_timeout {
            Some(timeout) => self.clamp(timeout),
            None => self.maximum_timeout,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key → value lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metrics_key = match non_empty(&lookup, ENV_METRICS_KEY)? {
            Some(key) => key,
            None => {
                tracing::debug!(
                    "{ENV_METRICS_KEY} not set; using default `{}`",
                    defaults.metrics_key
                );
                defaults.metrics_key
            }
        };

        let service_name = non_empty(&lookup, ENV_SERVICE_NAME)?;

        let url = non_empty(&lookup, ENV_DATABASE_URL)?;
        if url.is_none() {
            tracing::warn!("{ENV_DATABASE_URL} not set; database helpers need an explicit pool");
        }

        let database = DatabaseSettings {
            url,
            max_connections: parsed(&lookup, ENV_DB_MAX_CONNECTIONS)?
                .unwrap_or(defaults.database.max_connections),
            bulk_batch_size: parsed(&lookup, ENV_BULK_BATCH_SIZE)?
                .unwrap_or(defaults.database.bulk_batch_size),
        };

        let transactions = TransactionSettings {
            default_timeout: parsed::<u64, _>(&lookup, ENV_TX_TIMEOUT_SECS)?
                .map(Duration::from_secs),
            maximum_timeout: parsed::<u64, _>(&lookup, ENV_TX_MAX_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.transactions.maximum_timeout),
        };

        Ok(Self {
            metrics_key,
            service_name,
            database,
            transactions,
        })
    }
}

fn non_empty<F>(lookup: &F, key: &'static str) -> ConfigResult<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err(ConfigError::Empty(key))
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key)? {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.metrics_key, "opstools");
        assert_eq!(settings.database.bulk_batch_size, 1000);
        assert!(!settings.transactions.is_bounded());
    }

    #[test]
    fn reads_every_variable() {
        let settings = Settings::from_lookup(lookup_from(&[
            (ENV_METRICS_KEY, "billing"),
            (ENV_SERVICE_NAME, " invoice-worker "),
            (ENV_DATABASE_URL, "postgres://localhost/ops"),
            (ENV_DB_MAX_CONNECTIONS, "12"),
            (ENV_BULK_BATCH_SIZE, "250"),
            (ENV_TX_TIMEOUT_SECS, "600"),
            (ENV_TX_MAX_TIMEOUT_SECS, "300"),
        ]))
        .unwrap();

        assert_eq!(settings.metrics_key, "billing");
        assert_eq!(settings.service_name.as_deref(), Some("invoice-worker"));
        assert_eq!(
            settings.database.url.as_deref(),
            Some("postgres://localhost/ops")
        );
        assert_eq!(settings.database.max_connections, 12);
        assert_eq!(settings.database.bulk_batch_size, 250);
        assert_eq!(
            settings.transactions.default_timeout,
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            settings.transactions.effective_default(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[(ENV_BULK_BATCH_SIZE, "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: ENV_BULK_BATCH_SIZE,
                ..
            }
        ));
    }

    #[test]
    fn blank_value_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[(ENV_METRICS_KEY, "   ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty(ENV_METRICS_KEY));
    }

    #[test]
    fn scope_default_follows_the_ceiling_unless_configured() {
        let tx = TransactionSettings::default();
        assert_eq!(tx.effective_default(), Duration::ZERO);

        let tx = tx.with_maximum_timeout(Duration::from_secs(7200));
        assert_eq!(tx.effective_default(), Duration::from_secs(7200));

        let tx = tx.with_default_timeout(Duration::from_secs(600));
        assert_eq!(tx.effective_default(), Duration::from_secs(600));

        let tx = tx.with_default_timeout(Duration::from_secs(86_400));
        assert_eq!(tx.effective_default(), Duration::from_secs(7200));
    }

    #[test]
    fn unbounded_ceiling_keeps_requested_timeout() {
        let tx = TransactionSettings::default();
        assert_eq!(tx.clamp(Duration::from_secs(86_400)), Duration::from_secs(86_400));

        let tx = tx.with_maximum_timeout(Duration::from_secs(60));
        assert_eq!(tx.clamp(Duration::from_secs(86_400)), Duration::from_secs(60));
        assert_eq!(tx.clamp(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
