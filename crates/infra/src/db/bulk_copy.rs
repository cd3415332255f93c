//! Bulk loading of uniform records through Postgres `COPY ... FROM STDIN`.
//!
//! Records are any `Serialize` type that serializes to a JSON object. Field
//! names become column names; the first record fixes the column set and every
//! other record must carry exactly the same fields.
//!
//! Rows are sent in COPY text format, one `COPY` per batch.

use std::any::Any;
use std::collections::BTreeSet;

use opstools_core::DatabaseSettings;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgConnection;

use super::{quote_identifier, quote_qualified};
use crate::error::{DbError, DbResult, map_sqlx_error};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Options for [`bulk_insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkInsertOptions {
    /// Rows per `COPY`. Zero is treated as one.
    pub batch_size: usize,
    /// Field names to leave out of the insert.
    pub exclude_fields: Vec<String>,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            exclude_fields: Vec::new(),
        }
    }
}

impl BulkInsertOptions {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self::default().with_batch_size(settings.bulk_batch_size)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn excluding<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Insert `records` into `table_name`.
///
/// Returns the number of rows copied. If `connection` is not a Postgres
/// connection nothing happens and `Ok(0)` is returned.
#[tracing::instrument(
    skip(connection, records, options),
    fields(record_count = records.len(), batch_size = options.batch_size),
    err
)]
pub async fn bulk_insert<C, T>(
    connection: &mut C,
    records: &[T],
    table_name: &str,
    options: &BulkInsertOptions,
) -> DbResult<u64>
where
    C: sqlx::Connection + 'static,
    T: Serialize,
{
    let Some(pg) = (connection as &mut dyn Any).downcast_mut::<PgConnection>() else {
        tracing::debug!(
            connection = std::any::type_name::<C>(),
            "bulk insert skipped: not a postgres connection"
        );
        return Ok(0);
    };

    if records.is_empty() {
        return Ok(0);
    }

    let plan = CopyPlan::prepare(records, table_name, &options.exclude_fields)?;
    let mut copied = 0u64;

    for batch in plan.batches(options.effective_batch_size()) {
        let mut copy = pg
            .copy_in_raw(&plan.statement)
            .await
            .map_err(|e| map_sqlx_error("bulk_insert", e))?;

        let sent = copy.send(batch.into_bytes()).await.map(|_| ());
        if let Err(e) = sent {
            let _ = copy.abort("bulk insert batch failed").await;
            return Err(map_sqlx_error("bulk_insert", e));
        }

        copied += copy
            .finish()
            .await
            .map_err(|e| map_sqlx_error("bulk_insert", e))?;
    }

    tracing::debug!(table = table_name, copied, "bulk insert finished");
    Ok(copied)
}

/// A prepared `COPY`: statement text plus encoded rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub statement: String,
    pub columns: Vec<String>,
    pub rows: Vec<String>,
}

impl CopyPlan {
    pub fn prepare<T: Serialize>(
        records: &[T],
        table_name: &str,
        exclude_fields: &[String],
    ) -> DbResult<Self> {
        let objects = records
            .iter()
            .map(|record| match serde_json::to_value(record)? {
                Value::Object(map) => Ok(map),
                other => Err(DbError::invalid_records(format!(
                    "expected records to serialize as objects, got {}",
                    json_kind(&other)
                ))),
            })
            .collect::<DbResult<Vec<Map<String, Value>>>>()?;

        let Some(first) = objects.first() else {
            return Err(DbError::invalid_records("no records to copy"));
        };

        let fields: BTreeSet<&str> = first.keys().map(String::as_str).collect();
        for (idx, object) in objects.iter().enumerate().skip(1) {
            let other: BTreeSet<&str> = object.keys().map(String::as_str).collect();
            if other != fields {
                return Err(DbError::invalid_records(format!(
                    "record {idx} has fields {other:?}, expected {fields:?}"
                )));
            }
        }

        let columns: Vec<String> = first
            .keys()
            .filter(|name| !exclude_fields.iter().any(|excluded| excluded == *name))
            .cloned()
            .collect();
        if columns.is_empty() {
            return Err(DbError::invalid_records("no columns left after exclusions"));
        }

        let quoted = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<DbResult<Vec<_>>>()?;
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            quote_qualified(table_name)?,
            quoted.join(", ")
        );

        let rows = objects
            .iter()
            .map(|object| encode_row(object, &columns))
            .collect();

        Ok(Self {
            statement,
            columns,
            rows,
        })
    }

    /// Rows grouped into COPY payloads of at most `batch_size` lines.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = String> + '_ {
        self.rows.chunks(batch_size.max(1)).map(|chunk| chunk.concat())
    }
}

fn encode_row(object: &Map<String, Value>, columns: &[String]) -> String {
    let mut line = columns
        .iter()
        .map(|column| encode_field(object.get(column).unwrap_or(&Value::Null)))
        .collect::<Vec<_>>()
        .join("\t");
    line.push('\n');
    line
}

/// Encode one value for COPY text format.
pub(crate) fn encode_field(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Bool(true) => "t".to_string(),
        Value::Bool(false) => "f".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => escape_text(s),
        nested @ (Value::Array(_) | Value::Object(_)) => escape_text(&nested.to_string()),
    }
}

fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
