//! Infrastructure layer: Postgres pool, bulk loading, transaction scopes.

pub mod db;
pub mod error;

pub use db::{
    BulkInsertOptions, CopyPlan, IsolationLevel, TransactionOptions, TransactionScopeFactory,
    bulk_insert, connect,
};
pub use error::{DbError, DbResult};
