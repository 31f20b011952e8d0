//! Database connection trait.
//!
//! Bulk operations never open, commit or roll back transactions. The caller
//! hands in whatever executes statements (a pooled connection, or a handle to
//! an open transaction) and every statement of the operation runs through it.
//!
//! All operations integrate with asupersync's structured concurrency via `Cx`
//! for cancellation; the per-statement timeout is passed alongside the SQL.

use crate::dialect::Dialect;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::time::Duration;

/// A session that can execute SQL statements against the target store.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn
///     .query(&cx, "SELECT id FROM people WHERE name = $1", &[Value::from("Ann")], None)
///     .await?;
/// let affected = conn
///     .execute(&cx, "DELETE FROM people WHERE id = $1", &[Value::Int(1)], Some(timeout))
///     .await?;
/// ```
pub trait Connection: Send + Sync {
    /// SQL dialect spoken by the store behind this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return every row it produces.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement and return the number of rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;
}
