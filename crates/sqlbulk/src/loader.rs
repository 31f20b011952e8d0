//! Streaming records into a table.

use asupersync::{Cx, Outcome};
use sqlbulk_core::{Connection, Dialect, Error, Value};
use sqlbulk_query::InsertValues;
use std::time::Duration;

/// Options for one load.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Write caller-supplied values into identity columns
    pub keep_identity: bool,
    /// Maximum rows per statement; 0 leaves batching to the dialect's limits
    pub batch_size: usize,
    /// Per-statement timeout
    pub timeout: Option<Duration>,
}

/// Transport that writes rows into a table.
///
/// Rows are positional and line up with `columns`. The return value is the
/// number of rows written.
pub trait BulkLoader: Send + Sync {
    fn load<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        options: LoadOptions,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

/// Loads rows with batched multi-row `INSERT ... VALUES` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertValuesLoader;

/// Rows that fit in one statement for the dialect, width and batch size.
pub fn rows_per_statement(dialect: Dialect, width: usize, batch_size: usize) -> usize {
    let mut rows = (dialect.max_params() / width.max(1)).max(1);
    if let Some(limit) = dialect.max_values_rows() {
        rows = rows.min(limit);
    }
    if batch_size > 0 {
        rows = rows.min(batch_size);
    }
    rows
}

impl BulkLoader for InsertValuesLoader {
    #[tracing::instrument(level = "debug", skip(self, cx, conn, columns, rows, options), fields(rows = rows.len()))]
    async fn load<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        options: LoadOptions,
    ) -> Outcome<u64, Error> {
        if rows.is_empty() {
            return Outcome::Ok(0);
        }
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Outcome::Err(Error::invariant(format!(
                "load row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }

        let dialect = conn.dialect();
        let per_statement = rows_per_statement(dialect, columns.len(), options.batch_size);
        let mut loaded = 0_u64;

        for batch in rows.chunks(per_statement) {
            let sql = InsertValues::new(table)
                .columns(columns.iter().map(String::as_str))
                .rows(batch.len())
                .override_identity(options.keep_identity)
                .build(dialect);
            let params: Vec<Value> = batch.iter().flatten().cloned().collect();
            tracing::trace!(sql = %sql, params = params.len(), "Load batch");

            match conn.execute(cx, &sql, &params, options.timeout).await {
                Outcome::Ok(_) => loaded += batch.len() as u64,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        tracing::debug!(loaded, statements = rows.len().div_ceil(per_statement), "Load complete");
        Outcome::Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlserver_batches_respect_parameter_and_row_limits() {
        assert_eq!(rows_per_statement(Dialect::SqlServer, 1, 0), 1_000);
        assert_eq!(rows_per_statement(Dialect::SqlServer, 4, 0), 500);
        assert_eq!(rows_per_statement(Dialect::SqlServer, 4, 100), 100);
        assert_eq!(rows_per_statement(Dialect::SqlServer, 5_000, 0), 1);
    }

    #[test]
    fn postgres_batches_respect_parameter_limit() {
        assert_eq!(rows_per_statement(Dialect::Postgres, 5, 0), 13_107);
        assert_eq!(rows_per_statement(Dialect::Postgres, 5, 250), 250);
        assert_eq!(rows_per_statement(Dialect::Postgres, 0, 0), 65_535);
    }
}
