//! Staging table lifecycle.
//!
//! A staging table is created lazily on the first load of an operation and
//! dropped when the operation is released. It mirrors the staged subset of the
//! target's columns, plus the correlation column when per-row outcomes are needed.

use asupersync::{Cx, Outcome};
use sqlbulk_core::{Connection, Dialect, EntityTypeLevel, Error, TableMapping};
use sqlbulk_query::{CreateStaging, drop_table};
use std::time::Duration;

/// Name of the synthetic correlation column in every staging table.
pub const CORRELATION_COLUMN: &str = "sqlbulk_row_id";

/// A column copied into the staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedColumn {
    /// Index of the level whose table supplies the column's shape
    pub level: usize,
    /// Column name
    pub column: String,
    /// Entity property the value is read from
    pub property: String,
}

/// A staging table owned by one bulk operation.
#[derive(Debug)]
pub struct StagingTable {
    dialect: Dialect,
    schema: Option<String>,
    name: String,
    temporary: bool,
    columns: Vec<StagedColumn>,
    correlated: bool,
    created: bool,
}

impl StagingTable {
    /// Plan a staging table for an entity rooted at `root`.
    ///
    /// Names carry a random suffix so concurrent operations on the same table
    /// never collide. Permanent tables live in the root table's schema.
    pub fn new(dialect: Dialect, root: &EntityTypeLevel, permanent: bool) -> Self {
        let base = format!("sqlbulk_{}_{:08x}", root.table, rand::random::<u32>());
        let (schema, name) = match (dialect, permanent) {
            (Dialect::SqlServer, false) => (None, format!("#{base}")),
            (_, false) => (None, base),
            (_, true) => (root.schema.clone(), base),
        };
        Self {
            dialect,
            schema,
            name,
            temporary: !permanent,
            columns: Vec::new(),
            correlated: false,
            created: false,
        }
    }

    /// Quoted, possibly qualified name.
    pub fn qualified_name(&self) -> String {
        self.dialect.qualify(self.schema.as_deref(), &self.name)
    }

    /// Unquoted table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Does the table carry the correlation column?
    pub fn is_correlated(&self) -> bool {
        self.correlated
    }

    /// Columns staged at creation, in table order.
    pub fn columns(&self) -> &[StagedColumn] {
        &self.columns
    }

    /// Is `column` one of the staged columns?
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.column == column)
    }

    /// Create the table by cloning the shape of the mapped tables.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, mapping, columns), fields(table = %self.name))]
    pub async fn create<C: Connection>(
        &mut self,
        cx: &Cx,
        conn: &C,
        mapping: &TableMapping,
        columns: Vec<StagedColumn>,
        correlated: bool,
        timeout: Option<Duration>,
    ) -> Outcome<(), Error> {
        if self.created {
            return Outcome::Err(Error::config(format!(
                "staging table '{}' already exists",
                self.name
            )));
        }
        if columns.is_empty() {
            return Outcome::Err(Error::config(format!(
                "entity '{}' has no columns to stage",
                mapping.entity()
            )));
        }

        let mut builder = CreateStaging::new(self.qualified_name()).temporary(self.temporary);
        for table in mapping.schema_qualified_table_names(self.dialect) {
            builder = builder.source(table);
        }
        for column in &columns {
            builder = builder.column(column.level, column.column.as_str());
        }
        if correlated {
            builder = builder.correlation_column(CORRELATION_COLUMN);
        }

        let sql = builder.build(self.dialect);
        tracing::trace!(sql = %sql, "Create staging table");
        try_outcome!(conn.execute(cx, &sql, &[], timeout).await);

        self.columns = columns;
        self.correlated = correlated;
        self.created = true;
        tracing::debug!(
            columns = self.columns.len(),
            correlated,
            temporary = self.temporary,
            "Staging table created"
        );
        Outcome::Ok(())
    }

    /// Drop the table if it was created. Safe to call more than once.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(table = %self.name))]
    pub async fn remove<C: Connection>(
        &mut self,
        cx: &Cx,
        conn: &C,
        timeout: Option<Duration>,
    ) -> Outcome<(), Error> {
        if !self.created {
            return Outcome::Ok(());
        }
        let sql = drop_table(&self.qualified_name());
        tracing::trace!(sql = %sql, "Drop staging table");
        try_outcome!(conn.execute(cx, &sql, &[], timeout).await);
        self.created = false;
        tracing::debug!("Staging table dropped");
        Outcome::Ok(())
    }
}
