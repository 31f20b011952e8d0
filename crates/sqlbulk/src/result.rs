//! Results reported by bulk operations.
//!
//! Multi-table entities report one entry per table level, root first. The
//! headline accessors report the root level, which is the only level where
//! deletes happen and whose row count equals the number of records touched.

use crate::reconcile::MergeAction;
use serde::Serialize;
use sqlbulk_core::Value;

/// Outcome of one row of a merge, as reported by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOutcome {
    /// What the store did with the row
    pub action: MergeAction,
    /// Correlation id of the staged record (`None` for deletes)
    pub correlation_id: Option<i64>,
    /// Post-write values of store-generated columns, by column name
    pub values: Vec<(String, Value)>,
}

impl RowOutcome {
    /// Reported value of a generated column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }
}

/// Counts for one table of a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelResult {
    /// Quoted, schema-qualified table name
    pub table: String,
    pub rows_affected: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    /// Per-row outcomes in output order; empty when no output was requested
    pub outcomes: Vec<RowOutcome>,
}

impl LevelResult {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Result of a merge or sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkMergeResult {
    /// One entry per table level, root first
    pub levels: Vec<LevelResult>,
}

impl BulkMergeResult {
    fn root(&self) -> Option<&LevelResult> {
        self.levels.first()
    }

    /// Rows affected at the root table.
    pub fn rows_affected(&self) -> u64 {
        self.root().map_or(0, |l| l.rows_affected)
    }

    /// Rows inserted at the root table.
    pub fn rows_inserted(&self) -> u64 {
        self.root().map_or(0, |l| l.rows_inserted)
    }

    /// Rows updated at the root table.
    pub fn rows_updated(&self) -> u64 {
        self.root().map_or(0, |l| l.rows_updated)
    }

    /// Rows deleted at the root table.
    pub fn rows_deleted(&self) -> u64 {
        self.root().map_or(0, |l| l.rows_deleted)
    }

    /// Per-row outcomes at the root table.
    pub fn outcomes(&self) -> &[RowOutcome] {
        self.root()
            .map(|l| l.outcomes.as_slice())
            .unwrap_or_default()
    }

    /// Counts for a table, by quoted name.
    pub fn level(&self, table: &str) -> Option<&LevelResult> {
        self.levels.iter().find(|l| l.table == table)
    }
}

/// Result of loading records, into staging or directly into the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkInsertResult {
    pub rows_affected: u64,
}

/// Row count for one table of an update or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableRowCount {
    /// Quoted, schema-qualified table name
    pub table: String,
    pub rows_affected: u64,
}

/// Result of an update or delete, one entry per table level, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkWriteResult {
    pub tables: Vec<TableRowCount>,
}

impl BulkWriteResult {
    /// Rows affected at the root table.
    pub fn rows_affected(&self) -> u64 {
        self.tables.first().map_or(0, |t| t.rows_affected)
    }
}

/// Result of [`bulk_update`](crate::bulk_update).
pub type BulkUpdateResult = BulkWriteResult;
/// Result of [`bulk_delete`](crate::bulk_delete).
pub type BulkDeleteResult = BulkWriteResult;
