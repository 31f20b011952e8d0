//! The bulk operation orchestrator.
//!
//! A [`BulkOperation`] owns one staging table and drives every statement of a
//! bulk insert, merge, update or delete through the caller's connection:
//!
//! 1. stage records (`insert_staging`), creating the staging table on first use
//! 2. run the set-based statement once per table level (`merge`, `update`, `delete`)
//! 3. reconcile merge output back onto the records
//! 4. drop the staging table (`release`)
//!
//! The operation never begins or ends a transaction. Statements run on whatever
//! session the connection represents.

use crate::loader::{BulkLoader, InsertValuesLoader, LoadOptions, rows_per_statement};
use crate::options::BulkOptions;
use crate::reconcile::{CorrelationMap, MergeAction, OutputLayout, reconcile};
use crate::result::{
    BulkInsertResult, BulkMergeResult, BulkWriteResult, LevelResult, RowOutcome, TableRowCount,
};
use crate::staging::{CORRELATION_COLUMN, StagedColumn, StagingTable};
use asupersync::{Cx, Outcome};
use sqlbulk_core::{
    BulkEntity, ColumnMapping, Connection, Dialect, EntityTypeLevel, Error, OperationKind, Result,
    TableMapping, Value, ValueGenerated,
};
use sqlbulk_query::{
    JoinedUpdate, MatchCondition, MergeBuilder, MergeStatement, NEVER_MATCH, PropagateKeys,
    joined_delete,
};
use std::sync::Arc;
use std::time::Duration;

/// Switches for one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeFlags {
    /// Report per-row outcomes and write generated values back onto records
    pub auto_map_output: bool,
    /// Insert caller-supplied identity values
    pub keep_identity: bool,
    /// Match staged rows against the target; when off every staged row is inserted
    pub insert_if_missing: bool,
    /// Update matched target rows
    pub allow_update: bool,
    /// Delete root rows that no staged row matches
    pub allow_delete: bool,
}

impl Default for MergeFlags {
    fn default() -> Self {
        Self {
            auto_map_output: true,
            keep_identity: false,
            insert_if_missing: true,
            allow_update: true,
            allow_delete: false,
        }
    }
}

impl MergeFlags {
    /// Flags taken from operation options; update allowed, delete not.
    pub fn from_options(options: &BulkOptions) -> Self {
        Self {
            auto_map_output: options.auto_map_output,
            keep_identity: options.keep_identity,
            ..Self::default()
        }
    }

    pub fn auto_map_output(mut self, enabled: bool) -> Self {
        self.auto_map_output = enabled;
        self
    }

    pub fn keep_identity(mut self, enabled: bool) -> Self {
        self.keep_identity = enabled;
        self
    }

    pub fn insert_if_missing(mut self, enabled: bool) -> Self {
        self.insert_if_missing = enabled;
        self
    }

    pub fn allow_update(mut self, enabled: bool) -> Self {
        self.allow_update = enabled;
        self
    }

    pub fn allow_delete(mut self, enabled: bool) -> Self {
        self.allow_delete = enabled;
        self
    }

    fn operation(self) -> OperationKind {
        if self.allow_delete {
            OperationKind::Sync
        } else {
            OperationKind::Merge
        }
    }
}

/// One bulk operation against one entity's tables.
///
/// Holds the connection exclusively for its lifetime (every statement method
/// takes `&mut self`) and owns the staging table. Call [`BulkOperation::release`]
/// on every exit path; `Drop` cannot run SQL and only logs a leaked table.
pub struct BulkOperation<'c, C: Connection, L: BulkLoader = InsertValuesLoader> {
    conn: &'c C,
    mapping: Arc<TableMapping>,
    options: BulkOptions,
    loader: L,
    staging: StagingTable,
}

impl<'c, C: Connection> BulkOperation<'c, C, InsertValuesLoader> {
    /// Plan an operation loading through batched `INSERT ... VALUES`.
    #[allow(clippy::result_large_err)]
    pub fn new(conn: &'c C, mapping: Arc<TableMapping>, options: BulkOptions) -> Result<Self> {
        Self::with_loader(conn, mapping, options, InsertValuesLoader)
    }
}

impl<'c, C: Connection, L: BulkLoader> BulkOperation<'c, C, L> {
    /// Plan an operation with a custom loader.
    ///
    /// Validates the mapping and options; nothing is sent to the store.
    #[allow(clippy::result_large_err)]
    pub fn with_loader(
        conn: &'c C,
        mapping: Arc<TableMapping>,
        options: BulkOptions,
        loader: L,
    ) -> Result<Self> {
        mapping.validate()?;
        options.validate(&mapping)?;
        if !options.keep_identity {
            check_propagated_key_types(conn.dialect(), &mapping)?;
        }
        let staging = StagingTable::new(conn.dialect(), mapping.root(), options.use_permanent_table);
        tracing::debug!(
            entity = %mapping.entity(),
            levels = mapping.levels().len(),
            staging = %staging.name(),
            "Bulk operation planned"
        );
        Ok(Self {
            conn,
            mapping,
            options,
            loader,
            staging,
        })
    }

    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    pub fn staging(&self) -> &StagingTable {
        &self.staging
    }

    fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    fn timeout(&self) -> Option<Duration> {
        self.options.command_timeout
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self, operation: OperationKind, condition: &MatchCondition) -> Result<()> {
        if !condition.is_explicit() && !self.mapping.has_primary_key() {
            return Err(Error::validation(
                operation,
                "requires that the entity have a primary key or an explicit match condition",
            ));
        }
        Ok(())
    }

    /// Check a merge can match rows. Fails when there is no key and no explicit condition.
    #[allow(clippy::result_large_err)]
    pub fn validate_merge(&self, condition: &MatchCondition) -> Result<()> {
        self.validate(OperationKind::Merge, condition)
    }

    /// Check a sync (merge with delete) can match rows.
    #[allow(clippy::result_large_err)]
    pub fn validate_sync(&self, condition: &MatchCondition) -> Result<()> {
        self.validate(OperationKind::Sync, condition)
    }

    /// Check an update can match rows.
    #[allow(clippy::result_large_err)]
    pub fn validate_update(&self, condition: &MatchCondition) -> Result<()> {
        self.validate(OperationKind::Update, condition)
    }

    /// Check a delete can match rows.
    #[allow(clippy::result_large_err)]
    pub fn validate_delete(&self, condition: &MatchCondition) -> Result<()> {
        self.validate(OperationKind::Delete, condition)
    }

    /// Must a merge with these flags stage records with correlation ids?
    pub fn requires_correlation(&self, flags: MergeFlags) -> bool {
        flags.auto_map_output || self.propagates_keys(flags)
    }

    /// Generated root keys must reach the derived tables of a hierarchy.
    fn propagates_keys(&self, flags: MergeFlags) -> bool {
        self.mapping.is_hierarchy() && self.mapping.has_generated_key() && !flags.keep_identity
    }

    /// Columns to stage: key and match columns always, the rest when filters allow.
    fn staged_columns(&self, keep_identity: bool) -> Vec<StagedColumn> {
        let key = self.mapping.primary_key_columns();
        let matched = self.options.match_on.referenced_columns(&key);
        self.mapping
            .distinct_columns()
            .into_iter()
            .filter(|(_, c)| {
                let name = c.column.as_str();
                key.contains(&name)
                    || matched.contains(&name)
                    || (self.options.includes(c) && c.is_insertable(keep_identity))
            })
            .map(|(level, c)| StagedColumn {
                level,
                column: c.column.clone(),
                property: c.property.clone(),
            })
            .collect()
    }

    /// Load records into the staging table, creating it on first use.
    ///
    /// With `use_correlation` each row is tagged with its position in `records`.
    /// Correlated records can be staged once per operation; later uncorrelated
    /// loads append to the same table. An empty slice still creates the table.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, records),
        fields(entity = %self.mapping.entity(), records = records.len())
    )]
    pub async fn insert_staging<E: BulkEntity>(
        &mut self,
        cx: &Cx,
        records: &[E],
        keep_identity: bool,
        use_correlation: bool,
    ) -> Outcome<BulkInsertResult, Error> {
        if keep_identity && !self.mapping.has_primary_key() {
            return Outcome::Err(Error::config(format!(
                "identity preservation requires a primary key on entity '{}'",
                self.mapping.entity()
            )));
        }

        if self.staging.is_created() {
            if use_correlation || self.staging.is_correlated() {
                return Outcome::Err(Error::config(
                    "correlated records can only be staged once per operation",
                ));
            }
        } else {
            let columns = self.staged_columns(keep_identity);
            let timeout = self.timeout();
            try_outcome!(
                self.staging
                    .create(cx, self.conn, &self.mapping, columns, use_correlation, timeout)
                    .await
            );
        }

        let correlated = self.staging.is_correlated();
        let rows = try_result!(staged_rows(
            self.mapping.entity(),
            records,
            self.staging.columns(),
            correlated
        ));
        let mut columns: Vec<String> = self
            .staging
            .columns()
            .iter()
            .map(|c| c.column.clone())
            .collect();
        if correlated {
            columns.push(CORRELATION_COLUMN.to_string());
        }

        let options = LoadOptions {
            keep_identity: false,
            batch_size: self.options.batch_size,
            timeout: self.timeout(),
        };
        let table = self.staging.qualified_name();
        let loaded = try_outcome!(
            self.loader
                .load(cx, self.conn, &table, &columns, &rows, options)
                .await
        );
        tracing::debug!(loaded, correlated, "Records staged");
        Outcome::Ok(BulkInsertResult {
            rows_affected: loaded,
        })
    }

    /// Load records straight into the target table, bypassing staging.
    ///
    /// Only single-table entities can be loaded directly; nothing is reported back.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, records),
        fields(entity = %self.mapping.entity(), records = records.len())
    )]
    pub async fn insert_direct<E: BulkEntity>(
        &mut self,
        cx: &Cx,
        records: &[E],
        keep_identity: bool,
    ) -> Outcome<BulkInsertResult, Error> {
        if self.mapping.is_hierarchy() {
            return Outcome::Err(Error::config(format!(
                "entity '{}' spans several tables and cannot be loaded directly",
                self.mapping.entity()
            )));
        }
        if keep_identity && !self.mapping.has_primary_key() {
            return Outcome::Err(Error::config(format!(
                "identity preservation requires a primary key on entity '{}'",
                self.mapping.entity()
            )));
        }

        let root = self.mapping.root();
        let columns: Vec<StagedColumn> = root
            .columns
            .iter()
            .filter(|c| c.is_insertable(keep_identity) && (self.options.includes(c) || c.primary_key))
            .map(|c| StagedColumn {
                level: 0,
                column: c.column.clone(),
                property: c.property.clone(),
            })
            .collect();
        let rows = try_result!(staged_rows(self.mapping.entity(), records, &columns, false));
        let names: Vec<String> = columns.into_iter().map(|c| c.column).collect();

        let options = LoadOptions {
            keep_identity: keep_identity && root.has_identity_column(),
            batch_size: self.options.batch_size,
            timeout: self.timeout(),
        };
        let table = root.qualified_name(self.dialect());
        let loaded = try_outcome!(
            self.loader
                .load(cx, self.conn, &table, &names, &rows, options)
                .await
        );
        tracing::debug!(loaded, "Records loaded directly");
        Outcome::Ok(BulkInsertResult {
            rows_affected: loaded,
        })
    }

    /// Merge the staged rows into every table level, root first.
    ///
    /// With `auto_map_output` each output row is matched back to its record
    /// through `records` and store-generated values are written onto it.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, records, condition),
        fields(entity = %self.mapping.entity())
    )]
    pub async fn merge<E: BulkEntity>(
        &mut self,
        cx: &Cx,
        records: &mut CorrelationMap<'_, E>,
        condition: &MatchCondition,
        flags: MergeFlags,
    ) -> Outcome<BulkMergeResult, Error> {
        if flags.insert_if_missing {
            try_result!(self.validate(flags.operation(), condition));
        }
        if !self.staging.is_created() {
            return Outcome::Err(Error::config("merge requires staged records"));
        }
        if self.requires_correlation(flags) && !self.staging.is_correlated() {
            return Outcome::Err(Error::config(
                "per-row merge output requires records staged with correlation ids",
            ));
        }

        let dialect = self.dialect();
        let mapping = Arc::clone(&self.mapping);
        let key = mapping.primary_key_columns();
        let on = if flags.insert_if_missing {
            try_result!(condition.render(dialect, &key))
        } else {
            NEVER_MATCH.to_string()
        };
        let propagate = self.propagates_keys(flags);
        if propagate {
            try_result!(check_propagated_key_types(dialect, &mapping));
        }

        let mut result = BulkMergeResult::default();
        for (index, level) in mapping.levels().iter().enumerate() {
            let is_root = index == 0;
            let statement = self.merge_statement(level, &key, &on, is_root, flags, propagate);
            let mut counts = LevelResult::new(level.qualified_name(dialect));
            tracing::trace!(sql = %statement.sql, "Merge statement");

            if statement.has_output() {
                let layout = try_result!(OutputLayout::new(&statement, level));
                let rows = try_outcome!(
                    self.conn
                        .query(cx, &statement.sql, &[], self.timeout())
                        .await
                );
                try_result!(reconcile(
                    &rows,
                    &layout,
                    records,
                    flags.auto_map_output,
                    &mut counts
                ));
            } else {
                counts.rows_affected = try_outcome!(
                    self.conn
                        .execute(cx, &statement.sql, &[], self.timeout())
                        .await
                );
            }

            tracing::debug!(
                table = %counts.table,
                affected = counts.rows_affected,
                inserted = counts.rows_inserted,
                updated = counts.rows_updated,
                deleted = counts.rows_deleted,
                "Merged level"
            );

            if is_root && propagate {
                try_outcome!(self.propagate_keys(cx, level, &counts.outcomes).await);
            }
            result.levels.push(counts);
        }

        Outcome::Ok(result)
    }

    fn merge_statement(
        &self,
        level: &EntityTypeLevel,
        key: &[&str],
        on: &str,
        is_root: bool,
        flags: MergeFlags,
        propagate: bool,
    ) -> MergeStatement {
        let dialect = self.dialect();
        let is_key = |c: &ColumnMapping| key.contains(&c.column.as_str());

        let insert: Vec<&str> = level
            .columns
            .iter()
            .filter(|c| self.staging.contains(&c.column))
            .filter(|c| c.is_insertable(flags.keep_identity) || (flags.keep_identity && is_key(c)))
            .map(|c| c.column.as_str())
            .collect();
        let update: Vec<&str> = if flags.allow_update {
            level
                .columns
                .iter()
                .filter(|c| self.staging.contains(&c.column))
                .filter(|c| !is_key(c) && c.value_generated == ValueGenerated::Never)
                .map(|c| c.column.as_str())
                .collect()
        } else {
            Vec::new()
        };

        let mut builder = MergeBuilder::new(
            level.qualified_name(dialect),
            self.staging.qualified_name(),
            on,
        )
        .insert(insert)
        .update(update)
        .delete_unmatched(flags.allow_delete && is_root)
        .identity_insert(flags.keep_identity && level.has_identity_column());

        if flags.auto_map_output || (propagate && is_root) {
            let generated: Vec<&str> = level
                .generated_columns()
                .into_iter()
                .map(|c| c.column.as_str())
                .collect();
            builder = builder.output(CORRELATION_COLUMN, generated);
        }
        builder.build(dialect)
    }

    /// Copy keys generated for inserted root rows into the staging table.
    #[tracing::instrument(level = "debug", skip(self, cx, root, outcomes))]
    async fn propagate_keys(
        &self,
        cx: &Cx,
        root: &EntityTypeLevel,
        outcomes: &[RowOutcome],
    ) -> Outcome<(), Error> {
        let keys: Vec<&ColumnMapping> = root
            .columns
            .iter()
            .filter(|c| c.primary_key && c.value_generated.is_generated())
            .collect();

        let mut rows: Vec<Vec<Value>> = Vec::new();
        for outcome in outcomes.iter().filter(|o| o.action == MergeAction::Insert) {
            let Some(id) = outcome.correlation_id else {
                continue;
            };
            let id = try_result!(correlation_value(id));
            let mut row = vec![id];
            for key in &keys {
                match outcome.value(&key.column) {
                    Some(value) => row.push(value.clone()),
                    None => {
                        return Outcome::Err(Error::invariant(format!(
                            "merge output has no value for generated key '{}'",
                            key.column
                        )));
                    }
                }
            }
            rows.push(row);
        }
        if rows.is_empty() {
            return Outcome::Ok(());
        }

        let dialect = self.dialect();
        let staging = self.staging.qualified_name();
        let width = keys.len() + 1;
        for batch in rows.chunks(rows_per_statement(dialect, width, 0)) {
            let mut builder = PropagateKeys::new(staging.as_str(), CORRELATION_COLUMN);
            for key in &keys {
                builder = builder.key(key.column.as_str(), key.store_type.as_deref());
            }
            let sql = builder.rows(batch.len()).build(dialect);
            let params: Vec<Value> = batch.iter().flatten().cloned().collect();
            tracing::trace!(sql = %sql, "Propagate generated keys");
            try_outcome!(self.conn.execute(cx, &sql, &params, self.timeout()).await);
        }
        tracing::debug!(rows = rows.len(), "Generated keys propagated to staging");
        Outcome::Ok(())
    }

    /// Update every table level from the staged rows, root first.
    ///
    /// Key and store-generated columns are never assigned. A level with nothing
    /// left to assign is skipped and reports zero rows.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, condition),
        fields(entity = %self.mapping.entity())
    )]
    pub async fn update(
        &mut self,
        cx: &Cx,
        condition: &MatchCondition,
    ) -> Outcome<BulkWriteResult, Error> {
        try_result!(self.validate_update(condition));
        if !self.staging.is_created() {
            return Outcome::Err(Error::config("update requires staged records"));
        }

        let dialect = self.dialect();
        let mapping = Arc::clone(&self.mapping);
        let key = mapping.primary_key_columns();
        let on = try_result!(condition.render(dialect, &key));
        let staging = self.staging.qualified_name();

        let mut result = BulkWriteResult::default();
        for level in mapping.levels() {
            let table = level.qualified_name(dialect);
            let set: Vec<&str> = level
                .columns
                .iter()
                .filter(|c| self.staging.contains(&c.column))
                .filter(|c| {
                    !key.contains(&c.column.as_str()) && c.value_generated == ValueGenerated::Never
                })
                .map(|c| c.column.as_str())
                .collect();

            let rows_affected = if set.is_empty() {
                tracing::debug!(table = %table, "No columns to update");
                0
            } else {
                let sql = JoinedUpdate::new(table.as_str(), staging.as_str(), on.as_str())
                    .set(set)
                    .build(dialect);
                tracing::trace!(sql = %sql, "Update statement");
                try_outcome!(self.conn.execute(cx, &sql, &[], self.timeout()).await)
            };
            tracing::debug!(table = %table, rows_affected, "Updated level");
            result.tables.push(TableRowCount {
                table,
                rows_affected,
            });
        }
        Outcome::Ok(result)
    }

    /// Delete target rows matching staged rows, derived tables first.
    ///
    /// The result lists tables root first, like every other result.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, condition),
        fields(entity = %self.mapping.entity())
    )]
    pub async fn delete(
        &mut self,
        cx: &Cx,
        condition: &MatchCondition,
    ) -> Outcome<BulkWriteResult, Error> {
        try_result!(self.validate_delete(condition));
        if !self.staging.is_created() {
            return Outcome::Err(Error::config("delete requires staged records"));
        }

        let dialect = self.dialect();
        let mapping = Arc::clone(&self.mapping);
        let on = try_result!(condition.render(dialect, &mapping.primary_key_columns()));
        let staging = self.staging.qualified_name();

        let mut result = BulkWriteResult::default();
        for level in mapping.levels().iter().rev() {
            let table = level.qualified_name(dialect);
            let sql = joined_delete(dialect, &table, &staging, &on);
            tracing::trace!(sql = %sql, "Delete statement");
            let rows_affected =
                try_outcome!(self.conn.execute(cx, &sql, &[], self.timeout()).await);
            tracing::debug!(table = %table, rows_affected, "Deleted from level");
            result.tables.insert(
                0,
                TableRowCount {
                    table,
                    rows_affected,
                },
            );
        }
        Outcome::Ok(result)
    }

    /// Drop the staging table if it was created and end the operation.
    ///
    /// If the drop fails the table is reported again when the operation is dropped.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(entity = %self.mapping.entity()))]
    pub async fn release(mut self, cx: &Cx) -> Outcome<(), Error> {
        let timeout = self.timeout();
        self.staging.remove(cx, self.conn, timeout).await
    }
}

impl<C: Connection, L: BulkLoader> Drop for BulkOperation<'_, C, L> {
    fn drop(&mut self) {
        if self.staging.is_created() {
            tracing::warn!(
                entity = %self.mapping.entity(),
                staging = %self.staging.name(),
                temporary = self.staging.is_temporary(),
                "Bulk operation ended with its staging table still present"
            );
        }
    }
}

/// PostgreSQL types bare parameters in `VALUES` as text, so generated keys
/// copied into staging need a declared store type to cast to.
#[allow(clippy::result_large_err)]
fn check_propagated_key_types(dialect: Dialect, mapping: &TableMapping) -> Result<()> {
    if dialect != Dialect::Postgres || !mapping.is_hierarchy() {
        return Ok(());
    }
    match mapping
        .root()
        .columns
        .iter()
        .find(|c| c.primary_key && c.value_generated.is_generated() && c.store_type.is_none())
    {
        Some(key) => Err(Error::config(format!(
            "generated key '{}' of entity '{}' needs a store type to be copied to derived tables",
            key.column,
            mapping.entity()
        ))),
        None => Ok(()),
    }
}

#[allow(clippy::result_large_err)]
fn correlation_value(index: impl TryInto<i32>) -> Result<Value> {
    index
        .try_into()
        .map(Value::Int)
        .map_err(|_| Error::config("too many records to correlate in one operation"))
}

/// Positional values for each record, in staged column order, plus the
/// correlation id when `correlated`.
#[allow(clippy::result_large_err)]
fn staged_rows<E: BulkEntity>(
    entity: &str,
    records: &[E],
    columns: &[StagedColumn],
    correlated: bool,
) -> Result<Vec<Vec<Value>>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let properties = record.to_row();
            let mut row = Vec::with_capacity(columns.len() + usize::from(correlated));
            for column in columns {
                let value = properties
                    .iter()
                    .find(|(name, _)| *name == column.property)
                    .map(|(_, value)| value)
                    .ok_or_else(|| {
                        Error::config(format!(
                            "entity '{}' has no property '{}' for column '{}'",
                            entity, column.property, column.column
                        ))
                    })?;
                row.push(value.clone());
            }
            if correlated {
                row.push(correlation_value(index)?);
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use sqlbulk_core::Row;

    #[derive(Debug)]
    struct NullConnection(Dialect);

    impl Connection for NullConnection {
        fn dialect(&self) -> Dialect {
            self.0
        }

        fn query(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
            _timeout: Option<Duration>,
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            async { Outcome::Ok(Vec::new()) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
            _timeout: Option<Duration>,
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            async { Outcome::Ok(0) }
        }
    }

    struct Person {
        id: Option<i64>,
        name: String,
    }

    impl BulkEntity for Person {
        const ENTITY_NAME: &'static str = "Person";

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::from(self.id)), ("name", Value::from(self.name.as_str()))]
        }

        fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
            if property == "id" {
                self.id = value.try_into()?;
            }
            Ok(())
        }
    }

    fn keyed() -> Arc<TableMapping> {
        Arc::new(
            TableMapping::new("Person").level(
                EntityTypeLevel::new("Person", Some("dbo"), "People")
                    .column(ColumnMapping::new("id", "Id").primary_key().identity())
                    .column(ColumnMapping::new("name", "Name"))
                    .column(
                        ColumnMapping::new("version", "RowVersion")
                            .generated(ValueGenerated::OnAddOrUpdate),
                    ),
            ),
        )
    }

    fn keyless() -> Arc<TableMapping> {
        Arc::new(
            TableMapping::new("Log").level(
                EntityTypeLevel::new("Log", None, "logs").column(ColumnMapping::new("msg", "msg")),
            ),
        )
    }

    #[test]
    fn staged_columns_keep_key_and_drop_generated() {
        let conn = NullConnection(Dialect::SqlServer);
        let op = BulkOperation::new(&conn, keyed(), BulkOptions::default()).unwrap();
        let columns: Vec<String> = op
            .staged_columns(false)
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(columns, vec!["Id", "Name"]);
    }

    #[test]
    fn input_filter_never_drops_key() {
        let conn = NullConnection(Dialect::SqlServer);
        let options = BulkOptions::new().input_columns(["version"]);
        let op = BulkOperation::new(&conn, keyed(), options).unwrap();
        let columns: Vec<String> = op
            .staged_columns(false)
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(columns, vec!["Id"]);
    }

    #[test]
    fn validation_requires_key_or_condition() {
        let conn = NullConnection(Dialect::Postgres);
        let op = BulkOperation::new(&conn, keyless(), BulkOptions::default()).unwrap();

        let err = op.validate_merge(&MatchCondition::PrimaryKey).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ref v) if v.operation == OperationKind::Merge
        ));
        assert!(matches!(
            op.validate_update(&MatchCondition::PrimaryKey),
            Err(Error::Validation(ref v)) if v.operation == OperationKind::Update
        ));
        assert!(op.validate_delete(&MatchCondition::columns(["msg"])).is_ok());

        let keyed_op = BulkOperation::new(&conn, keyed(), BulkOptions::default()).unwrap();
        assert!(keyed_op.validate_merge(&MatchCondition::PrimaryKey).is_ok());
    }

    #[test]
    fn merge_statement_excludes_keys_from_update() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = NullConnection(Dialect::SqlServer);
        let mapping = keyed();
        let mut op = BulkOperation::new(&conn, Arc::clone(&mapping), BulkOptions::default()).unwrap();

        let staged = rt.block_on(async { op.insert_staging::<Person>(&cx, &[], false, true).await });
        assert!(matches!(staged, Outcome::Ok(BulkInsertResult { rows_affected: 0 })));
        assert!(op.staging().is_created());

        let statement = op.merge_statement(
            mapping.root(),
            &["Id"],
            "t.[Id] = s.[Id]",
            true,
            MergeFlags::default(),
            false,
        );
        assert!(statement.sql.contains("INSERT ([Name]) VALUES (s.[Name])"));
        assert!(statement.sql.contains("UPDATE SET t.[Name] = s.[Name]"));
        assert!(statement.sql.contains(
            "OUTPUT $action, s.[sqlbulk_row_id], inserted.[Id], inserted.[RowVersion]"
        ));
        assert!(!statement.sql.contains("NOT MATCHED BY SOURCE"));

        let keep = op.merge_statement(
            mapping.root(),
            &["Id"],
            "t.[Id] = s.[Id]",
            true,
            MergeFlags::default().keep_identity(true).allow_update(false),
            false,
        );
        assert!(keep.sql.starts_with("SET IDENTITY_INSERT [dbo].[People] ON;"));
        assert!(keep.sql.contains("INSERT ([Id], [Name]) VALUES (s.[Id], s.[Name])"));
        assert!(!keep.sql.contains("WHEN MATCHED"));

        let released = rt.block_on(async { op.release(&cx).await });
        assert!(matches!(released, Outcome::Ok(())));
    }

    #[test]
    fn staged_rows_follow_column_order_and_correlate() {
        let people = vec![
            Person {
                id: None,
                name: "A".into(),
            },
            Person {
                id: Some(4),
                name: "B".into(),
            },
        ];
        let columns = vec![
            StagedColumn {
                level: 0,
                column: "Name".into(),
                property: "name".into(),
            },
            StagedColumn {
                level: 0,
                column: "Id".into(),
                property: "id".into(),
            },
        ];
        let rows = staged_rows("Person", &people, &columns, true).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Text("A".into()), Value::Null, Value::Int(0)],
                vec![Value::Text("B".into()), Value::BigInt(4), Value::Int(1)],
            ]
        );

        let missing = vec![StagedColumn {
            level: 0,
            column: "Age".into(),
            property: "age".into(),
        }];
        assert!(matches!(
            staged_rows("Person", &people, &missing, false),
            Err(Error::Config(_))
        ));
    }

    fn student(key_type: Option<&str>) -> Arc<TableMapping> {
        let mut id = ColumnMapping::new("id", "Id").primary_key().identity();
        if let Some(ty) = key_type {
            id = id.store_type(ty);
        }
        Arc::new(
            TableMapping::new("Student")
                .level(
                    EntityTypeLevel::new("Person", Some("dbo"), "People")
                        .column(id)
                        .column(ColumnMapping::new("name", "Name")),
                )
                .level(
                    EntityTypeLevel::new("Student", Some("dbo"), "Students")
                        .column(ColumnMapping::new("id", "Id").primary_key())
                        .column(ColumnMapping::new("school", "School")),
                ),
        )
    }

    #[test]
    fn postgres_hierarchy_needs_typed_generated_key() {
        let pg = NullConnection(Dialect::Postgres);
        let err = BulkOperation::new(&pg, student(None), BulkOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("'Id'"));

        assert!(BulkOperation::new(&pg, student(Some("int")), BulkOptions::default()).is_ok());
        let preserved = BulkOptions::new().keep_identity(true);
        assert!(BulkOperation::new(&pg, student(None), preserved).is_ok());

        // SQL Server parameters arrive typed.
        let mssql = NullConnection(Dialect::SqlServer);
        assert!(BulkOperation::new(&mssql, student(None), BulkOptions::default()).is_ok());
    }

    #[test]
    fn property_mapped_to_two_columns_stages_both() {
        let people = vec![Person {
            id: Some(4),
            name: "Ada".into(),
        }];
        let columns = vec![
            StagedColumn {
                level: 0,
                column: "Id".into(),
                property: "id".into(),
            },
            StagedColumn {
                level: 1,
                column: "PersonId".into(),
                property: "id".into(),
            },
        ];
        let rows = staged_rows("Person", &people, &columns, false).unwrap();
        assert_eq!(rows, vec![vec![Value::BigInt(4), Value::BigInt(4)]]);
    }
}
