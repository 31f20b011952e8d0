//! sqlbulk - set-based bulk synchronization of records against relational tables.
//!
//! Records are streamed into a staging table, then written to the target with
//! one set-based statement per table level: `MERGE` for inserts, merges and
//! syncs, joined `UPDATE` and `DELETE` otherwise. Merge output is reconciled back
//! onto the records, so store-generated keys and computed columns land on the
//! objects that were passed in.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlbulk::prelude::*;
//!
//! async fn save(cx: &Cx, conn: &impl Connection, people: &mut [Person]) {
//!     let catalog = StaticCatalog::new().with(person_mapping()).unwrap();
//!
//!     // Insert or update by primary key; generated ids are written back.
//!     let result = bulk_merge(cx, conn, &catalog, people, BulkOptions::default()).await;
//!     if let Outcome::Ok(result) = result {
//!         println!("{} inserted, {} updated", result.rows_inserted(), result.rows_updated());
//!     }
//! }
//! ```
//!
//! Every facade function drops its staging table before returning, on success
//! and failure alike. Callers that drive [`BulkOperation`] directly must call
//! [`BulkOperation::release`] themselves.

/// Unwrap an `Outcome`, returning early on anything but `Ok`.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            ::asupersync::Outcome::Ok(value) => value,
            ::asupersync::Outcome::Err(e) => return ::asupersync::Outcome::Err(e),
            ::asupersync::Outcome::Cancelled(r) => return ::asupersync::Outcome::Cancelled(r),
            ::asupersync::Outcome::Panicked(p) => return ::asupersync::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning `Outcome`.
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return ::asupersync::Outcome::Err(e),
        }
    };
}

pub mod loader;
pub mod operation;
pub mod options;
pub mod reconcile;
pub mod result;
pub mod staging;

pub use loader::{BulkLoader, InsertValuesLoader, LoadOptions, rows_per_statement};
pub use operation::{BulkOperation, MergeFlags};
pub use options::BulkOptions;
pub use reconcile::{CorrelationMap, MergeAction, OutputLayout, reconcile};
pub use result::{
    BulkDeleteResult, BulkInsertResult, BulkMergeResult, BulkUpdateResult, BulkWriteResult,
    LevelResult, RowOutcome, TableRowCount,
};
pub use staging::{CORRELATION_COLUMN, StagedColumn, StagingTable};

pub use sqlbulk_core::{
    Budget, BulkEntity, ColumnMapping, Connection, Cx, Dialect, EntityTypeLevel, Error,
    MappingCatalog, OperationKind, Outcome, Result, Row, StaticCatalog, TableMapping, Value,
    ValueGenerated,
};
pub use sqlbulk_query::MatchCondition;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Budget, BulkDeleteResult, BulkEntity, BulkInsertResult, BulkMergeResult, BulkOperation,
        BulkOptions, BulkUpdateResult, ColumnMapping, Connection, Cx, Dialect, EntityTypeLevel,
        Error, MappingCatalog, MatchCondition, MergeAction, OperationKind, Outcome, Result, Row,
        StaticCatalog, TableMapping, Value, ValueGenerated, bulk_delete, bulk_insert, bulk_merge,
        bulk_sync, bulk_update,
    };
}

/// Insert records.
///
/// Single-table entities with nothing to report back are loaded straight into
/// the target. Otherwise records are staged and merged with an insert-only
/// `MERGE`; with `insert_if_not_exists` rows already present (by `match_on`)
/// are skipped, without it every record is inserted. With `auto_map_output`
/// store-generated values are written back onto `records`.
#[tracing::instrument(
    level = "debug",
    skip(cx, conn, catalog, records, options),
    fields(entity = E::ENTITY_NAME, records = records.len())
)]
pub async fn bulk_insert<C, K, E>(
    cx: &Cx,
    conn: &C,
    catalog: &K,
    records: &mut [E],
    options: BulkOptions,
) -> Outcome<BulkInsertResult, Error>
where
    C: Connection,
    K: MappingCatalog + ?Sized,
    E: BulkEntity,
{
    let mapping = try_result!(catalog.resolve(E::ENTITY_NAME));
    let flags = MergeFlags::from_options(&options)
        .insert_if_missing(options.insert_if_not_exists)
        .allow_update(false);
    let condition = options.match_on.clone();

    let mut op = try_result!(BulkOperation::new(conn, mapping, options));
    let direct = !flags.insert_if_missing
        && !op.mapping().is_hierarchy()
        && (!flags.auto_map_output || op.mapping().root().generated_columns().is_empty());
    let keep_identity = flags.keep_identity;
    let outcome = if direct {
        op.insert_direct(cx, records, keep_identity).await
    } else {
        match stage_and_merge(cx, &mut op, records, &condition, flags).await {
            // Insert-only merge: every affected root row is an insert, and the
            // count is known with or without output.
            Outcome::Ok(result) => Outcome::Ok(BulkInsertResult {
                rows_affected: result.rows_affected(),
            }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    };
    finish(outcome, op.release(cx).await)
}

/// Insert missing records and update existing ones, matched by `match_on`.
#[tracing::instrument(
    level = "debug",
    skip(cx, conn, catalog, records, options),
    fields(entity = E::ENTITY_NAME, records = records.len())
)]
pub async fn bulk_merge<C, K, E>(
    cx: &Cx,
    conn: &C,
    catalog: &K,
    records: &mut [E],
    options: BulkOptions,
) -> Outcome<BulkMergeResult, Error>
where
    C: Connection,
    K: MappingCatalog + ?Sized,
    E: BulkEntity,
{
    let flags = MergeFlags::from_options(&options);
    merge_records(cx, conn, catalog, records, options, flags).await
}

/// Make the root table match `records`: insert, update, and delete root rows
/// that no record matches.
#[tracing::instrument(
    level = "debug",
    skip(cx, conn, catalog, records, options),
    fields(entity = E::ENTITY_NAME, records = records.len())
)]
pub async fn bulk_sync<C, K, E>(
    cx: &Cx,
    conn: &C,
    catalog: &K,
    records: &mut [E],
    options: BulkOptions,
) -> Outcome<BulkMergeResult, Error>
where
    C: Connection,
    K: MappingCatalog + ?Sized,
    E: BulkEntity,
{
    let flags = MergeFlags::from_options(&options).allow_delete(true);
    merge_records(cx, conn, catalog, records, options, flags).await
}

/// Update existing rows from `records`, matched by `match_on`.
#[tracing::instrument(
    level = "debug",
    skip(cx, conn, catalog, records, options),
    fields(entity = E::ENTITY_NAME, records = records.len())
)]
pub async fn bulk_update<C, K, E>(
    cx: &Cx,
    conn: &C,
    catalog: &K,
    records: &[E],
    options: BulkOptions,
) -> Outcome<BulkUpdateResult, Error>
where
    C: Connection,
    K: MappingCatalog + ?Sized,
    E: BulkEntity,
{
    let mapping = try_result!(catalog.resolve(E::ENTITY_NAME));
    let condition = options.match_on.clone();
    let mut op = try_result!(BulkOperation::new(conn, mapping, options));
    try_result!(op.validate_update(&condition));

    let outcome = match op.insert_staging(cx, records, false, false).await {
        Outcome::Ok(_) => op.update(cx, &condition).await,
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    };
    finish(outcome, op.release(cx).await)
}

/// Delete the rows matching `records`, derived tables first.
#[tracing::instrument(
    level = "debug",
    skip(cx, conn, catalog, records, options),
    fields(entity = E::ENTITY_NAME, records = records.len())
)]
pub async fn bulk_delete<C, K, E>(
    cx: &Cx,
    conn: &C,
    catalog: &K,
    records: &[E],
    options: BulkOptions,
) -> Outcome<BulkDeleteResult, Error>
where
    C: Connection,
    K: MappingCatalog + ?Sized,
    E: BulkEntity,
{
    let mapping = try_result!(catalog.resolve(E::ENTITY_NAME));
    let condition = options.match_on.clone();
    let mut op = try_result!(BulkOperation::new(conn, mapping, options));
    try_result!(op.validate_delete(&condition));

    let outcome = match op.insert_staging(cx, records, false, false).await {
        Outcome::Ok(_) => op.delete(cx, &condition).await,
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    };
    finish(outcome, op.release(cx).await)
}

async fn merge_records<C, K, E>(
    cx: &Cx,
    conn: &C,
    catalog: &K,
    records: &mut [E],
    options: BulkOptions,
    flags: MergeFlags,
) -> Outcome<BulkMergeResult, Error>
where
    C: Connection,
    K: MappingCatalog + ?Sized,
    E: BulkEntity,
{
    let mapping = try_result!(catalog.resolve(E::ENTITY_NAME));
    let condition = options.match_on.clone();
    let mut op = try_result!(BulkOperation::new(conn, mapping, options));
    let outcome = stage_and_merge(cx, &mut op, records, &condition, flags).await;
    finish(outcome, op.release(cx).await)
}

/// Validate, stage with correlation when output is needed, then merge.
async fn stage_and_merge<C, L, E>(
    cx: &Cx,
    op: &mut BulkOperation<'_, C, L>,
    records: &mut [E],
    condition: &MatchCondition,
    flags: MergeFlags,
) -> Outcome<BulkMergeResult, Error>
where
    C: Connection,
    L: BulkLoader,
    E: BulkEntity,
{
    if flags.insert_if_missing {
        let checked = if flags.allow_delete {
            op.validate_sync(condition)
        } else {
            op.validate_merge(condition)
        };
        try_result!(checked);
    }

    let correlated = op.requires_correlation(flags);
    try_outcome!(
        op.insert_staging(cx, records, flags.keep_identity, correlated)
            .await
    );
    let mut map = CorrelationMap::new(records);
    op.merge(cx, &mut map, condition, flags).await
}

/// Combine an operation's outcome with its staging cleanup.
///
/// A failed operation keeps its own error; a cleanup failure after it is only
/// logged. A cleanup failure after success fails the call.
fn finish<T>(outcome: Outcome<T, Error>, released: Outcome<(), Error>) -> Outcome<T, Error> {
    match (outcome, released) {
        (outcome, Outcome::Ok(())) => outcome,
        (Outcome::Ok(_), Outcome::Err(e)) => Outcome::Err(e),
        (Outcome::Ok(_), Outcome::Cancelled(r)) => Outcome::Cancelled(r),
        (Outcome::Ok(_), Outcome::Panicked(p)) => Outcome::Panicked(p),
        (failed, Outcome::Err(e)) => {
            tracing::warn!(error = %e, "Failed to drop staging table after operation failure");
            failed
        }
        (failed, _) => {
            tracing::warn!("Staging table cleanup interrupted after operation failure");
            failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbulk_core::QueryError;

    #[test]
    fn finish_prefers_operation_error() {
        let failed: Outcome<u64, Error> = Outcome::Err(Error::config("boom"));
        let released = Outcome::Err(Error::Query(QueryError::new("drop failed", None)));
        assert!(matches!(finish(failed, released), Outcome::Err(Error::Config(_))));
    }

    #[test]
    fn finish_reports_cleanup_failure_after_success() {
        let released = Outcome::Err(Error::Query(QueryError::new("drop failed", None)));
        assert!(matches!(finish(Outcome::Ok(3_u64), released), Outcome::Err(Error::Query(_))));
        assert!(matches!(
            finish(Outcome::Ok(3_u64), Outcome::Ok(())),
            Outcome::Ok(3)
        ));
    }
}
