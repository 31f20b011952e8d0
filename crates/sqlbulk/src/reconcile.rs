//! Mapping merge output rows back onto staged records.

use crate::result::{LevelResult, RowOutcome};
use serde::{Deserialize, Serialize};
use sqlbulk_core::{BulkEntity, EntityTypeLevel, Error, InvariantError, Result, Row, Value};
use sqlbulk_query::{MergeStatement, OutputColumn};

/// What a merge did with one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeAction {
    Insert,
    Update,
    Delete,
}

impl MergeAction {
    /// Decode the action tag reported by the store.
    #[allow(clippy::result_large_err)]
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(MergeAction::Insert),
            "UPDATE" => Ok(MergeAction::Update),
            "DELETE" => Ok(MergeAction::Delete),
            other => Err(Error::invariant(format!(
                "unknown merge action tag '{}'",
                other
            ))),
        }
    }

    /// Tag as the store reports it.
    pub const fn as_str(self) -> &'static str {
        match self {
            MergeAction::Insert => "INSERT",
            MergeAction::Update => "UPDATE",
            MergeAction::Delete => "DELETE",
        }
    }
}

/// Staged records addressed by correlation id.
///
/// A record's correlation id is its position in the slice it was staged from,
/// so the map borrows that same slice mutably for the rest of the operation.
#[derive(Debug)]
pub struct CorrelationMap<'e, E> {
    records: &'e mut [E],
}

impl<'e, E> CorrelationMap<'e, E> {
    /// Address `records` by position.
    pub fn new(records: &'e mut [E]) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record staged with correlation id `id`.
    #[allow(clippy::result_large_err)]
    pub fn get_mut(&mut self, id: i64) -> Result<&mut E> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.records.get_mut(index))
            .ok_or_else(|| {
                InvariantError::new("output row does not correlate to a staged record")
                    .with_correlation_id(id)
                    .into()
            })
    }
}

/// Where each value sits in a merge statement's output rows.
///
/// Computed once per statement, then applied to every output row.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    action: usize,
    correlation: usize,
    generated: Vec<GeneratedOrdinal>,
}

#[derive(Debug, Clone)]
struct GeneratedOrdinal {
    ordinal: usize,
    property: String,
    column: String,
}

impl OutputLayout {
    /// Resolve ordinals for the level's store-generated columns.
    #[allow(clippy::result_large_err)]
    pub fn new(statement: &MergeStatement, level: &EntityTypeLevel) -> Result<Self> {
        let position = |column: &OutputColumn| {
            statement.position(column).ok_or_else(|| {
                Error::invariant(format!(
                    "merge output for table '{}' has no {:?} column",
                    level.table, column
                ))
            })
        };

        let action = position(&OutputColumn::Action)?;
        let correlation = position(&OutputColumn::Correlation)?;
        let generated = level
            .generated_columns()
            .into_iter()
            .map(|c| {
                Ok(GeneratedOrdinal {
                    ordinal: position(&OutputColumn::Generated(c.column.clone()))?,
                    property: c.property.clone(),
                    column: c.column.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            action,
            correlation,
            generated,
        })
    }

    /// Decode one output row.
    #[allow(clippy::result_large_err)]
    pub fn decode(&self, row: &Row) -> Result<RowOutcome> {
        let cell = |ordinal: usize| {
            row.get(ordinal).ok_or_else(|| {
                Error::invariant(format!(
                    "merge output row has {} columns, expected at least {}",
                    row.len(),
                    ordinal + 1
                ))
            })
        };

        let tag = cell(self.action)?;
        let action = match tag.as_str() {
            Some(tag) => MergeAction::from_tag(tag)?,
            None => {
                return Err(Error::invariant(format!(
                    "merge action tag is {}, expected text",
                    tag.type_name()
                )));
            }
        };

        let correlation_id = match cell(self.correlation)? {
            Value::Null => None,
            value => Some(value.as_i64().ok_or_else(|| {
                Error::invariant(format!(
                    "correlation id is {}, expected an integer",
                    value.type_name()
                ))
            })?),
        };

        let values = self
            .generated
            .iter()
            .map(|g| Ok((g.column.clone(), cell(g.ordinal)?.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(RowOutcome {
            action,
            correlation_id,
            values,
        })
    }

    /// Copy an outcome's generated values onto its record.
    #[allow(clippy::result_large_err)]
    fn write_back<E: BulkEntity>(&self, record: &mut E, outcome: &RowOutcome) -> Result<()> {
        for (generated, (_, value)) in self.generated.iter().zip(&outcome.values) {
            record.set_value(&generated.property, value.clone())?;
        }
        Ok(())
    }
}

/// Tally merge output rows into `level`, writing generated values back when asked.
///
/// Deletes are only counted. Inserts and updates must resolve to a staged record.
#[allow(clippy::result_large_err)]
pub fn reconcile<E: BulkEntity>(
    rows: &[Row],
    layout: &OutputLayout,
    records: &mut CorrelationMap<'_, E>,
    write_back: bool,
    level: &mut LevelResult,
) -> Result<()> {
    for row in rows {
        let outcome = layout.decode(row)?;
        match outcome.action {
            MergeAction::Delete => level.rows_deleted += 1,
            MergeAction::Insert | MergeAction::Update => {
                let id = outcome.correlation_id.ok_or_else(|| {
                    Error::invariant(format!(
                        "{} output row carries no correlation id",
                        outcome.action.as_str()
                    ))
                })?;
                let record = records.get_mut(id)?;
                if outcome.action == MergeAction::Insert {
                    level.rows_inserted += 1;
                } else {
                    level.rows_updated += 1;
                }
                if write_back && !layout.generated.is_empty() {
                    layout.write_back(record, &outcome)?;
                }
            }
        }
        level.outcomes.push(outcome);
    }
    level.rows_affected = rows.len() as u64;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbulk_core::{ColumnMapping, Dialect, ValueGenerated};
    use sqlbulk_query::MergeBuilder;

    #[derive(Debug, Default)]
    struct Item {
        id: Option<i64>,
        stamp: Option<i64>,
    }

    impl BulkEntity for Item {
        const ENTITY_NAME: &'static str = "Item";

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::from(self.id)), ("stamp", Value::from(self.stamp))]
        }

        fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
            match property {
                "id" => self.id = value.try_into()?,
                "stamp" => self.stamp = value.try_into()?,
                _ => {}
            }
            Ok(())
        }
    }

    fn level() -> EntityTypeLevel {
        EntityTypeLevel::new("Item", None, "items")
            .column(ColumnMapping::new("id", "id").primary_key().identity())
            .column(ColumnMapping::new("stamp", "stamp").generated(ValueGenerated::OnAddOrUpdate))
    }

    fn statement() -> MergeStatement {
        MergeBuilder::new("\"items\"", "\"stg\"", "t.\"id\" = s.\"id\"")
            .output("rid", ["id", "stamp"])
            .build(Dialect::Postgres)
    }

    fn row(action: &str, rid: Value, id: i64, stamp: i64) -> Row {
        Row::new(
            vec!["a".into(), "rid".into(), "id".into(), "stamp".into()],
            vec![
                Value::Text(action.into()),
                rid,
                Value::BigInt(id),
                Value::BigInt(stamp),
            ],
        )
    }

    #[test]
    fn action_tags() {
        assert_eq!(MergeAction::from_tag("INSERT").unwrap(), MergeAction::Insert);
        assert_eq!(MergeAction::from_tag("update ").unwrap(), MergeAction::Update);
        assert!(matches!(
            MergeAction::from_tag("UPSERT"),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn reconciles_and_writes_back() {
        let layout = OutputLayout::new(&statement(), &level()).unwrap();
        let mut items = vec![Item::default(), Item::default()];
        let mut map = CorrelationMap::new(&mut items);
        let mut result = LevelResult::new("\"items\"");

        let rows = vec![
            row("INSERT", Value::Int(1), 11, 100),
            row("UPDATE", Value::Int(0), 10, 101),
            row("DELETE", Value::Null, 3, 0),
        ];
        reconcile(&rows, &layout, &mut map, true, &mut result).unwrap();

        assert_eq!(result.rows_inserted, 1);
        assert_eq!(result.rows_updated, 1);
        assert_eq!(result.rows_deleted, 1);
        assert_eq!(result.rows_affected, 3);
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(items[0].id, Some(10));
        assert_eq!(items[0].stamp, Some(101));
        assert_eq!(items[1].id, Some(11));
    }

    #[test]
    fn without_write_back_records_are_untouched() {
        let layout = OutputLayout::new(&statement(), &level()).unwrap();
        let mut items = vec![Item::default()];
        let mut map = CorrelationMap::new(&mut items);
        let mut result = LevelResult::new("\"items\"");
        reconcile(
            &[row("INSERT", Value::Int(0), 5, 1)],
            &layout,
            &mut map,
            false,
            &mut result,
        )
        .unwrap();
        assert_eq!(result.rows_inserted, 1);
        assert_eq!(items[0].id, None);
    }

    #[test]
    fn uncorrelated_output_is_invariant_violation() {
        let layout = OutputLayout::new(&statement(), &level()).unwrap();
        let mut items = vec![Item::default()];
        let mut map = CorrelationMap::new(&mut items);
        let mut result = LevelResult::new("\"items\"");

        let err = reconcile(
            &[row("INSERT", Value::Int(7), 1, 1)],
            &layout,
            &mut map,
            true,
            &mut result,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Invariant(ref e) if e.correlation_id == Some(7)));

        let err = reconcile(
            &[row("UPDATE", Value::Null, 1, 1)],
            &layout,
            &mut map,
            true,
            &mut result,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn missing_output_column_is_invariant_violation() {
        let statement = MergeBuilder::new("\"items\"", "\"stg\"", "1 = 0")
            .output("rid", ["id"])
            .build(Dialect::Postgres);
        let err = OutputLayout::new(&statement, &level()).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));

        let no_output = MergeBuilder::new("\"items\"", "\"stg\"", "1 = 0").build(Dialect::Postgres);
        assert!(OutputLayout::new(&no_output, &level()).is_err());
    }
}
