//! Operation options, resolved once per bulk operation.

use sqlbulk_core::{ColumnMapping, Error, Result, TableMapping};
use sqlbulk_query::MatchCondition;
use std::time::Duration;

/// Bulk operation configuration.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Maximum rows per load statement; 0 leaves batching to the dialect's limits
    pub batch_size: usize,
    /// Timeout passed to the store with every statement
    pub command_timeout: Option<Duration>,
    /// Stage into a named permanent table instead of a session-scoped one
    pub use_permanent_table: bool,
    /// Write caller-supplied identity values instead of letting the store generate them
    pub keep_identity: bool,
    /// Write store-generated values back onto the records
    pub auto_map_output: bool,
    /// For inserts: skip records that already exist (match on `match_on`)
    pub insert_if_not_exists: bool,
    /// How staged rows are matched to target rows
    pub match_on: MatchCondition,
    /// Only synchronize these properties or columns (key columns are always staged)
    pub input_columns: Option<Vec<String>>,
    /// Never synchronize these properties or columns
    pub ignore_columns: Vec<String>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: 0,
            command_timeout: None,
            use_permanent_table: false,
            keep_identity: false,
            auto_map_output: true,
            insert_if_not_exists: false,
            match_on: MatchCondition::PrimaryKey,
            input_columns: None,
            ignore_columns: Vec::new(),
        }
    }
}

impl BulkOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the load batch size.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows;
        self
    }

    /// Set the per-statement timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Stage into a permanent table.
    pub fn use_permanent_table(mut self, enabled: bool) -> Self {
        self.use_permanent_table = enabled;
        self
    }

    /// Preserve caller-supplied identity values.
    pub fn keep_identity(mut self, enabled: bool) -> Self {
        self.keep_identity = enabled;
        self
    }

    /// Write store-generated values back onto records.
    pub fn auto_map_output(mut self, enabled: bool) -> Self {
        self.auto_map_output = enabled;
        self
    }

    /// Skip inserting records that already exist.
    pub fn insert_if_not_exists(mut self, enabled: bool) -> Self {
        self.insert_if_not_exists = enabled;
        self
    }

    /// Set the match condition.
    pub fn match_on(mut self, condition: MatchCondition) -> Self {
        self.match_on = condition;
        self
    }

    /// Restrict synchronization to the named properties or columns.
    pub fn input_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Exclude the named properties or columns from synchronization.
    pub fn ignore_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Does the column pass the input/ignore filters?
    pub fn includes(&self, column: &ColumnMapping) -> bool {
        let selected = self
            .input_columns
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| column.matches_name(n)));
        selected && !self.ignore_columns.iter().any(|n| column.matches_name(n))
    }

    /// Check that every filter entry names a mapped property or column.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self, mapping: &TableMapping) -> Result<()> {
        let names = self
            .input_columns
            .iter()
            .flatten()
            .chain(self.ignore_columns.iter());
        for name in names {
            let known = mapping
                .levels()
                .iter()
                .flat_map(|level| level.columns.iter())
                .any(|c| c.matches_name(name));
            if !known {
                return Err(Error::config(format!(
                    "column filter '{}' does not name a property or column of entity '{}'",
                    name,
                    mapping.entity()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbulk_core::EntityTypeLevel;

    fn mapping() -> TableMapping {
        TableMapping::new("Person").level(
            EntityTypeLevel::new("Person", None, "people")
                .column(ColumnMapping::new("id", "Id").primary_key().identity())
                .column(ColumnMapping::new("name", "FullName"))
                .column(ColumnMapping::new("age", "Age")),
        )
    }

    #[test]
    fn defaults() {
        let options = BulkOptions::default();
        assert_eq!(options.batch_size, 0);
        assert!(options.auto_map_output);
        assert!(!options.keep_identity);
        assert!(!options.use_permanent_table);
        assert_eq!(options.match_on, MatchCondition::PrimaryKey);
    }

    #[test]
    fn filters_accept_property_or_column_names() {
        let mapping = mapping();
        let root = mapping.root();
        let options = BulkOptions::new().input_columns(["name"]).ignore_columns(["Age"]);
        options.validate(&mapping).unwrap();

        assert!(options.includes(&root.columns[1]));
        assert!(!options.includes(&root.columns[0]));
        assert!(!options.includes(&root.columns[2]));

        let options = BulkOptions::new().ignore_columns(["FullName"]);
        assert!(options.includes(&root.columns[2]));
        assert!(!options.includes(&root.columns[1]));
    }

    #[test]
    fn unknown_filter_is_config_error() {
        let err = BulkOptions::new()
            .ignore_columns(["nickname"])
            .validate(&mapping())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
