//! Statement builders for staging, merge, update and delete.
//!
//! Every builder is pure: it takes already-quoted table names and bare column
//! names and renders deterministic SQL text. The staging table is always
//! aliased `s` and the target table `t`.

use sqlbulk_core::Dialect;

/// Alias of the staging table in every generated statement.
pub const STAGING_ALIAS: &str = "s";
/// Alias of the target table in every generated statement.
pub const TARGET_ALIAS: &str = "t";
/// Predicate that never matches, turning every staged row into an insert.
pub const NEVER_MATCH: &str = "1 = 0";

fn quote_all(dialect: Dialect, columns: &[String]) -> Vec<String> {
    columns.iter().map(|c| dialect.quote_identifier(c)).collect()
}

fn staged(dialect: Dialect, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|c| format!("{STAGING_ALIAS}.{}", dialect.quote_identifier(c)))
        .collect()
}

/// Builder for the statement that clones target tables into an empty staging table.
///
/// Source tables are outer-joined onto a single seed row so the clone carries
/// column types only: no rows, no identity property, every column nullable.
#[derive(Debug, Clone)]
pub struct CreateStaging {
    table: String,
    temporary: bool,
    sources: Vec<String>,
    columns: Vec<(usize, String)>,
    correlation: Option<String>,
}

impl CreateStaging {
    /// Start a clone into `table` (quoted, possibly qualified).
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            temporary: true,
            sources: Vec::new(),
            columns: Vec::new(),
            correlation: None,
        }
    }

    /// Create a session-scoped table (`true`, the default) or a permanent one.
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Add a source table (quoted, possibly qualified). Sources are indexed in
    /// the order they are added.
    pub fn source(mut self, table: impl Into<String>) -> Self {
        self.sources.push(table.into());
        self
    }

    /// Copy the shape of `column` from the source at index `source`.
    pub fn column(mut self, source: usize, column: impl Into<String>) -> Self {
        self.columns.push((source, column.into()));
        self
    }

    /// Append a nullable integer correlation column.
    pub fn correlation_column(mut self, name: impl Into<String>) -> Self {
        self.correlation = Some(name.into());
        self
    }

    /// Build the statement for a dialect.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build(&self, dialect: Dialect) -> String {
        let mut select: Vec<String> = self
            .columns
            .iter()
            .map(|(source, column)| format!("t{source}.{}", dialect.quote_identifier(column)))
            .collect();
        if let Some(correlation) = &self.correlation {
            select.push(format!(
                "CAST(NULL AS {}) AS {}",
                dialect.correlation_type(),
                dialect.quote_identifier(correlation)
            ));
        }

        let mut from = format!("(SELECT 1 AS {}) AS d", dialect.quote_identifier("seed"));
        for (index, source) in self.sources.iter().enumerate() {
            from.push_str(&format!(" LEFT JOIN {source} AS t{index} ON {NEVER_MATCH}"));
        }

        match dialect {
            Dialect::SqlServer => format!(
                "SELECT TOP 0 {} INTO {} FROM {}",
                select.join(", "),
                self.table,
                from
            ),
            Dialect::Postgres => format!(
                "CREATE {}TABLE {} AS SELECT {} FROM {} WITH NO DATA",
                if self.temporary { "TEMP " } else { "" },
                self.table,
                select.join(", "),
                from
            ),
        }
    }
}

/// Drop a staging table if it exists.
pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

/// Builder for a multi-row `INSERT ... VALUES` with positional parameters.
#[derive(Debug, Clone)]
pub struct InsertValues {
    table: String,
    columns: Vec<String>,
    rows: usize,
    override_identity: bool,
}

impl InsertValues {
    /// Insert into `table` (quoted, possibly qualified).
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: 1,
            override_identity: false,
        }
    }

    /// Columns to insert, in parameter order.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Number of row constructors.
    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Write caller-supplied values into identity columns.
    pub fn override_identity(mut self, enabled: bool) -> Self {
        self.override_identity = enabled;
        self
    }

    /// Number of bind parameters the statement expects.
    pub fn param_count(&self) -> usize {
        self.columns.len() * self.rows
    }

    /// Build the statement for a dialect.
    ///
    /// Parameters are numbered row-major starting at 1.
    pub fn build(&self, dialect: Dialect) -> String {
        if self.columns.is_empty() {
            return vec![format!("INSERT INTO {} DEFAULT VALUES", self.table); self.rows]
                .join("; ");
        }

        let width = self.columns.len();
        let tuples: Vec<String> = (0..self.rows)
            .map(|row| {
                let placeholders: Vec<String> = (1..=width)
                    .map(|col| dialect.placeholder(row * width + col))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        let columns = quote_all(dialect, &self.columns).join(", ");

        match dialect {
            Dialect::SqlServer => {
                let insert = format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    self.table,
                    columns,
                    tuples.join(", ")
                );
                if self.override_identity {
                    identity_insert(&self.table, &insert)
                } else {
                    insert
                }
            }
            Dialect::Postgres => format!(
                "INSERT INTO {} ({}){} VALUES {}",
                self.table,
                columns,
                if self.override_identity {
                    " OVERRIDING SYSTEM VALUE"
                } else {
                    ""
                },
                tuples.join(", ")
            ),
        }
    }
}

fn identity_insert(table: &str, statement: &str) -> String {
    format!("SET IDENTITY_INSERT {table} ON; {statement}; SET IDENTITY_INSERT {table} OFF;")
}

/// A column of a merge statement's per-row output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputColumn {
    /// The action tag (`INSERT`, `UPDATE`, `DELETE`)
    Action,
    /// The staged row's correlation identifier
    Correlation,
    /// Post-write value of a store-generated column
    Generated(String),
}

/// A rendered merge statement together with the layout of its output rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    /// SQL text
    pub sql: String,
    /// Output columns in row order; empty when no output was requested
    pub output: Vec<OutputColumn>,
}

impl MergeStatement {
    /// Does the statement report per-row outcomes?
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Ordinal of an output column.
    pub fn position(&self, column: &OutputColumn) -> Option<usize> {
        self.output.iter().position(|c| c == column)
    }
}

/// Builder for a conditional `MERGE` from the staging table into one target table.
#[derive(Debug, Clone)]
pub struct MergeBuilder {
    target: String,
    staging: String,
    on: String,
    insert_columns: Vec<String>,
    update_columns: Vec<String>,
    delete_unmatched: bool,
    output: Option<(String, Vec<String>)>,
    identity_insert: bool,
}

impl MergeBuilder {
    /// Merge `staging` into `target` (both quoted) matching rows on `on`.
    pub fn new(target: impl Into<String>, staging: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            staging: staging.into(),
            on: on.into(),
            insert_columns: Vec::new(),
            update_columns: Vec::new(),
            delete_unmatched: false,
            output: None,
            identity_insert: false,
        }
    }

    /// Columns written when a staged row has no match. An empty list inserts defaults.
    pub fn insert<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Columns assigned when a staged row matches. An empty list omits the branch.
    pub fn update<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Delete target rows that no staged row matches.
    pub fn delete_unmatched(mut self, enabled: bool) -> Self {
        self.delete_unmatched = enabled;
        self
    }

    /// Report action, correlation id and post-write generated values per row.
    pub fn output<I, S>(mut self, correlation: impl Into<String>, generated: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output = Some((
            correlation.into(),
            generated.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Write staged values into the target's identity column.
    pub fn identity_insert(mut self, enabled: bool) -> Self {
        self.identity_insert = enabled;
        self
    }

    /// Build the statement for a dialect.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn build(&self, dialect: Dialect) -> MergeStatement {
        let insert_branch = if self.insert_columns.is_empty() {
            "INSERT DEFAULT VALUES".to_string()
        } else {
            format!(
                "INSERT ({}){} VALUES ({})",
                quote_all(dialect, &self.insert_columns).join(", "),
                if self.identity_insert && dialect == Dialect::Postgres {
                    " OVERRIDING SYSTEM VALUE"
                } else {
                    ""
                },
                staged(dialect, &self.insert_columns).join(", ")
            )
        };

        let update_branch = (!self.update_columns.is_empty()).then(|| {
            let assignments: Vec<String> = self
                .update_columns
                .iter()
                .map(|column| {
                    let quoted = dialect.quote_identifier(column);
                    match dialect {
                        // Postgres forbids qualifying the assigned column.
                        Dialect::Postgres => format!("{quoted} = {STAGING_ALIAS}.{quoted}"),
                        Dialect::SqlServer => {
                            format!("{TARGET_ALIAS}.{quoted} = {STAGING_ALIAS}.{quoted}")
                        }
                    }
                })
                .collect();
            format!("WHEN MATCHED THEN UPDATE SET {}", assignments.join(", "))
        });

        let (output_sql, output) = match &self.output {
            Some((correlation, generated)) => {
                let post_write = match dialect {
                    Dialect::SqlServer => "inserted",
                    Dialect::Postgres => TARGET_ALIAS,
                };
                let mut exprs = vec![
                    dialect.merge_action_expr().to_string(),
                    format!("{STAGING_ALIAS}.{}", dialect.quote_identifier(correlation)),
                ];
                let mut columns = vec![OutputColumn::Action, OutputColumn::Correlation];
                for column in generated {
                    exprs.push(format!("{post_write}.{}", dialect.quote_identifier(column)));
                    columns.push(OutputColumn::Generated(column.clone()));
                }
                let keyword = match dialect {
                    Dialect::SqlServer => "OUTPUT",
                    Dialect::Postgres => "RETURNING",
                };
                (Some(format!("{keyword} {}", exprs.join(", "))), columns)
            }
            None => (None, Vec::new()),
        };

        let mut parts = match dialect {
            Dialect::SqlServer => vec![
                format!(
                    "MERGE {} WITH (HOLDLOCK) AS {TARGET_ALIAS} USING {} AS {STAGING_ALIAS} ON ({})",
                    self.target, self.staging, self.on
                ),
                format!("WHEN NOT MATCHED BY TARGET THEN {insert_branch}"),
            ],
            Dialect::Postgres => vec![
                format!(
                    "MERGE INTO {} AS {TARGET_ALIAS} USING {} AS {STAGING_ALIAS} ON {}",
                    self.target, self.staging, self.on
                ),
                format!("WHEN NOT MATCHED BY TARGET THEN {insert_branch}"),
            ],
        };
        if let Some(update_branch) = update_branch {
            parts.push(update_branch);
        }
        if self.delete_unmatched {
            parts.push("WHEN NOT MATCHED BY SOURCE THEN DELETE".to_string());
        }
        if let Some(output_sql) = output_sql {
            parts.push(output_sql);
        }

        let merge = parts.join(" ");
        let sql = match dialect {
            Dialect::SqlServer if self.identity_insert => {
                identity_insert(&self.target, &merge)
            }
            // SQL Server requires MERGE to be terminated.
            Dialect::SqlServer => format!("{merge};"),
            Dialect::Postgres => merge,
        };

        MergeStatement { sql, output }
    }
}

/// Builder for an `UPDATE` of a target table joined to the staging table.
#[derive(Debug, Clone)]
pub struct JoinedUpdate {
    target: String,
    staging: String,
    on: String,
    columns: Vec<String>,
}

impl JoinedUpdate {
    /// Update `target` from `staging` (both quoted) where `on` holds.
    pub fn new(target: impl Into<String>, staging: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            staging: staging.into(),
            on: on.into(),
            columns: Vec::new(),
        }
    }

    /// Columns copied from the staging row.
    pub fn set<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Build the statement for a dialect.
    pub fn build(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::SqlServer => {
                let set: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| {
                        let q = dialect.quote_identifier(c);
                        format!("{TARGET_ALIAS}.{q} = {STAGING_ALIAS}.{q}")
                    })
                    .collect();
                format!(
                    "UPDATE {TARGET_ALIAS} SET {} FROM {} AS {STAGING_ALIAS} JOIN {} AS {TARGET_ALIAS} ON {}",
                    set.join(", "),
                    self.staging,
                    self.target,
                    self.on
                )
            }
            Dialect::Postgres => {
                let set: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| {
                        let q = dialect.quote_identifier(c);
                        format!("{q} = {STAGING_ALIAS}.{q}")
                    })
                    .collect();
                format!(
                    "UPDATE {} AS {TARGET_ALIAS} SET {} FROM {} AS {STAGING_ALIAS} WHERE {}",
                    self.target,
                    set.join(", "),
                    self.staging,
                    self.on
                )
            }
        }
    }
}

/// Build a `DELETE` of target rows that match a staged row.
pub fn joined_delete(dialect: Dialect, target: &str, staging: &str, on: &str) -> String {
    match dialect {
        Dialect::SqlServer => format!(
            "DELETE {TARGET_ALIAS} FROM {target} AS {TARGET_ALIAS} JOIN {staging} AS {STAGING_ALIAS} ON {on}"
        ),
        Dialect::Postgres => format!(
            "DELETE FROM {target} AS {TARGET_ALIAS} USING {staging} AS {STAGING_ALIAS} WHERE {on}"
        ),
    }
}

/// Builder that copies store-generated key values back into staged rows,
/// matched on the correlation column.
///
/// Parameters are bound per row: the correlation id, then each key in order.
#[derive(Debug, Clone)]
pub struct PropagateKeys {
    staging: String,
    correlation: String,
    keys: Vec<(String, Option<String>)>,
    rows: usize,
}

impl PropagateKeys {
    /// Update `staging` (quoted) rows identified by `correlation`.
    pub fn new(staging: impl Into<String>, correlation: impl Into<String>) -> Self {
        Self {
            staging: staging.into(),
            correlation: correlation.into(),
            keys: Vec::new(),
            rows: 0,
        }
    }

    /// Add a key column, with the store type to cast parameters to where known.
    pub fn key(mut self, column: impl Into<String>, store_type: Option<&str>) -> Self {
        self.keys.push((column.into(), store_type.map(str::to_string)));
        self
    }

    /// Number of value rows.
    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Number of bind parameters the statement expects.
    pub fn param_count(&self) -> usize {
        (self.keys.len() + 1) * self.rows
    }

    /// Build the statement for a dialect.
    pub fn build(&self, dialect: Dialect) -> String {
        let width = self.keys.len() + 1;
        let types: Vec<Option<&str>> = std::iter::once(Some(dialect.correlation_type()))
            .chain(self.keys.iter().map(|(_, ty)| ty.as_deref()))
            .collect();

        let tuples: Vec<String> = (0..self.rows)
            .map(|row| {
                let values: Vec<String> = types
                    .iter()
                    .enumerate()
                    .map(|(col, ty)| {
                        let placeholder = dialect.placeholder(row * width + col + 1);
                        match (dialect, ty) {
                            (Dialect::Postgres, Some(ty)) => format!("CAST({placeholder} AS {ty})"),
                            _ => placeholder,
                        }
                    })
                    .collect();
                format!("({})", values.join(", "))
            })
            .collect();

        let correlation = dialect.quote_identifier(&self.correlation);
        let names: Vec<String> = std::iter::once(correlation.clone())
            .chain(self.keys.iter().map(|(c, _)| dialect.quote_identifier(c)))
            .collect();

        match dialect {
            Dialect::SqlServer => {
                let set: Vec<String> = self
                    .keys
                    .iter()
                    .map(|(c, _)| {
                        let q = dialect.quote_identifier(c);
                        format!("{STAGING_ALIAS}.{q} = v.{q}")
                    })
                    .collect();
                format!(
                    "UPDATE {STAGING_ALIAS} SET {} FROM {} AS {STAGING_ALIAS} JOIN (VALUES {}) AS v({}) ON {STAGING_ALIAS}.{correlation} = v.{correlation}",
                    set.join(", "),
                    self.staging,
                    tuples.join(", "),
                    names.join(", ")
                )
            }
            Dialect::Postgres => {
                let set: Vec<String> = self
                    .keys
                    .iter()
                    .map(|(c, _)| {
                        let q = dialect.quote_identifier(c);
                        format!("{q} = v.{q}")
                    })
                    .collect();
                format!(
                    "UPDATE {} AS {STAGING_ALIAS} SET {} FROM (VALUES {}) AS v({}) WHERE {STAGING_ALIAS}.{correlation} = v.{correlation}",
                    self.staging,
                    set.join(", "),
                    tuples.join(", "),
                    names.join(", ")
                )
            }
        }
    }
}
