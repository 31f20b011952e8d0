//! SQL dialects that support set-based merge with per-row output.

/// SQL dialect of the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// PostgreSQL 17+ (`MERGE ... RETURNING merge_action()`)
    #[default]
    Postgres,
    /// Microsoft SQL Server (`MERGE ... OUTPUT $action`)
    SqlServer,
}

impl Dialect {
    /// Dialect name used in log fields.
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::SqlServer => "sqlserver",
        }
    }

    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::SqlServer => format!("@P{index}"),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are escaped by doubling them:
    /// - Postgres: `"` becomes `""`
    /// - SQL Server: `]` becomes `]]`
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Quote a possibly schema-qualified table name.
    pub fn qualify(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) if !schema.is_empty() => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            _ => self.quote_identifier(table),
        }
    }

    /// Maximum number of bind parameters accepted in one statement.
    pub const fn max_params(self) -> usize {
        match self {
            Dialect::Postgres => 65_535,
            // 2100 minus headroom for driver-injected parameters
            Dialect::SqlServer => 2_000,
        }
    }

    /// Maximum number of row constructors in one `VALUES` list, if limited.
    pub const fn max_values_rows(self) -> Option<usize> {
        match self {
            Dialect::Postgres => None,
            Dialect::SqlServer => Some(1_000),
        }
    }

    /// Store type used for the synthetic correlation column.
    pub const fn correlation_type(self) -> &'static str {
        match self {
            Dialect::Postgres => "integer",
            Dialect::SqlServer => "int",
        }
    }

    /// Expression yielding the merge action tag of an output row.
    pub const fn merge_action_expr(self) -> &'static str {
        match self {
            Dialect::Postgres => "merge_action()",
            Dialect::SqlServer => "$action",
        }
    }
}
