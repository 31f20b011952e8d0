//! Join predicates between the staging table and a target table.

use crate::statement::{STAGING_ALIAS, TARGET_ALIAS};
use sqlbulk_core::{Dialect, Error, Result};

/// How staged rows are matched to target rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatchCondition {
    /// Equality on every primary key column (the default).
    #[default]
    PrimaryKey,
    /// Equality on the listed columns.
    Columns(Vec<String>),
    /// A predicate written against the staging alias `s` and target alias `t`.
    Raw(String),
}

impl MatchCondition {
    /// Match on equality of the given columns.
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MatchCondition::Columns(columns.into_iter().map(Into::into).collect())
    }

    /// Match on a raw predicate over `s` and `t`.
    pub fn raw(predicate: impl Into<String>) -> Self {
        MatchCondition::Raw(predicate.into())
    }

    /// Was this condition supplied by the caller, as opposed to the key default?
    pub fn is_explicit(&self) -> bool {
        !matches!(self, MatchCondition::PrimaryKey)
    }

    /// Columns this condition reads from the staging table, where known.
    ///
    /// A raw predicate's columns are opaque and reported as empty.
    pub fn referenced_columns<'a>(&'a self, primary_key: &[&'a str]) -> Vec<&'a str> {
        match self {
            MatchCondition::PrimaryKey => primary_key.to_vec(),
            MatchCondition::Columns(columns) => columns.iter().map(String::as_str).collect(),
            MatchCondition::Raw(_) => Vec::new(),
        }
    }

    /// Render the predicate as SQL, `t.<col> = s.<col>` joined by `AND`.
    #[allow(clippy::result_large_err)]
    pub fn render(&self, dialect: Dialect, primary_key: &[&str]) -> Result<String> {
        match self {
            MatchCondition::PrimaryKey => {
                if primary_key.is_empty() {
                    return Err(Error::config(
                        "cannot match on the primary key of an entity that has none",
                    ));
                }
                Ok(equality(dialect, primary_key.iter().copied()))
            }
            MatchCondition::Columns(columns) => {
                if columns.is_empty() {
                    return Err(Error::config("match condition names no columns"));
                }
                Ok(equality(dialect, columns.iter().map(String::as_str)))
            }
            MatchCondition::Raw(predicate) => {
                if predicate.trim().is_empty() {
                    return Err(Error::config("match condition is empty"));
                }
                Ok(predicate.clone())
            }
        }
    }
}

fn equality<'a>(dialect: Dialect, columns: impl Iterator<Item = &'a str>) -> String {
    columns
        .map(|column| {
            let quoted = dialect.quote_identifier(column);
            format!("{TARGET_ALIAS}.{quoted} = {STAGING_ALIAS}.{quoted}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_equality() {
        let sql = MatchCondition::PrimaryKey
            .render(Dialect::SqlServer, &["TenantId", "Id"])
            .unwrap();
        assert_eq!(sql, "t.[TenantId] = s.[TenantId] AND t.[Id] = s.[Id]");
    }

    #[test]
    fn primary_key_without_key_is_config_error() {
        let err = MatchCondition::PrimaryKey
            .render(Dialect::Postgres, &[])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn explicit_columns_and_raw() {
        let cond = MatchCondition::columns(["email"]);
        assert!(cond.is_explicit());
        assert_eq!(
            cond.render(Dialect::Postgres, &[]).unwrap(),
            "t.\"email\" = s.\"email\""
        );
        assert_eq!(cond.referenced_columns(&["id"]), vec!["email"]);

        let raw = MatchCondition::raw("lower(t.email) = lower(s.email)");
        assert_eq!(
            raw.render(Dialect::Postgres, &[]).unwrap(),
            "lower(t.email) = lower(s.email)"
        );
        assert!(raw.referenced_columns(&["id"]).is_empty());
        assert!(MatchCondition::raw("  ").render(Dialect::Postgres, &[]).is_err());
        assert!(MatchCondition::Columns(Vec::new()).render(Dialect::Postgres, &[]).is_err());
    }

    #[test]
    fn default_is_primary_key() {
        assert_eq!(MatchCondition::default(), MatchCondition::PrimaryKey);
        assert!(!MatchCondition::default().is_explicit());
    }
}
