//! Entity-to-table mapping catalog.
//!
//! A [`TableMapping`] describes how one entity type is stored: an ordered list of
//! [`EntityTypeLevel`]s, root first, one per table of an inheritance hierarchy.
//! Mappings are pre-computed, shared read-only through a [`MappingCatalog`], and
//! outlive every bulk operation that reads them.

use crate::Result;
use crate::dialect::Dialect;
use crate::error::Error;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// When the store generates a column's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueGenerated {
    /// Always supplied by the caller.
    #[default]
    Never,
    /// Generated on insert (identity, sequence default).
    OnAdd,
    /// Generated on insert and update (computed, rowversion).
    OnAddOrUpdate,
}

impl ValueGenerated {
    /// Is the value produced by the store at all?
    pub const fn is_generated(self) -> bool {
        !matches!(self, ValueGenerated::Never)
    }
}

/// Mapping of one entity property to one table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// In-memory property name, as reported by `BulkEntity::to_row`
    pub property: String,
    /// Column name in the table
    pub column: String,
    /// Part of the primary key
    pub primary_key: bool,
    /// Identity column at this level
    pub identity: bool,
    /// Store value generation
    pub value_generated: ValueGenerated,
    /// Store type name, used where a dialect needs an explicit cast
    pub store_type: Option<String>,
}

impl ColumnMapping {
    /// Map a property to a column with no special behavior.
    pub fn new(property: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            column: column.into(),
            primary_key: false,
            identity: false,
            value_generated: ValueGenerated::Never,
            store_type: None,
        }
    }

    /// Mark this column as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark this column as an identity column (generated on insert).
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.value_generated = ValueGenerated::OnAdd;
        self
    }

    /// Set the store value generation.
    pub fn generated(mut self, kind: ValueGenerated) -> Self {
        self.value_generated = kind;
        self
    }

    /// Set the store type name.
    pub fn store_type(mut self, store_type: impl Into<String>) -> Self {
        self.store_type = Some(store_type.into());
        self
    }

    /// Can a caller-supplied value be written to this column on insert?
    pub fn is_insertable(&self, keep_identity: bool) -> bool {
        match self.value_generated {
            ValueGenerated::Never => true,
            ValueGenerated::OnAdd => keep_identity && self.identity,
            ValueGenerated::OnAddOrUpdate => false,
        }
    }

    /// Does a filter entry name this column (by property or column name)?
    pub fn matches_name(&self, name: &str) -> bool {
        self.property == name || self.column == name
    }
}

/// One physical table of an entity's inheritance hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeLevel {
    /// Name of the entity type this level belongs to
    pub entity: String,
    /// Schema of the table, if qualified
    pub schema: Option<String>,
    /// Table name
    pub table: String,
    /// Column mappings in table order
    pub columns: Vec<ColumnMapping>,
}

impl EntityTypeLevel {
    /// Create a level for a table.
    pub fn new(entity: impl Into<String>, schema: Option<&str>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            schema: schema.map(str::to_string),
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column mapping.
    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.columns.push(column);
        self
    }

    /// Quoted, schema-qualified table name.
    pub fn qualified_name(&self, dialect: Dialect) -> String {
        dialect.qualify(self.schema.as_deref(), &self.table)
    }

    /// Column names in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.column.as_str())
    }

    /// Find a column mapping by column name.
    pub fn find_column(&self, column: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.column == column)
    }

    /// Does this table have an identity column?
    pub fn has_identity_column(&self) -> bool {
        self.columns.iter().any(|c| c.identity)
    }

    /// Store-generated columns: generated-on-add first, then generated-on-add-or-update.
    pub fn generated_columns(&self) -> Vec<&ColumnMapping> {
        self.columns
            .iter()
            .filter(|c| c.value_generated == ValueGenerated::OnAdd)
            .chain(
                self.columns
                    .iter()
                    .filter(|c| c.value_generated == ValueGenerated::OnAddOrUpdate),
            )
            .collect()
    }
}

/// Complete mapping of an entity type onto one or more tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    entity: String,
    levels: Vec<EntityTypeLevel>,
}

impl TableMapping {
    /// Start a mapping for an entity type.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            levels: Vec::new(),
        }
    }

    /// Append an inheritance level. The first level added is the root.
    pub fn level(mut self, level: EntityTypeLevel) -> Self {
        self.levels.push(level);
        self
    }

    /// Check the mapping's structural invariants.
    ///
    /// - at least one level
    /// - no level repeats a column name
    /// - the root's primary key appears on every level of a hierarchy, and on
    ///   no level is any other column a key
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(Error::config(format!(
                "entity '{}' is not mapped to any table",
                self.entity
            )));
        }

        for level in &self.levels {
            let mut seen = HashSet::new();
            for column in &level.columns {
                if !seen.insert(column.column.as_str()) {
                    return Err(Error::config(format!(
                        "table '{}' maps column '{}' more than once",
                        level.table, column.column
                    )));
                }
            }
        }

        let keys = self.primary_key_columns();
        for key in &keys {
            if let Some(level) = self.levels.iter().find(|l| l.find_column(key).is_none()) {
                return Err(Error::config(format!(
                    "primary key column '{}' of entity '{}' is missing from table '{}'",
                    key, self.entity, level.table
                )));
            }
        }

        // Every level is matched and joined on the root key.
        for level in self.levels.iter().skip(1) {
            if let Some(column) = level
                .columns
                .iter()
                .find(|c| c.primary_key && !keys.contains(&c.column.as_str()))
            {
                return Err(Error::config(format!(
                    "table '{}' is keyed on '{}', which is not a primary key column of '{}'",
                    level.table, column.column, self.root().table
                )));
            }
        }

        Ok(())
    }

    /// Entity type name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Levels in root-first order.
    pub fn levels(&self) -> &[EntityTypeLevel] {
        &self.levels
    }

    /// The root (base) level.
    ///
    /// # Panics
    ///
    /// Panics if the mapping has no levels; [`TableMapping::validate`] rejects those.
    pub fn root(&self) -> &EntityTypeLevel {
        &self.levels[0]
    }

    /// Is `level` the root of the hierarchy?
    pub fn is_root(&self, level: &EntityTypeLevel) -> bool {
        self.levels.first().is_some_and(|root| root == level)
    }

    /// Does this entity span more than one table?
    pub fn is_hierarchy(&self) -> bool {
        self.levels.len() > 1
    }

    /// Primary key column names, taken from the root level.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.levels
            .first()
            .map(|root| {
                root.columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.column.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Does the entity have a primary key?
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key_columns().is_empty()
    }

    /// Is the primary key generated by the store at the root level?
    pub fn has_generated_key(&self) -> bool {
        self.levels.first().is_some_and(|root| {
            root.columns
                .iter()
                .any(|c| c.primary_key && c.value_generated.is_generated())
        })
    }

    /// Does any level have an identity column?
    pub fn has_identity_column(&self) -> bool {
        self.levels.iter().any(EntityTypeLevel::has_identity_column)
    }

    /// Every distinct column across all levels, root first.
    ///
    /// When several levels share a column name (the key of a joined hierarchy),
    /// the first level's mapping wins.
    pub fn distinct_columns(&self) -> Vec<(usize, &ColumnMapping)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (index, level) in self.levels.iter().enumerate() {
            for column in &level.columns {
                if seen.insert(column.column.as_str()) {
                    out.push((index, column));
                }
            }
        }
        out
    }

    /// Quoted, schema-qualified names of every level's table.
    pub fn schema_qualified_table_names(&self, dialect: Dialect) -> Vec<String> {
        self.levels
            .iter()
            .map(|level| level.qualified_name(dialect))
            .collect()
    }
}

/// Read-only source of table mappings.
pub trait MappingCatalog: Send + Sync {
    /// Resolve an entity type name to its mapping.
    fn resolve(&self, entity: &str) -> Result<Arc<TableMapping>>;
}

/// A catalog backed by an in-memory map, populated up front.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    mappings: HashMap<String, Arc<TableMapping>>,
}

impl StaticCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a mapping, replacing any previous one for the entity.
    pub fn register(&mut self, mapping: TableMapping) -> Result<()> {
        mapping.validate()?;
        tracing::debug!(
            entity = %mapping.entity(),
            levels = mapping.levels().len(),
            "Registered table mapping"
        );
        self.mappings
            .insert(mapping.entity().to_string(), Arc::new(mapping));
        Ok(())
    }

    /// Builder-style [`StaticCatalog::register`].
    pub fn with(mut self, mapping: TableMapping) -> Result<Self> {
        self.register(mapping)?;
        Ok(self)
    }
}

impl MappingCatalog for StaticCatalog {
    fn resolve(&self, entity: &str) -> Result<Arc<TableMapping>> {
        self.mappings
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::config(format!("no table mapping for entity '{}'", entity)))
    }
}
