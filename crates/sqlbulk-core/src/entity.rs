//! In-memory records that can be bulk-loaded.

use crate::Result;
use crate::value::Value;

/// A record type that bulk operations can stage and write back to.
///
/// Values are addressed by property name, the same name a
/// [`ColumnMapping`](crate::mapping::ColumnMapping) carries in `property`.
///
/// # Example
///
/// ```ignore
/// struct Person {
///     id: i64,
///     name: String,
/// }
///
/// impl BulkEntity for Person {
///     const ENTITY_NAME: &'static str = "Person";
///
///     fn to_row(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", Value::BigInt(self.id)), ("name", Value::from(self.name.as_str()))]
///     }
///
///     fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
///         match property {
///             "id" => self.id = value.try_into()?,
///             "name" => self.name = value.try_into()?,
///             _ => {}
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BulkEntity: Send + Sync {
    /// Name the entity is registered under in the mapping catalog.
    const ENTITY_NAME: &'static str;

    /// Current property values of this record.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Assign a store-generated value to a property.
    #[allow(clippy::result_large_err)]
    fn set_value(&mut self, property: &str, value: Value) -> Result<()>;

    /// Value of a single property, `None` if the record has no such property.
    fn value_of(&self, property: &str) -> Option<Value> {
        self.to_row()
            .into_iter()
            .find(|(name, _)| *name == property)
            .map(|(_, value)| value)
    }
}
