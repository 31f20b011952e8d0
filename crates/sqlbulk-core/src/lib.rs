//! Core types and traits for sqlbulk.
//!
//! - `Connection` trait the bulk pipeline executes statements through
//! - `Dialect` for placeholder, quoting and statement-limit rules
//! - `TableMapping` catalog describing how entities map onto tables
//! - `BulkEntity` trait for records that can be staged and written back
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome};

pub mod connection;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod row;
pub mod value;

pub use connection::Connection;
pub use dialect::Dialect;
pub use entity::BulkEntity;
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, InvariantError, OperationKind,
    QueryError, QueryErrorKind, Result, TypeError, ValidationError,
};
pub use mapping::{
    ColumnMapping, EntityTypeLevel, MappingCatalog, StaticCatalog, TableMapping, ValueGenerated,
};
pub use row::{ColumnInfo, Row};
pub use value::Value;
