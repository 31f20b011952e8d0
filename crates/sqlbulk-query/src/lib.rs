//! Set-based SQL statement generation for sqlbulk.
//!
//! `sqlbulk-query` is the **statement layer**. It turns table names, column sets
//! and a match condition into dialect SQL text for every step of a bulk operation:
//!
//! - **Staging**: clone target table shapes into a staging table, drop it afterwards.
//! - **Loading**: multi-row `INSERT ... VALUES` with identity override.
//! - **Merge**: conditional `MERGE` with a per-row output clause.
//! - **Update / delete**: statements joining the staging table to a target table.
//!
//! Nothing here touches a connection. The orchestrator in the `sqlbulk` crate
//! executes the generated text through `sqlbulk_core::Connection`.

pub mod condition;
pub mod statement;

pub use condition::MatchCondition;
pub use statement::{
    CreateStaging, InsertValues, JoinedUpdate, MergeBuilder, MergeStatement, NEVER_MATCH,
    OutputColumn, PropagateKeys, STAGING_ALIAS, TARGET_ALIAS, drop_table, joined_delete,
};
