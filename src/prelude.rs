//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::binding::Replacements;
pub use crate::config::{Configuration, QueryLogging};
pub use crate::database::Database;
pub use crate::dialect::{BuiltinDialect, Dialect, DialectRegistry};
pub use crate::entities::{DropOptions, DropOrder, SchemaEntity, SqlEntity, SyncOptions};
pub use crate::error::SqlConduitError;
pub use crate::executor::{QueryKind, QueryOptions, QueryOutput};
pub use crate::pool::AccessIntent;
pub use crate::results::{DbRow, ResultSet};
pub use crate::transaction::{
    IsolationLevel, Transaction, TransactionOptions, TransactionState,
};
pub use crate::value::SqlValue;

#[cfg(feature = "postgres")]
pub use crate::exports::PostgresDialect;

#[cfg(feature = "sqlite")]
pub use crate::exports::SqliteDialect;
