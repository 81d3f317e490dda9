//! Dialect type exports.
//!
//! This module contains the conditional feature exports for the built-in
//! database backends, keeping them organized in one place.

#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresDialect;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteDialect;

#[cfg(feature = "test-utils")]
pub use crate::test_utils::{MockDialect, MockHandle};
