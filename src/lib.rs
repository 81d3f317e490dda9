mod binding;
mod capabilities;
mod config;
mod database;
mod dialect;
mod entities;
mod error;
mod executor;
mod pool;
mod results;
mod transaction;
mod value;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub mod exports;
pub mod prelude;

pub use binding::{Replacements, render_replacements};
pub use capabilities::{CapabilitySet, CapabilityValue, feature};
pub use config::{
    Configuration, PoolSettings, QueryLogging, ReplicationSettings, TargetSettings,
};
pub use database::Database;
pub use dialect::{
    BuiltinDialect, Dialect, DialectRegistry, DialectSession, DmlOutcome, SessionConnector,
};
pub use entities::{DropOptions, DropOrder, EntityManager, SchemaEntity, SqlEntity, SyncOptions};
pub use error::SqlConduitError;
pub use executor::{QueryKind, QueryOptions, QueryOutput, RawOutcome};
pub use pool::{
    AccessIntent, AcquireOptions, ConnectionManager, PoolStatus, PooledSession, SessionManager,
};
pub use results::{DbRow, ResultSet};
pub use transaction::{IsolationLevel, Transaction, TransactionOptions, TransactionState};
pub use value::SqlValue;
