use thiserror::Error;

use crate::transaction::TransactionState;

/// Crate-wide error type.
///
/// Driver errors pass through transparently behind their feature gates;
/// everything else maps onto one of the runtime's own failure kinds.
#[derive(Debug, Error)]
pub enum SqlConduitError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Unknown dialect, malformed URI, or invalid settings. Fatal at
    /// construction time, never retried.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Session plumbing failed outside the engine protocol itself
    /// (worker thread gone, connect refused, pool closed).
    #[error("connection error: {0}")]
    Connection(String),

    /// Checkout timed out with every pooled session busy. Callers may retry.
    #[error("connection pool for the {target} target exhausted after {waited_ms}ms")]
    PoolExhausted { target: &'static str, waited_ms: u64 },

    /// Malformed replacement usage. Always a caller bug.
    #[error("replacement binding error: {0}")]
    Bind(String),

    /// The engine rejected a statement. Carries the rendered SQL so the
    /// caller sees exactly what was sent.
    #[error("query failed: {message} (sql: {sql})")]
    Query { sql: String, message: String },

    /// Commit or rollback was called outside the one state that allows it.
    #[error("transaction is {actual}, expected {expected}")]
    TransactionState {
        actual: TransactionState,
        expected: TransactionState,
    },

    /// The authentication round trip failed for any reason.
    #[error("authentication failed: {0}")]
    Authentication(#[source] Box<SqlConduitError>),

    /// Bulk sync/drop stopped at this entity.
    #[error("schema operation failed for entity {entity}: {source}")]
    SchemaSync {
        entity: String,
        source: Box<SqlConduitError>,
    },

    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

impl SqlConduitError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SqlConduitError::Configuration {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        SqlConduitError::Connection(message.into())
    }

    pub fn bind(message: impl Into<String>) -> Self {
        SqlConduitError::Bind(message.into())
    }

    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        SqlConduitError::Query {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Whether waiting and trying again can plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SqlConduitError::PoolExhausted { .. })
    }
}
