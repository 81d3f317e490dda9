use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;

use crate::capabilities::CapabilitySet;
use crate::config::TargetSettings;
use crate::error::SqlConduitError;
use crate::results::ResultSet;
use crate::transaction::IsolationLevel;
use crate::value::SqlValue;

/// What a DML statement reported back to the session layer.
#[derive(Debug, Clone, Default)]
pub struct DmlOutcome {
    /// Rows the engine says were affected
    pub rows_affected: u64,
    /// Generated key, where the engine reports one (e.g. sqlite rowid)
    pub last_insert_id: Option<i64>,
    /// Rows produced by a RETURNING clause, when present
    pub returned: ResultSet,
}

/// One live engine session. Exactly one logical operation drives a session
/// at a time; the pool and transaction layers enforce that with ownership.
#[async_trait]
pub trait DialectSession: Send {
    /// Executes a single SELECT statement and returns the result set.
    async fn execute_select(&mut self, sql: &str) -> Result<ResultSet, SqlConduitError>;

    /// Executes a single DML statement (INSERT, UPDATE, DELETE, etc.).
    async fn execute_dml(&mut self, sql: &str) -> Result<DmlOutcome, SqlConduitError>;

    /// Executes a batch of statements separated by semicolons. No results.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlConduitError>;

    /// Cheap health probe used on checkout.
    async fn ping(&mut self) -> Result<(), SqlConduitError>;
}

/// Factory for sessions against one configured target.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DialectSession>, SqlConduitError>;
}

/// A named engine binding: capabilities, a session connector factory, and
/// the statement rendering the engine-neutral core needs (literal quoting,
/// transaction control).
pub trait Dialect: Send + Sync {
    /// Unique registry key, e.g. `"postgres"`.
    fn name(&self) -> &'static str;

    /// Feature flags for SQL-generation layers.
    fn capabilities(&self) -> &CapabilitySet;

    /// Build a connector for one target. Fails if the target settings are
    /// unusable for this engine.
    fn connector(
        &self,
        target: &TargetSettings,
    ) -> Result<Arc<dyn SessionConnector>, SqlConduitError>;

    /// Render a value as a SQL literal for client-side substitution.
    fn quote_literal(&self, value: &SqlValue) -> String {
        default_quote_literal(value)
    }

    /// Statement that opens a transaction at the given isolation level.
    fn begin_sql(&self, isolation: Option<IsolationLevel>) -> String {
        match isolation {
            Some(level) => format!("START TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
            None => "BEGIN".to_string(),
        }
    }

    /// Statement toggling session autocommit, for engines that expose it.
    /// `None` (the default) means the engine manages autocommit implicitly
    /// and the transaction layer skips the toggle.
    fn autocommit_sql(&self, enabled: bool) -> Option<String> {
        let _ = enabled;
        None
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Query returning one row/one column with the engine version string.
    fn version_sql(&self) -> &'static str;
}

impl std::fmt::Debug for dyn Dialect + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialect").field("name", &self.name()).finish()
    }
}

/// Literal rendering shared by dialects that follow standard SQL quoting.
/// Engines with their own spellings (bytea, bit booleans) override
/// `quote_literal` instead.
#[must_use]
pub fn default_quote_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => quote_text(s),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        SqlValue::Json(j) => quote_text(&j.to_string()),
        SqlValue::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for byte in bytes {
                hex.push_str(&format!("{byte:02X}"));
            }
            hex.push('\'');
            hex
        }
        SqlValue::Null => "NULL".to_string(),
    }
}

/// Single-quote a string, doubling embedded quotes.
#[must_use]
pub fn quote_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// The dialects compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BuiltinDialect {
    /// `PostgreSQL` via tokio-postgres
    #[cfg(feature = "postgres")]
    Postgres,
    /// `SQLite` via rusqlite
    #[cfg(feature = "sqlite")]
    Sqlite,
}

impl BuiltinDialect {
    #[must_use]
    pub fn as_name(self) -> &'static str {
        match self {
            #[cfg(feature = "postgres")]
            BuiltinDialect::Postgres => "postgres",
            #[cfg(feature = "sqlite")]
            BuiltinDialect::Sqlite => "sqlite",
        }
    }
}

/// Explicit name-to-dialect mapping, populated at startup.
///
/// Lookups go through [`DialectRegistry::resolve`]; there is no dynamic
/// loading. Repeated resolves for one name hand back the same `Arc`.
#[derive(Clone, Default)]
pub struct DialectRegistry {
    entries: HashMap<&'static str, Arc<dyn Dialect>>,
}

impl std::fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialectRegistry")
            .field("dialects", &self.names())
            .finish()
    }
}

impl DialectRegistry {
    /// A registry with nothing in it; useful for fully custom stacks.
    #[must_use]
    pub fn empty() -> Self {
        DialectRegistry {
            entries: HashMap::new(),
        }
    }

    /// A registry holding every dialect enabled by Cargo features.
    #[must_use]
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDialect::new()));
        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDialect::new()));
        registry
    }

    /// Register a dialect under its own name, replacing any previous entry.
    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        self.entries.insert(dialect.name(), dialect);
    }

    /// Look up a dialect by name. `postgresql` is accepted as an alias for
    /// `postgres`.
    ///
    /// # Errors
    ///
    /// `Configuration` naming the requested dialect when nothing is
    /// registered under it.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Dialect>, SqlConduitError> {
        let canonical = canonical_name(name);
        self.entries.get(canonical).cloned().ok_or_else(|| {
            let mut known = self.names();
            known.sort_unstable();
            SqlConduitError::configuration(format!(
                "no dialect registered under {name:?}: not compiled in or never registered (known: {})",
                known.join(", ")
            ))
        })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

fn canonical_name(name: &str) -> &str {
    if name == "postgresql" { "postgres" } else { name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityValue;
    use crate::capabilities::feature;

    struct FakeDialect {
        caps: CapabilitySet,
    }

    impl Dialect for FakeDialect {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn capabilities(&self) -> &CapabilitySet {
            &self.caps
        }

        fn connector(
            &self,
            _target: &TargetSettings,
        ) -> Result<Arc<dyn SessionConnector>, SqlConduitError> {
            Err(SqlConduitError::Unimplemented("fake dialect".into()))
        }

        fn version_sql(&self) -> &'static str {
            "SELECT 'fake'"
        }
    }

    fn registry_with_fake() -> DialectRegistry {
        let mut registry = DialectRegistry::empty();
        registry.register(Arc::new(FakeDialect {
            caps: CapabilitySet::with_overrides(&[(
                feature::RETURNING,
                CapabilityValue::Keyword("RETURNING"),
            )]),
        }));
        registry
    }

    #[test]
    fn unknown_name_is_a_configuration_error_naming_the_dialect() {
        let registry = registry_with_fake();
        let err = registry.resolve("oracle").unwrap_err();
        match err {
            SqlConduitError::Configuration { message } => {
                assert!(message.contains("oracle"), "{message}");
                assert!(message.contains("fake"), "{message}");
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn repeated_resolve_returns_the_same_instance() {
        let registry = registry_with_fake();
        let a = registry.resolve("fake").unwrap();
        let b = registry.resolve("fake").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            a.capabilities().supports(feature::RETURNING),
            b.capabilities().supports(feature::RETURNING)
        );
    }

    #[test]
    fn postgresql_alias_maps_to_postgres() {
        assert_eq!(canonical_name("postgresql"), "postgres");
        assert_eq!(canonical_name("sqlite"), "sqlite");
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_text("o'brien"), "'o''brien'");
        assert_eq!(
            default_quote_literal(&SqlValue::Text("it's".into())),
            "'it''s'"
        );
        assert_eq!(default_quote_literal(&SqlValue::Null), "NULL");
        assert_eq!(default_quote_literal(&SqlValue::Bool(true)), "TRUE");
        assert_eq!(
            default_quote_literal(&SqlValue::Blob(vec![0xde, 0xad])),
            "X'DEAD'"
        );
    }
}
