use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::binding::Replacements;
use crate::config::Configuration;
use crate::dialect::{Dialect, DialectRegistry};
use crate::entities::{DropOptions, EntityManager, SchemaEntity, SyncOptions};
use crate::error::SqlConduitError;
use crate::executor::{self, QueryKind, QueryOptions, QueryOutput};
use crate::pool::{AcquireOptions, ConnectionManager, PoolStatus};
use crate::transaction::{Transaction, TransactionOptions, TransactionState};
use crate::value::SqlValue;

const AUTH_PROBE_SQL: &str = "SELECT 1+1 AS result";

/// The facade. Owns the configuration, the resolved dialect, the entity
/// registry, and (lazily) the connection manager.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct Database {
    config: Configuration,
    dialect: Arc<dyn Dialect>,
    entities: EntityManager,
    manager: OnceCell<ConnectionManager>,
    query_gate: Option<Arc<Semaphore>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect.name())
            .field("database", &self.config.target.database)
            .finish()
    }
}

impl Database {
    /// Validate the configuration and resolve the dialect from the builtin
    /// registry. No connection is opened until the first operation needs
    /// one.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unknown dialect or invalid settings.
    pub fn new(config: Configuration) -> Result<Self, SqlConduitError> {
        Self::with_registry(config, &DialectRegistry::builtin())
    }

    /// As [`Database::new`], resolving the dialect from a caller-supplied
    /// registry instead of the builtin one.
    pub fn with_registry(
        config: Configuration,
        registry: &DialectRegistry,
    ) -> Result<Self, SqlConduitError> {
        config.validate()?;
        let dialect = registry.resolve(&config.dialect)?;
        info!(
            dialect = dialect.name(),
            database = %config.target.database,
            "database facade ready"
        );
        Ok(Database {
            entities: EntityManager::new(config.drop_order),
            query_gate: config
                .max_concurrent_queries
                .map(|limit| Arc::new(Semaphore::new(limit))),
            manager: OnceCell::new(),
            closed: AtomicBool::new(false),
            dialect,
            config,
        })
    }

    /// Construct from a connection URI,
    /// `scheme://[user[:password]@]host[:port]/database`. For overrides
    /// beyond what the URI carries, build a [`Configuration::from_uri`] and
    /// chain its builder methods before calling [`Database::new`].
    ///
    /// # Errors
    ///
    /// `Configuration` for a malformed URI or unknown scheme.
    pub fn from_uri(uri: &str) -> Result<Self, SqlConduitError> {
        Self::new(Configuration::from_uri(uri)?)
    }

    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    #[must_use]
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    #[must_use]
    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    /// Register an entity with the schema registry.
    pub fn define(&self, entity: Arc<dyn SchemaEntity>) {
        self.entities.define(entity);
    }

    /// The connection manager, built on first use. Concurrent first callers
    /// race on one initialization, never two.
    async fn manager(&self) -> Result<&ConnectionManager, SqlConduitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlConduitError::connection("database handle is closed"));
        }
        self.manager
            .get_or_try_init(|| async { ConnectionManager::new(self.dialect.as_ref(), &self.config) })
            .await
    }

    async fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, SqlConduitError> {
        match &self.query_gate {
            Some(gate) => Arc::clone(gate)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| SqlConduitError::connection("query admission gate closed")),
            None => Ok(None),
        }
    }

    /// Execute one statement on a pool session and shape the result.
    ///
    /// The session is checked out for just this call and returned on both
    /// success and failure paths. For statements that must share a session,
    /// use [`Database::transaction`].
    ///
    /// # Errors
    ///
    /// `Bind` for malformed replacements, `Query` for engine rejections,
    /// `PoolExhausted` when no session frees up in time.
    pub async fn query(
        &self,
        sql: &str,
        replacements: Replacements,
        options: QueryOptions,
    ) -> Result<QueryOutput, SqlConduitError> {
        let _permit = self.admit().await?;
        let manager = self.manager().await?;
        let mut session = manager
            .acquire(AcquireOptions {
                intent: options.intent,
                use_primary: options.use_primary,
            })
            .await?;
        executor::run_query(
            &mut **session,
            self.dialect.as_ref(),
            sql,
            &replacements,
            &options,
            &self.config.logging,
            "default",
        )
        .await
    }

    /// Open a transaction: checkout from the write target, pin the session,
    /// issue BEGIN. The returned handle never commits or rolls back on its
    /// own; drive it explicitly.
    ///
    /// # Errors
    ///
    /// Checkout and BEGIN failures propagate; no handle escapes on failure.
    pub async fn transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Transaction, SqlConduitError> {
        let manager = self.manager().await?;
        let session = manager.acquire(AcquireOptions::write()).await?;
        let mut tx = Transaction::new(
            session,
            Arc::clone(&self.dialect),
            options,
            self.config.logging.clone(),
        );
        tx.begin().await?;
        Ok(tx)
    }

    /// Managed-transaction adapter: begin, run the closure, commit on `Ok`,
    /// roll back on `Err`. A closure that already committed or rolled back
    /// is left alone. Rollback failure is logged and never masks the
    /// closure's error.
    pub async fn with_transaction<T, F>(
        &self,
        options: TransactionOptions,
        f: F,
    ) -> Result<T, SqlConduitError>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T, SqlConduitError>,
    {
        let mut tx = self.transaction(options).await?;
        match f(&mut tx).await {
            Ok(value) => {
                if tx.state() == TransactionState::Active {
                    tx.commit().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if tx.state() == TransactionState::Active {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(
                            transaction = tx.id(),
                            error = %rollback_err,
                            "rollback after a failed transaction closure also failed"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Create every registered entity in dependency order. With
    /// `options.force`, drop them all first.
    ///
    /// # Errors
    ///
    /// `SchemaSync` naming the first entity that failed.
    pub async fn sync(&self, options: SyncOptions) -> Result<(), SqlConduitError> {
        self.entities.sync_all(self, &options).await
    }

    /// Drop every registered entity in the configured drop order.
    ///
    /// # Errors
    ///
    /// `SchemaSync` naming the first entity that failed.
    pub async fn drop_all(&self, options: DropOptions) -> Result<(), SqlConduitError> {
        self.entities.drop_all(self, &options).await
    }

    /// Round-trip probe. Any failure, from checkout to the probe statement,
    /// surfaces as `Authentication` wrapping the cause.
    pub async fn authenticate(&self) -> Result<(), SqlConduitError> {
        self.query(
            AUTH_PROBE_SQL,
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Select),
        )
        .await
        .map(|_| ())
        .map_err(|err| SqlConduitError::Authentication(Box::new(err)))
    }

    /// Engine version string, via the dialect's version query.
    ///
    /// # Errors
    ///
    /// `Query` when the engine rejects the probe or returns no usable row.
    pub async fn server_version(&self) -> Result<String, SqlConduitError> {
        let sql = self.dialect.version_sql();
        let output = self
            .query(
                sql,
                Replacements::None,
                QueryOptions::of_kind(QueryKind::Select),
            )
            .await?;
        output
            .rows()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get_by_index(0))
            .and_then(SqlValue::as_text)
            .map(str::to_string)
            .ok_or_else(|| SqlConduitError::query(sql, "version query returned no usable row"))
    }

    /// Write-pool counters, `None` until the first operation builds the
    /// connection manager.
    #[must_use]
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.manager.get().map(ConnectionManager::status)
    }

    /// Per-replica counters, in configuration order.
    #[must_use]
    pub fn read_pool_status(&self) -> Option<Vec<PoolStatus>> {
        self.manager.get().map(ConnectionManager::read_status)
    }

    /// Close every pool. In-flight sessions finish; new checkouts fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(manager) = self.manager.get() {
            manager.close();
        }
    }
}
