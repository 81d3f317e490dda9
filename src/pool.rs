use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use deadpool::Runtime;
use deadpool::managed::{self, Metrics, Object, Pool, PoolError, Timeouts};
use tracing::{info, warn};

use crate::config::{Configuration, PoolSettings, TargetSettings};
use crate::dialect::{Dialect, DialectSession, SessionConnector};
use crate::error::SqlConduitError;

/// A session checked out of a pool. Dropping it returns the session to its
/// origin pool; ownership makes double release unrepresentable.
pub type PooledSession = Object<SessionManager>;

/// deadpool manager that creates sessions through a dialect connector.
pub struct SessionManager {
    connector: Arc<dyn SessionConnector>,
    label: &'static str,
}

impl managed::Manager for SessionManager {
    type Type = Box<dyn DialectSession>;
    type Error = SqlConduitError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        tracing::debug!(target_pool = self.label, "opening new session");
        self.connector.connect().await
    }

    async fn recycle(
        &self,
        _session: &mut Self::Type,
        _metrics: &Metrics,
    ) -> managed::RecycleResult<Self::Error> {
        // Health checking happens on checkout where it can retry; see
        // TargetPool::checkout.
        Ok(())
    }
}

/// Point-in-time pool counters, mirrored from deadpool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Bounded pool of sessions to one physical endpoint.
pub struct TargetPool {
    pool: Pool<SessionManager>,
    label: &'static str,
    validate_on_checkout: bool,
    acquire_timeout_ms: u64,
}

impl std::fmt::Debug for TargetPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetPool")
            .field("label", &self.label)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl TargetPool {
    fn build(
        dialect: &dyn Dialect,
        target: &TargetSettings,
        settings: &PoolSettings,
        label: &'static str,
    ) -> Result<Self, SqlConduitError> {
        let connector = dialect.connector(target)?;
        let manager = SessionManager { connector, label };
        let pool = Pool::builder(manager)
            .max_size(settings.max_sessions_or_default())
            .timeouts(Timeouts {
                wait: Some(settings.acquire_timeout()),
                create: Some(settings.create_timeout()),
                recycle: Some(settings.acquire_timeout()),
            })
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                SqlConduitError::configuration(format!("failed to build {label} pool: {e}"))
            })?;
        Ok(TargetPool {
            pool,
            label,
            validate_on_checkout: settings.validate_on_checkout_or_default(),
            acquire_timeout_ms: u64::try_from(settings.acquire_timeout().as_millis())
                .unwrap_or(u64::MAX),
        })
    }

    /// Check a session out, waiting for a slot if the pool is at capacity.
    /// Waiters are served in arrival order.
    ///
    /// A session that fails its health ping is discarded (not returned to
    /// the pool) and checkout is retried once before the failure surfaces.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` after the acquire timeout; connector errors pass
    /// through.
    pub async fn checkout(&self) -> Result<PooledSession, SqlConduitError> {
        let mut session = self.get_unvalidated().await?;
        if !self.validate_on_checkout {
            return Ok(session);
        }
        match session.ping().await {
            Ok(()) => Ok(session),
            Err(first) => {
                warn!(
                    target_pool = self.label,
                    error = %first,
                    "discarding broken session on checkout, retrying once"
                );
                drop(Object::take(session));
                let mut retry = self.get_unvalidated().await?;
                if let Err(err) = retry.ping().await {
                    // Still broken: discard this one too, never re-pool it.
                    drop(Object::take(retry));
                    return Err(err);
                }
                Ok(retry)
            }
        }
    }

    async fn get_unvalidated(&self) -> Result<PooledSession, SqlConduitError> {
        self.pool.get().await.map_err(|err| match err {
            PoolError::Timeout(_) => SqlConduitError::PoolExhausted {
                target: self.label,
                waited_ms: self.acquire_timeout_ms,
            },
            PoolError::Backend(backend) => backend,
            other => {
                SqlConduitError::connection(format!("{} pool checkout failed: {other}", self.label))
            }
        })
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    pub fn close(&self) {
        self.pool.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Declared routing intent for a checkout. Defaults to the write target:
/// the manager does not classify statements, callers do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    #[default]
    Write,
}

/// Options for [`ConnectionManager::acquire`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    pub intent: AccessIntent,
    /// Route to the write target even when the intent is `Read`
    pub use_primary: bool,
}

impl AcquireOptions {
    #[must_use]
    pub fn read() -> Self {
        AcquireOptions {
            intent: AccessIntent::Read,
            use_primary: false,
        }
    }

    #[must_use]
    pub fn write() -> Self {
        AcquireOptions {
            intent: AccessIntent::Write,
            use_primary: false,
        }
    }
}

/// Brokers sessions to the write target and any read replicas.
///
/// Read-intent checkouts rotate across replicas round-robin; write intent
/// (the default) always lands on the write target.
pub struct ConnectionManager {
    write: TargetPool,
    read: Vec<TargetPool>,
    read_cursor: AtomicUsize,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("write", &self.write)
            .field("read_replicas", &self.read.len())
            .finish()
    }
}

impl ConnectionManager {
    /// Build pools for the write target and every configured replica.
    ///
    /// # Errors
    ///
    /// `Configuration` when a pool cannot be built; connector construction
    /// errors pass through.
    pub fn new(dialect: &dyn Dialect, config: &Configuration) -> Result<Self, SqlConduitError> {
        let write = TargetPool::build(dialect, &config.target, &config.pool, "write")?;
        let read = config
            .replication
            .read
            .iter()
            .map(|replica| {
                TargetPool::build(
                    dialect,
                    &replica.inheriting_from(&config.target),
                    &config.pool,
                    "read",
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            dialect = dialect.name(),
            max_sessions = config.pool.max_sessions_or_default(),
            read_replicas = read.len(),
            "connection manager ready"
        );
        Ok(ConnectionManager {
            write,
            read,
            read_cursor: AtomicUsize::new(0),
        })
    }

    /// Check a session out of the routed pool. Suspends until a session is
    /// free or the acquire timeout elapses.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` on timeout; broken-session and connector errors pass
    /// through after the single checkout retry.
    pub async fn acquire(&self, options: AcquireOptions) -> Result<PooledSession, SqlConduitError> {
        self.route(options).checkout().await
    }

    fn route(&self, options: AcquireOptions) -> &TargetPool {
        if options.use_primary || options.intent == AccessIntent::Write || self.read.is_empty() {
            &self.write
        } else {
            let idx = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read.len();
            &self.read[idx]
        }
    }

    /// Counters for the write pool.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.write.status()
    }

    /// Counters for each read replica pool, in configuration order.
    #[must_use]
    pub fn read_status(&self) -> Vec<PoolStatus> {
        self.read.iter().map(TargetPool::status).collect()
    }

    /// Close every pool. Outstanding sessions finish their work; new
    /// checkouts fail.
    pub fn close(&self) {
        self.write.close();
        for pool in &self.read {
            pool.close();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.write.is_closed()
    }
}
