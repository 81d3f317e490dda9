use std::sync::Arc;
use std::time::Instant;

use deadpool::managed::Object;
use tracing::warn;
use uuid::Uuid;

use crate::binding::Replacements;
use crate::config::QueryLogging;
use crate::dialect::Dialect;
use crate::error::SqlConduitError;
use crate::executor::{self, QueryOptions, QueryOutput};
use crate::pool::PooledSession;

/// Lifecycle of a [`Transaction`]. Control operations are legal only in
/// `Active`; anything else is reported, never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    Preparing,
    Active,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransactionState::Created => "created",
            TransactionState::Preparing => "preparing",
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    /// When false, and the dialect renders an autocommit toggle, the toggle
    /// is issued before BEGIN. Engines without one ignore this.
    pub autocommit: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            isolation: None,
            autocommit: true,
        }
    }
}

/// A transaction pinned to one session for its whole lifetime.
///
/// Every statement issued through [`Transaction::query`] runs on the pinned
/// session. Statement failures do not roll the transaction back; the caller
/// decides whether to continue, commit, or roll back.
pub struct Transaction {
    id: String,
    state: TransactionState,
    options: TransactionOptions,
    session: Option<PooledSession>,
    dialect: Arc<dyn Dialect>,
    logging: QueryLogging,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        session: PooledSession,
        dialect: Arc<dyn Dialect>,
        options: TransactionOptions,
        logging: QueryLogging,
    ) -> Self {
        Transaction {
            id: format!("tx_{}", Uuid::new_v4().simple()),
            state: TransactionState::Created,
            options,
            session: Some(session),
            dialect,
            logging,
        }
    }

    /// Issue the BEGIN statement (and the autocommit toggle where the
    /// dialect has one). On failure the pinned session is discarded rather
    /// than returned, since the server side may have half-opened a
    /// transaction.
    pub(crate) async fn begin(&mut self) -> Result<(), SqlConduitError> {
        self.state = TransactionState::Preparing;
        match self.begin_statements().await {
            Ok(()) => {
                self.state = TransactionState::Active;
                Ok(())
            }
            Err(err) => {
                if let Some(session) = self.session.take() {
                    drop(Object::take(session));
                }
                Err(err)
            }
        }
    }

    async fn begin_statements(&mut self) -> Result<(), SqlConduitError> {
        if !self.options.autocommit {
            if let Some(toggle) = self.dialect.autocommit_sql(false) {
                self.run_control(&toggle).await?;
            }
        }
        let begin = self.dialect.begin_sql(self.options.isolation);
        self.run_control(&begin).await
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Execute one statement on the pinned session.
    ///
    /// # Errors
    ///
    /// `TransactionState` unless the transaction is `Active`. Statement
    /// failures surface as-is and leave the transaction `Active`.
    pub async fn query(
        &mut self,
        sql: &str,
        replacements: Replacements,
        options: QueryOptions,
    ) -> Result<QueryOutput, SqlConduitError> {
        self.expect_active()?;
        let Some(session) = self.session.as_mut() else {
            return Err(SqlConduitError::connection(
                "transaction session already released",
            ));
        };
        executor::run_query(
            &mut ***session,
            self.dialect.as_ref(),
            sql,
            &replacements,
            &options,
            &self.logging,
            &self.id,
        )
        .await
    }

    /// Commit and release the pinned session.
    ///
    /// The session is released and the state becomes `Committed` even when
    /// the COMMIT statement itself fails; the failure is still returned.
    ///
    /// # Errors
    ///
    /// `TransactionState` unless the transaction is `Active`.
    pub async fn commit(&mut self) -> Result<(), SqlConduitError> {
        self.finish(TransactionState::Committed, self.dialect.commit_sql())
            .await
    }

    /// Roll back and release the pinned session.
    ///
    /// # Errors
    ///
    /// `TransactionState` unless the transaction is `Active`.
    pub async fn rollback(&mut self) -> Result<(), SqlConduitError> {
        self.finish(TransactionState::RolledBack, self.dialect.rollback_sql())
            .await
    }

    async fn finish(
        &mut self,
        terminal: TransactionState,
        sql: &str,
    ) -> Result<(), SqlConduitError> {
        self.expect_active()?;
        let result = self.run_control(sql).await;
        // Terminal either way: the session goes back to the pool exactly
        // once, and a failed control statement cannot be retried.
        self.state = terminal;
        self.session = None;
        result
    }

    async fn run_control(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        let started = Instant::now();
        let Some(session) = self.session.as_mut() else {
            return Err(SqlConduitError::connection(
                "transaction session already released",
            ));
        };
        let result = session.execute_batch(sql).await;
        self.logging.emit(&format!(
            "Executed ({}): {} ({}ms)",
            self.id,
            sql,
            started.elapsed().as_millis()
        ));
        result
    }

    fn expect_active(&self) -> Result<(), SqlConduitError> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(SqlConduitError::TransactionState {
                actual: self.state,
                expected: TransactionState::Active,
            })
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if self.state != TransactionState::Active {
            // Never issued BEGIN successfully; the session is clean and
            // drops straight back into the pool.
            return;
        }
        warn!(
            transaction = %self.id,
            "transaction dropped while active, rolling back in the background"
        );
        let rollback = self.dialect.rollback_sql().to_string();
        let mut detached = Object::take(session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = detached.execute_batch(&rollback).await {
                        warn!(%error, "rollback of a dropped transaction failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    transaction = %self.id,
                    "no runtime to roll back on; discarding the session"
                );
            }
        }
    }
}
