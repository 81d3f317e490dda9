use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::Value;
use tokio::sync::oneshot;

use crate::capabilities::{CapabilitySet, CapabilityValue, feature};
use crate::config::TargetSettings;
use crate::dialect::{Dialect, DialectSession, DmlOutcome, SessionConnector};
use crate::error::SqlConduitError;
use crate::results::ResultSet;
use crate::transaction::IsolationLevel;
use crate::value::SqlValue;

static NEXT_MEMORY_DB_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// SQLite dialect backed by `rusqlite`. The driver is synchronous, so each
/// session runs its `Connection` on a dedicated worker thread and talks to
/// it over channels.
pub struct SqliteDialect {
    capabilities: CapabilitySet,
}

impl SqliteDialect {
    #[must_use]
    pub fn new() -> Self {
        SqliteDialect {
            capabilities: CapabilitySet::with_overrides(&[
                (feature::RETURNING, CapabilityValue::Keyword("RETURNING")),
                (feature::DDL_TRANSACTIONS, CapabilityValue::Flag(true)),
                (feature::JSON, CapabilityValue::Flag(true)),
                (feature::ISOLATION_LEVELS, CapabilityValue::Flag(false)),
            ]),
        }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn connector(
        &self,
        target: &TargetSettings,
    ) -> Result<Arc<dyn SessionConnector>, SqlConduitError> {
        Ok(Arc::new(SqliteConnector::from_target(target)))
    }

    /// Every SQLite transaction is serializable; a requested level changes
    /// nothing.
    fn begin_sql(&self, _isolation: Option<IsolationLevel>) -> String {
        "BEGIN".to_string()
    }

    fn version_sql(&self) -> &'static str {
        "SELECT sqlite_version()"
    }
}

struct SqliteConnector {
    path: String,
    is_memory: bool,
}

impl SqliteConnector {
    fn from_target(target: &TargetSettings) -> SqliteConnector {
        let database = target.database.as_str();
        if database.is_empty() || database == ":memory:" {
            // A plain `:memory:` database is private to one connection, so
            // pooled sessions would each see their own empty database. A
            // shared-cache URI gives every session of this connector the
            // same in-memory database.
            let id = NEXT_MEMORY_DB_ID.fetch_add(1, Ordering::Relaxed);
            SqliteConnector {
                path: format!("file:sql_conduit_mem_{id}?mode=memory&cache=shared"),
                is_memory: true,
            }
        } else {
            SqliteConnector {
                path: database.to_string(),
                is_memory: false,
            }
        }
    }
}

#[async_trait]
impl SessionConnector for SqliteConnector {
    async fn connect(&self) -> Result<Box<dyn DialectSession>, SqlConduitError> {
        let (sender, receiver) = channel::<Command>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let path = self.path.clone();
        let is_memory = self.is_memory;
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);

        thread::Builder::new()
            .name(format!("sqlite-worker-{id}"))
            .spawn(move || run_worker(&path, is_memory, ready_tx, &receiver))
            .map_err(|err| {
                SqlConduitError::connection(format!("failed to spawn sqlite worker: {err}"))
            })?;

        ready_rx
            .await
            .map_err(|_| SqlConduitError::connection("sqlite worker exited before opening"))??;

        Ok(Box::new(SqliteSession {
            worker: SqliteWorker { sender },
        }))
    }
}

/// Requests handled by the worker thread. Each response channel carries the
/// result back to the async side.
enum Command {
    Select {
        sql: String,
        respond_to: oneshot::Sender<Result<ResultSet, SqlConduitError>>,
    },
    Dml {
        sql: String,
        respond_to: oneshot::Sender<Result<DmlOutcome, SqlConduitError>>,
    },
    Batch {
        sql: String,
        respond_to: oneshot::Sender<Result<(), SqlConduitError>>,
    },
    Ping {
        respond_to: oneshot::Sender<Result<(), SqlConduitError>>,
    },
    Shutdown,
}

struct SqliteWorker {
    sender: Sender<Command>,
}

impl SqliteWorker {
    fn send_command(&self, command: Command) -> Result<(), SqlConduitError> {
        self.sender
            .send(command)
            .map_err(|_| SqlConduitError::connection("sqlite worker is gone"))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, SqlConduitError>>) -> Command,
        drop_message: &'static str,
    ) -> Result<T, SqlConduitError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx))?;
        rx.await
            .map_err(|_| SqlConduitError::connection(drop_message))?
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

struct SqliteSession {
    worker: SqliteWorker,
}

#[async_trait]
impl DialectSession for SqliteSession {
    async fn execute_select(&mut self, sql: &str) -> Result<ResultSet, SqlConduitError> {
        let sql = sql.to_string();
        self.worker
            .request(
                |respond_to| Command::Select { sql, respond_to },
                "sqlite worker dropped select response",
            )
            .await
    }

    async fn execute_dml(&mut self, sql: &str) -> Result<DmlOutcome, SqlConduitError> {
        let sql = sql.to_string();
        self.worker
            .request(
                |respond_to| Command::Dml { sql, respond_to },
                "sqlite worker dropped statement response",
            )
            .await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        let sql = sql.to_string();
        self.worker
            .request(
                |respond_to| Command::Batch { sql, respond_to },
                "sqlite worker dropped batch response",
            )
            .await
    }

    async fn ping(&mut self) -> Result<(), SqlConduitError> {
        self.worker
            .request(
                |respond_to| Command::Ping { respond_to },
                "sqlite worker dropped ping response",
            )
            .await
    }
}

fn run_worker(
    path: &str,
    is_memory: bool,
    ready: oneshot::Sender<Result<(), SqlConduitError>>,
    receiver: &Receiver<Command>,
) {
    let conn = match open_connection(path, is_memory) {
        Ok(conn) => {
            let _ = ready.send(Ok(()));
            conn
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Select { sql, respond_to } => {
                let _ = respond_to.send(run_select(&conn, &sql));
            }
            Command::Dml { sql, respond_to } => {
                let _ = respond_to.send(run_dml(&conn, &sql));
            }
            Command::Batch { sql, respond_to } => {
                let _ = respond_to.send(conn.execute_batch(&sql).map_err(Into::into));
            }
            Command::Ping { respond_to } => {
                let _ = respond_to.send(run_ping(&conn));
            }
            Command::Shutdown => break,
        }
    }
}

fn open_connection(path: &str, is_memory: bool) -> Result<Connection, SqlConduitError> {
    let conn = Connection::open(path)?;
    if !is_memory {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
    }
    Ok(conn)
}

fn run_select(conn: &Connection, sql: &str) -> Result<ResultSet, SqlConduitError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();

    let mut result = ResultSet::default();
    result.set_columns(Arc::new(columns));

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(extract_value(row, idx)?);
        }
        result.add_row(values);
    }

    Ok(result)
}

/// Statements run through `prepare` + `query` rather than `execute` so a
/// trailing RETURNING clause yields its rows instead of an error.
fn run_dml(conn: &Connection, sql: &str) -> Result<DmlOutcome, SqlConduitError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();

    let mut returned = ResultSet::default();
    if column_count > 0 {
        returned.set_columns(Arc::new(columns));
    }

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(extract_value(row, idx)?);
        }
        returned.add_row(values);
    }
    drop(rows);
    drop(stmt);

    // The rowid reflects the last INSERT on this connection; zero means no
    // insert has happened yet.
    let rowid = conn.last_insert_rowid();
    Ok(DmlOutcome {
        rows_affected: conn.changes(),
        last_insert_id: (rowid != 0).then_some(rowid),
        returned,
    })
}

fn run_ping(conn: &Connection) -> Result<(), SqlConduitError> {
    conn.query_row("SELECT 1", [], |_| Ok(()))?;
    Ok(())
}

fn extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<SqlValue, SqlConduitError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Int(i),
        Value::Real(f) => SqlValue::Float(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(database: &str) -> TargetSettings {
        TargetSettings {
            database: database.to_string(),
            ..TargetSettings::default()
        }
    }

    #[test]
    fn memory_target_becomes_shared_cache_uri() {
        let connector = SqliteConnector::from_target(&target(":memory:"));
        assert!(connector.is_memory);
        assert!(connector.path.starts_with("file:sql_conduit_mem_"));
        assert!(connector.path.contains("mode=memory"));
        assert!(connector.path.contains("cache=shared"));
    }

    #[test]
    fn empty_database_also_means_memory() {
        let connector = SqliteConnector::from_target(&target(""));
        assert!(connector.is_memory);
    }

    #[test]
    fn each_memory_connector_gets_its_own_database() {
        let first = SqliteConnector::from_target(&target(":memory:"));
        let second = SqliteConnector::from_target(&target(":memory:"));
        assert_ne!(first.path, second.path);
    }

    #[test]
    fn file_target_keeps_its_path() {
        let connector = SqliteConnector::from_target(&target("/tmp/app.db"));
        assert!(!connector.is_memory);
        assert_eq!(connector.path, "/tmp/app.db");
    }

    #[test]
    fn begin_sql_ignores_isolation() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.begin_sql(Some(IsolationLevel::Serializable)), "BEGIN");
        assert_eq!(dialect.begin_sql(None), "BEGIN");
    }
}
