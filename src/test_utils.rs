//! An in-process mock dialect for exercising the runtime without a server.
//!
//! Enabled by the `test-utils` feature. The mock records every statement it
//! runs, serves scripted result sets, and can be told to fail connects,
//! pings, or statements matching a substring.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::capabilities::{CapabilitySet, CapabilityValue, feature};
use crate::config::TargetSettings;
use crate::dialect::{Dialect, DialectSession, DmlOutcome, SessionConnector};
use crate::error::SqlConduitError;
use crate::results::ResultSet;
use crate::value::SqlValue;

#[derive(Default)]
struct MockState {
    statements: Mutex<Vec<String>>,
    scripted_selects: Mutex<HashMap<String, ResultSet>>,
    scripted_returning: Mutex<HashMap<String, ResultSet>>,
    fail_substrings: Mutex<Vec<String>>,
    connect_failures: AtomicUsize,
    ping_failures: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_live: AtomicUsize,
    rows_affected: AtomicU64,
    insert_sequence: AtomicI64,
}

impl MockState {
    fn record(&self, sql: &str) -> Result<(), SqlConduitError> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        let failing = self
            .fail_substrings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|needle| sql.contains(needle.as_str()));
        if failing {
            return Err(SqlConduitError::query(sql, "scripted failure"));
        }
        Ok(())
    }

    fn consume(&self, counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Inspection and scripting handle, usable after the dialect itself moved
/// into a registry.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    /// Every statement the mock ran, in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sessions_live(&self) -> usize {
        self.state.sessions_live.load(Ordering::SeqCst)
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` pings fail, marking those sessions broken.
    pub fn fail_next_pings(&self, count: usize) {
        self.state.ping_failures.store(count, Ordering::SeqCst);
    }

    /// Fail any statement containing `needle`.
    pub fn fail_statements_containing(&self, needle: &str) {
        self.state
            .fail_substrings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(needle.to_string());
    }

    /// Serve `rows` for an exact `sql` select.
    pub fn script_select(&self, sql: &str, columns: &[&str], rows: Vec<Vec<SqlValue>>) {
        self.state
            .scripted_selects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sql.to_string(), build_result_set(columns, rows));
    }

    /// Attach RETURNING-style rows to an exact `sql` statement.
    pub fn script_returning(&self, sql: &str, columns: &[&str], rows: Vec<Vec<SqlValue>>) {
        self.state
            .scripted_returning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sql.to_string(), build_result_set(columns, rows));
    }

    /// Affected-row count reported for every statement (default 1).
    pub fn set_rows_affected(&self, count: u64) {
        self.state.rows_affected.store(count, Ordering::SeqCst);
    }
}

fn build_result_set(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> ResultSet {
    let mut result = ResultSet::with_capacity(rows.len());
    result.set_columns(Arc::new(
        columns.iter().map(|c| (*c).to_string()).collect(),
    ));
    for row in rows {
        result.add_row(row);
    }
    result
}

/// Dialect whose sessions never leave the process.
pub struct MockDialect {
    state: Arc<MockState>,
    capabilities: CapabilitySet,
    autocommit_toggle: bool,
}

impl MockDialect {
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new(MockState::default());
        state.rows_affected.store(1, Ordering::SeqCst);
        MockDialect {
            state,
            capabilities: CapabilitySet::with_overrides(&[(
                feature::RETURNING,
                CapabilityValue::Keyword("RETURNING"),
            )]),
            autocommit_toggle: false,
        }
    }

    /// Render an autocommit toggle statement, for exercising session setup.
    #[must_use]
    pub fn with_autocommit_toggle(mut self) -> Self {
        self.autocommit_toggle = true;
        self
    }

    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for MockDialect {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn connector(
        &self,
        _target: &TargetSettings,
    ) -> Result<Arc<dyn SessionConnector>, SqlConduitError> {
        Ok(Arc::new(MockConnector {
            state: self.state.clone(),
        }))
    }

    fn autocommit_sql(&self, enabled: bool) -> Option<String> {
        self.autocommit_toggle
            .then(|| format!("SET autocommit = {}", u8::from(enabled)))
    }

    fn version_sql(&self) -> &'static str {
        "SELECT version()"
    }
}

struct MockConnector {
    state: Arc<MockState>,
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn DialectSession>, SqlConduitError> {
        if self.state.consume(&self.state.connect_failures) {
            return Err(SqlConduitError::connection("scripted connect failure"));
        }
        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.state.sessions_live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl DialectSession for MockSession {
    async fn execute_select(&mut self, sql: &str) -> Result<ResultSet, SqlConduitError> {
        self.state.record(sql)?;
        let scripted = self
            .state
            .scripted_selects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sql)
            .cloned();
        Ok(scripted.unwrap_or_default())
    }

    async fn execute_dml(&mut self, sql: &str) -> Result<DmlOutcome, SqlConduitError> {
        self.state.record(sql)?;
        let returned = self
            .state
            .scripted_returning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sql)
            .cloned()
            .unwrap_or_default();
        Ok(DmlOutcome {
            rows_affected: self.state.rows_affected.load(Ordering::SeqCst),
            last_insert_id: Some(self.state.insert_sequence.fetch_add(1, Ordering::SeqCst) + 1),
            returned,
        })
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        self.state.record(sql)
    }

    async fn ping(&mut self) -> Result<(), SqlConduitError> {
        if self.state.consume(&self.state.ping_failures) {
            return Err(SqlConduitError::connection("scripted ping failure"));
        }
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.sessions_live.fetch_sub(1, Ordering::SeqCst);
    }
}
