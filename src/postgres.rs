use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls, Row, SimpleQueryMessage};

use crate::capabilities::{CapabilitySet, CapabilityValue, feature};
use crate::config::TargetSettings;
use crate::dialect::{Dialect, DialectSession, DmlOutcome, SessionConnector};
use crate::error::SqlConduitError;
use crate::results::ResultSet;
use crate::value::SqlValue;

/// PostgreSQL dialect backed by `tokio-postgres`. Each session owns one
/// client; the connection task runs on the Tokio runtime.
pub struct PostgresDialect {
    capabilities: CapabilitySet,
}

impl PostgresDialect {
    #[must_use]
    pub fn new() -> Self {
        PostgresDialect {
            capabilities: CapabilitySet::with_overrides(&[
                (feature::RETURNING, CapabilityValue::Keyword("RETURNING")),
                (feature::SCHEMAS, CapabilityValue::Flag(true)),
                (feature::ROW_LOCKING, CapabilityValue::Flag(true)),
                (feature::DDL_TRANSACTIONS, CapabilityValue::Flag(true)),
                (feature::JSON, CapabilityValue::Flag(true)),
            ]),
        }
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn connector(
        &self,
        target: &TargetSettings,
    ) -> Result<Arc<dyn SessionConnector>, SqlConduitError> {
        // tokio-postgres refuses a config without a user, so fail here
        // where the message can say which setting is missing.
        let Some(user) = target.username.as_deref() else {
            return Err(SqlConduitError::configuration(
                "postgres target requires a username",
            ));
        };

        let mut config = tokio_postgres::Config::new();
        config.host(target.host.as_deref().unwrap_or("localhost"));
        config.port(target.port.unwrap_or(5432));
        config.user(user);
        if let Some(password) = target.password.as_deref() {
            config.password(password);
        }
        if !target.database.is_empty() {
            config.dbname(&target.database);
        }
        for (key, value) in &target.options {
            match key.as_str() {
                "application_name" => {
                    config.application_name(value);
                }
                "connect_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        SqlConduitError::configuration(format!(
                            "connect_timeout must be whole seconds, got {value:?}"
                        ))
                    })?;
                    config.connect_timeout(Duration::from_secs(secs));
                }
                other => {
                    tracing::debug!(option = other, "ignoring unrecognized postgres option");
                }
            }
        }

        Ok(Arc::new(PostgresConnector { config }))
    }

    fn version_sql(&self) -> &'static str {
        "SELECT version()"
    }
}

struct PostgresConnector {
    config: tokio_postgres::Config,
}

#[async_trait]
impl SessionConnector for PostgresConnector {
    async fn connect(&self) -> Result<Box<dyn DialectSession>, SqlConduitError> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::debug!(%error, "postgres connection task ended");
            }
        });
        Ok(Box::new(PostgresSession { client }))
    }
}

struct PostgresSession {
    client: Client,
}

#[async_trait]
impl DialectSession for PostgresSession {
    async fn execute_select(&mut self, sql: &str) -> Result<ResultSet, SqlConduitError> {
        let rows = self.client.query(sql, &[]).await?;
        build_result_set(&rows)
    }

    async fn execute_dml(&mut self, sql: &str) -> Result<DmlOutcome, SqlConduitError> {
        // The simple protocol reports the affected count and any RETURNING
        // rows in one round trip. RETURNING values arrive as text.
        let messages = self.client.simple_query(sql).await?;
        let mut outcome = DmlOutcome::default();
        let mut returned = ResultSet::default();
        for message in messages {
            match message {
                SimpleQueryMessage::CommandComplete(count) => {
                    outcome.rows_affected = count;
                }
                SimpleQueryMessage::Row(row) => {
                    if returned.columns().is_none() {
                        let cols: Vec<String> =
                            row.columns().iter().map(|c| c.name().to_string()).collect();
                        returned.set_columns(Arc::new(cols));
                    }
                    let mut values = Vec::with_capacity(row.len());
                    for idx in 0..row.len() {
                        values.push(match row.try_get(idx)? {
                            Some(text) => SqlValue::Text(text.to_string()),
                            None => SqlValue::Null,
                        });
                    }
                    returned.add_row(values);
                }
                _ => {}
            }
        }
        outcome.returned = returned;
        Ok(outcome)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), SqlConduitError> {
        if self.client.is_closed() {
            return Err(SqlConduitError::connection("postgres session closed"));
        }
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

fn build_result_set(rows: &[Row]) -> Result<ResultSet, SqlConduitError> {
    let mut result = ResultSet::with_capacity(rows.len());
    if let Some(row) = rows.first() {
        let cols: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        result.set_columns(Arc::new(cols));
    }

    for row in rows {
        let col_count = row.columns().len();
        let mut values = Vec::with_capacity(col_count);
        for idx in 0..col_count {
            values.push(extract_value(row, idx)?);
        }
        result.add_row(values);
    }

    Ok(result)
}

/// Extract one cell by the column's declared type name. NULLs come through
/// the `Option` layer for every type.
fn extract_value(row: &Row, idx: usize) -> Result<SqlValue, SqlConduitError> {
    let type_name = row.columns()[idx].type_().name();
    match type_name {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Int))
        }
        "float4" => {
            let val: Option<f32> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, |v| SqlValue::Float(f64::from(v))))
        }
        "float8" => {
            let val: Option<f64> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Float))
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Bool))
        }
        "timestamp" => {
            let val: Option<chrono::NaiveDateTime> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Timestamp))
        }
        "timestamptz" => {
            let val: Option<DateTime<Utc>> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, |v| SqlValue::Timestamp(v.naive_utc())))
        }
        "json" | "jsonb" => {
            let val: Option<serde_json::Value> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Json))
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Blob))
        }
        // Text-ish types, and anything else that can decode as text.
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            Ok(val.map_or(SqlValue::Null, SqlValue::Text))
        }
    }
}
