use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;

use crate::binding::{Replacements, render_replacements};
use crate::config::QueryLogging;
use crate::dialect::{Dialect, DialectSession};
use crate::error::SqlConduitError;
use crate::pool::AccessIntent;
use crate::results::ResultSet;

/// Declared shape of a statement's result. When none is declared the kind
/// is inferred from the leading keyword: `select` means [`QueryKind::Select`],
/// anything else is treated as [`QueryKind::Raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    BulkUpdate,
    BulkDelete,
    /// Passthrough: rows, affected count, and insert id as reported.
    Raw,
}

/// Per-statement options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Declared result kind; inferred from the SQL when absent.
    pub kind: Option<QueryKind>,
    /// Skip result shaping entirely; implies [`QueryKind::Raw`].
    pub raw: bool,
    /// Per-statement logging sink override.
    pub logging: Option<QueryLogging>,
    /// Pool routing under replication. Statements are not classified;
    /// callers declare read intent explicitly. Ignored inside a transaction.
    pub intent: AccessIntent,
    /// Route to the write target even for read intent.
    pub use_primary: bool,
}

impl QueryOptions {
    #[must_use]
    pub fn of_kind(kind: QueryKind) -> Self {
        QueryOptions {
            kind: Some(kind),
            ..QueryOptions::default()
        }
    }
}

/// Everything a statement reported, unshaped.
#[derive(Debug, Clone, Default)]
pub struct RawOutcome {
    pub rows: ResultSet,
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Result of one executed statement, shaped by its [`QueryKind`].
#[derive(Debug, Clone)]
pub enum QueryOutput {
    /// SELECT row mappings
    Rows(ResultSet),
    /// INSERT: generated key when the engine reports one, plus any
    /// RETURNING rows
    Inserted {
        key: Option<i64>,
        rows_affected: u64,
        returned: ResultSet,
    },
    /// UPDATE / DELETE affected count
    Affected(u64),
    /// Unshaped passthrough
    Raw(RawOutcome),
}

impl QueryOutput {
    /// Row data, for the variants that carry any.
    #[must_use]
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            QueryOutput::Rows(rows) => Some(rows),
            QueryOutput::Inserted { returned, .. } if !returned.is_empty() => Some(returned),
            QueryOutput::Raw(raw) if !raw.rows.is_empty() => Some(&raw.rows),
            _ => None,
        }
    }

    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        match self {
            QueryOutput::Rows(rows) => rows.rows_affected,
            QueryOutput::Inserted { rows_affected, .. } | QueryOutput::Affected(rows_affected) => {
                *rows_affected
            }
            QueryOutput::Raw(raw) => raw.rows_affected,
        }
    }
}

// Leading keyword, skipping whitespace and SQL comments. Nested block
// comments at the statement head are rare enough that one non-greedy level
// suffices for classification; the binding scanner handles nesting properly.
static LEADING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(?:\s+|--[^\n]*\n?|/\*.*?\*/)*([a-z]+)").expect("leading keyword pattern")
});

fn leading_keyword(sql: &str) -> Option<&str> {
    LEADING_KEYWORD
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn infer_kind(sql: &str) -> QueryKind {
    match leading_keyword(sql) {
        Some(word) if word.eq_ignore_ascii_case("select") => QueryKind::Select,
        _ => QueryKind::Raw,
    }
}

fn effective_kind(sql: &str, options: &QueryOptions) -> QueryKind {
    if options.raw {
        QueryKind::Raw
    } else {
        options.kind.unwrap_or_else(|| infer_kind(sql))
    }
}

/// Engine rejections carry the rendered SQL; already-shaped query errors
/// pass through untouched.
fn engine_error(sql: &str, err: SqlConduitError) -> SqlConduitError {
    match err {
        already @ SqlConduitError::Query { .. } => already,
        other => SqlConduitError::query(sql, other.to_string()),
    }
}

async fn run_select(
    session: &mut dyn DialectSession,
    sql: &str,
) -> Result<ResultSet, SqlConduitError> {
    session
        .execute_select(sql)
        .await
        .map_err(|err| engine_error(sql, err))
}

async fn run_dml(
    session: &mut dyn DialectSession,
    sql: &str,
) -> Result<crate::dialect::DmlOutcome, SqlConduitError> {
    session
        .execute_dml(sql)
        .await
        .map_err(|err| engine_error(sql, err))
}

async fn dispatch(
    session: &mut dyn DialectSession,
    kind: QueryKind,
    sql: &str,
) -> Result<QueryOutput, SqlConduitError> {
    match kind {
        QueryKind::Select => Ok(QueryOutput::Rows(run_select(session, sql).await?)),
        QueryKind::Insert => {
            let outcome = run_dml(session, sql).await?;
            Ok(QueryOutput::Inserted {
                key: outcome.last_insert_id,
                rows_affected: outcome.rows_affected,
                returned: outcome.returned,
            })
        }
        QueryKind::Update | QueryKind::Delete | QueryKind::BulkUpdate | QueryKind::BulkDelete => {
            let outcome = run_dml(session, sql).await?;
            Ok(QueryOutput::Affected(outcome.rows_affected))
        }
        QueryKind::Raw => {
            if infer_kind(sql) == QueryKind::Select {
                let rows = run_select(session, sql).await?;
                Ok(QueryOutput::Raw(RawOutcome {
                    rows,
                    rows_affected: 0,
                    last_insert_id: None,
                }))
            } else {
                let outcome = run_dml(session, sql).await?;
                Ok(QueryOutput::Raw(RawOutcome {
                    rows: outcome.returned,
                    rows_affected: outcome.rows_affected,
                    last_insert_id: outcome.last_insert_id,
                }))
            }
        }
    }
}

/// The single choke point every statement flows through: render the
/// replacements, classify, execute on the supplied session, shape, log.
pub(crate) async fn run_query(
    session: &mut dyn DialectSession,
    dialect: &dyn Dialect,
    sql: &str,
    replacements: &Replacements,
    options: &QueryOptions,
    logging: &QueryLogging,
    context: &str,
) -> Result<QueryOutput, SqlConduitError> {
    let rendered = render_replacements(sql, replacements, dialect)?;
    let kind = effective_kind(&rendered, options);
    let started = Instant::now();
    let result = dispatch(session, kind, &rendered).await;
    let sink = options.logging.as_ref().unwrap_or(logging);
    sink.emit(&format!(
        "Executed ({context}): {rendered} ({}ms)",
        started.elapsed().as_millis()
    ));
    result
}
