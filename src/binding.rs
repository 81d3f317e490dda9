use std::borrow::Cow;
use std::collections::HashMap;

use crate::dialect::Dialect;
use crate::error::SqlConduitError;
use crate::value::SqlValue;

/// Replacement values for client-side substitution into SQL text.
///
/// Positional values bind to bare `?` markers left-to-right; named values
/// bind to `:name` markers. The two styles do not mix within one statement.
#[derive(Debug, Clone, Default)]
pub enum Replacements {
    /// Leave the SQL untouched
    #[default]
    None,
    /// Values for `?` markers, consumed left-to-right
    Positional(Vec<SqlValue>),
    /// Values for `:name` markers; unused keys are fine
    Named(HashMap<String, SqlValue>),
}

impl Replacements {
    #[must_use]
    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, SqlValue)>) -> Self {
        Replacements::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Replacements::None)
    }
}

impl From<Vec<SqlValue>> for Replacements {
    fn from(values: Vec<SqlValue>) -> Self {
        Replacements::Positional(values)
    }
}

impl From<HashMap<String, SqlValue>> for Replacements {
    fn from(values: HashMap<String, SqlValue>) -> Self {
        Replacements::Named(values)
    }
}

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// Substitute replacement values into `sql`, producing the final statement
/// text. Literal rendering is the dialect's job.
///
/// The scanner ignores marker characters inside single-quoted and
/// double-quoted strings, line comments, block comments (nested), and
/// dollar-quoted bodies. `::` never starts a named marker. Returns a
/// borrowed `Cow` when nothing needed substituting.
///
/// # Errors
///
/// `Bind` when a `?` has no value left to consume, or a `:name` has no
/// matching key. Surplus positional values are tolerated.
pub fn render_replacements<'a>(
    sql: &'a str,
    replacements: &Replacements,
    dialect: &dyn Dialect,
) -> Result<Cow<'a, str>, SqlConduitError> {
    if replacements.is_none() {
        return Ok(Cow::Borrowed(sql));
    }

    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut copied_until = 0;
    let mut state = State::Normal;
    let mut idx = 0;
    let mut next_positional = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'-' if bytes.get(idx + 1) == Some(&b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = advance;
                    }
                }
                b'?' => {
                    if let Replacements::Positional(values) = replacements {
                        let value = values.get(next_positional).ok_or_else(|| {
                            SqlConduitError::bind(format!(
                                "positional replacement {} has no value ({} provided)",
                                next_positional + 1,
                                values.len()
                            ))
                        })?;
                        splice(
                            &mut out,
                            sql,
                            &mut copied_until,
                            idx,
                            idx + 1,
                            &dialect.quote_literal(value),
                        );
                        next_positional += 1;
                    }
                }
                b':' => {
                    if bytes.get(idx + 1) == Some(&b':') {
                        // cast syntax, consume both colons
                        idx += 1;
                    } else if let Replacements::Named(values) = replacements {
                        if let Some((end, name)) = scan_identifier(bytes, idx + 1) {
                            let value = values.get(name).ok_or_else(|| {
                                SqlConduitError::bind(format!(
                                    "named replacement :{name} has no matching key"
                                ))
                            })?;
                            splice(
                                &mut out,
                                sql,
                                &mut copied_until,
                                idx,
                                end,
                                &dialect.quote_literal(value),
                            );
                            idx = end - 1;
                        }
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if b == b'/' && bytes.get(idx + 1) == Some(&b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len();
                    state = State::Normal;
                }
            }
        }

        idx += 1;
    }

    Ok(match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied_until..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    })
}

/// Copy the untouched stretch before the marker, then the rendered literal.
fn splice(
    out: &mut Option<String>,
    sql: &str,
    copied_until: &mut usize,
    marker_start: usize,
    marker_end: usize,
    literal: &str,
) {
    let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + literal.len()));
    buf.push_str(&sql[*copied_until..marker_start]);
    buf.push_str(literal);
    *copied_until = marker_end;
}

fn scan_identifier(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_') {
        idx += 1;
    }
    std::str::from_utf8(&bytes[start..idx])
        .ok()
        .map(|name| (idx, name))
}

fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() && bytes[idx] == b'$' {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..=end].starts_with(tag.as_bytes())
        && bytes.get(end) == Some(&b'$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilitySet;
    use crate::config::TargetSettings;
    use crate::dialect::SessionConnector;
    use std::sync::Arc;

    struct PlainDialect {
        caps: CapabilitySet,
    }

    impl PlainDialect {
        fn new() -> Self {
            PlainDialect {
                caps: CapabilitySet::baseline(),
            }
        }
    }

    impl Dialect for PlainDialect {
        fn name(&self) -> &'static str {
            "plain"
        }

        fn capabilities(&self) -> &CapabilitySet {
            &self.caps
        }

        fn connector(
            &self,
            _target: &TargetSettings,
        ) -> Result<Arc<dyn SessionConnector>, SqlConduitError> {
            Err(SqlConduitError::Unimplemented("plain".into()))
        }

        fn version_sql(&self) -> &'static str {
            "SELECT 'plain'"
        }
    }

    fn positional(sql: &str, values: Vec<SqlValue>) -> Result<String, SqlConduitError> {
        render_replacements(sql, &Replacements::Positional(values), &PlainDialect::new())
            .map(Cow::into_owned)
    }

    fn named(sql: &str, pairs: Vec<(&str, SqlValue)>) -> Result<String, SqlConduitError> {
        render_replacements(sql, &Replacements::named(pairs), &PlainDialect::new())
            .map(Cow::into_owned)
    }

    #[test]
    fn positional_consumes_left_to_right() {
        let sql = positional(
            "SELECT * FROM t WHERE id = ? AND name = ?",
            vec![SqlValue::Int(5), SqlValue::Text("o'brien".into())],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = 5 AND name = 'o''brien'");
    }

    #[test]
    fn named_substitutes_each_occurrence() {
        let sql = named(
            "UPDATE t SET n = :n WHERE id = :id OR parent = :id",
            vec![("n", SqlValue::Text("x".into())), ("id", SqlValue::Int(7))],
        )
        .unwrap();
        assert_eq!(sql, "UPDATE t SET n = 'x' WHERE id = 7 OR parent = 7");
    }

    #[test]
    fn missing_named_key_is_a_bind_error() {
        let err = named("SELECT * FROM t WHERE id = :id", vec![("nope", SqlValue::Int(1))])
            .unwrap_err();
        match err {
            SqlConduitError::Bind(message) => assert!(message.contains(":id"), "{message}"),
            other => panic!("expected Bind, got {other:?}"),
        }
    }

    #[test]
    fn unused_named_keys_are_fine() {
        let sql = named(
            "SELECT * FROM t WHERE id = :id",
            vec![("id", SqlValue::Int(1)), ("extra", SqlValue::Int(2))],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = 1");
    }

    #[test]
    fn too_few_positional_values_is_a_bind_error() {
        let err = positional("SELECT ? + ?", vec![SqlValue::Int(1)]).unwrap_err();
        assert!(matches!(err, SqlConduitError::Bind(_)));
    }

    #[test]
    fn surplus_positional_values_are_tolerated() {
        let sql = positional("SELECT ?", vec![SqlValue::Int(1), SqlValue::Int(2)]).unwrap();
        assert_eq!(sql, "SELECT 1");
    }

    #[test]
    fn markers_inside_literals_and_comments_survive() {
        let sql = positional(
            "select '?', \"col?\" -- ?\n/* ? /* ? */ */ from t where a = ?",
            vec![SqlValue::Int(9)],
        )
        .unwrap();
        assert_eq!(
            sql,
            "select '?', \"col?\" -- ?\n/* ? /* ? */ */ from t where a = 9"
        );
    }

    #[test]
    fn dollar_quoted_bodies_survive() {
        let sql = named(
            "$fn$ select :id $fn$ where id = :id",
            vec![("id", SqlValue::Int(3))],
        )
        .unwrap();
        assert_eq!(sql, "$fn$ select :id $fn$ where id = 3");
    }

    #[test]
    fn cast_syntax_is_not_a_named_marker() {
        let sql = named(
            "SELECT total::text FROM t WHERE id = :id",
            vec![("id", SqlValue::Int(2))],
        )
        .unwrap();
        assert_eq!(sql, "SELECT total::text FROM t WHERE id = 2");
    }

    #[test]
    fn no_replacements_returns_borrowed() {
        let rendered =
            render_replacements("SELECT ?", &Replacements::None, &PlainDialect::new()).unwrap();
        assert!(matches!(rendered, Cow::Borrowed(_)));
    }

    #[test]
    fn escaped_quote_does_not_end_the_literal() {
        let sql = positional("select 'it''s ?' where a = ?", vec![SqlValue::Int(1)]).unwrap();
        assert_eq!(sql, "select 'it''s ?' where a = 1");
    }
}
