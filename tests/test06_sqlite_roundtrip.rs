#![cfg(feature = "sqlite")]

use sql_conduit::prelude::*;

#[tokio::test(flavor = "current_thread")]
async fn roundtrip_insert_select_update_delete() -> Result<(), SqlConduitError> {
    let db = Database::new(Configuration::new("sqlite", ":memory:"))?;
    db.query(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
         score REAL, active INTEGER)",
        Replacements::None,
        QueryOptions::of_kind(QueryKind::Raw),
    )
    .await?;

    let inserted = db
        .query(
            "INSERT INTO people (name, score, active) VALUES (?, ?, ?)",
            Replacements::Positional(vec![
                SqlValue::from("ada"),
                SqlValue::from(90.5),
                SqlValue::from(true),
            ]),
            QueryOptions::of_kind(QueryKind::Insert),
        )
        .await?;
    let QueryOutput::Inserted {
        key, rows_affected, ..
    } = inserted
    else {
        panic!("insert did not shape into Inserted: {inserted:?}");
    };
    assert_eq!(key, Some(1));
    assert_eq!(rows_affected, 1);

    let output = db
        .query(
            "SELECT id, name, score, active FROM people WHERE name = :name",
            Replacements::named([("name", SqlValue::from("ada"))]),
            QueryOptions::default(),
        )
        .await?;
    let QueryOutput::Rows(set) = output else {
        panic!("select did not shape into Rows: {output:?}");
    };
    assert_eq!(set.len(), 1);
    let row = set.first().unwrap();
    assert_eq!(row.get("id").and_then(SqlValue::as_int), Some(1));
    assert_eq!(row.get("name").and_then(SqlValue::as_text), Some("ada"));
    assert_eq!(row.get("score").and_then(SqlValue::as_float), Some(90.5));
    assert_eq!(row.get("active").and_then(SqlValue::as_bool), Some(true));

    let updated = db
        .query(
            "UPDATE people SET score = ? WHERE name = ?",
            Replacements::Positional(vec![SqlValue::from(95.0), SqlValue::from("ada")]),
            QueryOptions::of_kind(QueryKind::Update),
        )
        .await?;
    assert!(matches!(updated, QueryOutput::Affected(1)), "{updated:?}");

    let deleted = db
        .query(
            "DELETE FROM people WHERE id = 1 RETURNING name",
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Raw),
        )
        .await?;
    let QueryOutput::Raw(raw) = deleted else {
        panic!("raw kind did not pass through: {deleted:?}");
    };
    assert_eq!(raw.rows_affected, 1);
    assert_eq!(
        raw.rows
            .first()
            .and_then(|r| r.get("name"))
            .and_then(SqlValue::as_text),
        Some("ada")
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn insert_returning_carries_the_generated_row() -> Result<(), SqlConduitError> {
    let db = Database::new(Configuration::new("sqlite", ":memory:"))?;
    db.query(
        "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT)",
        Replacements::None,
        QueryOptions::of_kind(QueryKind::Raw),
    )
    .await?;

    let output = db
        .query(
            "INSERT INTO tags (label) VALUES ('urgent') RETURNING id, label",
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Insert),
        )
        .await?;
    let QueryOutput::Inserted { key, returned, .. } = output else {
        panic!("insert did not shape into Inserted: {output:?}");
    };
    assert_eq!(key, Some(1));
    assert_eq!(returned.len(), 1);
    let row = returned.first().unwrap();
    assert_eq!(row.get("id").and_then(SqlValue::as_int), Some(1));
    assert_eq!(row.get("label").and_then(SqlValue::as_text), Some("urgent"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn transactions_commit_and_roll_back() -> Result<(), SqlConduitError> {
    let db = Database::new(Configuration::new("sqlite", ":memory:"))?;
    db.query(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)",
        Replacements::None,
        QueryOptions::of_kind(QueryKind::Raw),
    )
    .await?;

    let mut tx = db.transaction(TransactionOptions::default()).await?;
    tx.query(
        "INSERT INTO notes (body) VALUES ('kept')",
        Replacements::None,
        QueryOptions::of_kind(QueryKind::Insert),
    )
    .await?;
    tx.commit().await?;

    let mut tx = db.transaction(TransactionOptions::default()).await?;
    tx.query(
        "INSERT INTO notes (body) VALUES ('discarded')",
        Replacements::None,
        QueryOptions::of_kind(QueryKind::Insert),
    )
    .await?;
    tx.rollback().await?;

    let output = db
        .query(
            "SELECT COUNT(*) AS n, MIN(body) AS body FROM notes",
            Replacements::None,
            QueryOptions::default(),
        )
        .await?;
    let row = output.rows().and_then(ResultSet::first).unwrap();
    assert_eq!(row.get("n").and_then(SqlValue::as_int), Some(1));
    assert_eq!(row.get("body").and_then(SqlValue::as_text), Some("kept"));
    Ok(())
}

/// A `:memory:` target is one shared database: a second pooled session,
/// forced open while the first is pinned by a transaction, sees the same
/// tables.
#[tokio::test(flavor = "current_thread")]
async fn memory_database_spans_pool_sessions() -> Result<(), SqlConduitError> {
    let db = Database::new(Configuration::new("sqlite", ":memory:"))?;
    db.query(
        "CREATE TABLE boxes (id INTEGER PRIMARY KEY)",
        Replacements::None,
        QueryOptions::of_kind(QueryKind::Raw),
    )
    .await?;

    let mut tx = db.transaction(TransactionOptions::default()).await?;
    let output = db
        .query(
            "SELECT COUNT(*) AS n FROM boxes",
            Replacements::None,
            QueryOptions::default(),
        )
        .await?;
    tx.rollback().await?;

    let row = output.rows().and_then(ResultSet::first).unwrap();
    assert_eq!(row.get("n").and_then(SqlValue::as_int), Some(0));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn file_database_persists_across_instances() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("conduit.db");
    let target = path.to_string_lossy().to_string();

    {
        let db = Database::new(Configuration::new("sqlite", target.clone()))?;
        db.query(
            "CREATE TABLE ledger (id INTEGER PRIMARY KEY, amount REAL)",
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Raw),
        )
        .await?;
        db.query(
            "INSERT INTO ledger (amount) VALUES (12.5)",
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Insert),
        )
        .await?;
        db.close();
    }

    let db = Database::new(Configuration::new("sqlite", target))?;
    let output = db
        .query(
            "SELECT COUNT(*) AS n FROM ledger",
            Replacements::None,
            QueryOptions::default(),
        )
        .await?;
    let row = output.rows().and_then(ResultSet::first).unwrap();
    assert_eq!(row.get("n").and_then(SqlValue::as_int), Some(1));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn version_and_authentication_probe() -> Result<(), SqlConduitError> {
    let db = Database::new(Configuration::new("sqlite", ":memory:"))?;
    assert!(db.server_version().await?.starts_with("3."));
    db.authenticate().await?;
    Ok(())
}
