use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sql_conduit::prelude::*;
use sql_conduit::test_utils::{MockDialect, MockHandle};
use sql_conduit::{EntityManager, SqlConduitError};

fn mock_database(config: fn(Configuration) -> Configuration) -> (Database, MockHandle) {
    let dialect = MockDialect::new();
    let handle = dialect.handle();
    let mut registry = DialectRegistry::empty();
    registry.register(Arc::new(dialect));
    let db = Database::with_registry(config(Configuration::new("mock", "main")), &registry)
        .expect("facade construction");
    (db, handle)
}

fn blog_schema(db: &Database) {
    // Registered most-dependent first so ordering is doing real work.
    db.define(Arc::new(
        SqlEntity::new(
            "comments",
            "CREATE TABLE comments (id INTEGER, post_id INTEGER)",
            "DROP TABLE comments",
        )
        .with_references(["posts"]),
    ));
    db.define(Arc::new(
        SqlEntity::new(
            "posts",
            "CREATE TABLE posts (id INTEGER, author_id INTEGER)",
            "DROP TABLE posts",
        )
        .with_references(["users"]),
    ));
    db.define(Arc::new(SqlEntity::new(
        "users",
        "CREATE TABLE users (id INTEGER)",
        "DROP TABLE users",
    )));
}

#[tokio::test(flavor = "current_thread")]
async fn sync_creates_in_dependency_order() -> Result<(), SqlConduitError> {
    let (db, handle) = mock_database(|c| c);
    blog_schema(&db);
    db.sync(SyncOptions::default()).await?;

    assert_eq!(
        handle.statements(),
        [
            "CREATE TABLE users (id INTEGER)",
            "CREATE TABLE posts (id INTEGER, author_id INTEGER)",
            "CREATE TABLE comments (id INTEGER, post_id INTEGER)",
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn force_sync_drops_everything_first() -> Result<(), SqlConduitError> {
    let (db, handle) = mock_database(|c| c);
    blog_schema(&db);
    db.sync(SyncOptions {
        force: true,
        ..SyncOptions::default()
    })
    .await?;

    assert_eq!(
        handle.statements(),
        [
            "DROP TABLE users",
            "DROP TABLE posts",
            "DROP TABLE comments",
            "CREATE TABLE users (id INTEGER)",
            "CREATE TABLE posts (id INTEGER, author_id INTEGER)",
            "CREATE TABLE comments (id INTEGER, post_id INTEGER)",
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn drop_all_can_run_in_reverse_creation_order() -> Result<(), SqlConduitError> {
    let (db, handle) = mock_database(|c| c.drop_order(DropOrder::ReverseCreation));
    blog_schema(&db);
    db.drop_all(DropOptions::default()).await?;

    assert_eq!(
        handle.statements(),
        ["DROP TABLE comments", "DROP TABLE posts", "DROP TABLE users"]
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn a_failing_entity_is_named_and_stops_the_run() {
    let (db, handle) = mock_database(|c| c);
    blog_schema(&db);
    handle.fail_statements_containing("CREATE TABLE posts");

    let err = db.sync(SyncOptions::default()).await.unwrap_err();
    let SqlConduitError::SchemaSync { entity, source } = err else {
        panic!("expected a schema sync error, got {err:?}");
    };
    assert_eq!(entity, "posts");
    assert!(matches!(*source, SqlConduitError::Query { .. }));

    // users ran, posts failed, comments was never attempted
    assert_eq!(handle.statements().len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn schema_option_reaches_custom_entities() -> Result<(), SqlConduitError> {
    struct SchemaProbe {
        seen: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl SchemaEntity for SchemaProbe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn sync(&self, _: &Database, options: &SyncOptions) -> Result<(), SqlConduitError> {
            *self.seen.lock().unwrap() = options.schema.clone();
            Ok(())
        }

        async fn drop_entity(
            &self,
            _: &Database,
            _: &DropOptions,
        ) -> Result<(), SqlConduitError> {
            Ok(())
        }
    }

    let (db, _handle) = mock_database(|c| c);
    let seen = Arc::new(Mutex::new(None));
    db.define(Arc::new(SchemaProbe {
        seen: Arc::clone(&seen),
    }));

    db.sync(SyncOptions {
        force: false,
        schema: Some("tenant_a".into()),
    })
    .await?;

    assert_eq!(seen.lock().unwrap().as_deref(), Some("tenant_a"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn redefining_an_entity_replaces_it_in_place() {
    let (db, _handle) = mock_database(|c| c);
    db.define(Arc::new(SqlEntity::new("users", "CREATE v1", "DROP v1")));
    db.define(Arc::new(SqlEntity::new("users", "CREATE v2", "DROP v2")));

    let manager: &EntityManager = db.entities();
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.names(), ["users"]);
}
