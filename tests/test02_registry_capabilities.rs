use std::sync::Arc;

use sql_conduit::prelude::*;
use sql_conduit::test_utils::MockDialect;
use sql_conduit::{CapabilityValue, feature};

#[cfg(feature = "postgres")]
#[test]
fn builtin_registry_serves_postgres_under_both_names() {
    let registry = DialectRegistry::builtin();
    let canonical = registry.resolve("postgres").unwrap();
    let aliased = registry.resolve("postgresql").unwrap();
    assert_eq!(canonical.name(), "postgres");
    assert!(Arc::ptr_eq(&canonical, &aliased));
}

#[cfg(feature = "postgres")]
#[test]
fn postgres_advertises_returning_and_schemas() {
    let dialect = DialectRegistry::builtin().resolve("postgres").unwrap();
    let caps = dialect.capabilities();
    assert_eq!(
        caps.supports(feature::RETURNING),
        CapabilityValue::Keyword("RETURNING")
    );
    assert!(caps.is_enabled(feature::SCHEMAS));
    assert!(caps.is_enabled(feature::ROW_LOCKING));
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_disables_isolation_levels() {
    let dialect = DialectRegistry::builtin().resolve("sqlite").unwrap();
    let caps = dialect.capabilities();
    assert!(!caps.is_enabled(feature::ISOLATION_LEVELS));
    assert!(caps.is_enabled(feature::RETURNING));
    assert!(!caps.is_enabled(feature::SCHEMAS));
}

#[test]
fn unknown_dialect_error_names_the_request() {
    let err = DialectRegistry::builtin().resolve("oracle").unwrap_err();
    match err {
        SqlConduitError::Configuration { message } => {
            assert!(message.contains("oracle"), "{message}");
        }
        other => panic!("expected Configuration, got {other:?}"),
    }
}

#[test]
fn registered_dialects_resolve_to_the_same_instance() {
    let mut registry = DialectRegistry::empty();
    registry.register(Arc::new(MockDialect::new()));
    let first = registry.resolve("mock").unwrap();
    let second = registry.resolve("mock").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn unknown_capability_keys_answer_disabled() {
    let dialect = MockDialect::new();
    let caps = dialect.capabilities();
    assert_eq!(caps.supports("window_functions"), CapabilityValue::Flag(false));
    assert!(!caps.is_enabled("window_functions"));
    // baseline entries survive next to the mock's own overrides
    assert!(caps.is_enabled(feature::SAVEPOINTS));
}
