//! Confirms the reference providers wire into a [`ProviderRegistry`] and the
//! Language Catalog the way a real caller would register them, end to end.

use std::sync::Arc;

use codeloom_core::catalog;
use codeloom_core::provider::{AgentQuery, ProviderRegistry, TransformOp};
use codeloom_providers::{PythonProvider, RustProvider};
use rstest::rstest;

fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(RustProvider));
    registry.register(Arc::new(PythonProvider));
    registry
}

#[test]
fn registering_both_providers_populates_the_catalog() {
    let _registry = registry();

    let (rust_lang, found) = catalog::lookup_by_extension(".rs");
    assert!(found);
    assert_eq!(rust_lang, "rust");

    let (py_lang, found) = catalog::lookup_by_extension(".py");
    assert!(found);
    assert_eq!(py_lang, "python");
}

#[test]
fn languages_are_listed_sorted() {
    let registry = registry();
    assert_eq!(registry.languages(), vec!["python".to_string(), "rust".to_string()]);
}

#[rstest]
#[case("rust", "fn target() {}\n", "function", "target")]
#[case("python", "def target():\n    pass\n", "function", "target")]
fn dispatching_through_the_registry_finds_the_named_node(
    #[case] language: &str,
    #[case] source: &str,
    #[case] query_type: &str,
    #[case] name: &str,
) {
    let registry = registry();
    let provider = registry.get(language).expect("provider registered for language");

    let result = provider.query(source, &AgentQuery::of_type(query_type).with_name_pattern(name));
    assert!(result.error.is_none());
    assert_eq!(result.total, 1);
}

#[test]
fn unregistered_language_is_absent() {
    let registry = registry();
    assert!(registry.get("typescript").is_none());
}

#[test]
fn transform_through_the_registry_round_trips_a_rename() {
    let registry = registry();
    let provider = registry.get("rust").expect("rust provider registered");

    let op = TransformOp::replace(
        AgentQuery::of_type("function").with_name_pattern("before"),
        "fn after() {}",
    );
    let result = provider.transform("fn before() {}\n", &op);

    assert!(result.error.is_none());
    assert_eq!(result.match_count, 1);
    assert!(result.modified.contains("after"));
}
