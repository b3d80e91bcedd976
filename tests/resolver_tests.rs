//! Selection resolver integration tests
//!
//! Exercise the resolver through the public API against catalogs built in
//! code and loaded from JSON files.

use installkit::{
    Catalog, Component, ComponentCatalog, InstallKitError, Resolver, ResolverOptions,
    SelectionError, SelectionRequest, SelectionResult,
};
use std::io::Write;
use tempfile::NamedTempFile;

// =============================================================================
// Fixtures
// =============================================================================

fn install_packages_catalog() -> Catalog {
    Catalog::new([
        Component::new("A"),
        Component::new("B"),
        Component::new("C").depends_on(["A", "B"]),
        Component::new("D").auto_depends_on(["A", "B"]),
        Component::new("E").forced(),
        Component::new("F"),
        Component::new("F.sub1"),
        Component::new("F.sub2"),
        Component::new("F.sub2.subsub1"),
        Component::new("F.sub2.subsub2"),
        Component::new("G").default_selected().depends_on(["A"]),
    ])
    .unwrap()
}

fn pos(result: &SelectionResult, id: &str) -> usize {
    result
        .position(id)
        .unwrap_or_else(|| panic!("{} not selected", id))
}

/// Every dependency and ancestor of a selected component precedes it.
fn assert_well_ordered(catalog: &Catalog, result: &SelectionResult) {
    for id in result.apply_order() {
        for ancestor in catalog.ancestors(id).unwrap() {
            assert!(pos(result, &ancestor) < pos(result, id), "{} before {}", ancestor, id);
        }
        for dep in catalog.dependencies(id).unwrap() {
            assert!(pos(result, dep) < pos(result, id), "{} before {}", dep, id);
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_explicit_request_closes_over_everything() {
    let catalog = install_packages_catalog();
    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["C"]))
        .unwrap();

    assert_eq!(result.components(), ["A", "B", "C", "D", "E", "G"]);
    assert_well_ordered(&catalog, &result);
}

#[test]
fn test_rollback_order_is_reverse_of_apply_order() {
    let catalog = install_packages_catalog();
    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["C"]))
        .unwrap();

    let rollback: Vec<&str> = result.rollback_order().collect();
    assert_eq!(rollback, ["G", "E", "D", "C", "B", "A"]);
}

#[test]
fn test_autodependency_needs_all_triggers() {
    let catalog = install_packages_catalog();
    let options = ResolverOptions {
        include_defaults_with_explicit: false,
    };
    let resolver = Resolver::with_options(&catalog, options);

    let only_a = resolver.resolve(&SelectionRequest::explicit(["A"])).unwrap();
    assert!(!only_a.contains("D"));

    let both = resolver
        .resolve(&SelectionRequest::explicit(["A", "B"]))
        .unwrap();
    assert!(both.contains("D"));
    assert!(pos(&both, "A") < pos(&both, "D"));
    assert!(pos(&both, "B") < pos(&both, "D"));
}

#[test]
fn test_nested_leaf_pulls_in_its_ancestors_only() {
    let catalog = install_packages_catalog();
    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["F.sub2.subsub1"]))
        .unwrap();

    for id in ["F", "F.sub2", "F.sub2.subsub1", "E", "G", "A"] {
        assert!(result.contains(id), "{} missing", id);
    }
    assert!(!result.contains("F.sub1"));
    assert!(!result.contains("F.sub2.subsub2"));
    assert_well_ordered(&catalog, &result);
}

#[test]
fn test_default_request() {
    let catalog = install_packages_catalog();
    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::Default)
        .unwrap();
    assert_eq!(result.components(), ["A", "E", "G"]);
}

#[test]
fn test_resolution_is_deterministic() {
    let catalog = install_packages_catalog();
    let resolver = Resolver::new(&catalog);
    let first = resolver
        .resolve(&SelectionRequest::explicit(["F.sub2", "C"]))
        .unwrap();
    let second = resolver
        .resolve(&SelectionRequest::explicit(["C", "F.sub2"]))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_dependency_of_dependency_chain() {
    let catalog = Catalog::new([
        Component::new("base"),
        Component::new("runtime").depends_on(["base"]),
        Component::new("app").depends_on(["runtime"]),
        Component::new("docs").auto_depends_on(["app"]),
    ])
    .unwrap();
    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["app"]))
        .unwrap();
    assert_eq!(result.components(), ["base", "runtime", "app", "docs"]);
}

#[test]
fn test_autodependency_owner_waits_for_its_dependencies() {
    let catalog = Catalog::new([
        Component::new("A"),
        Component::new("M").auto_depends_on(["A"]).depends_on(["N"]),
        Component::new("N").auto_depends_on(["M"]),
    ])
    .unwrap();
    let resolver = Resolver::new(&catalog);
    assert!(resolver.cyclic_rules().is_empty());

    let result = resolver.resolve(&SelectionRequest::explicit(["A"])).unwrap();
    assert!(result.contains("M"));
    assert!(result.contains("N"));
    assert_well_ordered(&catalog, &result);
    assert!(pos(&result, "A") < pos(&result, "M"));
}

// =============================================================================
// Rejected requests
// =============================================================================

#[test]
fn test_unknown_component_rejected() {
    let catalog = install_packages_catalog();
    let err = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["A", "Unknown"]))
        .unwrap_err();
    assert_eq!(err, SelectionError::NotFound("Unknown".into()));
    assert_eq!(err.to_string(), "Cannot install Unknown. Component not found.");
}

#[test]
fn test_virtual_component_rejected() {
    let catalog = Catalog::new([Component::new("V").virtual_component()]).unwrap();
    let err = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["V"]))
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot install V. Component is virtual.");
}

#[test]
fn test_virtual_component_allowed_as_dependency() {
    let catalog = Catalog::new([
        Component::new("V").virtual_component(),
        Component::new("app").depends_on(["V"]),
    ])
    .unwrap();
    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["app"]))
        .unwrap();
    assert_eq!(result.components(), ["V", "app"]);
}

#[test]
fn test_leaf_only_parent_rejected() {
    let catalog = Catalog::new([
        Component::new("tools").checkable_leaf_only(),
        Component::new("tools.gdb"),
    ])
    .unwrap();
    let resolver = Resolver::new(&catalog);

    let err = resolver
        .resolve(&SelectionRequest::explicit(["tools"]))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot install component tools. Component is not checkable meaning you have to select one of the subcomponents."
    );

    let result = resolver
        .resolve(&SelectionRequest::explicit(["tools.gdb"]))
        .unwrap();
    assert_eq!(result.components(), ["tools", "tools.gdb"]);
}

#[test]
fn test_dependency_only_component_rejected_but_pulled_in() {
    let catalog = Catalog::new([
        Component::new("libfoo").install_only_as_dependency(),
        Component::new("app").depends_on(["libfoo"]),
    ])
    .unwrap();
    let resolver = Resolver::new(&catalog);

    let err = resolver
        .resolve(&SelectionRequest::explicit(["libfoo"]))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot install component libfoo. Component is installed only as a dependency."
    );

    let result = resolver
        .resolve(&SelectionRequest::explicit(["app"]))
        .unwrap();
    assert!(result.contains("libfoo"));
}

#[test]
fn test_selection_error_converts_to_crate_error() {
    let catalog = install_packages_catalog();
    let err: InstallKitError = Resolver::new(&catalog)
        .resolve(&SelectionRequest::explicit(["nope"]))
        .unwrap_err()
        .into();
    assert!(matches!(err, InstallKitError::Selection(_)));
}

// =============================================================================
// Autodependency cycles
// =============================================================================

#[test]
fn test_mutual_autodependencies_never_fire() {
    let catalog = Catalog::new([
        Component::new("X").auto_depends_on(["Y"]),
        Component::new("Y").auto_depends_on(["X"]),
        Component::new("Z"),
    ])
    .unwrap();
    let resolver = Resolver::new(&catalog);
    assert_eq!(resolver.cyclic_rules().len(), 2);

    let result = resolver.resolve(&SelectionRequest::explicit(["X"])).unwrap();
    assert_eq!(result.components(), ["X"]);
}

#[test]
fn test_self_trigger_is_cyclic() {
    let catalog = Catalog::new([
        Component::new("A"),
        Component::new("S").auto_depends_on(["A", "S"]),
    ])
    .unwrap();
    let resolver = Resolver::new(&catalog);
    assert_eq!(resolver.cyclic_rules().len(), 1);

    let result = resolver.resolve(&SelectionRequest::explicit(["A"])).unwrap();
    assert!(!result.contains("S"));
}

// =============================================================================
// Catalog files
// =============================================================================

#[test]
fn test_resolve_catalog_loaded_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"{
            "components": [
                {"id": "core", "forced": true},
                {"id": "editor", "dependencies": ["core"]},
                {"id": "editor.plugins", "checkable_leaf_only": true},
                {"id": "editor.plugins.git", "default_selected": true},
                {"id": "spell", "auto_dependencies": [["editor"]]}
            ]
        }"#,
    )
    .unwrap();
    file.flush().unwrap();

    let catalog = Catalog::load_from_file(file.path()).unwrap();
    assert_eq!(catalog.len(), 5);

    let result = Resolver::new(&catalog)
        .resolve(&SelectionRequest::Default)
        .unwrap();
    assert_eq!(
        result.components(),
        ["core", "editor", "editor.plugins", "editor.plugins.git", "spell"]
    );
    assert_well_ordered(&catalog, &result);
}

#[test]
fn test_catalog_with_dangling_dependency_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(br#"{"components": [{"id": "app", "dependencies": ["ghost"]}]}"#)
        .unwrap();
    file.flush().unwrap();

    let err = Catalog::load_from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("ghost"));
}
