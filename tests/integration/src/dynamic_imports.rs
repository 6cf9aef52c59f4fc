//! Dynamic import grants against already-resolved modules.

use pretty_assertions::assert_eq;
use wiring_model::{ModuleBuilder, ModuleRegistry, WireKind};
use wiring_resolver::WiringResolver;

#[test]
fn test_wildcard_dynamic_import_is_granted() {
    let mut registry = ModuleRegistry::new();
    let provider = registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("extra", "1.0.0", &[]))
        .unwrap();
    let app = registry
        .install(ModuleBuilder::new("app", "1.0.0").dynamic_import("*"))
        .unwrap();

    let resolver = WiringResolver::new();
    let base = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&base.wire_map);

    let grant = resolver
        .resolve_dynamic(&registry, &app, "extra", &[])
        .unwrap()
        .expect("wildcard dynamic import should be granted");
    registry.mark_resolved(&grant.wire_map);

    let app_wires = &grant.wire_map[&app.id()];
    assert_eq!(app_wires.len(), 1);
    assert_eq!(app_wires[0].exporter(), provider.id());
    assert_eq!(app_wires[0].kind(), &WireKind::Package);
    assert!(provider.is_resolved());
}

#[test]
fn test_dynamic_grant_pulls_in_unresolved_provider_chain() {
    let mut registry = ModuleRegistry::new();
    let base = registry
        .install(ModuleBuilder::new("base", "1.0.0").export_package("base", "1.0.0", &[]))
        .unwrap();
    let provider = registry
        .install(
            ModuleBuilder::new("provider", "1.0.0")
                .export_package("extra", "1.0.0", &[])
                .import_package("base"),
        )
        .unwrap();
    let app = registry
        .install(ModuleBuilder::new("app", "1.0.0").dynamic_import("extra"))
        .unwrap();

    let resolver = WiringResolver::new();
    let first = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&first.wire_map);

    let grant = resolver
        .resolve_dynamic(&registry, &app, "extra", &[])
        .unwrap()
        .unwrap();
    // The provider arrives fully wired, including its own dependencies.
    assert_eq!(grant.wire_map[&provider.id()].len(), 1);
    assert_eq!(grant.wire_map[&provider.id()][0].exporter(), base.id());
}

#[test]
fn test_dynamic_request_refused_without_declaration() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("extra", "1.0.0", &[]))
        .unwrap();
    let app = registry.install(ModuleBuilder::new("app", "1.0.0")).unwrap();

    let resolver = WiringResolver::new();
    let base = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&base.wire_map);

    assert!(resolver.resolve_dynamic(&registry, &app, "extra", &[]).unwrap().is_none());
}

#[test]
fn test_dynamic_request_refused_for_mismatched_pattern() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("extra", "1.0.0", &[]))
        .unwrap();
    let app = registry
        .install(ModuleBuilder::new("app", "1.0.0").dynamic_import("other.pkg"))
        .unwrap();

    let resolver = WiringResolver::new();
    let base = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&base.wire_map);

    assert!(resolver.resolve_dynamic(&registry, &app, "extra", &[]).unwrap().is_none());
}

#[test]
fn test_dynamic_request_refused_for_own_export() {
    let mut registry = ModuleRegistry::new();
    let app = registry
        .install(
            ModuleBuilder::new("app", "1.0.0")
                .export_package("own", "1.0.0", &[])
                .dynamic_import("*"),
        )
        .unwrap();

    let resolver = WiringResolver::new();
    let base = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&base.wire_map);

    assert!(resolver.resolve_dynamic(&registry, &app, "own", &[]).unwrap().is_none());
}

#[test]
fn test_dynamic_request_refused_when_statically_wired() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("extra", "1.0.0", &[]))
        .unwrap();
    let app = registry
        .install(
            ModuleBuilder::new("app", "1.0.0")
                .import_package("extra")
                .dynamic_import("*"),
        )
        .unwrap();

    let resolver = WiringResolver::new();
    let base = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&base.wire_map);

    // Already visible through the static wire.
    assert!(resolver.resolve_dynamic(&registry, &app, "extra", &[]).unwrap().is_none());
}

#[test]
fn test_dynamic_request_refused_without_provider() {
    let mut registry = ModuleRegistry::new();
    let app = registry
        .install(ModuleBuilder::new("app", "1.0.0").dynamic_import("*"))
        .unwrap();

    let resolver = WiringResolver::new();
    let base = resolver.resolve(&registry, &app, &[]).unwrap();
    registry.mark_resolved(&base.wire_map);

    assert!(resolver.resolve_dynamic(&registry, &app, "ghost", &[]).unwrap().is_none());
}

#[test]
fn test_dynamic_request_refused_for_unresolved_module() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("extra", "1.0.0", &[]))
        .unwrap();
    let app = registry
        .install(ModuleBuilder::new("app", "1.0.0").dynamic_import("*"))
        .unwrap();

    let resolver = WiringResolver::new();
    assert!(resolver.resolve_dynamic(&registry, &app, "extra", &[]).unwrap().is_none());
}
