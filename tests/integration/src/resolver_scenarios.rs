//! Cross-crate resolve scenarios: registry, resolver, and wire maps
//! working together.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use wiring_model::{Module, ModuleBuilder, ModuleId, ModuleRegistry, Namespace, WireKind, WireSummary};
use wiring_resolver::{ErrorKind, Resolution, WiringResolver};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn summaries(resolution: &Resolution) -> Vec<WireSummary> {
    resolution.wire_map.values().flatten().map(|w| w.summary()).collect()
}

/// Which module provides `package` to `module`: a wire if one covers it,
/// else the module's own export.
fn provider_of(module: &Arc<Module>, package: &str) -> Option<ModuleId> {
    if let Some(wire) = module
        .wires()
        .unwrap_or(&[])
        .iter()
        .find(|w| w.has_package(package))
    {
        return Some(wire.exporter());
    }
    module
        .capabilities()
        .iter()
        .any(|c| c.package_name() == Some(package))
        .then(|| module.id())
}

/// Scan a committed wiring: for every wire, every package the provider's
/// capability uses must reach importer and exporter from the same module.
fn assert_no_uses_conflicts(registry: &ModuleRegistry) {
    for module in registry.modules().filter(|m| m.is_resolved()) {
        for wire in module.wires().unwrap_or(&[]) {
            let exporter = registry.module(wire.exporter()).unwrap();
            for used in wire.capability().uses() {
                let importer_view = provider_of(module, used);
                let exporter_view = provider_of(&exporter, used);
                if let (Some(a), Some(b)) = (importer_view, exporter_view) {
                    assert_eq!(
                        a, b,
                        "{module} and {exporter} disagree on the provider of {used}"
                    );
                }
            }
        }
    }
}

#[test]
fn test_wire_map_serializes_deterministically() {
    let build_and_resolve = || {
        let mut registry = ModuleRegistry::new();
        registry
            .install(ModuleBuilder::new("base", "1.0.0").export_package("base", "1.0.0", &[]))
            .unwrap();
        registry
            .install(
                ModuleBuilder::new("lib", "1.0.0")
                    .export_package("lib", "1.0.0", &["base"])
                    .import_package("base"),
            )
            .unwrap();
        let app = registry
            .install(
                ModuleBuilder::new("app", "1.0.0")
                    .import_package("lib")
                    .import_package("base"),
            )
            .unwrap();
        let resolution = WiringResolver::new().resolve(&registry, &app, &[]).unwrap();
        serde_json::to_string(&summaries(&resolution)).unwrap()
    };

    assert_eq!(build_and_resolve(), build_and_resolve());
}

#[test]
fn test_execution_environment_gates_resolution() {
    let mut registry = ModuleRegistry::new();
    registry.add_environment("rt-1.0");
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").requires_environment("rt-2.0"))
        .unwrap();

    let err = WiringResolver::new().resolve(&registry, &root, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EnvironmentCheck);
    assert_eq!(err.module_id(), root.id());
}

#[test]
fn test_native_library_gates_provider_choice() {
    let mut registry = ModuleRegistry::new();
    registry.limit_native_libraries(["libz"]);
    // The preferred provider needs an unavailable native library and must
    // be dropped during population in favor of the plain one.
    registry
        .install(
            ModuleBuilder::new("fast", "1.0.0")
                .export_package("codec", "2.0.0", &[])
                .native_library("libturbo"),
        )
        .unwrap();
    let plain = registry
        .install(ModuleBuilder::new("plain", "1.0.0").export_package("codec", "1.0.0", &[]))
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("codec"))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    assert_eq!(resolution.wire_map[&root.id()][0].exporter(), plain.id());
}

#[test]
fn test_removal_pending_provider_is_hidden() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(
            ModuleBuilder::new("old", "2.0.0")
                .export_package("api", "2.0.0", &[])
                .removal_pending(),
        )
        .unwrap();
    let live = registry
        .install(ModuleBuilder::new("new", "1.0.0").export_package("api", "1.0.0", &[]))
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("api"))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    assert_eq!(resolution.wire_map[&root.id()][0].exporter(), live.id());
}

#[test]
fn test_substitutable_export_wires_to_external_provider() {
    let mut registry = ModuleRegistry::new();
    let external = registry
        .install(ModuleBuilder::new("external", "1.0.0").export_package("q", "2.0.0", &[]))
        .unwrap();
    // Exports q itself but also imports it; the import substitutes.
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .export_package("q", "1.0.0", &[])
                .import_package("q"),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    registry.mark_resolved(&resolution.wire_map);
    let wires = root.wires().unwrap();
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].exporter(), external.id());
}

#[test]
fn test_deep_reexport_chain_is_visible_at_the_top() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("l0", "1.0.0").export_package("p0", "1.0.0", &[]))
        .unwrap();
    registry
        .install(
            ModuleBuilder::new("l1", "1.0.0")
                .export_package("p1", "1.0.0", &[])
                .require_module("l0", true),
        )
        .unwrap();
    let l2 = registry
        .install(
            ModuleBuilder::new("l2", "1.0.0")
                .export_package("p2", "1.0.0", &[])
                .require_module("l1", true),
        )
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").require_module("l2", false))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    let wire = resolution.wire_map[&root.id()]
        .iter()
        .find(|w| w.exporter() == l2.id())
        .unwrap();
    match wire.kind() {
        WireKind::Module { visible_packages } => {
            assert_eq!(
                visible_packages,
                &["p0".to_string(), "p1".to_string(), "p2".to_string()]
            );
        }
        other => panic!("expected module wire, got {other:?}"),
    }
}

#[test]
fn test_backtracking_across_many_providers_terminates() {
    init_tracing();
    let mut registry = ModuleRegistry::new();
    let wanted = registry
        .install(ModuleBuilder::new("q-wanted", "1.0.0").export_package("q", "1.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("q-other", "1.0.0").export_package("q", "9.0.0", &[]))
        .unwrap();
    // Several p providers, each leaking a q the root cannot accept except
    // through the lowest-versioned one.
    for version in ["5.0.0", "4.0.0", "3.0.0", "2.0.0"] {
        registry
            .install(
                ModuleBuilder::new(format!("p{version}"), version)
                    .export_package("p", version, &["q"])
                    .import_package_versioned("q", "9.0.0"),
            )
            .unwrap();
    }
    let good = registry
        .install(
            ModuleBuilder::new("p-good", "1.0.0")
                .export_package("p", "1.0.0", &["q"])
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .import_package("p")
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    let wires = &resolution.wire_map[&root.id()];
    let p_wire = wires
        .iter()
        .find(|w| w.capability().package_name() == Some("p"))
        .unwrap();
    assert_eq!(p_wire.exporter(), good.id());
    let q_wire = wires
        .iter()
        .find(|w| w.capability().package_name() == Some("q"))
        .unwrap();
    assert_eq!(q_wire.exporter(), wanted.id());
}

#[test]
fn test_final_wiring_is_free_of_uses_conflicts() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("q-wanted", "1.0.0").export_package("q", "1.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("q-other", "1.0.0").export_package("q", "9.0.0", &[]))
        .unwrap();
    for version in ["5.0.0", "4.0.0", "3.0.0", "2.0.0"] {
        registry
            .install(
                ModuleBuilder::new(format!("p{version}"), version)
                    .export_package("p", version, &["q"])
                    .import_package_versioned("q", "9.0.0"),
            )
            .unwrap();
    }
    registry
        .install(
            ModuleBuilder::new("p-good", "1.0.0")
                .export_package("p", "1.0.0", &["q"])
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .import_package("p")
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    registry.mark_resolved(&resolution.wire_map);
    // The invariant holds for every resolved module, not just the root.
    assert_no_uses_conflicts(&registry);
}

// Documented edge of the source-set compatibility test: a provider that
// reexports another provider's package is substitutable for it, so two
// different capabilities for the same package can coexist.
#[test]
fn test_split_package_sources_are_substitutable() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("base", "1.0.0").export_package("q", "1.0.0", &[]))
        .unwrap();
    let agg = registry
        .install(
            ModuleBuilder::new("agg", "1.0.0")
                .export_package("q", "2.0.0", &[])
                .require_module("base", true),
        )
        .unwrap();
    registry
        .install(
            ModuleBuilder::new("lib", "1.0.0")
                .export_package("p", "1.0.0", &["q"])
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();
    // Root sees q directly from agg but also through lib, which is pinned
    // to base's q. agg's source set contains base's, so both views agree.
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .import_package("p")
                .import_package("q"),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    let q_wire = resolution.wire_map[&root.id()]
        .iter()
        .find(|w| w.capability().package_name() == Some("q"))
        .unwrap();
    assert_eq!(q_wire.exporter(), agg.id());
}

#[test]
fn test_resolved_modules_are_reused_not_rewired() {
    let mut registry = ModuleRegistry::new();
    let provider = registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("api", "1.0.0", &[]))
        .unwrap();
    let first = registry
        .install(ModuleBuilder::new("first", "1.0.0").import_package("api"))
        .unwrap();
    let second = registry
        .install(ModuleBuilder::new("second", "1.0.0").import_package("api"))
        .unwrap();

    let resolver = WiringResolver::new();
    let r1 = resolver.resolve(&registry, &first, &[]).unwrap();
    registry.mark_resolved(&r1.wire_map);
    assert!(provider.is_resolved());

    let r2 = resolver.resolve(&registry, &second, &[]).unwrap();
    registry.mark_resolved(&r2.wire_map);
    // Only the new consumer appears; the provider keeps its wiring.
    assert!(!r2.wire_map.contains_key(&provider.id()));
    assert_eq!(r2.wire_map[&second.id()][0].exporter(), provider.id());
}
