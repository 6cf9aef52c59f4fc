//! End-to-end resolve scenarios against an in-memory registry.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;
use wiring_model::{Module, ModuleBuilder, ModuleRegistry, Namespace, WireKind};
use wiring_resolver::{ErrorKind, WiringResolver};

fn wire_fingerprint(resolution: &wiring_resolver::Resolution) -> Vec<(u64, u64, String, String, String)> {
    resolution
        .wire_map
        .values()
        .flatten()
        .map(|w| {
            let s = w.summary();
            (s.importer.0, s.exporter.0, s.requirement, s.capability, s.kind)
        })
        .collect()
}

#[test]
fn test_simple_import_resolves() {
    let mut registry = ModuleRegistry::new();
    let provider = registry
        .install(ModuleBuilder::new("provider", "1.0.0").export_package("util.log", "1.2.0", &[]))
        .unwrap();
    let consumer = registry
        .install(ModuleBuilder::new("consumer", "1.0.0").import_package("util.log"))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &consumer, &[]).unwrap();
    registry.mark_resolved(&resolution.wire_map);

    assert!(consumer.is_resolved());
    assert!(provider.is_resolved());
    let wires = consumer.wires().unwrap();
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].exporter(), provider.id());
    assert_eq!(wires[0].kind(), &WireKind::Package);
}

#[test]
fn test_resolve_is_deterministic() {
    let build = || {
        let mut registry = ModuleRegistry::new();
        for name in ["p1", "p2", "p3"] {
            registry
                .install(
                    ModuleBuilder::new(name, "1.0.0").export_package("api", "1.0.0", &[]),
                )
                .unwrap();
        }
        let root = registry
            .install(
                ModuleBuilder::new("root", "1.0.0")
                    .import_package("api")
                    .import_package_optional("missing"),
            )
            .unwrap();
        (registry, root)
    };

    let (registry_a, root_a) = build();
    let (registry_b, root_b) = build();
    let resolver = WiringResolver::new();
    let a = resolver.resolve(&registry_a, &root_a, &[]).unwrap();
    let b = resolver.resolve(&registry_b, &root_b, &[]).unwrap();
    assert_eq!(wire_fingerprint(&a), wire_fingerprint(&b));
}

#[rstest]
#[case("2.0.0")]
#[case("2.5.0")]
#[case("9.0.0")]
fn test_highest_version_provider_wins(#[case] top: &str) {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("low", "1.0.0").export_package("api", "1.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("mid", "1.0.0").export_package("api", "1.5.0", &[]))
        .unwrap();
    let best = registry
        .install(ModuleBuilder::new("top", "1.0.0").export_package("api", top, &[]))
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("api"))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    assert_eq!(resolution.wire_map[&root.id()][0].exporter(), best.id());
}

#[test]
fn test_every_requirement_gets_exactly_one_wire() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("a", "1.0.0").export_package("pa", "1.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("b", "1.0.0").export_package("pb", "1.0.0", &[]))
        .unwrap();
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .import_package("pa")
                .import_package("pb"),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    let root_wires = &resolution.wire_map[&root.id()];
    assert_eq!(root_wires.len(), 2);
    for req in root.requirements() {
        let matching = root_wires
            .iter()
            .filter(|w| w.requirement().key() == req.key())
            .count();
        assert_eq!(matching, 1, "requirement {req} must have exactly one wire");
    }
}

#[test]
fn test_three_module_cycle_resolves() {
    let mut registry = ModuleRegistry::new();
    let a = registry
        .install(
            ModuleBuilder::new("a", "1.0.0")
                .export_package("pa", "1.0.0", &[])
                .import_package("pb"),
        )
        .unwrap();
    let b = registry
        .install(
            ModuleBuilder::new("b", "1.0.0")
                .export_package("pb", "1.0.0", &[])
                .import_package("pc"),
        )
        .unwrap();
    let c = registry
        .install(
            ModuleBuilder::new("c", "1.0.0")
                .export_package("pc", "1.0.0", &[])
                .import_package("pa"),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &a, &[]).unwrap();
    registry.mark_resolved(&resolution.wire_map);
    assert!(a.is_resolved() && b.is_resolved() && c.is_resolved());
    let total: usize = resolution.wire_map.values().map(Vec::len).sum();
    assert_eq!(total, 3);
}

#[test]
fn test_backtracking_picks_compatible_provider() {
    let mut registry = ModuleRegistry::new();
    let q1 = registry
        .install(ModuleBuilder::new("q1", "1.0.0").export_package("q", "1.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("q2", "1.0.0").export_package("q", "2.0.0", &[]))
        .unwrap();
    // Y sees q 1.0, Z sees q 2.0; both export p and leak q through it.
    let y = registry
        .install(
            ModuleBuilder::new("y", "1.0.0")
                .export_package("p", "1.0.0", &["q"])
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();
    registry
        .install(
            ModuleBuilder::new("z", "1.0.0")
                .export_package("p", "2.0.0", &["q"])
                .requirement(Namespace::Package, "(&(package=q)(version>=2.0.0))", false),
        )
        .unwrap();
    // Root pins q to 1.x, so the default choice of Z's higher-versioned p
    // conflicts and must be backtracked to Y.
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .import_package("p")
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    let root_wires = &resolution.wire_map[&root.id()];
    let p_wire = root_wires
        .iter()
        .find(|w| w.capability().package_name() == Some("p"))
        .unwrap();
    assert_eq!(p_wire.exporter(), y.id());
    let q_wire = root_wires
        .iter()
        .find(|w| w.capability().package_name() == Some("q"))
        .unwrap();
    assert_eq!(q_wire.exporter(), q1.id());
}

#[test]
fn test_unsatisfiable_uses_conflict_is_reported() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("qa", "1.0.0").export_package("q", "1.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("qb", "1.0.0").export_package("q", "2.0.0", &[]))
        .unwrap();
    registry
        .install(ModuleBuilder::new("qx", "1.0.0").export_package("q", "3.0.0", &[]))
        .unwrap();
    registry
        .install(
            ModuleBuilder::new("y", "1.0.0")
                .export_package("p", "1.0.0", &["q"])
                .requirement(Namespace::Package, "(&(package=q)(version<=1.5.0))", false),
        )
        .unwrap();
    registry
        .install(
            ModuleBuilder::new("z", "1.0.0")
                .export_package("p", "2.0.0", &["q"])
                .requirement(
                    Namespace::Package,
                    "(&(package=q)(version>=2.0.0)(version<=2.5.0))",
                    false,
                ),
        )
        .unwrap();
    // Root's own q (3.0) is incompatible with the q leaked by either p
    // provider, so no permutation can succeed.
    let root = registry
        .install(
            ModuleBuilder::new("root", "1.0.0")
                .import_package("p")
                .import_package_versioned("q", "3.0.0"),
        )
        .unwrap();

    let err = WiringResolver::new().resolve(&registry, &root, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UsesConflict);
}

#[test]
fn test_missing_requirement_error_names_module_and_requirement() {
    let mut registry = ModuleRegistry::new();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("absent"))
        .unwrap();

    let err = WiringResolver::new().resolve(&registry, &root, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequirement);
    assert_eq!(err.module_id(), root.id());
    assert!(err.requirement().is_some());
}

#[test]
fn test_optional_import_is_skipped_when_unsatisfiable() {
    let mut registry = ModuleRegistry::new();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package_optional("absent"))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    assert!(resolution.wire_map[&root.id()].is_empty());
}

#[test]
fn test_singleton_invariant_holds_after_resolve() {
    let mut registry = ModuleRegistry::new();
    let v1 = registry
        .install(
            ModuleBuilder::new("single", "1.0.0")
                .singleton()
                .export_package("api", "1.0.0", &[]),
        )
        .unwrap();
    let v2 = registry
        .install(
            ModuleBuilder::new("single", "2.0.0")
                .singleton()
                .export_package("api", "2.0.0", &[]),
        )
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("api"))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    registry.mark_resolved(&resolution.wire_map);
    let resolved: Vec<&Arc<Module>> = registry
        .modules()
        .filter(|m| m.symbolic_name() == "single" && m.is_resolved())
        .collect();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id(), v2.id());
    assert!(!v1.is_resolved());
}

#[test]
fn test_fragment_attaches_with_host_wire() {
    let mut registry = ModuleRegistry::new();
    let host = registry
        .install(ModuleBuilder::new("host", "1.0.0").export_package("api", "1.0.0", &[]))
        .unwrap();
    let frag1 = registry
        .install(ModuleBuilder::new("frag", "1.0.0").fragment_of("host"))
        .unwrap();
    let frag2 = registry
        .install(ModuleBuilder::new("frag", "2.0.0").fragment_of("host"))
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("api"))
        .unwrap();

    let resolution = WiringResolver::new()
        .resolve(&registry, &root, &[frag1.clone(), frag2.clone()])
        .unwrap();
    registry.mark_resolved(&resolution.wire_map);

    // Highest version wins; exactly one host wire, loser absent entirely.
    let frag_wires = &resolution.wire_map[&frag2.id()];
    assert_eq!(frag_wires.len(), 1);
    assert_eq!(frag_wires[0].kind(), &WireKind::Fragment);
    assert_eq!(frag_wires[0].exporter(), host.id());
    assert!(!resolution.wire_map.contains_key(&frag1.id()));
    assert!(frag2.is_resolved());
    assert!(!frag1.is_resolved());
}

#[test]
fn test_fragment_import_wired_through_host() {
    let mut registry = ModuleRegistry::new();
    let util = registry
        .install(ModuleBuilder::new("util", "1.0.0").export_package("util", "1.0.0", &[]))
        .unwrap();
    let host = registry
        .install(ModuleBuilder::new("host", "1.0.0").export_package("api", "1.0.0", &[]))
        .unwrap();
    let fragment = registry
        .install(
            ModuleBuilder::new("frag", "1.0.0")
                .fragment_of("host")
                .import_package("util"),
        )
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("api"))
        .unwrap();

    let resolution = WiringResolver::new()
        .resolve(&registry, &root, &[fragment.clone()])
        .unwrap();

    // The fragment's import surfaces as a wire of the host.
    let host_wires = &resolution.wire_map[&host.id()];
    let util_wire = host_wires
        .iter()
        .find(|w| w.capability().package_name() == Some("util"))
        .unwrap();
    assert_eq!(util_wire.importer(), host.id());
    assert_eq!(util_wire.exporter(), util.id());
    assert_eq!(util_wire.requirement().module_id(), fragment.id());
}

#[test]
fn test_fragment_without_populated_host_is_skipped() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("other-host", "1.0.0"))
        .unwrap();
    let fragment = registry
        .install(ModuleBuilder::new("frag", "1.0.0").fragment_of("other-host"))
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0"))
        .unwrap();

    // The fragment's host is never pulled into this resolve.
    let resolution = WiringResolver::new()
        .resolve(&registry, &root, &[fragment.clone()])
        .unwrap();
    assert!(resolution.wire_map.contains_key(&root.id()));
    assert!(!resolution.wire_map.contains_key(&fragment.id()));
}

#[test]
fn test_conflicting_optional_fragment_is_dropped_and_reported() {
    let mut registry = ModuleRegistry::new();
    let host = registry
        .install(ModuleBuilder::new("host", "1.0.0").export_package("api", "1.0.0", &[]))
        .unwrap();
    // The fragment needs a package nobody provides once its host is
    // chosen, so attaching it can never succeed.
    let fragment = registry
        .install(
            ModuleBuilder::new("frag", "1.0.0")
                .fragment_of("host")
                .import_package("absent"),
        )
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").import_package("api"))
        .unwrap();

    let resolution = WiringResolver::new()
        .resolve(&registry, &root, &[fragment.clone()])
        .unwrap();
    registry.mark_resolved(&resolution.wire_map);
    assert!(host.is_resolved());
    assert!(!fragment.is_resolved());
    assert!(!resolution.wire_map.contains_key(&fragment.id()));
}

#[test]
fn test_require_module_wire_carries_visible_packages() {
    let mut registry = ModuleRegistry::new();
    registry
        .install(ModuleBuilder::new("base", "1.0.0").export_package("base.api", "1.0.0", &[]))
        .unwrap();
    let mid = registry
        .install(
            ModuleBuilder::new("mid", "1.0.0")
                .export_package("mid.api", "1.0.0", &[])
                .require_module("base", true),
        )
        .unwrap();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0").require_module("mid", false))
        .unwrap();

    let resolution = WiringResolver::new().resolve(&registry, &root, &[]).unwrap();
    let root_wires = &resolution.wire_map[&root.id()];
    let module_wire = root_wires
        .iter()
        .find(|w| w.exporter() == mid.id())
        .unwrap();
    match module_wire.kind() {
        WireKind::Module { visible_packages } => {
            assert_eq!(visible_packages, &["base.api".to_string(), "mid.api".to_string()]);
        }
        other => panic!("expected module wire, got {other:?}"),
    }
}

#[test]
fn test_resolving_resolved_module_is_a_no_op() {
    let mut registry = ModuleRegistry::new();
    let root = registry
        .install(ModuleBuilder::new("root", "1.0.0"))
        .unwrap();
    let resolver = WiringResolver::new();
    let first = resolver.resolve(&registry, &root, &[]).unwrap();
    registry.mark_resolved(&first.wire_map);

    let second = resolver.resolve(&registry, &root, &[]).unwrap();
    assert!(second.wire_map.is_empty());
}
