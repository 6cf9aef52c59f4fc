//! Wire map construction from an accepted candidate set.
//!
//! Walks outward from the resolve target, memoized per module, emitting one
//! wire per requirement with a selected candidate: package wires first,
//! then module wires (which carry the provider's visible package list for
//! the loader), then a synthesized host wire per attached fragment. All
//! wires reference declared records; hosted wrappers never leak out.

use std::collections::BTreeSet;
use std::sync::Arc;

use wiring_model::{Module, ModuleId, Namespace, Requirement, Wire, WireKind, WireMap};

use crate::candidates::Candidates;
use crate::host::ReqRef;

pub(crate) fn populate_wire_map(candidates: &Candidates, module: &Arc<Module>, wire_map: &mut WireMap) {
    if module.is_resolved() || wire_map.contains_key(&module.id()) {
        return;
    }
    // Marker first so provider recursion cannot revisit us.
    wire_map.insert(module.id(), Vec::new());

    let mut package_wires: Vec<Wire> = Vec::new();
    let mut module_wires: Vec<Wire> = Vec::new();
    for req in candidates.effective_requirements(module) {
        if req.namespace() == Namespace::Host {
            continue;
        }
        let Some(cap) = candidates.first_candidate(&req).cloned() else {
            continue;
        };
        let provider = cap.module();
        if !provider.is_resolved() {
            populate_wire_map(candidates, &provider, wire_map);
        }
        if provider.id() == module.id() {
            continue;
        }
        match req.namespace() {
            Namespace::Package => package_wires.push(Wire::new(
                module.id(),
                req.declared().clone(),
                cap.module_id(),
                cap.declared().clone(),
                WireKind::Package,
            )),
            Namespace::Module => {
                let mut visited = BTreeSet::new();
                let visible = visible_packages(candidates, &provider, &mut visited);
                module_wires.push(Wire::new(
                    module.id(),
                    req.declared().clone(),
                    cap.module_id(),
                    cap.declared().clone(),
                    WireKind::Module {
                        visible_packages: visible,
                    },
                ));
            }
            Namespace::Host => {}
        }
    }
    package_wires.extend(module_wires);

    if let Some(wrapped) = candidates.wrapped_host(module.id()) {
        for fragment in wrapped.fragments() {
            if let (Some(host_req), Some(host_cap)) =
                (fragment.host_requirement(), module.host_capability())
            {
                wire_map.entry(fragment.id()).or_default().push(Wire::new(
                    fragment.id(),
                    host_req.clone(),
                    module.id(),
                    host_cap.clone(),
                    WireKind::Fragment,
                ));
            }
        }
    }

    tracing::debug!(module = %module, wires = package_wires.len(), "wired");
    wire_map.insert(module.id(), package_wires);
}

/// One new package wire for a granted dynamic import, plus full wirings for
/// any provider pulled in unresolved.
pub(crate) fn populate_dynamic_wire_map(
    candidates: &Candidates,
    module: &Arc<Module>,
    req: &Arc<Requirement>,
    wire_map: &mut WireMap,
) {
    let req_ref = ReqRef::Declared(req.clone());
    let Some(cap) = candidates.first_candidate(&req_ref).cloned() else {
        return;
    };
    let provider = cap.module();
    if !provider.is_resolved() {
        populate_wire_map(candidates, &provider, wire_map);
    }
    wire_map.entry(module.id()).or_default().push(Wire::new(
        module.id(),
        req.clone(),
        cap.module_id(),
        cap.declared().clone(),
        WireKind::Package,
    ));
}

/// Package names a provider makes visible through a module-level require:
/// its own exports plus, transitively, exports of anything it requires with
/// reexport visibility.
fn visible_packages(
    candidates: &Candidates,
    provider: &Arc<Module>,
    visited: &mut BTreeSet<ModuleId>,
) -> Vec<String> {
    if !visited.insert(provider.id()) {
        return Vec::new();
    }
    let mut names: Vec<String> = candidates
        .effective_capabilities(provider)
        .iter()
        .filter(|c| c.namespace() == Namespace::Package)
        .filter_map(|c| c.package_name().map(str::to_string))
        .collect();
    if provider.is_resolved() {
        for wire in provider.wires().unwrap_or(&[]) {
            if let WireKind::Module {
                visible_packages: reexported,
            } = wire.kind()
            {
                if wire.requirement().is_reexport() {
                    names.extend(reexported.iter().cloned());
                }
            }
        }
    } else {
        for req in candidates.effective_requirements(provider) {
            if req.namespace() == Namespace::Module && req.declared().is_reexport() {
                if let Some(cap) = candidates.first_candidate(&req).cloned() {
                    names.extend(visible_packages(candidates, &cap.module(), visited));
                }
            }
        }
    }
    names.sort();
    names.dedup();
    names
}
