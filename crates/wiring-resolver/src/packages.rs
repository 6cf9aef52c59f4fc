//! Package spaces and uses-constraint consistency.
//!
//! For every module under consideration the resolver computes a `Packages`
//! record: what it exports, imports, requires (module-level, including
//! transitive reexports), and transitively *uses*. A [`Blame`] pairs each
//! capability with the requirement chain that led to it, which is what the
//! conflict messages cite and what the backtracking machinery permutes.
//!
//! Consistency then demands that no module sees two incompatible providers
//! of the same package through different paths. Conflicts queue a
//! permutation (a candidate-set copy with one choice removed) before
//! failing the current branch, so the resolve loop can retry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use wiring_model::{Module, ModuleId, Namespace, WireKind};

use crate::candidates::Candidates;
use crate::error::{ErrorKind, ResolveError, Result};
use crate::host::{CapRef, ReqRef};

/// Identity of a possibly-hosted capability: declaration key plus apparent
/// owner.
type CapKey = ((ModuleId, u32), ModuleId);

/// A chosen capability together with the requirement chain that reached it.
/// Exports carry an empty chain.
#[derive(Debug, Clone)]
pub(crate) struct Blame {
    pub(crate) cap: CapRef,
    pub(crate) reqs: Vec<ReqRef>,
}

impl Blame {
    fn render(&self) -> String {
        let mut out = String::new();
        for req in &self.reqs {
            out.push_str(&req.module().to_string());
            out.push_str(" -> ");
        }
        out.push_str(&self.cap.to_string());
        out
    }
}

/// The package space of one module, transient to one resolve attempt.
#[derive(Debug, Default)]
pub(crate) struct Packages {
    pub(crate) exported: BTreeMap<String, Blame>,
    pub(crate) imported: BTreeMap<String, Vec<Blame>>,
    pub(crate) required: BTreeMap<String, Vec<Blame>>,
    pub(crate) used: BTreeMap<String, Vec<Blame>>,
    exports_computed: bool,
}

pub(crate) type PackageMap = BTreeMap<ModuleId, Packages>;

/// Per-attempt scratch shared across the consistency recursion.
#[derive(Default)]
pub(crate) struct Attempt {
    pub(crate) result_cache: BTreeSet<ModuleId>,
    source_cache: BTreeMap<CapKey, BTreeSet<CapKey>>,
}

/// Guard for one top-level uses merge: (capability, modules it was already
/// merged into). Fresh per incoming blame so distinct chains reaching the
/// same capability each record their own blame.
type UsesCycleMap = BTreeMap<CapKey, BTreeSet<ModuleId>>;

/// Requirement/candidate pairs driving a module's package space: its wires
/// when resolved (plus any dynamic grant in the candidate map), otherwise
/// the first candidate of each effective package/module requirement.
fn requirement_pairs(module: &Arc<Module>, candidates: &Candidates) -> Vec<(ReqRef, CapRef)> {
    if module.is_resolved() {
        let mut pairs: Vec<(ReqRef, CapRef)> = module
            .wires()
            .unwrap_or(&[])
            .iter()
            .filter(|w| !matches!(w.kind(), WireKind::Fragment))
            .map(|w| {
                (
                    ReqRef::Declared(w.requirement().clone()),
                    CapRef::Declared(w.capability().clone()),
                )
            })
            .collect();
        for (req, caps) in candidates.iter() {
            if req.module_id() == module.id() {
                if let Some(cap) = caps.first() {
                    pairs.push((req.clone(), cap.clone()));
                }
            }
        }
        pairs
    } else {
        candidates
            .effective_requirements(module)
            .into_iter()
            .filter(|r| matches!(r.namespace(), Namespace::Package | Namespace::Module))
            .filter_map(|r| {
                candidates
                    .first_candidate(&r)
                    .cloned()
                    .map(|cap| (r, cap))
            })
            .collect()
    }
}

/// Compute the full package space of `module` and, depth-first, of every
/// provider it selects. `cycle` guards the top-level recursion.
pub(crate) fn calculate_package_spaces(
    module: &Arc<Module>,
    candidates: &Candidates,
    pkg_map: &mut PackageMap,
    cycle: &mut BTreeSet<ModuleId>,
) {
    if !cycle.insert(module.id()) {
        return;
    }

    let pairs = requirement_pairs(module, candidates);
    calculate_exported_packages(module, candidates, pkg_map);
    for (req, cap) in &pairs {
        let mut guard = BTreeSet::new();
        merge_candidate_packages(module, req, cap, pkg_map, candidates, &mut guard);
    }
    for (_, cap) in &pairs {
        calculate_package_spaces(&cap.module(), candidates, pkg_map, cycle);
    }

    let mut incoming: Vec<Blame> = Vec::new();
    if let Some(pkgs) = pkg_map.get(&module.id()) {
        incoming.extend(pkgs.imported.values().flatten().cloned());
        incoming.extend(pkgs.required.values().flatten().cloned());
    }
    for blame in incoming {
        let mut uses_cycles = UsesCycleMap::new();
        merge_uses(module, &blame.cap, &blame.reqs, pkg_map, &mut uses_cycles);
    }
}

/// Exports of `module`: its package capabilities (fragment contributions
/// included once merged), minus any export substituted by an import of the
/// same package name.
fn calculate_exported_packages(
    module: &Arc<Module>,
    candidates: &Candidates,
    pkg_map: &mut PackageMap,
) {
    if pkg_map
        .get(&module.id())
        .is_some_and(|p| p.exports_computed)
    {
        return;
    }

    let mut exported: BTreeMap<String, Blame> = BTreeMap::new();
    for cap in candidates.effective_capabilities(module) {
        if cap.namespace() == Namespace::Package {
            if let Some(name) = cap.package_name() {
                exported.entry(name.to_string()).or_insert(Blame {
                    cap: cap.clone(),
                    reqs: Vec::new(),
                });
            }
        }
    }
    // Substitutable exports: an import of the same package wins over the
    // local export once a provider is chosen.
    for (req, cap) in requirement_pairs(module, candidates) {
        if req.namespace() == Namespace::Package {
            if let Some(name) = cap.package_name() {
                exported.remove(name);
            }
        }
    }

    let pkgs = pkg_map.entry(module.id()).or_default();
    pkgs.exported = exported;
    pkgs.exports_computed = true;
}

/// Merge one chosen candidate into `current`'s imported or required maps.
/// Module-namespace candidates contribute their full export set, plus the
/// transitive closure of anything they require with reexport visibility.
fn merge_candidate_packages(
    current: &Arc<Module>,
    current_req: &ReqRef,
    cand_cap: &CapRef,
    pkg_map: &mut PackageMap,
    candidates: &Candidates,
    cycle_guard: &mut BTreeSet<ModuleId>,
) {
    match cand_cap.namespace() {
        Namespace::Package => {
            merge_candidate_package(current, false, current_req, cand_cap, pkg_map);
        }
        Namespace::Module => {
            let provider = cand_cap.module();
            if !cycle_guard.insert(provider.id()) {
                return;
            }
            calculate_exported_packages(&provider, candidates, pkg_map);
            let exports: Vec<Blame> = pkg_map
                .get(&provider.id())
                .map(|p| p.exported.values().cloned().collect())
                .unwrap_or_default();
            for blame in exports {
                merge_candidate_package(current, true, current_req, &blame.cap, pkg_map);
            }
            for (req, cap) in requirement_pairs(&provider, candidates) {
                if req.namespace() == Namespace::Module && req.declared().is_reexport() {
                    merge_candidate_packages(
                        current,
                        current_req,
                        &cap,
                        pkg_map,
                        candidates,
                        cycle_guard,
                    );
                }
            }
        }
        Namespace::Host => {}
    }
}

fn merge_candidate_package(
    current: &Arc<Module>,
    required: bool,
    blame_req: &ReqRef,
    cand_cap: &CapRef,
    pkg_map: &mut PackageMap,
) {
    let Some(name) = cand_cap.package_name() else {
        return;
    };
    let blame = Blame {
        cap: cand_cap.clone(),
        reqs: vec![blame_req.clone()],
    };
    let pkgs = pkg_map.entry(current.id()).or_default();
    let target = if required {
        &mut pkgs.required
    } else {
        &mut pkgs.imported
    };
    target.entry(name.to_string()).or_default().push(blame);
}

/// Propagate `cap`'s declared uses into `current`'s used set, transitively.
/// The cycle map keyed by (capability, visited module) bounds recursion
/// through mutually-using packages.
fn merge_uses(
    current: &Arc<Module>,
    cap: &CapRef,
    blame_reqs: &[ReqRef],
    pkg_map: &mut PackageMap,
    cycles: &mut UsesCycleMap,
) {
    if cap.namespace() != Namespace::Package || cap.module_id() == current.id() {
        return;
    }
    if !cycles.entry(cap.key()).or_default().insert(current.id()) {
        return;
    }

    for used_name in cap.uses().to_vec() {
        // The used package resolves in the *declaring* module's space:
        // its own export first, then whatever it requires or imports.
        let source_blames: Vec<Blame> = match pkg_map.get(&cap.module_id()) {
            Some(pkgs) => {
                if let Some(b) = pkgs.exported.get(&used_name) {
                    vec![b.clone()]
                } else if let Some(bs) = pkgs.required.get(&used_name) {
                    bs.clone()
                } else if let Some(bs) = pkgs.imported.get(&used_name) {
                    bs.clone()
                } else {
                    continue;
                }
            }
            None => continue,
        };
        for blame in source_blames {
            let chain = if blame.reqs.is_empty() {
                blame_reqs.to_vec()
            } else {
                let mut chain = blame_reqs.to_vec();
                if let Some(last) = blame.reqs.last() {
                    chain.push(last.clone());
                }
                chain
            };
            pkg_map
                .entry(current.id())
                .or_default()
                .used
                .entry(used_name.clone())
                .or_default()
                .push(Blame {
                    cap: blame.cap.clone(),
                    reqs: chain.clone(),
                });
            merge_uses(current, &blame.cap, &chain, pkg_map, cycles);
        }
    }
}

/// The package sources of a capability: itself plus, recursively, any
/// required-and-reexported provider of the same package name. Substitutable
/// split packages make several providers interchangeable.
fn package_sources(cap: &CapRef, pkg_map: &PackageMap, attempt: &mut Attempt) -> BTreeSet<CapKey> {
    if let Some(cached) = attempt.source_cache.get(&cap.key()) {
        return cached.clone();
    }
    let mut sources = BTreeSet::new();
    let mut visiting = BTreeSet::new();
    collect_sources(cap, pkg_map, &mut visiting, &mut sources);
    attempt.source_cache.insert(cap.key(), sources.clone());
    sources
}

fn collect_sources(
    cap: &CapRef,
    pkg_map: &PackageMap,
    visiting: &mut BTreeSet<CapKey>,
    out: &mut BTreeSet<CapKey>,
) {
    if !visiting.insert(cap.key()) {
        return;
    }
    out.insert(cap.key());
    if let Some(name) = cap.package_name() {
        if let Some(pkgs) = pkg_map.get(&cap.module_id()) {
            if let Some(blames) = pkgs.required.get(name) {
                for blame in blames {
                    collect_sources(&blame.cap, pkg_map, visiting, out);
                }
            }
        }
    }
}

/// Two capabilities for the same package are compatible when equal or when
/// one's source set contains the other's.
fn is_compatible(a: &CapRef, b: &CapRef, pkg_map: &PackageMap, attempt: &mut Attempt) -> bool {
    if a == b {
        return true;
    }
    let sources_a = package_sources(a, pkg_map, attempt);
    let sources_b = package_sources(b, pkg_map, attempt);
    sources_a.is_superset(&sources_b) || sources_a.is_subset(&sources_b)
}

/// Copy the candidate set, drop `req`'s first candidate, and queue the
/// copy. No-op when no alternative remains.
pub(crate) fn permutate(candidates: &Candidates, req: &ReqRef, permutations: &mut Vec<Candidates>) {
    if candidates.can_remove(req) {
        let mut permutation = candidates.copy();
        permutation.remove_first(req);
        tracing::debug!(requirement = %req, "queueing permutation");
        permutations.push(permutation);
    }
}

/// Like [`permutate`], but skips when a queued permutation already explores
/// a different first candidate for `req`; queueing another copy then only
/// re-walks a branch the queue will reach anyway.
pub(crate) fn permutate_if_needed(
    candidates: &Candidates,
    req: &ReqRef,
    permutations: &mut Vec<Candidates>,
) {
    let Some(caps) = candidates.candidates_for(req) else {
        return;
    };
    if caps.len() <= 1 {
        return;
    }
    let covered = permutations.iter().any(|p| {
        p.candidates_for(req)
            .is_some_and(|pc| pc.first() != caps.first())
    });
    if !covered {
        permutate(candidates, req, permutations);
    }
}

/// Verify `module`'s package space is conflict-free, then recurse into its
/// chosen providers. Conflicts queue permutations before failing so the
/// resolve loop can retry a different branch.
pub(crate) fn check_package_space_consistency(
    module: &Arc<Module>,
    candidates: &Candidates,
    pkg_map: &PackageMap,
    attempt: &mut Attempt,
    uses_permutations: &mut Vec<Candidates>,
    import_permutations: &mut Vec<Candidates>,
) -> Result<()> {
    if module.is_resolved() && candidates.root() != module.id() {
        return Ok(());
    }
    if !attempt.result_cache.insert(module.id()) {
        return Ok(());
    }

    if let Some(pkgs) = pkg_map.get(&module.id()) {
        // Conflicting imports of one package from different providers,
        // possible once fragment requirements merge into a host.
        for (name, blames) in &pkgs.imported {
            let distinct: BTreeSet<CapKey> = blames.iter().map(|b| b.cap.key()).collect();
            if distinct.len() > 1 {
                for blame in blames {
                    if let Some(req) = blame.reqs.first() {
                        permutate_if_needed(candidates, req, import_permutations);
                    }
                }
                return Err(ResolveError::new(
                    ErrorKind::FragmentConflict,
                    module,
                    format!("package {name} imported from multiple conflicting providers"),
                ));
            }
        }

        let mut mutated: BTreeSet<ReqRef> = BTreeSet::new();

        for (name, export_blame) in &pkgs.exported {
            let Some(used_blames) = pkgs.used.get(name) else {
                continue;
            };
            for used in used_blames {
                if is_compatible(&export_blame.cap, &used.cap, pkg_map, attempt) {
                    continue;
                }
                let mut permutation: Option<Candidates> = None;
                for req in &used.reqs {
                    if candidates.can_remove(req) && mutated.insert(req.clone()) {
                        let mut p = candidates.copy();
                        p.remove_first(req);
                        permutation = Some(p);
                        break;
                    }
                }
                if let Some(p) = permutation {
                    uses_permutations.push(p);
                }
                return Err(ResolveError::new(
                    ErrorKind::UsesConflict,
                    module,
                    format!(
                        "package {name} is exported as {} but used via {}",
                        export_blame.cap,
                        used.render()
                    ),
                ));
            }
        }

        for (name, import_blames) in pkgs.imported.iter().chain(pkgs.required.iter()) {
            let Some(used_blames) = pkgs.used.get(name) else {
                continue;
            };
            for import_blame in import_blames {
                for used in used_blames {
                    if is_compatible(&import_blame.cap, &used.cap, pkg_map, attempt) {
                        continue;
                    }
                    let mut permuted_req: Option<ReqRef> = None;
                    let mut permutation: Option<Candidates> = None;
                    for req in &used.reqs {
                        if candidates.can_remove(req) && mutated.insert(req.clone()) {
                            let mut p = candidates.copy();
                            p.remove_first(req);
                            permutation = Some(p);
                            permuted_req = Some(req.clone());
                            break;
                        }
                    }
                    if let Some(p) = permutation {
                        uses_permutations.push(p);
                    }
                    // Encourage independent backtracking of the import
                    // decision itself when the uses fix left it untouched.
                    if let Some(import_req) = import_blame.reqs.first() {
                        if permuted_req.as_ref() != Some(import_req) {
                            permutate_if_needed(candidates, import_req, import_permutations);
                        }
                    }
                    return Err(ResolveError::new(
                        ErrorKind::UsesConflict,
                        module,
                        format!(
                            "package {name} imported via {} but used via {}",
                            import_blame.render(),
                            used.render()
                        ),
                    ));
                }
            }
        }
    }

    for (req, cap) in requirement_pairs(module, candidates) {
        let provider = cap.module();
        if provider.id() == module.id() {
            continue;
        }
        let queued_before = uses_permutations.len() + import_permutations.len();
        if let Err(e) = check_package_space_consistency(
            &provider,
            candidates,
            pkg_map,
            attempt,
            uses_permutations,
            import_permutations,
        ) {
            // Forward progress: when the failing level queued nothing,
            // permute the requirement that led there.
            if uses_permutations.len() + import_permutations.len() == queued_before {
                permutate_if_needed(candidates, &req, import_permutations);
            }
            return Err(e);
        }
    }
    Ok(())
}
