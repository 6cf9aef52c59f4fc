//! The resolve engine: backtracking search over candidate permutations.
//!
//! Each attempt pops the next permutation (uses-derived fixes before plain
//! import backtracking), recomputes package spaces from scratch, and runs
//! the consistency check. A conflict queues refined permutations and fails
//! the branch; success converts the surviving candidate set into a wire
//! map. When every permutation is exhausted and the final failure traces to
//! one of the opportunistic fragments, that fragment is dropped and the
//! whole resolve restarts with the smaller set.

use std::collections::BTreeSet;
use std::sync::Arc;

use wiring_model::{
    Module, Namespace, PACKAGE_ATTR, Requirement, ResolverState, Value, WireMap,
};

use crate::candidates::Candidates;
use crate::error::{ErrorKind, ResolveError, Result};
use crate::host::ReqRef;
use crate::packages::{
    Attempt, PackageMap, calculate_package_spaces, check_package_space_consistency,
};
use crate::wires::{populate_dynamic_wire_map, populate_wire_map};

/// The outcome of a successful resolve.
#[derive(Debug)]
pub struct Resolution {
    /// Every module that became resolved, mapped to its ordered wires.
    pub wire_map: WireMap,
    /// Fragments from the caller's set that were dropped to reach a
    /// consistent wiring.
    pub skipped_fragments: Vec<Arc<Module>>,
}

/// Stateless resolve engine; all per-call state lives on the stack, so
/// concurrent resolves against independent modules are naturally isolated.
#[derive(Debug, Default)]
pub struct WiringResolver {
    _private: (),
}

impl WiringResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `module` and everything it transitively pulls in, attempting
    /// to attach the given fragments opportunistically.
    ///
    /// Returns the wire map for every module that became resolved, or the
    /// final error once every permutation and fragment subset is exhausted.
    /// The caller is expected to commit the wire map to its state (see
    /// `ModuleRegistry::mark_resolved`).
    pub fn resolve(
        &self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        fragments: &[Arc<Module>],
    ) -> Result<Resolution> {
        if module.is_resolved() {
            return Ok(Resolution {
                wire_map: WireMap::new(),
                skipped_fragments: Vec::new(),
            });
        }
        let mut pool: Vec<Arc<Module>> = fragments.to_vec();
        let mut skipped: Vec<Arc<Module>> = Vec::new();
        loop {
            match self.try_resolve(state, module, &pool) {
                Ok(wire_map) => {
                    return Ok(Resolution {
                        wire_map,
                        skipped_fragments: skipped,
                    });
                }
                Err(e) => {
                    // A failure attributed to an opportunistic fragment is
                    // not final: retry without it.
                    if let Some(pos) = pool.iter().position(|f| f.id() == e.module_id()) {
                        let dropped = pool.remove(pos);
                        tracing::debug!(fragment = %dropped, error = %e, "dropping fragment and retrying");
                        skipped.push(dropped);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn try_resolve(
        &self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        fragments: &[Arc<Module>],
    ) -> Result<WireMap> {
        let mut candidates = Candidates::new(module.id());
        candidates.populate(state, module)?;
        for fragment in fragments {
            candidates.populate_optional(state, fragment);
        }
        candidates.prepare(state, module)?;
        self.permutation_loop(module, candidates, |current| {
            let mut wire_map = WireMap::new();
            populate_wire_map(current, module, &mut wire_map);
            wire_map
        })
    }

    /// Resolve a dynamic package import for an already-resolved module.
    ///
    /// Returns `Ok(None)` when the request is simply not grantable: the
    /// module is unresolved, the package is already visible through its
    /// wires or its own exports, no dynamic requirement covers it, or no
    /// provider exists. Errors are reserved for genuine conflicts found
    /// while wiring a matching provider in.
    pub fn resolve_dynamic(
        &self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        package: &str,
        fragments: &[Arc<Module>],
    ) -> Result<Option<Resolution>> {
        let Some(wires) = module.wires() else {
            return Ok(None);
        };
        if wires.iter().any(|w| w.has_package(package)) {
            return Ok(None);
        }
        if module
            .capabilities()
            .iter()
            .any(|c| c.namespace() == Namespace::Package && c.package_name() == Some(package))
        {
            return Ok(None);
        }
        let probe = vec![(PACKAGE_ATTR.to_string(), Value::from(package))];
        if !module
            .dynamic_requirements()
            .iter()
            .any(|r| r.namespace() == Namespace::Package && r.filter().matches(&probe))
        {
            return Ok(None);
        }

        let synthetic = Requirement::synthetic_package(module, package);
        let providers = state.candidates(&synthetic, false);
        if providers.is_empty() {
            return Ok(None);
        }

        let mut pool: Vec<Arc<Module>> = fragments.to_vec();
        let mut skipped: Vec<Arc<Module>> = Vec::new();
        loop {
            match self.try_resolve_dynamic(state, module, &synthetic, providers.clone(), &pool) {
                Ok(None) => return Ok(None),
                Ok(Some(wire_map)) => {
                    return Ok(Some(Resolution {
                        wire_map,
                        skipped_fragments: skipped,
                    }));
                }
                Err(e) => {
                    if let Some(pos) = pool.iter().position(|f| f.id() == e.module_id()) {
                        skipped.push(pool.remove(pos));
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn try_resolve_dynamic(
        &self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        synthetic: &Arc<Requirement>,
        providers: Vec<Arc<wiring_model::Capability>>,
        fragments: &[Arc<Module>],
    ) -> Result<Option<WireMap>> {
        let mut candidates = Candidates::new(module.id());
        if !candidates.populate_dynamic(state, module, synthetic.clone(), providers) {
            return Ok(None);
        }
        for fragment in fragments {
            candidates.populate_optional(state, fragment);
        }
        candidates.prepare(state, module)?;
        if candidates
            .first_candidate(&ReqRef::Declared(synthetic.clone()))
            .is_none()
        {
            return Ok(None);
        }
        let wire_map = self.permutation_loop(module, candidates, |current| {
            let mut wire_map = WireMap::new();
            populate_dynamic_wire_map(current, module, synthetic, &mut wire_map);
            wire_map
        })?;
        Ok(Some(wire_map))
    }

    /// Try candidate permutations until one passes the consistency check.
    /// Uses-derived permutations take priority over plain import
    /// backtracking; each permutation strictly shrinks some candidate list,
    /// which bounds the search.
    fn permutation_loop(
        &self,
        module: &Arc<Module>,
        initial: Candidates,
        build_wires: impl Fn(&Candidates) -> WireMap,
    ) -> Result<WireMap> {
        let mut uses_permutations: Vec<Candidates> = vec![initial];
        let mut import_permutations: Vec<Candidates> = Vec::new();
        let mut last_error: Option<ResolveError> = None;
        let mut attempts = 0usize;

        loop {
            let current = if !uses_permutations.is_empty() {
                uses_permutations.remove(0)
            } else if !import_permutations.is_empty() {
                import_permutations.remove(0)
            } else {
                break;
            };
            attempts += 1;

            let mut pkg_map = PackageMap::new();
            let mut attempt = Attempt::default();
            let mut cycle = BTreeSet::new();
            calculate_package_spaces(module, &current, &mut pkg_map, &mut cycle);

            match check_package_space_consistency(
                module,
                &current,
                &pkg_map,
                &mut attempt,
                &mut uses_permutations,
                &mut import_permutations,
            ) {
                Ok(()) => {
                    tracing::debug!(module = %module, attempts, "consistent wiring found");
                    return Ok(build_wires(&current));
                }
                Err(e) => {
                    tracing::debug!(module = %module, attempts, error = %e, "permutation rejected");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ResolveError::new(
                ErrorKind::MissingRequirement,
                module,
                "no viable candidate assignment",
            )
        }))
    }
}
