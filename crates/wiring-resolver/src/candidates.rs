//! The mutable candidate set a resolve attempt works on.
//!
//! `Candidates` maps every requirement under consideration to its sorted
//! list of satisfying capabilities, with a reverse dependent index used to
//! propagate removals. It is populated transitively from the root module
//! (with reentrancy support for dependency cycles), then prepared: singleton
//! conflicts settled, one fragment per name selected per host, and hosts
//! merged with their fragments.
//!
//! Copies are cheap: the per-permutation state is just the two maps, with
//! capability/requirement records and merged hosts shared structurally.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use wiring_model::{Capability, Module, ModuleId, Namespace, Requirement, ResolverState};

use crate::error::{ErrorKind, ResolveError, Result};
use crate::host::{CapRef, HostModule, ReqRef, compare_candidate_refs};

/// Per-module population progress, scoped to one resolve attempt.
///
/// A module reentered while `InProgress` is a dependency cycle: the
/// reentrant call drains the module's remaining-requirements queue instead
/// of recursing, and the outermost frame commits the local candidate map.
enum PopulateState {
    InProgress {
        cycle_count: usize,
        local_map: Vec<(ReqRef, Vec<CapRef>)>,
        remaining: VecDeque<Arc<Requirement>>,
    },
    Done,
    Failed(ResolveError),
}

pub(crate) struct Candidates {
    root: ModuleId,
    candidate_map: BTreeMap<ReqRef, Vec<CapRef>>,
    dependent_map: BTreeMap<CapRef, BTreeSet<ReqRef>>,
    wrapped_hosts: BTreeMap<ModuleId, Arc<HostModule>>,
    populate_cache: BTreeMap<ModuleId, PopulateState>,
    /// Candidate overrides for requirements whose sets were pre-filtered
    /// (optional fragment hosts).
    forced: BTreeMap<(ModuleId, u32), Vec<Arc<Capability>>>,
}

impl Candidates {
    pub(crate) fn new(root: ModuleId) -> Self {
        Self {
            root,
            candidate_map: BTreeMap::new(),
            dependent_map: BTreeMap::new(),
            wrapped_hosts: BTreeMap::new(),
            populate_cache: BTreeMap::new(),
            forced: BTreeMap::new(),
        }
    }

    pub(crate) fn root(&self) -> ModuleId {
        self.root
    }

    /// Ensure every effective, non-optional requirement of `module`, and
    /// transitively of every unresolved candidate provider, has at least
    /// one candidate.
    pub(crate) fn populate(&mut self, state: &dyn ResolverState, module: &Arc<Module>) -> Result<()> {
        let reentered = match self.populate_cache.get(&module.id()) {
            Some(PopulateState::Done) => return Ok(()),
            Some(PopulateState::Failed(e)) => return Err(e.clone()),
            Some(PopulateState::InProgress { .. }) => true,
            None => false,
        };
        if reentered {
            if let Some(PopulateState::InProgress { cycle_count, .. }) =
                self.populate_cache.get_mut(&module.id())
            {
                *cycle_count += 1;
            }
        } else {
            if let Err(e) = state
                .check_execution_environment(module)
                .and_then(|_| state.check_native_libraries(module))
            {
                let err = ResolveError::new(ErrorKind::EnvironmentCheck, module, e.to_string());
                self.populate_cache
                    .insert(module.id(), PopulateState::Failed(err.clone()));
                return Err(err);
            }
            tracing::debug!(module = %module, "populating candidates");
            let remaining = module
                .requirements()
                .iter()
                .filter(|r| r.is_effective())
                .cloned()
                .collect();
            self.populate_cache.insert(
                module.id(),
                PopulateState::InProgress {
                    cycle_count: 1,
                    local_map: Vec::new(),
                    remaining,
                },
            );
        }

        loop {
            let req = match self.populate_cache.get_mut(&module.id()) {
                Some(PopulateState::InProgress { remaining, .. }) => remaining.pop_front(),
                _ => None,
            };
            let Some(req) = req else { break };
            if let Err(e) = self.populate_requirement(state, module, &req) {
                self.populate_cache
                    .insert(module.id(), PopulateState::Failed(e.clone()));
                return Err(e);
            }
        }

        match self.populate_cache.get_mut(&module.id()) {
            Some(PopulateState::InProgress { cycle_count, .. }) => {
                *cycle_count -= 1;
                if *cycle_count == 0 {
                    // Outermost frame: commit the local map globally.
                    if let Some(PopulateState::InProgress { local_map, .. }) = self
                        .populate_cache
                        .insert(module.id(), PopulateState::Done)
                    {
                        for (req, caps) in local_map {
                            self.add(req, caps);
                        }
                    }
                }
            }
            // A reentrant frame failed this module while we were draining.
            Some(PopulateState::Failed(e)) => return Err(e.clone()),
            _ => {}
        }
        Ok(())
    }

    fn populate_requirement(
        &mut self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        req: &Arc<Requirement>,
    ) -> Result<()> {
        let mut candidates = match self.forced.get(&req.key()) {
            Some(forced) => forced.clone(),
            None => state.candidates(req, true),
        };
        let remembered = self.process_candidates(state, module, &mut candidates);

        if candidates.is_empty() {
            if req.is_optional() {
                return Ok(());
            }
            let mut err = ResolveError::new(
                ErrorKind::MissingRequirement,
                module,
                format!("no providers for {req}"),
            )
            .with_requirement(req);
            if let Some(cause) = remembered {
                err = err.chain(&cause);
            }
            return Err(err);
        }

        let refs = candidates.into_iter().map(CapRef::Declared).collect();
        if let Some(PopulateState::InProgress { local_map, .. }) =
            self.populate_cache.get_mut(&module.id())
        {
            local_map.push((ReqRef::Declared(req.clone()), refs));
        }
        Ok(())
    }

    /// Recursively populate candidate providers, dropping any that fail.
    /// The last failure is returned for diagnostic chaining in case the
    /// requirement ends up empty.
    fn process_candidates(
        &mut self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        candidates: &mut Vec<Arc<Capability>>,
    ) -> Option<ResolveError> {
        let mut remembered = None;
        let mut i = 0;
        while i < candidates.len() {
            let owner = candidates[i].module();
            let needs_populate =
                owner.is_fragment() || (!owner.is_resolved() && owner.id() != module.id());
            let keep = if needs_populate {
                match self.populate(state, &owner) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(candidate = %owner, error = %e, "dropping unpopulatable candidate");
                        remembered = Some(e);
                        false
                    }
                }
            } else {
                true
            };
            if keep {
                i += 1;
            } else {
                candidates.remove(i);
            }
        }
        remembered
    }

    /// Opportunistic population of an optional module, typically a
    /// fragment. Failures are swallowed; returns whether the module ended
    /// up populated.
    ///
    /// A fragment's host candidates are pre-filtered to hosts already
    /// populated by this attempt; with none left the fragment is skipped
    /// without touching any new host.
    pub(crate) fn populate_optional(
        &mut self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
    ) -> bool {
        if module.is_resolved() {
            return false;
        }
        let mut forced_key = None;
        if let Some(host_req) = module.host_requirement() {
            let hosts: Vec<Arc<Capability>> = state
                .candidates(host_req, false)
                .into_iter()
                .filter(|cap| {
                    matches!(
                        self.populate_cache.get(&cap.module_id()),
                        Some(PopulateState::Done)
                    )
                })
                .collect();
            if hosts.is_empty() {
                tracing::debug!(fragment = %module, "skipping fragment; no populated host");
                return false;
            }
            forced_key = Some(host_req.key());
            self.forced.insert(host_req.key(), hosts);
        }

        let populated = match self.populate(state, module) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(module = %module, error = %e, "optional module failed to populate");
                false
            }
        };
        if let Some(key) = forced_key {
            self.forced.remove(&key);
        }
        populated
    }

    /// Seed a dynamic-import resolve: one synthesized requirement with
    /// pre-fetched candidates. Returns false when no candidate survives
    /// provider population.
    pub(crate) fn populate_dynamic(
        &mut self,
        state: &dyn ResolverState,
        module: &Arc<Module>,
        req: Arc<Requirement>,
        mut candidates: Vec<Arc<Capability>>,
    ) -> bool {
        candidates.retain(|cap| cap.module_id() != module.id());
        let _ = self.process_candidates(state, module, &mut candidates);
        if candidates.is_empty() {
            return false;
        }
        self.populate_cache.insert(module.id(), PopulateState::Done);
        self.add(
            ReqRef::Declared(req),
            candidates.into_iter().map(CapRef::Declared).collect(),
        );
        true
    }

    fn add(&mut self, req: ReqRef, mut candidates: Vec<CapRef>) {
        candidates.sort_by(compare_candidate_refs);
        self.candidate_map.insert(req, candidates);
    }

    /// Rebuild the reverse index from the candidate map.
    fn populate_dependents(&mut self) {
        self.dependent_map.clear();
        for (req, caps) in &self.candidate_map {
            for cap in caps {
                self.dependent_map
                    .entry(cap.clone())
                    .or_default()
                    .insert(req.clone());
            }
        }
    }

    /// Settle singletons, select fragments, and merge hosts. Must run after
    /// population and before package-space computation.
    pub(crate) fn prepare(&mut self, state: &dyn ResolverState, root: &Arc<Module>) -> Result<()> {
        self.populate_dependents();
        self.select_singletons(state, root)?;
        let selected = self.select_fragments(root)?;
        self.wrap_hosts(selected);
        self.populate_dependents();
        Ok(())
    }

    /// At most one instance per singleton symbolic name survives. The root
    /// always wins locally; an externally resolved singleton beats any
    /// local candidate and is fatal if it collides with the root itself.
    fn select_singletons(&mut self, state: &dyn ResolverState, root: &Arc<Module>) -> Result<()> {
        let mut groups: BTreeMap<String, BTreeMap<ModuleId, Arc<Module>>> = BTreeMap::new();
        let mut note = |module: Arc<Module>| {
            if module.is_singleton() && !module.is_resolved() {
                groups
                    .entry(module.symbolic_name().to_string())
                    .or_default()
                    .insert(module.id(), module);
            }
        };
        note(root.clone());
        for (req, caps) in &self.candidate_map {
            note(req.module());
            for cap in caps {
                note(cap.declared().module());
            }
        }

        let external = state.resolved_singletons();
        let mut losers: Vec<Arc<Module>> = Vec::new();
        for (name, members) in &groups {
            let external_winner = external.iter().find(|m| m.symbolic_name() == *name);
            let root_member = members.get(&root.id());
            if let (Some(rm), Some(ext)) = (root_member, external_winner) {
                if ext.id() != rm.id() {
                    return Err(ResolveError::new(
                        ErrorKind::SingletonConflict,
                        rm,
                        format!("singleton name already taken by resolved module {ext}"),
                    ));
                }
            }
            let winner: Option<ModuleId> = if let Some(rm) = root_member {
                Some(rm.id())
            } else if external_winner.is_some() {
                None
            } else {
                members
                    .values()
                    .max_by(|a, b| {
                        a.version()
                            .cmp(b.version())
                            .then_with(|| b.id().cmp(&a.id()))
                    })
                    .map(|m| m.id())
            };
            for member in members.values() {
                if Some(member.id()) != winner {
                    tracing::debug!(singleton = %member, "removing losing singleton candidate");
                    losers.push(member.clone());
                }
            }
        }
        for loser in losers {
            self.remove_modules(loser, root.id())?;
        }
        Ok(())
    }

    /// For each (host capability, fragment name) group, keep the highest
    /// version not pending removal; detach every other fragment and cascade
    /// away fragments left hostless. Returns host id -> selected fragments.
    fn select_fragments(&mut self, root: &Arc<Module>) -> Result<BTreeMap<ModuleId, Vec<Arc<Module>>>> {
        let mut host_fragments: BTreeMap<CapRef, BTreeMap<String, Vec<(ReqRef, Arc<Module>)>>> =
            BTreeMap::new();
        for (req, caps) in &self.candidate_map {
            if req.namespace() != Namespace::Host {
                continue;
            }
            let fragment = req.module();
            for cap in caps {
                host_fragments
                    .entry(cap.clone())
                    .or_default()
                    .entry(fragment.symbolic_name().to_string())
                    .or_default()
                    .push((req.clone(), fragment.clone()));
            }
        }

        let mut selected: BTreeMap<ModuleId, Vec<Arc<Module>>> = BTreeMap::new();
        let mut detach: Vec<(ReqRef, CapRef)> = Vec::new();
        for (host_cap, by_name) in &host_fragments {
            for entries in by_name.values() {
                let mut sorted = entries.clone();
                sorted.sort_by(|a, b| {
                    b.1.version()
                        .cmp(a.1.version())
                        .then_with(|| a.1.id().cmp(&b.1.id()))
                });
                let winner = sorted
                    .iter()
                    .find(|(_, f)| !f.is_removal_pending())
                    .map(|(_, f)| f.id());
                for (req, fragment) in &sorted {
                    if Some(fragment.id()) == winner {
                        selected
                            .entry(host_cap.module_id())
                            .or_default()
                            .push(fragment.clone());
                    } else {
                        detach.push((req.clone(), host_cap.clone()));
                    }
                }
            }
        }

        let mut hostless: Vec<Arc<Module>> = Vec::new();
        for (req, cap) in detach {
            if let Some(deps) = self.dependent_map.get_mut(&cap) {
                deps.remove(&req);
            }
            let mut now_empty = false;
            if let Some(cands) = self.candidate_map.get_mut(&req) {
                cands.retain(|c| *c != cap);
                now_empty = cands.is_empty();
            }
            if now_empty {
                self.candidate_map.remove(&req);
                hostless.push(req.module());
            }
        }
        for fragment in hostless {
            tracing::debug!(fragment = %fragment, "removing unselected fragment");
            self.remove_modules(fragment, root.id())?;
        }
        Ok(selected)
    }

    /// Merge each host with its selected fragments and rewrite the maps so
    /// fragment contributions appear under their hosted forms.
    fn wrap_hosts(&mut self, selected: BTreeMap<ModuleId, Vec<Arc<Module>>>) {
        let mut hosted_caps: BTreeMap<(ModuleId, u32), Vec<CapRef>> = BTreeMap::new();
        let mut hosted_reqs: BTreeMap<(ModuleId, u32), Vec<ReqRef>> = BTreeMap::new();
        for (host_id, fragments) in selected {
            let Some(host) = fragments
                .first()
                .and_then(|f| f.host_requirement().cloned())
                .and_then(|req| {
                    self.candidate_map
                        .get(&ReqRef::Declared(req))
                        .and_then(|caps| {
                            caps.iter()
                                .map(CapRef::module)
                                .find(|m| m.id() == host_id)
                        })
                })
            else {
                continue;
            };
            if host.is_resolved() {
                continue;
            }
            let wrapped = Arc::new(HostModule::new(host, fragments));
            for cap in wrapped.capabilities() {
                if let CapRef::Hosted { declared, .. } = cap {
                    hosted_caps.entry(declared.key()).or_default().push(cap.clone());
                }
            }
            for req in wrapped.requirements() {
                if let ReqRef::Hosted { declared, .. } = req {
                    hosted_reqs.entry(declared.key()).or_default().push(req.clone());
                }
            }
            self.wrapped_hosts.insert(host_id, wrapped);
        }

        // Requirements that pointed at a fragment's declared capability now
        // point at its hosted forms.
        for cands in self.candidate_map.values_mut() {
            let needs_rewrite = cands.iter().any(|c| {
                matches!(c, CapRef::Declared(d) if hosted_caps.contains_key(&d.key()))
            });
            if !needs_rewrite {
                continue;
            }
            let mut rewritten = Vec::with_capacity(cands.len());
            for cap in cands.drain(..) {
                match &cap {
                    CapRef::Declared(d) if hosted_caps.contains_key(&d.key()) => {
                        rewritten.extend(hosted_caps[&d.key()].iter().cloned());
                    }
                    _ => rewritten.push(cap),
                }
            }
            rewritten.sort_by(compare_candidate_refs);
            rewritten.dedup();
            *cands = rewritten;
        }

        // A fragment's own requirements are re-keyed per host, inheriting
        // the candidate set already computed for the declared form.
        for (key, hosted_forms) in hosted_reqs {
            let declared_entry = self
                .candidate_map
                .iter()
                .find(|(req, _)| matches!(req, ReqRef::Declared(d) if d.key() == key))
                .map(|(req, caps)| (req.clone(), caps.clone()));
            if let Some((declared_req, caps)) = declared_entry {
                self.candidate_map.remove(&declared_req);
                for hosted in hosted_forms {
                    self.candidate_map.insert(hosted, caps.clone());
                }
            }
        }
    }

    /// Cascading removal: drop the module's requirements and capabilities,
    /// then any non-optional requirement left without candidates pulls its
    /// own module into the cascade. Reaching the root is fatal.
    fn remove_modules(&mut self, start: Arc<Module>, root: ModuleId) -> Result<()> {
        let mut queue = vec![start];
        let mut removed: BTreeSet<ModuleId> = BTreeSet::new();
        while let Some(module) = queue.pop() {
            if !removed.insert(module.id()) {
                continue;
            }
            if module.id() == root {
                return Err(ResolveError::new(
                    ErrorKind::RootRemoved,
                    &module,
                    "cascading removal reached the resolve root",
                ));
            }
            let err = ResolveError::new(
                ErrorKind::MissingRequirement,
                &module,
                "module removed during candidate preparation",
            );
            self.populate_cache
                .insert(module.id(), PopulateState::Failed(err));

            let req_keys: Vec<ReqRef> = self
                .candidate_map
                .keys()
                .filter(|r| r.declared().module_id() == module.id())
                .cloned()
                .collect();
            for req in req_keys {
                if let Some(caps) = self.candidate_map.remove(&req) {
                    for cap in caps {
                        if let Some(deps) = self.dependent_map.get_mut(&cap) {
                            deps.remove(&req);
                        }
                    }
                }
            }

            let cap_keys: Vec<CapRef> = self
                .dependent_map
                .keys()
                .filter(|c| c.declared().module_id() == module.id())
                .cloned()
                .collect();
            for cap in cap_keys {
                let deps = self.dependent_map.remove(&cap).unwrap_or_default();
                for req in deps {
                    let mut now_empty = false;
                    if let Some(cands) = self.candidate_map.get_mut(&req) {
                        cands.retain(|c| *c != cap);
                        now_empty = cands.is_empty();
                    }
                    if now_empty {
                        self.candidate_map.remove(&req);
                        if !req.is_optional() {
                            queue.push(req.module());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&ReqRef, &Vec<CapRef>)> {
        self.candidate_map.iter()
    }

    pub(crate) fn candidates_for(&self, req: &ReqRef) -> Option<&[CapRef]> {
        self.candidate_map.get(req).map(Vec::as_slice)
    }

    pub(crate) fn first_candidate(&self, req: &ReqRef) -> Option<&CapRef> {
        self.candidate_map.get(req).and_then(|caps| caps.first())
    }

    /// A requirement can be permuted only while alternatives remain.
    pub(crate) fn can_remove(&self, req: &ReqRef) -> bool {
        self.candidate_map.get(req).is_some_and(|caps| caps.len() > 1)
    }

    pub(crate) fn remove_first(&mut self, req: &ReqRef) {
        if let Some(caps) = self.candidate_map.get_mut(req) {
            if !caps.is_empty() {
                caps.remove(0);
            }
        }
    }

    pub(crate) fn wrapped_host(&self, id: ModuleId) -> Option<&Arc<HostModule>> {
        self.wrapped_hosts.get(&id)
    }

    /// The module's requirements as the resolver sees them: the merged host
    /// form when fragments attached, the declared effective ones otherwise.
    pub(crate) fn effective_requirements(&self, module: &Arc<Module>) -> Vec<ReqRef> {
        match self.wrapped_hosts.get(&module.id()) {
            Some(wrapped) => wrapped
                .requirements()
                .iter()
                .filter(|r| r.declared().is_effective())
                .cloned()
                .collect(),
            None => module
                .requirements()
                .iter()
                .filter(|r| r.is_effective())
                .cloned()
                .map(ReqRef::Declared)
                .collect(),
        }
    }

    pub(crate) fn effective_capabilities(&self, module: &Arc<Module>) -> Vec<CapRef> {
        match self.wrapped_hosts.get(&module.id()) {
            Some(wrapped) => wrapped.capabilities().to_vec(),
            None => module
                .capabilities()
                .iter()
                .cloned()
                .map(CapRef::Declared)
                .collect(),
        }
    }

    /// Structural copy for a speculative permutation: fresh candidate and
    /// dependent maps, shared merged hosts.
    pub(crate) fn copy(&self) -> Candidates {
        Candidates {
            root: self.root,
            candidate_map: self.candidate_map.clone(),
            dependent_map: self.dependent_map.clone(),
            wrapped_hosts: self.wrapped_hosts.clone(),
            populate_cache: BTreeMap::new(),
            forced: BTreeMap::new(),
        }
    }
}
