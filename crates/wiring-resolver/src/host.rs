//! Hosted wrapping of capabilities and requirements.
//!
//! When a fragment is merged into a host, its capabilities and requirements
//! must act as if the host declared them, without losing their original
//! identity. Rather than subclassing, declarations live behind tagged
//! references: [`CapRef::Declared`] is a capability as written, while
//! [`CapRef::Hosted`] is the same declaration attributed to a different
//! apparent module. Equality and ordering take both the declaration and the
//! apparent owner into account, so the same fragment capability attached to
//! two hosts yields two distinct candidates.
//!
//! The wrapper layer is internal to resolution. Wires always unwrap back to
//! the declared records.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use wiring_model::{Capability, Module, ModuleId, Namespace, Requirement};

/// A capability, possibly re-attributed to a host module.
#[derive(Debug, Clone)]
pub enum CapRef {
    Declared(Arc<Capability>),
    Hosted {
        declared: Arc<Capability>,
        host: Arc<Module>,
    },
}

impl CapRef {
    pub fn declared(&self) -> &Arc<Capability> {
        match self {
            CapRef::Declared(c) => c,
            CapRef::Hosted { declared, .. } => declared,
        }
    }

    /// The module this capability is attributed to for resolution purposes.
    pub fn module(&self) -> Arc<Module> {
        match self {
            CapRef::Declared(c) => c.module(),
            CapRef::Hosted { host, .. } => host.clone(),
        }
    }

    pub fn module_id(&self) -> ModuleId {
        match self {
            CapRef::Declared(c) => c.module_id(),
            CapRef::Hosted { host, .. } => host.id(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.declared().namespace()
    }

    pub fn package_name(&self) -> Option<&str> {
        self.declared().package_name()
    }

    pub fn uses(&self) -> &[String] {
        self.declared().uses()
    }

    /// Identity: the declaration plus the apparent owner.
    pub fn key(&self) -> ((ModuleId, u32), ModuleId) {
        (self.declared().key(), self.module_id())
    }
}

impl PartialEq for CapRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CapRef {}

impl PartialOrd for CapRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::hash::Hash for CapRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for CapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapRef::Declared(c) => write!(f, "{c}"),
            CapRef::Hosted { declared, host } => write!(f, "{declared} hosted by {host}"),
        }
    }
}

/// A requirement, possibly re-attributed to a host module.
#[derive(Debug, Clone)]
pub enum ReqRef {
    Declared(Arc<Requirement>),
    Hosted {
        declared: Arc<Requirement>,
        host: Arc<Module>,
    },
}

impl ReqRef {
    pub fn declared(&self) -> &Arc<Requirement> {
        match self {
            ReqRef::Declared(r) => r,
            ReqRef::Hosted { declared, .. } => declared,
        }
    }

    pub fn module(&self) -> Arc<Module> {
        match self {
            ReqRef::Declared(r) => r.module(),
            ReqRef::Hosted { host, .. } => host.clone(),
        }
    }

    pub fn module_id(&self) -> ModuleId {
        match self {
            ReqRef::Declared(r) => r.module_id(),
            ReqRef::Hosted { host, .. } => host.id(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.declared().namespace()
    }

    pub fn is_optional(&self) -> bool {
        self.declared().is_optional()
    }

    pub fn key(&self) -> ((ModuleId, u32), ModuleId) {
        (self.declared().key(), self.module_id())
    }
}

impl PartialEq for ReqRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ReqRef {}

impl PartialOrd for ReqRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReqRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::hash::Hash for ReqRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ReqRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReqRef::Declared(r) => write!(f, "{r}"),
            ReqRef::Hosted { declared, host } => write!(f, "{declared} hosted by {host}"),
        }
    }
}

/// Candidate order over possibly-hosted capabilities: the canonical order
/// from the model, but with the resolved check applied to the *apparent*
/// owner so a fragment capability inherits its host's resolved state.
pub fn compare_candidate_refs(a: &CapRef, b: &CapRef) -> Ordering {
    let a_resolved = a.module().is_resolved();
    let b_resolved = b.module().is_resolved();
    match (a_resolved, b_resolved) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    wiring_model::compare_candidates(a.declared(), b.declared())
        .then_with(|| a.module_id().cmp(&b.module_id()))
}

/// A host module with its selected fragments merged in: the union of their
/// capabilities and requirements, fragment contributions wrapped as hosted.
///
/// Built once per resolve attempt during candidate preparation, discarded
/// after the wiring is computed.
#[derive(Debug)]
pub struct HostModule {
    fragments: Vec<Arc<Module>>,
    capabilities: Vec<CapRef>,
    requirements: Vec<ReqRef>,
}

impl HostModule {
    pub fn new(host: Arc<Module>, mut fragments: Vec<Arc<Module>>) -> Self {
        fragments.sort_by_key(|f| f.id());
        fragments.dedup_by_key(|f| f.id());

        let mut capabilities: Vec<CapRef> = host
            .capabilities()
            .iter()
            .cloned()
            .map(CapRef::Declared)
            .collect();
        let mut requirements: Vec<ReqRef> = host
            .requirements()
            .iter()
            .cloned()
            .map(ReqRef::Declared)
            .collect();
        for fragment in &fragments {
            // Fragments contribute their package exports and their
            // non-host requirements; identity stays with the fragment.
            for cap in fragment.capabilities() {
                if cap.namespace() == Namespace::Package {
                    capabilities.push(CapRef::Hosted {
                        declared: cap.clone(),
                        host: host.clone(),
                    });
                }
            }
            for req in fragment.requirements() {
                if req.namespace() != Namespace::Host {
                    requirements.push(ReqRef::Hosted {
                        declared: req.clone(),
                        host: host.clone(),
                    });
                }
            }
        }

        Self {
            fragments,
            capabilities,
            requirements,
        }
    }

    pub fn fragments(&self) -> &[Arc<Module>] {
        &self.fragments
    }

    pub fn capabilities(&self) -> &[CapRef] {
        &self.capabilities
    }

    pub fn requirements(&self) -> &[ReqRef] {
        &self.requirements
    }
}
