//! Modules and the wires connecting them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, Requirement, SINGLETON_DIRECTIVE};
use crate::value::{ModuleId, Namespace};

/// A resolvable unit: symbolic name, version, declared capabilities and
/// requirements, and — once resolved — an ordered wire list.
///
/// Modules are immutable apart from the one-shot resolution transition,
/// which is guarded by a `OnceLock`.
#[derive(Debug)]
pub struct Module {
    pub(crate) id: ModuleId,
    pub(crate) symbolic_name: String,
    pub(crate) version: semver::Version,
    pub(crate) capabilities: Vec<Arc<Capability>>,
    pub(crate) requirements: Vec<Arc<Requirement>>,
    pub(crate) dynamic_requirements: Vec<Arc<Requirement>>,
    pub(crate) required_environment: Option<String>,
    pub(crate) native_libraries: Vec<String>,
    pub(crate) removal_pending: bool,
    pub(crate) wires: OnceLock<Vec<Wire>>,
}

impl Module {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    pub fn capabilities(&self) -> &[Arc<Capability>] {
        &self.capabilities
    }

    pub fn requirements(&self) -> &[Arc<Requirement>] {
        &self.requirements
    }

    pub fn dynamic_requirements(&self) -> &[Arc<Requirement>] {
        &self.dynamic_requirements
    }

    /// Execution environment this module needs, if any.
    pub fn required_environment(&self) -> Option<&str> {
        self.required_environment.as_deref()
    }

    /// Native libraries this module bundles.
    pub fn native_libraries(&self) -> &[String] {
        &self.native_libraries
    }

    /// A module pending removal is skipped when selecting fragments and
    /// when answering populate-time candidate queries.
    pub fn is_removal_pending(&self) -> bool {
        self.removal_pending
    }

    pub fn is_resolved(&self) -> bool {
        self.wires.get().is_some()
    }

    /// The wires chosen at resolve time; `None` while unresolved.
    pub fn wires(&self) -> Option<&[Wire]> {
        self.wires.get().map(Vec::as_slice)
    }

    /// Commit a wire list, transitioning the module to resolved. Returns
    /// `false` if the module was already resolved.
    pub fn set_wires(&self, wires: Vec<Wire>) -> bool {
        self.wires.set(wires).is_ok()
    }

    /// A fragment declares a host requirement and contributes no class
    /// space of its own.
    pub fn is_fragment(&self) -> bool {
        self.host_requirement().is_some()
    }

    pub fn host_requirement(&self) -> Option<&Arc<Requirement>> {
        self.requirements
            .iter()
            .find(|r| r.namespace() == Namespace::Host)
    }

    /// The module-namespace capability describing this module itself.
    pub fn module_capability(&self) -> Option<&Arc<Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.namespace() == Namespace::Module)
    }

    /// The host-namespace capability fragments attach to, absent for
    /// fragments themselves.
    pub fn host_capability(&self) -> Option<&Arc<Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.namespace() == Namespace::Host)
    }

    /// At most one resolved instance of a singleton's symbolic name may
    /// exist at a time.
    pub fn is_singleton(&self) -> bool {
        self.module_capability()
            .and_then(|c| c.directive(SINGLETON_DIRECTIVE))
            == Some("true")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.symbolic_name, self.version, self.id)
    }
}

/// What kind of visibility a wire grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireKind {
    /// Direct package import.
    Package,
    /// Module-level require; carries the provider's exported and
    /// reexported package names so a consumer knows what becomes visible.
    Module { visible_packages: Vec<String> },
    /// Fragment-to-host attachment.
    Fragment,
}

/// A resolved edge: one module's requirement satisfied by another module's
/// capability. Wires always reference declared (unwrapped) capabilities and
/// requirements; the hosted wrapper forms used during resolution never
/// appear here.
#[derive(Debug, Clone)]
pub struct Wire {
    pub(crate) importer: ModuleId,
    pub(crate) requirement: Arc<Requirement>,
    pub(crate) exporter: ModuleId,
    pub(crate) capability: Arc<Capability>,
    pub(crate) kind: WireKind,
}

impl Wire {
    pub fn new(
        importer: ModuleId,
        requirement: Arc<Requirement>,
        exporter: ModuleId,
        capability: Arc<Capability>,
        kind: WireKind,
    ) -> Self {
        Self {
            importer,
            requirement,
            exporter,
            capability,
            kind,
        }
    }

    pub fn importer(&self) -> ModuleId {
        self.importer
    }

    pub fn exporter(&self) -> ModuleId {
        self.exporter
    }

    pub fn requirement(&self) -> &Arc<Requirement> {
        &self.requirement
    }

    pub fn capability(&self) -> &Arc<Capability> {
        &self.capability
    }

    pub fn kind(&self) -> &WireKind {
        &self.kind
    }

    /// Does this wire make `package` visible to the importer?
    pub fn has_package(&self, package: &str) -> bool {
        match &self.kind {
            WireKind::Package => self.capability.package_name() == Some(package),
            WireKind::Module { visible_packages } => {
                visible_packages.iter().any(|p| p == package)
            }
            WireKind::Fragment => false,
        }
    }

    /// Serializable summary for logs and persistence.
    pub fn summary(&self) -> WireSummary {
        WireSummary {
            importer: self.importer,
            exporter: self.exporter,
            requirement: self.requirement.to_string(),
            capability: self.capability.to_string(),
            kind: match &self.kind {
                WireKind::Package => "package".to_string(),
                WireKind::Module { .. } => "module".to_string(),
                WireKind::Fragment => "fragment".to_string(),
            },
        }
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.requirement, self.capability, self.exporter
        )
    }
}

/// Flat, serializable view of a [`Wire`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSummary {
    pub importer: ModuleId,
    pub exporter: ModuleId,
    pub requirement: String,
    pub capability: String,
    pub kind: String,
}

/// The output of a resolve: every module that became resolved, mapped to
/// its ordered wire list. Keyed by `ModuleId` so iteration order — and
/// therefore any serialized form — is deterministic.
pub type WireMap = BTreeMap<ModuleId, Vec<Wire>>;
