//! Capability and requirement records.
//!
//! Both are immutable once created and shared via `Arc`. Identity is the
//! pair (owning module id, declaration index), which stays stable across
//! candidate-set copies and is what the resolver keys its maps on.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use crate::filter::Filter;
use crate::module::Module;
use crate::value::{ModuleId, Namespace, Value};

/// Well-known attribute names.
pub const PACKAGE_ATTR: &str = "package";
pub const MODULE_ATTR: &str = "module";
pub const HOST_ATTR: &str = "host";
pub const VERSION_ATTR: &str = "version";

/// Well-known directive names and values.
pub const SINGLETON_DIRECTIVE: &str = "singleton";
pub const VISIBILITY_DIRECTIVE: &str = "visibility";
pub const VISIBILITY_REEXPORT: &str = "reexport";
pub const EFFECTIVE_DIRECTIVE: &str = "effective";
pub const EFFECTIVE_RESOLVE: &str = "resolve";

/// Index space reserved for requirements synthesized at runtime (dynamic
/// import grants). Counts down so it can never collide with declaration
/// indices, which count up from zero.
static NEXT_SYNTHETIC_INDEX: AtomicU32 = AtomicU32::new(u32::MAX);

/// Something a module provides: an exported package, its own module
/// identity, or a host slot for fragments.
#[derive(Debug)]
pub struct Capability {
    pub(crate) owner: Weak<Module>,
    pub(crate) owner_id: ModuleId,
    pub(crate) index: u32,
    pub(crate) namespace: Namespace,
    pub(crate) attrs: Vec<(String, Value)>,
    pub(crate) directives: Vec<(String, String)>,
    pub(crate) uses: Vec<String>,
}

impl Capability {
    /// The module that declared this capability.
    ///
    /// Capabilities hold a weak back-reference; the registry that installed
    /// the module must outlive every capability handle.
    pub fn module(&self) -> Arc<Module> {
        self.owner.upgrade().expect("owning module outlives capability")
    }

    pub fn module_id(&self) -> ModuleId {
        self.owner_id
    }

    /// Stable identity within one registry.
    pub fn key(&self) -> (ModuleId, u32) {
        (self.owner_id, self.index)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn attrs(&self) -> &[(String, Value)] {
        &self.attrs
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Package name, for package-namespace capabilities.
    pub fn package_name(&self) -> Option<&str> {
        self.attr(PACKAGE_ATTR).and_then(Value::as_str)
    }

    /// Declared version, defaulting to 0.0.0 when absent.
    pub fn version(&self) -> semver::Version {
        self.attr(VERSION_ATTR)
            .and_then(Value::as_version)
            .cloned()
            .unwrap_or_else(|| semver::Version::new(0, 0, 0))
    }

    /// Package names whose types leak through this capability.
    pub fn uses(&self) -> &[String] {
        &self.uses
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Capability {}

impl std::hash::Hash for Capability {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.namespace {
            Namespace::Package => self.package_name().unwrap_or("?"),
            Namespace::Module => self
                .attr(MODULE_ATTR)
                .and_then(Value::as_str)
                .unwrap_or("?"),
            Namespace::Host => self.attr(HOST_ATTR).and_then(Value::as_str).unwrap_or("?"),
        };
        write!(f, "{}:{}/{}", self.namespace, name, self.version())
    }
}

/// Something a module needs another module's capability to satisfy.
#[derive(Debug)]
pub struct Requirement {
    pub(crate) owner: Weak<Module>,
    pub(crate) owner_id: ModuleId,
    pub(crate) index: u32,
    pub(crate) namespace: Namespace,
    pub(crate) filter: Filter,
    pub(crate) optional: bool,
    pub(crate) directives: Vec<(String, String)>,
}

impl Requirement {
    /// The module that declared this requirement. See [`Capability::module`]
    /// for the lifetime contract.
    pub fn module(&self) -> Arc<Module> {
        self.owner.upgrade().expect("owning module outlives requirement")
    }

    pub fn module_id(&self) -> ModuleId {
        self.owner_id
    }

    pub fn key(&self) -> (ModuleId, u32) {
        (self.owner_id, self.index)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when a `require`d provider's packages are re-exported to our
    /// own dependents.
    pub fn is_reexport(&self) -> bool {
        self.directive(VISIBILITY_DIRECTIVE) == Some(VISIBILITY_REEXPORT)
    }

    /// Requirements are considered during resolution unless an `effective`
    /// directive says otherwise.
    pub fn is_effective(&self) -> bool {
        match self.directive(EFFECTIVE_DIRECTIVE) {
            None => true,
            Some(v) => v == EFFECTIVE_RESOLVE,
        }
    }

    /// Does the capability's namespace and attribute set satisfy us?
    pub fn matches(&self, cap: &Capability) -> bool {
        self.namespace == cap.namespace && self.filter.matches(&cap.attrs)
    }

    /// Synthesize a one-off package requirement owned by `module`.
    ///
    /// Each call yields a distinct identity so repeated dynamic-import
    /// grants for the same declaration never collide in candidate maps or
    /// wire lists.
    pub fn synthetic_package(module: &Arc<Module>, package: &str) -> Arc<Requirement> {
        Arc::new(Requirement {
            owner: Arc::downgrade(module),
            owner_id: module.id(),
            index: NEXT_SYNTHETIC_INDEX.fetch_sub(1, AtomicOrdering::Relaxed),
            namespace: Namespace::Package,
            filter: Filter::eq(PACKAGE_ATTR, package),
            optional: false,
            directives: Vec::new(),
        })
    }
}

impl PartialEq for Requirement {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Requirement {}

impl std::hash::Hash for Requirement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.filter)?;
        if self.optional {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}
