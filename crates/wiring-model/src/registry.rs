//! In-memory module store and `ResolverState` implementation.
//!
//! The registry is what embedders (and every test) use to describe a module
//! graph. It assigns ids, materializes `Module` records with their
//! capability/requirement back-references, answers sorted candidate
//! queries, and commits wire maps back into module state after a resolve.
//!
//! # Example
//!
//! ```
//! use wiring_model::{ModuleBuilder, ModuleRegistry};
//!
//! let mut registry = ModuleRegistry::new();
//! let provider = registry
//!     .install(ModuleBuilder::new("provider", "1.0.0").export_package("util.log", "1.0.0", &[]))
//!     .unwrap();
//! let consumer = registry
//!     .install(ModuleBuilder::new("consumer", "1.0.0").import_package("util.log"))
//!     .unwrap();
//! assert_ne!(provider.id(), consumer.id());
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use crate::capability::{
    Capability, HOST_ATTR, MODULE_ATTR, PACKAGE_ATTR, Requirement, SINGLETON_DIRECTIVE,
    VERSION_ATTR, VISIBILITY_DIRECTIVE, VISIBILITY_REEXPORT,
};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::module::{Module, WireMap};
use crate::ordering::sort_candidates;
use crate::state::ResolverState;
use crate::value::{ModuleId, Namespace, Value, parse_version};

struct CapabilitySpec {
    namespace: Namespace,
    attrs: Vec<(String, Value)>,
    directives: Vec<(String, String)>,
    uses: Vec<String>,
}

struct RequirementSpec {
    namespace: Namespace,
    filter: FilterSpec,
    optional: bool,
    directives: Vec<(String, String)>,
}

enum FilterSpec {
    Parsed(Filter),
    Source(String),
}

impl FilterSpec {
    fn into_filter(self) -> Result<Filter> {
        match self {
            FilterSpec::Parsed(f) => Ok(f),
            FilterSpec::Source(s) => Filter::parse(&s),
        }
    }
}

/// Declarative description of a module, turned into a real [`Module`] by
/// [`ModuleRegistry::install`]. All fallible work (version and filter
/// parsing) is deferred to install time so the builder chains cleanly.
pub struct ModuleBuilder {
    symbolic_name: String,
    version: String,
    capabilities: Vec<CapabilitySpec>,
    requirements: Vec<RequirementSpec>,
    dynamic_requirements: Vec<RequirementSpec>,
    singleton: bool,
    fragment: bool,
    required_environment: Option<String>,
    native_libraries: Vec<String>,
    removal_pending: bool,
}

impl ModuleBuilder {
    pub fn new(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: version.into(),
            capabilities: Vec::new(),
            requirements: Vec::new(),
            dynamic_requirements: Vec::new(),
            singleton: false,
            fragment: false,
            required_environment: None,
            native_libraries: Vec::new(),
            removal_pending: false,
        }
    }

    /// Export `package` at `version`, optionally declaring used packages
    /// whose types leak through the export.
    pub fn export_package(mut self, package: &str, version: &str, uses: &[&str]) -> Self {
        self.capabilities.push(CapabilitySpec {
            namespace: Namespace::Package,
            attrs: vec![
                (PACKAGE_ATTR.to_string(), Value::from(package)),
                (VERSION_ATTR.to_string(), Value::Str(version.to_string())),
            ],
            directives: Vec::new(),
            uses: uses.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Import `package` at any version.
    pub fn import_package(self, package: &str) -> Self {
        self.import(package, None, false)
    }

    /// Import `package` at `min_version` or newer.
    pub fn import_package_versioned(self, package: &str, min_version: &str) -> Self {
        self.import(package, Some(min_version), false)
    }

    /// Optionally import `package`; resolution proceeds without it.
    pub fn import_package_optional(self, package: &str) -> Self {
        self.import(package, None, true)
    }

    fn import(mut self, package: &str, min_version: Option<&str>, optional: bool) -> Self {
        let base = Filter::eq(PACKAGE_ATTR, package);
        let filter = match min_version {
            Some(min) => Filter::And(vec![
                base,
                Filter::Gte(VERSION_ATTR.to_string(), min.to_string()),
            ]),
            None => base,
        };
        self.requirements.push(RequirementSpec {
            namespace: Namespace::Package,
            filter: FilterSpec::Parsed(filter),
            optional,
            directives: Vec::new(),
        });
        self
    }

    /// Require another module wholesale; with `reexport`, its packages
    /// become visible to our own dependents.
    pub fn require_module(mut self, symbolic_name: &str, reexport: bool) -> Self {
        let directives = if reexport {
            vec![(
                VISIBILITY_DIRECTIVE.to_string(),
                VISIBILITY_REEXPORT.to_string(),
            )]
        } else {
            Vec::new()
        };
        self.requirements.push(RequirementSpec {
            namespace: Namespace::Module,
            filter: FilterSpec::Parsed(Filter::eq(MODULE_ATTR, symbolic_name)),
            optional: false,
            directives,
        });
        self
    }

    /// Turn this module into a fragment of `host_name`. Fragments expose no
    /// host slot of their own.
    pub fn fragment_of(mut self, host_name: &str) -> Self {
        self.fragment = true;
        self.requirements.push(RequirementSpec {
            namespace: Namespace::Host,
            filter: FilterSpec::Parsed(Filter::eq(HOST_ATTR, host_name)),
            optional: false,
            directives: Vec::new(),
        });
        self
    }

    /// Declare a dynamic package import; `"*"` matches any package.
    pub fn dynamic_import(mut self, pattern: &str) -> Self {
        let filter = if pattern == "*" {
            Filter::Any
        } else {
            Filter::eq(PACKAGE_ATTR, pattern)
        };
        self.dynamic_requirements.push(RequirementSpec {
            namespace: Namespace::Package,
            filter: FilterSpec::Parsed(filter),
            optional: false,
            directives: Vec::new(),
        });
        self
    }

    /// Restrict this symbolic name to at most one resolved instance.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn requires_environment(mut self, environment: &str) -> Self {
        self.required_environment = Some(environment.to_string());
        self
    }

    pub fn native_library(mut self, library: &str) -> Self {
        self.native_libraries.push(library.to_string());
        self
    }

    /// Mark the module as pending removal (update/uninstall in flight).
    pub fn removal_pending(mut self) -> Self {
        self.removal_pending = true;
        self
    }

    /// Escape hatch: a raw capability in any namespace.
    pub fn capability(
        mut self,
        namespace: Namespace,
        attrs: Vec<(String, Value)>,
        directives: Vec<(String, String)>,
        uses: Vec<String>,
    ) -> Self {
        self.capabilities.push(CapabilitySpec {
            namespace,
            attrs,
            directives,
            uses,
        });
        self
    }

    /// Escape hatch: a raw requirement with a filter expression, parsed at
    /// install time.
    pub fn requirement(self, namespace: Namespace, filter: &str, optional: bool) -> Self {
        self.requirement_with_directives(namespace, filter, optional, Vec::new())
    }

    /// Escape hatch: a raw requirement with explicit directives, such as
    /// `effective` to defer a requirement past resolve time.
    pub fn requirement_with_directives(
        mut self,
        namespace: Namespace,
        filter: &str,
        optional: bool,
        directives: Vec<(String, String)>,
    ) -> Self {
        self.requirements.push(RequirementSpec {
            namespace,
            filter: FilterSpec::Source(filter.to_string()),
            optional,
            directives,
        });
        self
    }
}

/// In-memory module store answering the resolver's candidate queries.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<Module>>,
    /// Supported execution environments. Empty means "not enforced".
    environments: BTreeSet<String>,
    /// Loadable native libraries; `None` means all are loadable.
    available_natives: Option<BTreeSet<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a supported execution environment. Once any environment is
    /// declared, modules requiring an undeclared one fail their check.
    pub fn add_environment(&mut self, environment: &str) {
        self.environments.insert(environment.to_string());
    }

    /// Restrict which native libraries are considered loadable.
    pub fn limit_native_libraries<I: IntoIterator<Item = S>, S: Into<String>>(
        &mut self,
        libraries: I,
    ) {
        self.available_natives = Some(libraries.into_iter().map(Into::into).collect());
    }

    /// Materialize a module from its builder and add it to the store.
    pub fn install(&mut self, builder: ModuleBuilder) -> Result<Arc<Module>> {
        let id = ModuleId(self.modules.len() as u64 + 1);
        let version = parse_version(&builder.version)?;

        // Implicit capabilities: every module describes itself in the
        // module namespace; non-fragments additionally offer a host slot.
        let mut cap_specs = Vec::with_capacity(builder.capabilities.len() + 2);
        let mut module_directives = Vec::new();
        if builder.singleton {
            module_directives.push((SINGLETON_DIRECTIVE.to_string(), "true".to_string()));
        }
        cap_specs.push(CapabilitySpec {
            namespace: Namespace::Module,
            attrs: vec![
                (
                    MODULE_ATTR.to_string(),
                    Value::from(builder.symbolic_name.as_str()),
                ),
                (VERSION_ATTR.to_string(), Value::Version(version.clone())),
            ],
            directives: module_directives,
            uses: Vec::new(),
        });
        if !builder.fragment {
            cap_specs.push(CapabilitySpec {
                namespace: Namespace::Host,
                attrs: vec![
                    (
                        HOST_ATTR.to_string(),
                        Value::from(builder.symbolic_name.as_str()),
                    ),
                    (VERSION_ATTR.to_string(), Value::Version(version.clone())),
                ],
                directives: Vec::new(),
                uses: Vec::new(),
            });
        }
        for mut spec in builder.capabilities {
            // Package versions arrive as strings from the builder; store
            // them typed so filters compare semantically.
            for (key, value) in spec.attrs.iter_mut() {
                if key == VERSION_ATTR {
                    if let Value::Str(raw) = value {
                        *value = Value::Version(parse_version(raw)?);
                    }
                }
            }
            cap_specs.push(spec);
        }

        let mut static_reqs = Vec::with_capacity(builder.requirements.len());
        for spec in builder.requirements {
            static_reqs.push((spec.namespace, spec.filter.into_filter()?, spec.optional, spec.directives));
        }
        let mut dynamic_reqs = Vec::with_capacity(builder.dynamic_requirements.len());
        for spec in builder.dynamic_requirements {
            dynamic_reqs.push((spec.namespace, spec.filter.into_filter()?, spec.optional, spec.directives));
        }

        let symbolic_name = builder.symbolic_name;
        let required_environment = builder.required_environment;
        let native_libraries = builder.native_libraries;
        let removal_pending = builder.removal_pending;

        let module = Arc::new_cyclic(|weak| {
            let capabilities = cap_specs
                .into_iter()
                .enumerate()
                .map(|(index, spec)| {
                    Arc::new(Capability {
                        owner: weak.clone(),
                        owner_id: id,
                        index: index as u32,
                        namespace: spec.namespace,
                        attrs: spec.attrs,
                        directives: spec.directives,
                        uses: spec.uses,
                    })
                })
                .collect();
            let static_len = static_reqs.len() as u32;
            let requirements = static_reqs
                .into_iter()
                .enumerate()
                .map(|(index, (namespace, filter, optional, directives))| {
                    Arc::new(Requirement {
                        owner: weak.clone(),
                        owner_id: id,
                        index: index as u32,
                        namespace,
                        filter,
                        optional,
                        directives,
                    })
                })
                .collect();
            let dynamic_requirements = dynamic_reqs
                .into_iter()
                .enumerate()
                .map(|(index, (namespace, filter, optional, directives))| {
                    Arc::new(Requirement {
                        owner: weak.clone(),
                        owner_id: id,
                        index: static_len + index as u32,
                        namespace,
                        filter,
                        optional,
                        directives,
                    })
                })
                .collect();
            Module {
                id,
                symbolic_name,
                version,
                capabilities,
                requirements,
                dynamic_requirements,
                required_environment,
                native_libraries,
                removal_pending,
                wires: OnceLock::new(),
            }
        });

        self.modules.push(module.clone());
        Ok(module)
    }

    pub fn module(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.modules.get((id.0 as usize).wrapping_sub(1)).cloned()
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.modules.iter()
    }

    /// Commit a resolve result: every module in the wire map transitions
    /// to resolved with its wire list.
    pub fn mark_resolved(&self, wire_map: &WireMap) {
        for (id, wires) in wire_map {
            if let Some(module) = self.module(*id) {
                if !module.set_wires(wires.clone()) {
                    tracing::debug!(module = %module, "module already resolved; wires unchanged");
                }
            }
        }
    }
}

impl ResolverState for ModuleRegistry {
    fn candidates(&self, req: &Requirement, populating: bool) -> Vec<Arc<Capability>> {
        let mut caps: Vec<Arc<Capability>> = self
            .modules
            .iter()
            .filter(|m| !(populating && m.is_removal_pending() && !m.is_resolved()))
            .flat_map(|m| m.capabilities().iter())
            .filter(|cap| req.matches(cap))
            .cloned()
            .collect();
        sort_candidates(&mut caps);
        caps
    }

    fn check_execution_environment(&self, module: &Module) -> Result<()> {
        match module.required_environment() {
            Some(required)
                if !self.environments.is_empty() && !self.environments.contains(required) =>
            {
                Err(Error::ExecutionEnvironment {
                    module: module.symbolic_name().to_string(),
                    required: required.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_native_libraries(&self, module: &Module) -> Result<()> {
        if let Some(available) = &self.available_natives {
            for library in module.native_libraries() {
                if !available.contains(library) {
                    return Err(Error::NativeLibrary {
                        module: module.symbolic_name().to_string(),
                        library: library.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resolved_singletons(&self) -> Vec<Arc<Module>> {
        self.modules
            .iter()
            .filter(|m| m.is_singleton() && m.is_resolved())
            .cloned()
            .collect()
    }
}
