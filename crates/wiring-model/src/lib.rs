//! Data model for the module wiring resolver
//!
//! This crate defines the vocabulary the resolver operates on:
//!
//! - **Modules**: immutable units with symbolic names, versions, and a
//!   one-shot transition to the resolved state
//! - **Capabilities and requirements**: what a module provides and needs,
//!   in the module, package, and host namespaces
//! - **Filters**: the attribute expression language requirements match with
//! - **Wires**: resolved requirement-to-capability edges, collected per
//!   module into a deterministic [`WireMap`]
//! - **ResolverState**: the trait through which the resolver queries the
//!   installed-module world, with [`ModuleRegistry`] as the stock
//!   implementation
//!
//! # Example
//!
//! ```
//! use wiring_model::{ModuleBuilder, ModuleRegistry, ResolverState};
//!
//! let mut registry = ModuleRegistry::new();
//! registry
//!     .install(ModuleBuilder::new("provider", "1.0.0").export_package("util.log", "1.0.0", &[]))
//!     .unwrap();
//! let consumer = registry
//!     .install(ModuleBuilder::new("consumer", "1.0.0").import_package("util.log"))
//!     .unwrap();
//!
//! let req = &consumer.requirements()[0];
//! assert_eq!(registry.candidates(req, true).len(), 1);
//! ```

pub mod capability;
pub mod error;
pub mod filter;
pub mod module;
pub mod ordering;
pub mod registry;
pub mod state;
pub mod value;

pub use capability::{
    Capability, EFFECTIVE_DIRECTIVE, EFFECTIVE_RESOLVE, HOST_ATTR, MODULE_ATTR, PACKAGE_ATTR,
    Requirement, SINGLETON_DIRECTIVE, VERSION_ATTR, VISIBILITY_DIRECTIVE, VISIBILITY_REEXPORT,
};
pub use error::{Error, Result};
pub use filter::Filter;
pub use module::{Module, Wire, WireKind, WireMap, WireSummary};
pub use ordering::{compare_candidates, sort_candidates};
pub use registry::{ModuleBuilder, ModuleRegistry};
pub use state::ResolverState;
pub use value::{ModuleId, Namespace, Value, parse_version};
