//! Backtracking module wiring resolver
//!
//! Given modules declaring capabilities (what they provide) and
//! requirements (what they need), the resolver computes a consistent
//! wiring: one providing capability per requirement, such that no module is
//! exposed to two incompatible versions of the same package through
//! different dependency paths.
//!
//! The search works on a mutable candidate set populated transitively from
//! the resolve target. Singleton conflicts are settled and fragments merged
//! into their hosts up front; then per-module package spaces are computed
//! and checked for uses-constraint violations, with conflicts driving a
//! copy-on-conflict permutation queue until a consistent assignment is
//! found or the space is exhausted.
//!
//! # Example
//!
//! ```
//! use wiring_model::{ModuleBuilder, ModuleRegistry};
//! use wiring_resolver::WiringResolver;
//!
//! let mut registry = ModuleRegistry::new();
//! registry
//!     .install(ModuleBuilder::new("provider", "1.0.0").export_package("util.log", "1.0.0", &[]))
//!     .unwrap();
//! let consumer = registry
//!     .install(ModuleBuilder::new("consumer", "1.0.0").import_package("util.log"))
//!     .unwrap();
//!
//! let resolver = WiringResolver::new();
//! let resolution = resolver.resolve(&registry, &consumer, &[]).unwrap();
//! registry.mark_resolved(&resolution.wire_map);
//! assert!(consumer.is_resolved());
//! ```

mod candidates;
pub mod error;
mod host;
mod packages;
pub mod resolver;
mod wires;

pub use error::{ErrorKind, ResolveError, Result};
pub use resolver::{Resolution, WiringResolver};
