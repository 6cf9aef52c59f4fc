//! The resolver's window onto the installed-module world.

use std::sync::Arc;

use crate::Result;
use crate::capability::{Capability, Requirement};
use crate::module::Module;

/// Everything the resolver needs to ask about installed modules.
///
/// Implementations must be consistent for the duration of one resolve call:
/// repeated candidate queries for the same requirement must return the same
/// set, or determinism guarantees are void. Thread safety across concurrent
/// resolves is the implementor's responsibility; the resolver itself takes
/// no locks.
pub trait ResolverState {
    /// Capabilities satisfying `req`, sorted per [`crate::ordering`].
    ///
    /// `populating` is true for calls made while populating a candidate
    /// set; implementations may apply populate-only policy there, such as
    /// hiding unresolved modules that are pending removal.
    fn candidates(&self, req: &Requirement, populating: bool) -> Vec<Arc<Capability>>;

    /// Verify the module's required execution environment is available.
    fn check_execution_environment(&self, module: &Module) -> Result<()>;

    /// Verify the module's native libraries are loadable here.
    fn check_native_libraries(&self, module: &Module) -> Result<()>;

    /// Already-resolved singleton modules, consulted when deciding
    /// singleton conflicts during candidate preparation.
    fn resolved_singletons(&self) -> Vec<Arc<Module>> {
        Vec::new()
    }
}
