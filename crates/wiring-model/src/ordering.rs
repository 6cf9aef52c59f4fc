//! Total order over candidate capabilities.
//!
//! The resolver always "picks the first candidate", so this order decides
//! every default choice and makes permutations reproducible:
//!
//! 1. Capabilities of resolved modules sort before unresolved ones
//!    (prefer not disturbing already-wired modules).
//! 2. Within the module namespace: symbolic name ascending, then version
//!    descending (higher preferred).
//! 3. Within the package namespace: package name ascending, then version
//!    descending.
//! 4. Final tie-break: lower module id wins.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::capability::{Capability, MODULE_ATTR};
use crate::value::{Namespace, Value};

/// Compare two candidates for the same requirement.
pub fn compare_candidates(a: &Arc<Capability>, b: &Arc<Capability>) -> Ordering {
    let a_resolved = a.module().is_resolved();
    let b_resolved = b.module().is_resolved();
    // Resolved before unresolved.
    match (a_resolved, b_resolved) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    if a.namespace() == b.namespace() {
        let by_namespace = match a.namespace() {
            Namespace::Module => {
                let a_name = a.attr(MODULE_ATTR).and_then(Value::as_str).unwrap_or("");
                let b_name = b.attr(MODULE_ATTR).and_then(Value::as_str).unwrap_or("");
                a_name
                    .cmp(b_name)
                    .then_with(|| b.version().cmp(&a.version()))
            }
            Namespace::Package => {
                let a_pkg = a.package_name().unwrap_or("");
                let b_pkg = b.package_name().unwrap_or("");
                a_pkg.cmp(b_pkg).then_with(|| b.version().cmp(&a.version()))
            }
            Namespace::Host => b.version().cmp(&a.version()),
        };
        if by_namespace != Ordering::Equal {
            return by_namespace;
        }
    }

    a.module_id()
        .cmp(&b.module_id())
        .then_with(|| a.key().1.cmp(&b.key().1))
}

/// Sort a candidate list into the canonical order.
pub fn sort_candidates(candidates: &mut [Arc<Capability>]) {
    candidates.sort_by(compare_candidates);
}
