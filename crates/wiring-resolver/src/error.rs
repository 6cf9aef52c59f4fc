//! Resolution failures.
//!
//! Every failure surfaces as one [`ResolveError`] carrying the offending
//! module and, when known, the requirement that could not be satisfied. The
//! [`ErrorKind`] distinguishes causes for callers that want to react
//! differently (the fragment retry loop keys off it), but the wire format
//! to humans is always the message.

use wiring_model::{Module, ModuleId};

/// What class of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A non-optional requirement ended up with no candidates.
    MissingRequirement,
    /// A uses-constraint violation survived every permutation.
    UsesConflict,
    /// Multiple fragments import the same package from different providers.
    FragmentConflict,
    /// The root module's singleton name is already taken by a resolved
    /// module outside this resolve.
    SingletonConflict,
    /// The module's execution environment or native libraries are
    /// unavailable.
    EnvironmentCheck,
    /// A dynamic import request could not be granted.
    DynamicImport,
    /// Cascading removal reached the resolve's own root module.
    RootRemoved,
}

impl ErrorKind {
    fn describe(self) -> &'static str {
        match self {
            ErrorKind::MissingRequirement => "missing requirement",
            ErrorKind::UsesConflict => "uses constraint violation",
            ErrorKind::FragmentConflict => "conflicting fragment imports",
            ErrorKind::SingletonConflict => "singleton conflict",
            ErrorKind::EnvironmentCheck => "environment check failed",
            ErrorKind::DynamicImport => "dynamic import failed",
            ErrorKind::RootRemoved => "root module removed",
        }
    }
}

/// A failed resolve. Cloneable so populate failures can be cached and
/// replayed on repeated attempts.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unable to resolve {module} ({kind}): {message}", kind = .kind.describe())]
pub struct ResolveError {
    kind: ErrorKind,
    module_id: ModuleId,
    module: String,
    requirement: Option<String>,
    message: String,
}

impl ResolveError {
    pub fn new(kind: ErrorKind, module: &Module, message: impl Into<String>) -> Self {
        Self {
            kind,
            module_id: module.id(),
            module: module.to_string(),
            requirement: None,
            message: message.into(),
        }
    }

    pub fn with_requirement(mut self, requirement: impl ToString) -> Self {
        self.requirement = Some(requirement.to_string());
        self
    }

    /// Append a triggering sub-error's message for diagnostic chaining.
    pub fn chain(mut self, cause: &ResolveError) -> Self {
        self.message.push_str(": ");
        self.message.push_str(&cause.message);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The module the failure is attributed to.
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Display form of the failing requirement, if one is known.
    pub fn requirement(&self) -> Option<&str> {
        self.requirement.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
