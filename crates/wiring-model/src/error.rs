/// Errors raised by the model layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Failed to parse an attribute filter expression.
    #[error("invalid filter '{filter}': {reason}")]
    FilterParse { filter: String, reason: String },

    /// Invalid semver version string.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// The module declares an execution environment the state does not support.
    #[error("module '{module}' requires execution environment '{required}'")]
    ExecutionEnvironment { module: String, required: String },

    /// The module carries native libraries that cannot be loaded here.
    #[error("module '{module}' has unloadable native library '{library}'")]
    NativeLibrary { module: String, library: String },
}

pub type Result<T> = std::result::Result<T, Error>;
