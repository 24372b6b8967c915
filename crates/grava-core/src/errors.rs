use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for Grava resolution.
///
/// These are the expected, per-edge failure kinds: they are memoized on the
/// state that produced them and surfaced on every edge that hits them, and
/// they never abort a resolution run on their own. Invariant violations
/// inside the engine are panics, not variants of this type.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ResolveError {
    /// No module version could be found for a dependency declaration.
    #[error("no module found matching '{selector}'")]
    #[diagnostic(help("check the requested group, name and version"))]
    ModuleNotFound { selector: String },

    /// A module version exists but its descriptor could not be loaded.
    #[error("failed to load metadata for {id}: {message}")]
    MetadataFailed { id: String, message: String },

    /// A dependency mapped to a configuration the target does not declare.
    #[error("{id} has no configuration named '{configuration}'")]
    ConfigurationNotFound { id: String, configuration: String },
}

/// Convenience alias for resolution results.
pub type ResolveResult<T> = Result<T, ResolveError>;
