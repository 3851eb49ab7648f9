//! Error types for scriptlink-core.

use thiserror::Error;

/// Result type for scriptlink-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure errors that can occur in scriptlink-core.
///
/// Script-level failures (diagnostics, faults, timeouts) are not errors of
/// the engine and travel as values instead; see `CompilationError` and
/// `ExecuteResult`.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to load dynamic library.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Toolchain error.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Isolation context misuse (loading twice, loading after unload).
    #[error("isolation error: {0}")]
    Isolation(String),
}
