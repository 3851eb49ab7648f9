//! Compilation pipeline for scripts.
//!
//! Turns a script's source text into a loaded dynamic library:
//! 1. Parse with `syn` and locate the single eligible entry point
//! 2. Wrap the source with the script prelude and an FFI entry shim
//! 3. Resolve host references into `--extern` flags
//! 4. Compile to a cdylib with rustc inside a fresh isolation context
//! 5. Map rustc diagnostics back onto the user's own lines

mod compiler;
mod entry;
mod errors;
mod prelude;
mod references;
mod toolchain;
mod types;
mod wrapper;

pub use compiler::RustcEngine;
pub use entry::{ENTRY_NAME, EntryKind, EntryPoint, find_entry_point};
pub use errors::{
    CompilationError, CompilationErrorKind, Diagnostic, ErrorMapper, RustcDiagnostic,
    SourceLocation,
};
pub use prelude::PRELUDE_SOURCE;
pub use references::{ExternCrate, ReferenceSet};
pub use toolchain::ToolchainManager;
pub use types::{CompilerConfig, DEFAULT_COMPILE_TIMEOUT, dylib_extension, dylib_prefix};
pub use wrapper::{ENTRY_SYMBOL, GeneratedSource, generate_wrapper};
