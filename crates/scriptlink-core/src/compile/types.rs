//! Common types for the compilation pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound on a single rustc invocation.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for the compiler.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Root directory under which each isolation context gets its own build dir
    pub build_dir: PathBuf,

    /// Primary reference directories (the host's own build artifacts)
    pub primary_lib_dirs: Vec<PathBuf>,

    /// Secondary "default" reference directories, consulted after the primary set
    pub default_lib_dirs: Vec<PathBuf>,

    /// Rust edition scripts are compiled with
    pub edition: String,

    /// Use Cranelift backend when the toolchain offers it
    pub use_cranelift: bool,

    /// Emit debug info
    pub debug_info: bool,

    /// Optimization level (0-3)
    pub opt_level: u8,

    /// Additional rustc flags
    pub extra_rustc_flags: Vec<String>,

    /// How long a single compilation may take before it is abandoned
    pub compile_timeout: Duration,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            build_dir: std::env::temp_dir().join("scriptlink"),
            primary_lib_dirs: Self::detect_host_lib_dirs(),
            default_lib_dirs: Vec::new(),
            edition: "2021".to_string(),
            use_cranelift: true,
            debug_info: false,
            opt_level: 0,
            extra_rustc_flags: Vec::new(),
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }
}

impl CompilerConfig {
    /// Detect the directories holding the host's own compiled crates.
    ///
    /// For a cargo-built binary these are the directory of the executable
    /// and its `deps/` sibling, where the `.rlib` files of every crate the
    /// host links live.
    pub fn detect_host_lib_dirs() -> Vec<PathBuf> {
        let Ok(exe_path) = std::env::current_exe() else {
            return Vec::new();
        };
        let Some(exe_dir) = exe_path.parent() else {
            return Vec::new();
        };

        let mut dirs = vec![exe_dir.to_path_buf()];
        let deps = exe_dir.join("deps");
        if deps.is_dir() {
            dirs.push(deps);
        }
        dirs
    }

    /// Config that references nothing beyond the standard library.
    pub fn standalone(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            primary_lib_dirs: Vec::new(),
            default_lib_dirs: Vec::new(),
            ..Self::default()
        }
    }

    /// Create config for optimized builds of long-running scripts.
    pub fn production() -> Self {
        Self {
            use_cranelift: false,
            opt_level: 3,
            ..Default::default()
        }
    }
}

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "so"
    }
}

/// Platform-specific dynamic library prefix.
pub fn dylib_prefix() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ""
    }
    #[cfg(not(target_os = "windows"))]
    {
        "lib"
    }
}
