//! rustc-backed script engine.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::process::Command;

use super::entry::find_entry_point;
use super::errors::{CompilationError, ErrorMapper};
use super::references::ReferenceSet;
use super::toolchain::ToolchainManager;
use super::types::{CompilerConfig, dylib_extension, dylib_prefix};
use super::wrapper::generate_wrapper;
use crate::engine::{Invocation, ScriptEngine};
use crate::error::Result;
use crate::execute::{CompiledUnit, IsolationContext, format_duration};

/// Compiles scripts with rustc into cdylibs loaded in fresh isolation contexts.
pub struct RustcEngine {
    config: CompilerConfig,
    toolchain: ToolchainManager,
}

impl RustcEngine {
    /// Create an engine, detecting the toolchain.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        Self::with_toolchain(config, ToolchainManager::new()?)
    }

    pub fn with_toolchain(config: CompilerConfig, toolchain: ToolchainManager) -> Result<Self> {
        std::fs::create_dir_all(&config.build_dir)?;
        Ok(Self { config, toolchain })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &ToolchainManager {
        &self.toolchain
    }

    /// Compile a script into a loaded, not yet invoked unit.
    ///
    /// Every failure path drops the isolation context created for the
    /// attempt, which removes its build directory.
    pub async fn compile_unit(&self, source: &str) -> std::result::Result<CompiledUnit, CompilationError> {
        let start = Instant::now();

        // Syntax trees are !Send; keep them out of the await points below.
        let (entry, generated) = {
            let file = syn::parse_file(source).map_err(CompilationError::from_syntax)?;
            let entry = find_entry_point(&file)?;
            let generated = generate_wrapper(source, &file, &entry);
            (entry, generated)
        };

        let mut context = IsolationContext::create(&self.config.build_dir)
            .map_err(|e| CompilationError::toolchain(format!("failed to create build directory: {e}")))?;

        let src_path = context.dir().join("script.rs");
        let dylib_path = context
            .dir()
            .join(format!("{}script.{}", dylib_prefix(), dylib_extension()));

        tokio::fs::write(&src_path, &generated.code)
            .await
            .map_err(|e| CompilationError::toolchain(format!("failed to write script source: {e}")))?;

        let references =
            ReferenceSet::resolve(&self.config.primary_lib_dirs, &self.config.default_lib_dirs);

        // rustc is killed on drop, so abandoning the wait also stops it.
        let rustc = self.rustc_command(&src_path, &dylib_path, &references).output();
        let output = tokio::time::timeout(self.config.compile_timeout, rustc)
            .await
            .map_err(|_| {
                CompilationError::toolchain(format!(
                    "rustc exceeded {}",
                    format_duration(self.config.compile_timeout)
                ))
            })?
            .map_err(|e| CompilationError::toolchain(format!("failed to run rustc: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mapper = ErrorMapper::new(generated.user_start_line, generated.user_line_count);
            let mut diagnostics = mapper.parse_rustc_output(&stderr);

            if diagnostics.is_empty() {
                // Linker failures and ICEs come as plain text.
                return Err(CompilationError::toolchain(stderr.trim().to_string()));
            }
            diagnostics.dedup();

            tracing::debug!(
                context = context.name(),
                errors = diagnostics.len(),
                "script compilation failed"
            );
            return Err(CompilationError::diagnostics(diagnostics));
        }

        context
            .load(&dylib_path)
            .map_err(|e| CompilationError::toolchain(e.to_string()))?;

        tracing::info!(
            context = context.name(),
            entry = %entry.describe(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "script compiled"
        );

        Ok(CompiledUnit::new(context, entry))
    }

    fn rustc_command(&self, src: &Path, output: &Path, references: &ReferenceSet) -> Command {
        let mut cmd = Command::new(self.toolchain.rustc_path());

        cmd.arg(src)
            .arg("--crate-type=cdylib")
            .arg("--crate-name=script")
            .arg(format!("--edition={}", self.config.edition))
            .arg("-o")
            .arg(output)
            .arg("--error-format=json")
            .arg("-A")
            .arg("warnings")
            .arg(format!("-Copt-level={}", self.config.opt_level));

        if self.config.debug_info {
            cmd.arg("-g");
        }

        if self.config.use_cranelift {
            cmd.args(self.toolchain.cranelift_flags());
        }

        cmd.args(references.rustc_args());
        cmd.args(&self.config.extra_rustc_flags);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

impl ScriptEngine for RustcEngine {
    fn compile<'a>(
        &'a self,
        source: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Box<dyn Invocation>, CompilationError>> {
        async move {
            let unit = self.compile_unit(source).await?;
            Ok(Box::new(unit) as Box<dyn Invocation>)
        }
        .boxed()
    }
}
