//! scriptlink - run Rust scripts inside a host process over JSON-RPC.

mod colors;
mod host;
mod run;
mod serve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};

use scriptlink_core::{CompilerConfig, ExecutionController, RustcEngine};
use scriptlink_server::DEFAULT_PORT;

use crate::host::ProcessHost;

#[derive(Parser)]
#[command(name = "scriptlink")]
#[command(about = "Compile and run Rust scripts inside a host process")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(flatten)]
    engine: EngineArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the JSON-RPC tool server (default)
    Serve,

    /// Compile and run a single script, printing its result
    Run {
        /// Path to the script (.rs file)
        script: PathBuf,

        /// Seconds to wait for the script
        #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },
}

/// Listener settings.
#[derive(Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(
        short,
        long,
        global = true,
        env = "SCRIPTLINK_PORT",
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1024..)
    )]
    port: u16,

    /// Address to bind to
    #[arg(long, global = true, env = "SCRIPTLINK_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Start the server at all
    #[arg(
        long,
        global = true,
        env = "SCRIPTLINK_ENABLE",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    enable: bool,
}

/// Compiler settings shared by every command.
#[derive(Args)]
struct EngineArgs {
    /// Directories of host crates scripts may use (defaults to the executable's own)
    #[arg(long = "lib-dir", env = "SCRIPTLINK_LIB_DIR", value_delimiter = ',', global = true)]
    lib_dirs: Vec<PathBuf>,

    /// Fallback crate directories, searched after --lib-dir
    #[arg(long = "default-lib-dir", env = "SCRIPTLINK_DEFAULT_LIB_DIR", value_delimiter = ',', global = true)]
    default_lib_dirs: Vec<PathBuf>,

    /// Where per-script build directories are created
    #[arg(long, env = "SCRIPTLINK_BUILD_DIR", global = true)]
    build_dir: Option<PathBuf>,

    /// Seconds a single compilation may take
    #[arg(long, env = "SCRIPTLINK_COMPILE_TIMEOUT", default_value_t = 120, global = true)]
    compile_timeout: u64,

    /// Compile scripts with optimizations (LLVM backend)
    #[arg(long, global = true)]
    release: bool,
}

impl EngineArgs {
    fn compiler_config(&self) -> CompilerConfig {
        let mut config = if self.release {
            CompilerConfig::production()
        } else {
            CompilerConfig::default()
        };
        if !self.lib_dirs.is_empty() {
            config.primary_lib_dirs = self.lib_dirs.clone();
        }
        config.default_lib_dirs = self.default_lib_dirs.clone();
        if let Some(dir) = &self.build_dir {
            config.build_dir = dir.clone();
        }
        config.compile_timeout = Duration::from_secs(self.compile_timeout);
        config
    }

    fn controller(&self) -> anyhow::Result<Arc<ExecutionController>> {
        let config = self.compiler_config();
        let compile_timeout = config.compile_timeout;
        let engine = RustcEngine::new(config)?;
        tracing::debug!(
            rustc = %engine.toolchain().rustc_path().display(),
            version = engine.toolchain().version(),
            "toolchain ready"
        );

        let controller = ExecutionController::new(Arc::new(engine))
            .with_host(Arc::new(ProcessHost::new()))
            .with_compile_timeout(compile_timeout);
        Ok(Arc::new(controller))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Run { script, timeout }) => {
            run::execute(&script, Duration::from_secs(timeout), &cli.engine).await?;
        }
        Some(Commands::Serve) | None => serve::execute(&cli.serve, &cli.engine).await?,
    }

    Ok(())
}
