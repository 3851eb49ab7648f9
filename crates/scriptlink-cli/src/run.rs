//! Run command: compile and execute one script headlessly.

use std::path::Path;
use std::time::{Duration, Instant};

use scriptlink_core::{ExecuteResult, FailureKind};

use crate::EngineArgs;
use crate::colors;

/// Run a script file and print its result as JSON.
pub async fn execute(script: &Path, timeout: Duration, engine: &EngineArgs) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(script)
        .map_err(|e| anyhow::anyhow!("Cannot read script {}: {}", script.display(), e))?;

    let controller = engine.controller()?;
    let start = Instant::now();

    eprintln!(
        "{}Running{} {}",
        colors::BOLD,
        colors::RESET,
        script.display()
    );

    match controller.execute(&code, timeout).await {
        ExecuteResult::Completed { value, .. } => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            eprintln!(
                "{}Completed{} in {:.2}s",
                colors::GREEN,
                colors::RESET,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        ExecuteResult::CompilationFailed(err) => {
            eprintln!("{}{}{}", colors::RED, err.render(), colors::RESET);
            anyhow::bail!("script did not compile")
        }
        ExecuteResult::Failure { kind, message, .. } => {
            let color = match kind {
                FailureKind::Timeout | FailureKind::Cancelled => colors::YELLOW,
                _ => colors::RED,
            };
            eprintln!("{color}{message}{}", colors::RESET);
            anyhow::bail!("script failed")
        }
    }
}
