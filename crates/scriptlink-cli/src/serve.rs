//! Serve command: run the JSON-RPC tool server until Ctrl+C.

use scriptlink_server::ServerConfig;

use crate::colors;
use crate::{EngineArgs, ServeArgs};

/// Start the tool server, unless it is disabled.
pub async fn execute(args: &ServeArgs, engine: &EngineArgs) -> anyhow::Result<()> {
    if !args.enable {
        tracing::info!("server disabled by configuration");
        println!("scriptlink server is disabled (SCRIPTLINK_ENABLE)");
        return Ok(());
    }

    let controller = engine.controller()?;
    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
    };

    println!(
        "\n{}scriptlink{} - Rust script execution server",
        colors::BOLD,
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Endpoint:{} http://{}:{}{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port,
        scriptlink_server::MCP_PATH
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    scriptlink_server::serve(config, controller).await?;

    Ok(())
}
