//! Sandgate entry point.
//!
//! Binary name: `sandgate`
//!
//! Parses CLI arguments, sets up tracing, loads configuration (file, then
//! flag and environment overrides) and dispatches to the subcommand.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use sandgate_infra::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    sandgate_observe::init_tracing(cli.log_format, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    sandgate_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli.config).await?;
    cli.overrides.apply(&mut config);

    match cli.command {
        Commands::Serve => cli::serve::serve(config).await,
        Commands::Resolve { sandbox_id } => {
            cli::resolve::resolve(config, &sandbox_id, cli.json).await
        }
    }
}
