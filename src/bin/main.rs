//! voxgate binary.
//!
//! Entry point for the voxgate service: a speech-synthesis gateway that owns
//! a local model lifecycle and can delegate to a remote synthesis server.

use clap::Parser;
use voxgate_core::{
    cli::commands::Commands,
    cli::{handle_hash_password, handle_remote, handle_serve, handle_users, init_logging},
    config::ServiceConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(cmd) => {
            let config = ServiceConfig::load(&cmd.config)?;
            let _guard = init_logging(&cmd.logging, &config.logging)?;
            handle_serve(config).await
        }
        Commands::Users(cmd) => {
            let config = ServiceConfig::load(&cmd.config)?;
            let _guard = init_logging(&cmd.logging, &config.logging)?;
            handle_users(&config, cmd.action)
        }
        Commands::Remote(cmd) => {
            let config = ServiceConfig::load(&cmd.config)?;
            let _guard = init_logging(&cmd.logging, &config.logging)?;
            handle_remote(&config, cmd.action)
        }
        Commands::HashPassword(cmd) => handle_hash_password(&cmd.password),
    }
}
