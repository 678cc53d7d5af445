use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::config::LoggingConfig;
use crate::config::ConfigArgs;

#[derive(Args)]
pub struct RemoteCommand {
    #[command(subcommand)]
    pub action: RemoteAction,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub logging: LoggingConfig,
}

#[derive(Subcommand)]
pub enum RemoteAction {
    /// Write a notebook that hosts the remote backend
    Notebook(NotebookArgs),
}

#[derive(Args)]
pub struct NotebookArgs {
    /// Backbone catalog name or repository id [default: engine.default_backbone]
    #[arg(long)]
    pub backbone: Option<String>,

    /// Codec catalog name or repository id [default: engine.default_codec]
    #[arg(long)]
    pub codec: Option<String>,

    /// Device for the notebook runtime (auto, cuda or cpu)
    #[arg(long, default_value = "auto")]
    pub device: String,

    /// Token the notebook will require; generated when omitted
    #[arg(long, env = "VOXGATE_REMOTE_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Template to fill instead of the built-in one
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Write the notebook here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
