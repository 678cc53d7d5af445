use clap::{Args, Subcommand};

use super::config::LoggingConfig;
use crate::config::ConfigArgs;

/// Offline user management. A running server keeps its own copy of the
/// users file in memory; use the admin API while it is up.
#[derive(Args)]
pub struct UsersCommand {
    #[command(subcommand)]
    pub action: UsersAction,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub logging: LoggingConfig,
}

#[derive(Subcommand)]
pub enum UsersAction {
    /// List user accounts
    List,
    /// Add a user account
    Add {
        username: String,
        /// Password for the new account
        #[arg(long, env = "VOXGATE_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Remove a user account
    Remove { username: String },
    /// Allow a user to log in again
    Enable { username: String },
    /// Block a user from logging in
    Disable { username: String },
    /// Turn access control for the synthesis endpoint on or off
    Access {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

#[derive(Args)]
pub struct HashPasswordCommand {
    /// Password to hash
    #[arg(env = "VOXGATE_USER_PASSWORD", hide_env_values = true)]
    pub password: String,
}
