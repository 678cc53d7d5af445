pub mod config;
pub mod remote;
pub mod serve;
pub mod users;

pub use config::LoggingConfig;
pub use remote::{NotebookArgs, RemoteAction, RemoteCommand};
pub use serve::ServeCommand;
pub use users::{HashPasswordCommand, UsersAction, UsersCommand};

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the voxgate server
    Serve(ServeCommand),
    /// Manage user accounts in the users file
    Users(UsersCommand),
    /// Remote backend helpers
    Remote(RemoteCommand),
    /// Print the stored form of a password
    HashPassword(HashPasswordCommand),
}

