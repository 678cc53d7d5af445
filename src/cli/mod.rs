//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running the server
//! - Offline user management
//! - Generating the remote backend notebook
//! - Logging setup shared by every command

pub mod commands;
pub mod handlers;

pub use handlers::{handle_hash_password, handle_remote, handle_serve, handle_users, init_logging};
