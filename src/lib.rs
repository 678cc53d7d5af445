//! voxgate: a speech-synthesis gateway.
//!
//! The service owns one local synthesis resource and an optional remote
//! delegate, and exposes both through a small HTTP surface:
//! - [`engine::Coordinator`] serializes load, unload, restart, and backend
//!   switching, and hands out handles to the serving path
//! - [`auth`] issues fixed-lifetime session tokens for administrators and users
//! - [`synthesis`] splits long text and stitches the audio back together
//! - [`server`] is the axum control plane and request path

pub mod audio;
pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod remote;
pub mod server;
pub mod synthesis;

// Re-export commonly used types
pub use audio::AudioBuffer;
pub use auth::{Role, Session, SessionStore, UserStore};
pub use config::ServiceConfig;
pub use engine::{BackendMode, Coordinator, Handle, ResourceConfig, ResourceState, StatusSnapshot};
pub use error::{ConfigError, CoordinatorError, RemoteError, SynthesisError};
pub use server::state::AppState;
