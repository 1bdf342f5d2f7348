//! # chatwire-server
//!
//! HTTP entry point for chatwire: configuration, token validation, metrics
//! export and the axum routes that start a connection pump per socket.
//!
//! The `chatwire` binary is a thin wrapper around [`handlers::run_server`].

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use auth::JwtValidator;
pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
