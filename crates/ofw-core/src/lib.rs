//! Core library for ofw - an Our Family Wizard messages client.
//!
//! This crate provides:
//! - Configuration loading and management
//! - XDG-compliant path resolution
//! - Schema and example config generation
//! - The authentication bridge (token cache, login transports, state machine)
//! - A typed client for the folder and message API
//! - Common types and error handling

pub mod config;
pub mod error;
pub mod ofw;
pub mod paths;
pub mod schema;

pub use config::{
    AppConfig, AuthConfig, BrowserConfig, LogLevel, LoggingConfig, LoginFlowConfig, PathsConfig,
    RuntimeConfig, ServiceConfig,
};
pub use error::{CoreError, Result};
pub use ofw::{
    AuthBridge, AuthError, AuthFailure, AuthState, Authenticated, Credentials, OfwClient,
    TokenCache, TokenSource,
};
pub use paths::{AppPaths, default_data_dir, default_state_dir};
pub use schema::{generate_example_config, generate_schema, write_generated_files};

/// Application name used for config directories and environment prefix.
pub const APP_NAME: &str = "ofw";

/// Returns the environment variable prefix for this application.
#[must_use]
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
