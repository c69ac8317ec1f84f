//! Shared library for Crew Marketplace Lambda functions.
//!
//! This crate provides common utilities, types, and clients used across all Lambda functions.

pub mod auth;
pub mod availability;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod profiles;
pub mod secrets;
pub mod slug;
pub mod tickets;
pub mod validation;

use tracing_subscriber::EnvFilter;

pub use auth::{
    authenticate, extract_user_from_context, optional_user, validate_token, AuthClaims,
    AuthenticatedUser,
};
pub use config::Config;
pub use error::{Error, Result};
pub use http::ApiResponse;
pub use models::Pagination;
pub use secrets::{get_database_credentials, get_secret, DatabaseCredentials};

/// Install the JSON log formatter, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
}
