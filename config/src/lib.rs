//! # Configuration System
//!
//! Configuration for disposable PostgreSQL fixtures.
//!
//! This crate provides:
//! - [`ConnectionSettings`], the connection descriptor every fixture carries
//! - [`FixtureConfig`], the launch parameters of one fixture
//! - Environment variable loading (12-factor app principles)
//! - TOML file loading
//!
//! # Best Practices
//!
//! - Uses `validator` crate for input validation
//! - Defaults are filled in by serde, so partial files and empty environments
//!   both yield a usable configuration

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod settings;

pub use config::{
    DEFAULT_EXPIRE_AFTER_SECS, DEFAULT_NAME, DEFAULT_POSTGRES_REPO, DEFAULT_POSTGRES_VERSION,
    DEFAULT_TIMEOUT_AFTER_SECS, FixtureConfig
};
pub use file_loader::load_from_toml;
pub use loader::{NETWORK_NAME_ENV, load_from_env};
pub use settings::ConnectionSettings;
