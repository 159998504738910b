//! # Environment Variable Loader
//!
//! Loads fixture configuration from environment variables following 12-factor
//! app principles.
//!
//! # Naming Convention
//! - `HOST_NETWORK_NAME`: shared docker network, for suites that run inside a
//!   container next to the database
//! - `PGFIXTURE_*`: fixture launch settings

use crate::config::FixtureConfig;
use errors::{FixtureError, Result};
use fixture_core::Mount;
use std::env;

pub const NETWORK_NAME_ENV: &str = "HOST_NETWORK_NAME";

/// Load fixture configuration from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Environment variables override default values; builder calls made after
/// loading override the environment.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("image: {}", config.image());
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// - `HOST_NETWORK_NAME`: Network to attach to (default: none)
/// - `PGFIXTURE_NAME`: Process base name and database (default: "postgres")
/// - `PGFIXTURE_REPOSITORY`: Image repository (default: "postgres")
/// - `PGFIXTURE_VERSION`: Image tag (default: "13-alpine")
/// - `PGFIXTURE_TIMEOUT_SECONDS`: Readiness budget (default: 30)
/// - `PGFIXTURE_EXPIRE_SECONDS`: Reap after (default: 600)
/// - `PGFIXTURE_SKIP_TEARDOWN`: Keep the process after teardown (true/false,
///   default: false)
/// - `PGFIXTURE_MOUNTS`: Comma separated `host:container` mounts
pub fn load_from_env() -> Result<FixtureConfig> {
    let defaults = FixtureConfig::default();
    let mounts = match non_empty_var("PGFIXTURE_MOUNTS") {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::parse::<Mount>)
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new()
    };

    let config = FixtureConfig {
        name: non_empty_var("PGFIXTURE_NAME").unwrap_or(defaults.name),
        repository: non_empty_var("PGFIXTURE_REPOSITORY").unwrap_or(defaults.repository),
        version: non_empty_var("PGFIXTURE_VERSION").unwrap_or(defaults.version),
        settings: None,
        expire_after_secs: parse_env("PGFIXTURE_EXPIRE_SECONDS")?
            .unwrap_or(defaults.expire_after_secs),
        timeout_after_secs: parse_env("PGFIXTURE_TIMEOUT_SECONDS")?
            .unwrap_or(defaults.timeout_after_secs),
        skip_teardown: parse_env("PGFIXTURE_SKIP_TEARDOWN")?.unwrap_or(defaults.skip_teardown),
        mounts,
        network_name: non_empty_var(NETWORK_NAME_ENV)
    };

    tracing::debug!(
        image = %config.image(),
        network = ?config.network_name,
        "loaded fixture configuration from environment"
    );
    Ok(config)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `Ok(None)` when unset, an error when set but unparsable.
fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| FixtureError::configuration(format!("{key}={raw}: {e}"))),
        None => Ok(None)
    }
}
