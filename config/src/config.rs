//! # Fixture Configuration
//!
//! Launch parameters of one disposable PostgreSQL fixture.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization, with every field
//!   defaulted
//! - Use `validator` for input validation

use crate::settings::ConnectionSettings;
use errors::{FixtureError, Result};
use fixture_core::Mount;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

pub const DEFAULT_POSTGRES_REPO: &str = "postgres";
pub const DEFAULT_POSTGRES_VERSION: &str = "13-alpine";
pub const DEFAULT_NAME: &str = "postgres";
pub const DEFAULT_EXPIRE_AFTER_SECS: u64 = 600;
pub const DEFAULT_TIMEOUT_AFTER_SECS: u64 = 30;

/// Fixture launch configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Describes which image to launch, how long to wait for it, when the
/// provisioner should reap it, and how the fixture connects to it.
///
/// ## Usage
/// ```rust
/// use config::FixtureConfig;
///
/// let config = FixtureConfig::default();
/// assert_eq!(config.image(), "postgres:13-alpine");
/// ```
///
/// ## Fields
/// - `name`: Base name of the process and default database name (default:
///   "postgres")
/// - `repository`: Image repository (default: "postgres")
/// - `version`: Image tag (default: "13-alpine")
/// - `settings`: Explicit connection settings; generated when absent
/// - `expire_after_secs`: Reap the process after this long (default: 600)
/// - `timeout_after_secs`: Readiness budget (default: 30)
/// - `skip_teardown`: Leave the process running after teardown (default:
///   false)
/// - `mounts`: Extra `host:container` bind mounts
/// - `network_name`: Shared network to attach to
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct FixtureConfig {
    #[serde(default = "default_name")]
    #[validate(length(min = 1, max = 63))]
    pub name: String,

    #[serde(default = "default_repository")]
    #[validate(length(min = 1))]
    pub repository: String,

    #[serde(default = "default_version")]
    #[validate(length(min = 1))]
    pub version: String,

    #[serde(default)]
    #[validate(nested)]
    pub settings: Option<ConnectionSettings>,

    #[serde(default = "default_expire_after_secs")]
    #[validate(range(min = 1))]
    pub expire_after_secs: u64,

    #[serde(default = "default_timeout_after_secs")]
    #[validate(range(min = 1))]
    pub timeout_after_secs: u64,

    #[serde(default)]
    pub skip_teardown: bool,

    #[serde(default)]
    pub mounts: Vec<Mount>,

    #[serde(default)]
    pub network_name: Option<String>
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_repository() -> String {
    DEFAULT_POSTGRES_REPO.to_string()
}

fn default_version() -> String {
    DEFAULT_POSTGRES_VERSION.to_string()
}

fn default_expire_after_secs() -> u64 {
    DEFAULT_EXPIRE_AFTER_SECS
}

fn default_timeout_after_secs() -> u64 {
    DEFAULT_TIMEOUT_AFTER_SECS
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            repository: default_repository(),
            version: default_version(),
            settings: None,
            expire_after_secs: default_expire_after_secs(),
            timeout_after_secs: default_timeout_after_secs(),
            skip_teardown: false,
            mounts: Vec::new(),
            network_name: None
        }
    }
}

impl FixtureConfig {
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_secs)
    }

    pub fn timeout_after(&self) -> Duration {
        Duration::from_secs(self.timeout_after_secs)
    }

    /// Explicit settings when configured, otherwise the superuser settings
    /// the image is initialized with.
    pub fn resolve_settings(&self, password: impl FnOnce() -> String) -> ConnectionSettings {
        match &self.settings {
            Some(settings) => settings.clone(),
            None => ConnectionSettings {
                password: password(),
                database: self.name.clone(),
                ..ConnectionSettings::default()
            }
        }
    }

    /// Runs `validator` and reports failures as a configuration error.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| FixtureError::configuration(e.to_string()))?;
        if let Some(settings) = &self.settings {
            if settings.password.is_empty() {
                return Err(FixtureError::configuration(
                    "explicit connection settings need a password for the server to be \
                     initialized with"
                ));
            }
        }
        Ok(())
    }
}
