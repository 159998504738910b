//! # Configuration File Loading
//!
//! Loads fixture configuration from TOML files.

use crate::config::FixtureConfig;
use errors::{FixtureError, Result};
use std::path::Path;

/// Load fixture configuration from a TOML file.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Lets a suite keep its fixture parameters next to its fixtures. Missing
/// keys fall back to defaults.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_toml;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_toml(Path::new("pgfixture.toml"))?;
///     println!("image: {}", config.image());
///     Ok(())
/// }
/// ```
///
/// ## Error Handling
/// - unreadable file: `FixtureError::Io`
/// - invalid TOML or values: `FixtureError::Configuration`
pub fn load_from_toml(path: &Path) -> Result<FixtureConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| FixtureError::io(path, e))?;

    let config: FixtureConfig = toml::from_str(&contents).map_err(|e| {
        FixtureError::configuration(format!("failed to parse {}: {}", path.display(), e))
    })?;
    config.check()?;

    Ok(config)
}
