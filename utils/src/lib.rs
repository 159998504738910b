//! # Fixture Utilities
//!
//! Common utility functions for naming, secrets, host inspection and path
//! resolution.
//!
//! # Best Practices
//!
//! - Uses UUID v4 for collision-resistant names
//! - Generated names are valid unquoted PostgreSQL identifiers

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use uuid::Uuid;

/// Assumed host memory when it cannot be read.
const FALLBACK_MEMORY_MB: u64 = 4096;

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-\.]+").expect("valid separator regex"));
static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid acronym regex"));
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid word regex"));
static REPEATED_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

/// Generate a collision-resistant name such as `db_3f2a9c0d41b7e655`.
///
/// # Examples
///
/// ```
/// use utils::random_name;
///
/// let name = random_name("db");
/// assert!(name.starts_with("db_"));
/// assert_eq!(name.len(), 19);
/// ```
#[must_use]
pub fn random_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..16])
}

/// Generate a random alphanumeric password.
#[must_use]
pub fn generate_password() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Convert an identifier to snake case (`AddressId` → `address_id`,
/// `HTTPServer` → `http_server`).
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let name = SEPARATORS.replace_all(name.trim(), "_");
    let name = ACRONYM_BOUNDARY.replace_all(&name, "${1}_${2}");
    let name = WORD_BOUNDARY.replace_all(&name, "${1}_${2}");
    let name = REPEATED_UNDERSCORES.replace_all(&name, "_");
    name.trim_matches('_').to_lowercase()
}

/// Total host memory in megabytes.
#[must_use]
pub fn memory_mb() -> u64 {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(meminfo) => parse_mem_total_mb(&meminfo).unwrap_or(FALLBACK_MEMORY_MB),
        Err(e) => {
            tracing::debug!("could not read host memory, assuming {FALLBACK_MEMORY_MB}MB: {e}");
            FALLBACK_MEMORY_MB
        }
    }
}

fn parse_mem_total_mb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

/// Resolve `dir` against the working directory and its ancestors, so test
/// code can name a path relative to the crate or the workspace root.
#[must_use]
pub fn find_path(dir: impl AsRef<Path>) -> Option<PathBuf> {
    let dir = dir.as_ref();
    if dir.is_absolute() {
        return dir.exists().then(|| dir.to_path_buf());
    }
    let cwd = std::env::current_dir().ok()?;
    find_path_from(&cwd, dir)
}

fn find_path_from(start: &Path, dir: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|ancestor| ancestor.join(dir))
        .find(|candidate| candidate.exists())
}
