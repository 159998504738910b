//! Value types shared between the fixture and its provisioner.

use errors::FixtureError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A host directory bound into the backing process.
///
/// Written and parsed in docker's `host:container` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mount {
    pub source: PathBuf,
    pub target: String
}

impl Mount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into()
        }
    }
}

impl FromStr for Mount {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((source, target)) if !source.is_empty() && target.starts_with('/') => {
                Ok(Self::new(source, target))
            }
            _ => Err(FixtureError::configuration(format!(
                "mount '{s}' must look like /host/path:/container/path"
            )))
        }
    }
}

impl TryFrom<String> for Mount {
    type Error = FixtureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mount> for String {
    fn from(mount: Mount) -> Self {
        mount.to_string()
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.display(), self.target)
    }
}

/// Everything a provisioner needs to launch one backing process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Unique name of the process (the container name for docker).
    pub name: String,
    pub repository: String,
    pub tag: String,
    pub env: Vec<(String, String)>,
    /// Shared network to attach to, if any.
    pub network: Option<String>,
    /// Arguments passed to the image's entrypoint.
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    /// Port the server listens on inside the process.
    pub exposed_port: u16,
    /// The provisioner reaps the process after this long even if nobody
    /// purges it.
    pub expire_after: Duration
}

impl LaunchSpec {
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Captured result of a command executed inside the backing process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr followed by stdout, trimmed, for error reports.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, _) => stdout.to_string(),
            (false, true) => stderr.to_string(),
            (false, false) => format!("{stderr}\n{stdout}")
        }
    }
}
