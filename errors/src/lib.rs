//! # Fixture Errors
//!
//! Error handling for disposable PostgreSQL fixtures.
//!
//! Follows Microsoft Pragmatic Rust Guidelines:
//! - Uses `thiserror` for structured error definitions
//! - One variant per failure class so callers can branch on the kind
//! - Every variant names the operation or target it failed on

use std::time::Duration;
use thiserror::Error;

/// SQLSTATE raised when connecting to a database that does not exist.
const INVALID_CATALOG_NAME: &str = "3D000";

pub type Result<T> = std::result::Result<T, FixtureError>;

/// Every failure a fixture can surface to its caller.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Failed to parse connection settings: {source}")]
    ConfigurationParse {
        #[source]
        source: sqlx::Error
    },

    #[error("Provisioning failed during {operation}: {reason}")]
    Provisioning { operation: String, reason: String },

    /// A single readiness attempt failed. Only ever observed wrapped in
    /// [`FixtureError::ReadinessTimeout`].
    #[error("Postgres is not ready: {reason}")]
    NotReady { reason: String },

    #[error("Gave up waiting for postgres after {attempts} attempts ({waited:?}): {last}")]
    ReadinessTimeout {
        waited: Duration,
        attempts: u32,
        #[source]
        last: Box<FixtureError>
    },

    #[error("Failed to connect to database {database}: {source}")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error
    },

    #[error("Failed to assume role '{role}': {source}")]
    RoleAssumption {
        role: String,
        #[source]
        source: sqlx::Error
    },

    #[error("Failed to copy database {template} into {target} (code: {exit_code}): {output}")]
    Clone {
        template: String,
        target: String,
        exit_code: i64,
        output: String
    },

    #[error("Catalog query {operation} on database {database} failed: {source}")]
    CatalogQuery {
        operation: String,
        database: String,
        #[source]
        source: sqlx::Error
    },

    #[error("Table {schema}.{table} does not exist")]
    TableMissing { schema: String, table: String },

    #[error(
        "Struct {model} contains field {field} which does not exist in table: \
         {schema}.{table}{columns:?}"
    )]
    ColumnMissing {
        model: String,
        field: String,
        schema: String,
        table: String,
        columns: Vec<String>
    },

    #[error("Model cannot be described as a table: {reason}")]
    InvalidModel { reason: String },

    #[error("{program} exited with error (code: {exit_code}): {output}")]
    ExternalCommand {
        program: String,
        exit_code: i64,
        output: String
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error
    }
}

impl FixtureError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into()
        }
    }

    pub fn provisioning(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Provisioning {
            operation: operation.into(),
            reason: reason.to_string()
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into()
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source
        }
    }

    /// True when the server rejected a connection because the target database
    /// does not exist.
    pub fn is_missing_database(&self) -> bool {
        match self {
            Self::Connection { source, .. } | Self::CatalogQuery { source, .. } => source
                .as_database_error()
                .and_then(|e| e.code())
                .is_some_and(|code| code == INVALID_CATALOG_NAME),
            _ => false
        }
    }

    /// Exit status of the delegated command, for the variants that carry one.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::Clone { exit_code, .. } | Self::ExternalCommand { exit_code, .. } => {
                Some(*exit_code)
            }
            _ => None
        }
    }

    /// The innermost error of a readiness timeout, or `self`.
    pub fn last_attempt(&self) -> &FixtureError {
        match self {
            Self::ReadinessTimeout { last, .. } => last.last_attempt(),
            other => other
        }
    }
}
