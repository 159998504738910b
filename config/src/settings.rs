//! # Connection Settings
//!
//! The connection descriptor of a fixture. Since a sqlx `PgConnectOptions`
//! should not be assembled from scratch for every call, `ConnectionSettings`
//! holds all the parameters needed to reach a database throughout the
//! lifecycle of a fixture, and derives connection strings and options from
//! them.

use errors::{FixtureError, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use std::fmt;
use url::Url;
use validator::Validate;

/// Connection parameters of one database.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Created once per fixture, mutated only to fill in host and port once the
/// backing process is known. `Clone` yields a fully independent value; use
/// [`ConnectionSettings::with_database`] to derive settings for another
/// database on the same server.
///
/// ## Fields
/// - `host`: Server hostname (default: "localhost")
/// - `port`: Server port (default: 5432)
/// - `user`: Login role (default: "postgres")
/// - `password`: Login password (default: empty, filled in by the fixture)
/// - `database`: Database name (default: "postgres")
/// - `disable_ssl`: Render `sslmode=disable` instead of `require` (default:
///   true)
/// - `max_open_conns`: Maximum connections per pool (default: 10, range:
///   1-100)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConnectionSettings {
    #[serde(default = "default_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    #[serde(default = "default_user")]
    #[validate(length(min = 1, max = 63))]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    #[validate(length(min = 1, max = 63))]
    pub database: String,

    #[serde(default = "default_disable_ssl")]
    pub disable_ssl: bool,

    #[serde(default = "default_max_open_conns")]
    #[validate(range(min = 1, max = 100))]
    pub max_open_conns: u32
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_disable_ssl() -> bool {
    true
}

fn default_max_open_conns() -> u32 {
    10
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            disable_ssl: default_disable_ssl(),
            max_open_conns: default_max_open_conns()
        }
    }
}

impl ConnectionSettings {
    pub fn ssl_mode(&self) -> &'static str {
        if self.disable_ssl { "disable" } else { "require" }
    }

    /// libpq keyword/value connection string.
    pub fn dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode={}",
            dsn_value(&self.host),
            self.port,
            dsn_value(&self.user),
            dsn_value(&self.password),
            dsn_value(&self.database),
            self.ssl_mode()
        )
    }

    /// `postgresql://` connection URL with percent-encoded credentials.
    pub fn url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let base = format!("postgresql://{}:{}", host, self.port);

        let Ok(mut url) = Url::parse(&base) else {
            return format!(
                "{}/{}?sslmode={}",
                base.replacen("://", &format!("://{}:{}@", self.user, self.password), 1),
                self.database,
                self.ssl_mode()
            );
        };
        let _ = url.set_username(&self.user);
        let _ = url.set_password(Some(&self.password));
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().push(&self.database);
        }
        url.query_pairs_mut().append_pair("sslmode", self.ssl_mode());
        url.into()
    }

    /// Copy of these settings pointing at another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        let mut settings = self.clone();
        settings.database = database.into();
        settings
    }

    /// sqlx connect options parsed from [`ConnectionSettings::url`].
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        self.url()
            .parse::<PgConnectOptions>()
            .map_err(|source| FixtureError::ConfigurationParse { source })
    }

    /// Pool options sized by `max_open_conns`.
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new().max_connections(self.max_open_conns.max(1))
    }

    /// Opens a single connection and pings it.
    pub async fn connect(&self) -> Result<PgConnection> {
        let options = self.connect_options()?;
        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(|source| self.connection_error(source))?;
        conn.ping()
            .await
            .map_err(|source| self.connection_error(source))?;
        Ok(conn)
    }

    pub fn connection_error(&self, source: sqlx::Error) -> FixtureError {
        FixtureError::Connection {
            database: self.database.clone(),
            source
        }
    }
}

impl fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dsn())
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("disable_ssl", &self.disable_ssl)
            .field("max_open_conns", &self.max_open_conns)
            .finish()
    }
}

/// Quotes a keyword/value entry when libpq would otherwise split or
/// misread it.
fn dsn_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
