//! Pooled connections, role assumption and database cloning.

use crate::fixture::PostgresFixture;
use errors::{FixtureError, Result};
use fixture_core::Provisioner;
use sqlx::{AssertSqlSafe, Connection, PgPool};
use utils::random_name;

/// Databases the cleanup session may run on, in order of preference.
const MAINTENANCE_DATABASES: [&str; 2] = ["postgres", "template1"];

/// Clone names are `<source>_<16 hex>` and must fit in 63 bytes.
const CLONE_PREFIX_MAX: usize = 46;

/// Per-call connection request.
///
/// ```
/// use testing::ConnectOptions;
///
/// let options = ConnectOptions::new()
///     .database("orders")
///     .database("")
///     .role("readonly")
///     .create_copy();
/// assert_eq!(options.target_database(), Some("orders"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    database: Option<String>,
    role: Option<String>,
    create_copy: bool
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets `database` instead of the primary one. An empty name leaves
    /// the current target in place.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        if !database.is_empty() {
            self.database = Some(database);
        }
        self
    }

    /// `SET ROLE` on every pooled connection.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Connect to a fresh copy of the target database instead of the target
    /// itself.
    pub fn create_copy(mut self) -> Self {
        self.create_copy = true;
        self
    }

    pub fn target_database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

/// Double-quotes an identifier for interpolation into SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn clone_name(source: &str) -> String {
    let prefix: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .take(CLONE_PREFIX_MAX)
        .collect();
    random_name(&prefix)
}

impl<P: Provisioner> PostgresFixture<P> {
    /// Opens a pool against the requested database.
    ///
    /// With [`ConnectOptions::create_copy`] the target is first cloned into
    /// a uniquely named database, and the pool connects to the clone. Clones
    /// persist until dropped or until the fixture is torn down.
    pub async fn connect(&self, options: ConnectOptions) -> Result<PgPool> {
        self.handle()?;
        let mut database = options
            .database
            .unwrap_or_else(|| self.settings.database.clone());

        if options.create_copy {
            let target = clone_name(&database);
            self.copy_database(&database, &target).await?;
            database = target;
        }

        let settings = self.settings.with_database(&database);
        let mut conn = settings.connect().await?;

        let set_role = options.role.as_deref().map(|role| {
            (role.to_string(), format!("SET ROLE {}", quote_ident(role)))
        });
        if let Some((role, statement)) = &set_role {
            sqlx::query(AssertSqlSafe(statement.as_str()))
                .execute(&mut conn)
                .await
                .map_err(|source| FixtureError::RoleAssumption {
                    role: role.clone(),
                    source
                })?;
        }
        conn.close()
            .await
            .map_err(|source| settings.connection_error(source))?;

        let mut pool_options = settings.pool_options();
        if let Some((_, statement)) = set_role {
            pool_options = pool_options.after_connect(move |conn, _meta| {
                let statement = statement.clone();
                Box::pin(async move {
                    sqlx::query(AssertSqlSafe(statement.as_str()))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            });
        }

        let pool = pool_options
            .connect_with(settings.connect_options()?)
            .await
            .map_err(|source| settings.connection_error(source))?;

        tracing::debug!(
            database = %database,
            role = ?options.role,
            copy = options.create_copy,
            "connected"
        );
        Ok(pool)
    }

    /// Like [`PostgresFixture::connect`], panicking on failure.
    pub async fn must_connect(&self, options: ConnectOptions) -> PgPool {
        match self.connect(options).await {
            Ok(pool) => pool,
            Err(e) => panic!("failed to connect to postgres fixture: {e}")
        }
    }

    /// Connects to the primary database and pings it.
    pub async fn ping(&self) -> Result<()> {
        self.handle()?;
        let conn = self.settings.connect().await?;
        conn.close()
            .await
            .map_err(|source| self.settings.connection_error(source))
    }

    /// `createdb --template=template0 <name>`.
    pub async fn create_database(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(FixtureError::configuration("must provide a database name"));
        }
        self.exec_checked(vec![
            "createdb".to_string(),
            format!("--username={}", self.settings.user),
            "--template=template0".to_string(),
            name.to_string(),
        ])
        .await?;
        tracing::debug!(database = %name, "created database");
        Ok(())
    }

    /// Copies `source` (the primary database when empty) into `target`
    /// through `createdb --template`.
    ///
    /// Fails when anything else is connected to `source`; sessions on the
    /// template are not terminated.
    pub async fn copy_database(&self, source: &str, target: &str) -> Result<()> {
        let source = if source.is_empty() {
            self.settings.database.as_str()
        } else {
            source
        };
        let output = self
            .exec(vec![
                "createdb".to_string(),
                format!("--username={}", self.settings.user),
                format!("--template={source}"),
                target.to_string(),
            ])
            .await?;

        if !output.success() {
            return Err(FixtureError::Clone {
                template: source.to_string(),
                target: target.to_string(),
                exit_code: output.exit_code,
                output: output.diagnostics()
            });
        }
        tracing::debug!(source, target, "copied database");
        Ok(())
    }

    /// Drops `name` after locking out new sessions and terminating existing
    /// ones.
    pub async fn drop_database(&self, name: &str) -> Result<()> {
        self.handle()?;
        let maintenance = std::iter::once(self.settings.database.as_str())
            .chain(MAINTENANCE_DATABASES)
            .find(|db| *db != name)
            .unwrap_or(MAINTENANCE_DATABASES[0]);
        let settings = self.settings.with_database(maintenance);
        let mut conn = settings.connect().await?;

        let revoke = format!("REVOKE CONNECT ON DATABASE {} FROM public", quote_ident(name));
        sqlx::query(AssertSqlSafe(revoke.as_str()))
            .execute(&mut conn)
            .await
            .map_err(|source| FixtureError::CatalogQuery {
                operation: "revoke connect".to_string(),
                database: name.to_string(),
                source
            })?;

        let terminated: Vec<(bool,)> = sqlx::query_as(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()"
        )
        .bind(name)
        .fetch_all(&mut conn)
        .await
        .map_err(|source| FixtureError::CatalogQuery {
            operation: "terminate sessions".to_string(),
            database: name.to_string(),
            source
        })?;

        conn.close()
            .await
            .map_err(|source| settings.connection_error(source))?;

        self.exec_checked(vec![
            "dropdb".to_string(),
            format!("--username={}", self.settings.user),
            name.to_string(),
        ])
        .await?;
        tracing::debug!(database = %name, terminated = terminated.len(), "dropped database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixtureBuilder;
    use crate::fake::FakeProvisioner;

    async fn ready(fake: &FakeProvisioner) -> PostgresFixture<FakeProvisioner> {
        FixtureBuilder::new()
            .with_provisioner(fake.clone())
            .name("orders")
            .provision()
            .await
            .unwrap()
            .assume_ready(1)
    }

    #[test]
    fn test_connect_options_later_wins() {
        let options = ConnectOptions::new()
            .database("a")
            .database("b")
            .role("r1")
            .role("r2");
        assert_eq!(options.target_database(), Some("b"));
        assert_eq!(options.role.as_deref(), Some("r2"));
        assert!(!options.create_copy);
    }

    #[test]
    fn test_connect_options_empty_database_keeps_default() {
        assert_eq!(ConnectOptions::new().database("").target_database(), None);
        assert_eq!(
            ConnectOptions::new().database("x").database("").target_database(),
            Some("x")
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("readonly"), "\"readonly\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_clone_name_fits_identifier_limit() {
        let name = clone_name(&"x".repeat(80));
        assert!(name.len() <= 63);
        assert!(clone_name("Orders-DB").starts_with("orders_db_"));
        assert_ne!(clone_name("orders"), clone_name("orders"));
    }

    #[tokio::test]
    async fn test_create_database_rejects_empty_name() {
        let fake = FakeProvisioner::default();
        let fixture = ready(&fake).await;
        let err = fixture.create_database("").await.unwrap_err();
        assert!(matches!(err, FixtureError::Configuration { .. }));
        assert!(fake.commands().is_empty());
    }

    #[tokio::test]
    async fn test_create_database_uses_template0() {
        let fake = FakeProvisioner::default();
        let fixture = ready(&fake).await;
        fixture.create_database("scratch").await.unwrap();

        assert_eq!(fake.commands(), vec![vec![
            "createdb".to_string(),
            "--username=postgres".to_string(),
            "--template=template0".to_string(),
            "scratch".to_string(),
        ]]);
    }

    #[tokio::test]
    async fn test_copy_database_defaults_to_primary() {
        let fake = FakeProvisioner::default();
        let fixture = ready(&fake).await;
        fixture.copy_database("", "orders_copy").await.unwrap();

        let command = &fake.commands()[0];
        assert_eq!(command[2], "--template=orders");
        assert_eq!(command[3], "orders_copy");
    }

    #[tokio::test]
    async fn test_copy_failure_carries_exit_code_and_output() {
        let fake = FakeProvisioner::default();
        fake.respond(
            "createdb",
            1,
            "source database \"orders\" is being accessed by other users"
        );
        let fixture = ready(&fake).await;

        match fixture.copy_database("orders", "orders_copy").await {
            Err(FixtureError::Clone {
                template,
                target,
                exit_code,
                output
            }) => {
                assert_eq!(template, "orders");
                assert_eq!(target, "orders_copy");
                assert_eq!(exit_code, 1);
                assert!(output.contains("being accessed"));
            }
            other => panic!("unexpected result: {other:?}")
        }
    }

    #[tokio::test]
    async fn test_connect_with_copy_fails_before_connecting() {
        let fake = FakeProvisioner::default();
        fake.respond("createdb", 1, "boom");
        let fixture = ready(&fake).await;

        let err = fixture
            .connect(ConnectOptions::new().create_copy())
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::Clone { ref template, .. } if template == "orders"));
        let target = &fake.commands()[0][3];
        assert!(target.starts_with("orders_"));
    }

    #[tokio::test]
    async fn test_connect_failure_names_database() {
        let fake = FakeProvisioner::default();
        let fixture = ready(&fake).await;

        let err = fixture
            .connect(ConnectOptions::new().database("analytics"))
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::Connection { ref database, .. } if database == "analytics"));
    }
}
