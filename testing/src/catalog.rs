//! Read-only catalog queries against a fixture database.

use crate::fixture::PostgresFixture;
use async_trait::async_trait;
use errors::{FixtureError, Result};
use fixture_core::{Catalog, Provisioner};
use sqlx::{Connection, PgConnection};
use validation::{Model, TableExpectation};

impl<P: Provisioner> PostgresFixture<P> {
    /// Short-lived connection to `database` for one catalog query.
    async fn catalog_connection(&self, database: &str) -> Result<PgConnection> {
        self.handle()?;
        self.settings.with_database(database).connect().await
    }

    async fn close_catalog_connection(&self, conn: PgConnection, database: &str) {
        if let Err(e) = conn.close().await {
            tracing::debug!(database, error = %e, "failed to close catalog connection");
        }
    }

    pub async fn table_exists(&self, database: &str, schema: &str, table: &str) -> Result<bool> {
        let mut conn = self.catalog_connection(database).await?;
        let result: std::result::Result<i64, sqlx::Error> = sqlx::query_scalar(
            "SELECT count(*) FROM pg_catalog.pg_tables WHERE schemaname = $1 AND tablename = $2"
        )
        .bind(schema)
        .bind(table)
        .fetch_one(&mut conn)
        .await;
        self.close_catalog_connection(conn, database).await;

        let count = result.map_err(|source| catalog_error("table_exists", database, source))?;
        Ok(count > 0)
    }

    /// Column names of `schema.table` in ordinal order. Empty when the table
    /// does not exist.
    pub async fn table_columns(
        &self,
        database: &str,
        schema: &str,
        table: &str
    ) -> Result<Vec<String>> {
        let mut conn = self.catalog_connection(database).await?;
        let result = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position"
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut conn)
        .await;
        self.close_catalog_connection(conn, database).await;

        result.map_err(|source| catalog_error("table_columns", database, source))
    }

    /// Names of every user table in `database`, ordered by schema then name.
    pub async fn tables(&self, database: &str) -> Result<Vec<String>> {
        let mut conn = self.catalog_connection(database).await?;
        let result = sqlx::query_scalar(
            "SELECT tablename::text FROM pg_catalog.pg_tables \
             WHERE schemaname NOT IN ('information_schema', 'pg_catalog') \
             ORDER BY schemaname, tablename"
        )
        .fetch_all(&mut conn)
        .await;
        self.close_catalog_connection(conn, database).await;

        result.map_err(|source| catalog_error("tables", database, source))
    }

    /// Checks `model` against `database`.
    pub async fn validate_model<M: Model>(&self, database: &str, model: &M) -> Result<()> {
        validation::validate_model(self, database, model).await
    }

    /// Checks `expectations` against `database`, stopping at the first
    /// mismatch.
    pub async fn validate_models(
        &self,
        database: &str,
        expectations: impl IntoIterator<Item = TableExpectation>
    ) -> Result<()> {
        validation::validate_models(self, database, expectations).await
    }
}

fn catalog_error(operation: &str, database: &str, source: sqlx::Error) -> FixtureError {
    FixtureError::CatalogQuery {
        operation: operation.to_string(),
        database: database.to_string(),
        source
    }
}

#[async_trait]
impl<P: Provisioner> Catalog for PostgresFixture<P> {
    async fn table_exists(&self, database: &str, schema: &str, table: &str) -> Result<bool> {
        PostgresFixture::table_exists(self, database, schema, table).await
    }

    async fn table_columns(
        &self,
        database: &str,
        schema: &str,
        table: &str
    ) -> Result<Vec<String>> {
        PostgresFixture::table_columns(self, database, schema, table).await
    }
}
