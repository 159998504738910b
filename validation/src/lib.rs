//! # Schema Validation
//!
//! Checks that model types and a live database agree: every table a model
//! maps to exists and every serialized field has a matching column.
//!
//! Validation only checks that the model's columns are a subset of the
//! table's. Extra table columns, column types and constraints are ignored.

mod expectation;
mod introspect;

pub use expectation::{DEFAULT_SCHEMA, Model, TableExpectation, split_table_name};
pub use introspect::{ModelShape, ShapeError, describe};

use errors::{FixtureError, Result};
use fixture_core::Catalog;
use std::collections::HashSet;

/// Validate a single model against `database`.
pub async fn validate_model<C, M>(catalog: &C, database: &str, model: &M) -> Result<()>
where
    C: Catalog + ?Sized,
    M: Model
{
    let expectation = TableExpectation::of(model)?;
    validate_expectation(catalog, database, &expectation).await
}

/// Validate expectations in order, stopping at the first mismatch.
pub async fn validate_models<C, I>(catalog: &C, database: &str, expectations: I) -> Result<()>
where
    C: Catalog + ?Sized,
    I: IntoIterator<Item = TableExpectation>
{
    for expectation in expectations {
        validate_expectation(catalog, database, &expectation).await?;
    }
    Ok(())
}

pub async fn validate_expectation<C>(
    catalog: &C,
    database: &str,
    expectation: &TableExpectation
) -> Result<()>
where
    C: Catalog + ?Sized
{
    let TableExpectation {
        model,
        schema,
        table,
        columns: fields
    } = expectation;

    if !catalog.table_exists(database, schema, table).await? {
        return Err(FixtureError::TableMissing {
            schema: schema.clone(),
            table: table.clone()
        });
    }

    let columns = catalog.table_columns(database, schema, table).await?;
    let known: HashSet<&str> = columns.iter().map(String::as_str).collect();

    if let Some(field) = fields.iter().find(|f| !known.contains(f.as_str())) {
        return Err(FixtureError::ColumnMissing {
            model: model.clone(),
            field: field.clone(),
            schema: schema.clone(),
            table: table.clone(),
            columns
        });
    }

    tracing::debug!(
        model = %model,
        table = %expectation.qualified_name(),
        database,
        "model matches table"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Serialize;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory catalog keyed by `(schema, table)`.
    #[derive(Default)]
    struct FakeCatalog {
        tables: HashMap<(String, String), Vec<String>>,
        lookups: Mutex<Vec<String>>
    }

    impl FakeCatalog {
        fn with_table(mut self, schema: &str, table: &str, columns: &[&str]) -> Self {
            self.tables.insert(
                (schema.to_string(), table.to_string()),
                columns.iter().map(ToString::to_string).collect()
            );
            self
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn table_exists(&self, _database: &str, schema: &str, table: &str) -> Result<bool> {
            self.lookups
                .lock()
                .unwrap()
                .push(format!("{schema}.{table}"));
            Ok(self
                .tables
                .contains_key(&(schema.to_string(), table.to_string())))
        }

        async fn table_columns(
            &self,
            _database: &str,
            schema: &str,
            table: &str
        ) -> Result<Vec<String>> {
            Ok(self
                .tables
                .get(&(schema.to_string(), table.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[derive(Serialize, Default)]
    struct Person {
        id: i64,
        first_name: String,
        last_name: String,
        address_id: i64,
        #[serde(skip)]
        foo_bar: String
    }

    impl Model for Person {}

    #[derive(Serialize, Default)]
    struct Address {
        id: i64,
        street: String
    }

    impl Model for Address {}

    #[derive(Serialize, Default)]
    struct Member {
        id: i64,
        #[serde(rename = "nickname")]
        handle: String
    }

    impl Model for Member {
        fn table_name(&self) -> Option<String> {
            Some("\"app\".\"people\"".to_string())
        }
    }

    fn catalog() -> FakeCatalog {
        FakeCatalog::default()
            .with_table(
                "public",
                "person",
                &["id", "first_name", "last_name", "address_id", "created_at"]
            )
            .with_table("public", "address", &["id", "street", "city"])
            .with_table("app", "people", &["id", "nickname"])
    }

    #[tokio::test]
    async fn test_matching_model_validates() {
        let catalog = catalog();
        validate_model(&catalog, "db", &Person::default())
            .await
            .unwrap();
        validate_model(&catalog, "db", &Member::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_table() {
        let catalog = FakeCatalog::default();
        let err = validate_model(&catalog, "db", &Person::default())
            .await
            .unwrap_err();
        match err {
            FixtureError::TableMissing { schema, table } => {
                assert_eq!(schema, "public");
                assert_eq!(table, "person");
            }
            other => panic!("unexpected error: {other:?}")
        }
    }

    #[tokio::test]
    async fn test_missing_column_reports_first_unknown_field() {
        let catalog = FakeCatalog::default().with_table("public", "person", &["id", "first_name"]);
        let err = validate_model(&catalog, "db", &Person::default())
            .await
            .unwrap_err();
        match err {
            FixtureError::ColumnMissing {
                model,
                field,
                columns,
                ..
            } => {
                assert_eq!(model, "Person");
                assert_eq!(field, "last_name");
                assert_eq!(columns, vec!["id", "first_name"]);
            }
            other => panic!("unexpected error: {other:?}")
        }
    }

    #[tokio::test]
    async fn test_validate_models_stops_at_first_failure() {
        let catalog = catalog();
        let expectations = vec![
            TableExpectation::of(&Address::default()).unwrap(),
            TableExpectation::new("Ghost", "ghost").with_columns(["id"]),
            TableExpectation::of(&Person::default()).unwrap(),
        ];

        let err = validate_models(&catalog, "db", expectations)
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::TableMissing { ref table, .. } if table == "ghost"));
        assert_eq!(
            *catalog.lookups.lock().unwrap(),
            vec!["public.address", "public.ghost"]
        );
    }

    #[tokio::test]
    async fn test_validate_models_empty_is_ok() {
        validate_models(&catalog(), "db", Vec::new()).await.unwrap();
    }
}
