//! Integration tests for the PostgreSQL fixture
//!
//! These tests launch real containers and are skipped when Docker is not
//! available.

use futures_util::FutureExt;
use serde::Serialize;
use sqlx::Row;
use std::time::Duration;
use testing::{
    ConnectOptions, FixtureBuilder, FixtureError, FixtureState, Model, PostgresFixture,
    TableExpectation
};

const MIGRATIONS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/testdata/migrations");

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
    street: String,
    #[serde(rename = "city")]
    town: String
}

impl Model for Address {}

async fn start_fixture(name: &str) -> Option<PostgresFixture> {
    match FixtureBuilder::new()
        .name(name)
        .timeout_after_secs(60)
        .start()
        .await
    {
        Ok(fixture) => Some(fixture),
        Err(e) => {
            eprintln!("Skipping PostgreSQL test: Docker not available ({e})");
            None
        }
    }
}

#[tokio::test]
async fn test_fixture_lifecycle() {
    let Some(mut fixture) = start_fixture("lifecycle").await else {
        return;
    };

    assert_eq!(fixture.state(), FixtureState::Ready);
    assert!(fixture.host_name().unwrap().starts_with("lifecycle_"));
    assert_eq!(fixture.settings().database, "lifecycle");
    fixture.ping().await.unwrap();
    fixture.ping_psql().await.unwrap();
    assert!(fixture.tables("lifecycle").await.unwrap().is_empty());

    fixture.teardown().await.unwrap();
    assert_eq!(fixture.state(), FixtureState::TornDown);
    fixture.teardown().await.unwrap();
    assert!(fixture.ping().await.is_err());
}

#[tokio::test]
async fn test_load_and_validate_models() {
    let Some(fixture) = start_fixture("models").await else {
        return;
    };

    fixture
        .run(|f| {
            async move {
                f.load_sql(MIGRATIONS).await.unwrap();
                assert_eq!(f.tables("models").await.unwrap(), vec!["address", "person"]);
                assert!(f.table_exists("models", "public", "person").await.unwrap());
                assert!(!f.table_exists("models", "app", "person").await.unwrap());
                assert_eq!(
                    f.table_columns("models", "public", "address").await.unwrap(),
                    vec!["id", "street", "city", "postal_code"]
                );

                f.validate_model("models", &Person::default()).await.unwrap();
                f.validate_models("models", [
                    TableExpectation::of(&Address::default()).unwrap(),
                    TableExpectation::of(&Person::default()).unwrap(),
                ])
                .await
                .unwrap();

                let pool = f
                    .connect(ConnectOptions::new().database("models"))
                    .await
                    .unwrap();
                sqlx::query("ALTER TABLE person DROP COLUMN last_name")
                    .execute(&pool)
                    .await
                    .unwrap();
                pool.close().await;

                match f.validate_model("models", &Person::default()).await {
                    Err(FixtureError::ColumnMissing { model, field, .. }) => {
                        assert_eq!(model, "Person");
                        assert_eq!(field, "last_name");
                    }
                    other => panic!("expected a missing column, got {other:?}")
                }

                let err = f
                    .validate_models("models", [TableExpectation::new("Ghost", "ghost")])
                    .await
                    .unwrap_err();
                assert!(matches!(err, FixtureError::TableMissing { .. }));
            }
            .boxed()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_copy_and_drop_databases() {
    let Some(mut fixture) = start_fixture("clones").await else {
        return;
    };

    fixture.create_database("source_db").await.unwrap();
    let pool = fixture
        .connect(ConnectOptions::new().database("source_db"))
        .await
        .unwrap();
    for statement in [
        "CREATE TABLE a (id INT PRIMARY KEY)",
        "CREATE TABLE b (id INT PRIMARY KEY)",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;

    fixture.copy_database("source_db", "copy_db").await.unwrap();
    assert_eq!(fixture.tables("copy_db").await.unwrap(), vec!["a", "b"]);

    // Open sessions on the dropped database are terminated.
    let lingering = fixture
        .connect(ConnectOptions::new().database("source_db"))
        .await
        .unwrap();
    fixture.drop_database("source_db").await.unwrap();
    assert_eq!(fixture.tables("copy_db").await.unwrap(), vec!["a", "b"]);

    let err = fixture
        .connect(ConnectOptions::new().database("source_db"))
        .await
        .unwrap_err();
    assert!(err.is_missing_database(), "unexpected error: {err:?}");
    lingering.close().await;

    let err = fixture.copy_database("source_db", "other").await.unwrap_err();
    assert!(matches!(err, FixtureError::Clone { exit_code, .. } if exit_code != 0));

    fixture.teardown().await.unwrap();
}

#[tokio::test]
async fn test_connect_with_copy_and_role() {
    let Some(mut fixture) = start_fixture("connect").await else {
        return;
    };
    fixture.load_sql(MIGRATIONS).await.unwrap();

    let pool = fixture
        .connect(ConnectOptions::new().create_copy())
        .await
        .unwrap();
    let database: String = sqlx::query_scalar("SELECT current_database()")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(database.starts_with("connect_"));
    assert_eq!(fixture.tables(&database).await.unwrap(), vec!["address", "person"]);

    sqlx::query("CREATE ROLE reader")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("GRANT SELECT ON person TO reader")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let reader = fixture
        .connect(ConnectOptions::new().database(&database).role("reader"))
        .await
        .unwrap();
    let row = sqlx::query("SELECT current_user::text AS who, count(*) AS n FROM person")
        .fetch_one(&reader)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("who"), "reader");
    assert_eq!(row.get::<i64, _>("n"), 1);
    assert!(
        sqlx::query("SELECT * FROM address")
            .execute(&reader)
            .await
            .is_err()
    );
    reader.close().await;

    let err = fixture
        .connect(ConnectOptions::new().role("nobody"))
        .await
        .unwrap_err();
    assert!(matches!(err, FixtureError::RoleAssumption { ref role, .. } if role == "nobody"));

    fixture.teardown().await.unwrap();
}

#[tokio::test]
async fn test_dump_and_restore() {
    let Some(mut fixture) = start_fixture("snapshots").await else {
        return;
    };
    let dir = tempfile::TempDir::new().unwrap();

    fixture.load_sql(MIGRATIONS).await.unwrap();
    fixture.dump(dir.path(), "snapshots.dump").await.unwrap();
    assert!(dir.path().join("snapshots.dump").exists());

    fixture
        .psql(&["psql", "-c", "DROP TABLE person; DROP TABLE address;"], false)
        .await
        .unwrap();
    assert!(fixture.tables("snapshots").await.unwrap().is_empty());

    fixture.restore(dir.path(), "snapshots.dump").await.unwrap();
    assert_eq!(fixture.tables("snapshots").await.unwrap(), vec!["address", "person"]);

    fixture.teardown().await.unwrap();
}

#[tokio::test]
async fn test_readiness_timeout_is_reported() {
    // initdb alone takes longer than this budget.
    let started = std::time::Instant::now();
    let result = FixtureBuilder::new()
        .name("impatient")
        .timeout_after_secs(1)
        .start()
        .await;

    match result {
        Ok(mut fixture) => fixture.teardown().await.unwrap(),
        Err(FixtureError::ReadinessTimeout { attempts, last, .. }) => {
            assert!(started.elapsed() >= Duration::from_secs(1));
            assert!(attempts >= 1);
            assert!(!matches!(*last, FixtureError::ReadinessTimeout { .. }));
        }
        Err(e) => eprintln!("Skipping PostgreSQL test: Docker not available ({e})")
    }
}
