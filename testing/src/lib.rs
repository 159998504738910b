//! Disposable PostgreSQL fixtures for test suites.
//!
//! A fixture launches one PostgreSQL server per test suite, waits until it
//! accepts connections, and hands out pools against the primary database or
//! against cheap template copies of it:
//!
//! - [`FixtureBuilder`] / [`PostgresFixture`]: lifecycle (launch, readiness,
//!   teardown, panic-safe [`PostgresFixture::run`])
//! - [`ConnectOptions`]: per-call target database, role and copy-on-connect
//! - catalog queries and model validation against a live database
//! - dump, restore and SQL loading through the server's client tools
//!
//! Processes are launched through a [`fixture_core::Provisioner`];
//! [`DockerProvisioner`] is the default.

mod catalog;
mod connection;
mod docker;
#[cfg(test)]
mod fake;
mod fixture;
pub mod readiness;
mod snapshot;

pub use config::{ConnectionSettings, FixtureConfig};
pub use connection::{ConnectOptions, quote_ident};
pub use docker::{DockerHandle, DockerProvisioner};
pub use errors::{FixtureError, Result};
pub use fixture::{FixtureBuilder, FixtureState, PostgresFixture, SCRATCH_MOUNT};
pub use validation::{Model, TableExpectation};
