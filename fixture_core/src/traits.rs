//! Core traits for disposable database fixtures

use crate::types::{ExecOutput, LaunchSpec};
use async_trait::async_trait;
use errors::Result;

/// Launches, inspects and releases the isolated process backing a fixture.
///
/// A handle is produced exactly once by [`Provisioner::launch`] and consumed
/// exactly once by either [`Provisioner::purge`] or [`Provisioner::abandon`].
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    type Handle: Send + Sync;

    async fn launch(&self, spec: &LaunchSpec) -> Result<Self::Handle>;

    /// Stops and removes the process.
    async fn purge(&self, handle: Self::Handle) -> Result<()>;

    /// Lets go of the handle while leaving the process running, so it can be
    /// inspected after the test.
    fn abandon(&self, handle: Self::Handle) {
        drop(handle);
    }

    /// Host other clients should use to reach the process.
    async fn resolve_address(&self, handle: &Self::Handle) -> Result<String>;

    /// Externally reachable port for `internal_port`, `None` while it is not
    /// assigned yet.
    async fn resolve_port(&self, handle: &Self::Handle, internal_port: u16) -> Result<Option<u16>>;

    /// Runs a command inside the process and waits for it to exit.
    async fn exec(&self, handle: &Self::Handle, command: &[String]) -> Result<ExecOutput>;

    /// Human readable name of the process, for logs.
    fn describe(&self, handle: &Self::Handle) -> String;
}

/// Read-only view of a live database's catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn table_exists(&self, database: &str, schema: &str, table: &str) -> Result<bool>;

    async fn table_columns(&self, database: &str, schema: &str, table: &str)
    -> Result<Vec<String>>;
}
