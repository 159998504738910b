//! Lifecycle of a disposable PostgreSQL fixture.
//!
//! [`FixtureBuilder`] collects launch options and starts the backing process;
//! it only ever hands out a [`PostgresFixture`] that passed readiness. The
//! fixture owns the process until [`PostgresFixture::teardown`] or drop.

use crate::docker::DockerProvisioner;
use crate::readiness::{POSTGRES_PORT, wait_for_ready};
use config::{ConnectionSettings, FixtureConfig};
use errors::{FixtureError, Result};
use fixture_core::{ExecOutput, LaunchSpec, Mount, Provisioner};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use tempfile::TempDir;
use utils::{generate_password, memory_mb, random_name};

/// Where the fixture's scratch directory is mounted inside the process.
pub const SCRATCH_MOUNT: &str = "/fixture";

const MIN_TUNING_MB: u64 = 16;
/// `work_mem` must stay below 2GB.
const MAX_TUNING_MB: u64 = 1024;

/// Lifecycle state of a [`PostgresFixture`]. A [`FixtureBuilder`] stands in
/// for the uninitialized state. `Failed` is only ever reported in the log
/// line of a fixture that did not start, since such a fixture is never
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Provisioning,
    Ready,
    TornDown,
    Failed
}

impl fmt::Display for FixtureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::TornDown => "torn_down",
            Self::Failed => "failed"
        };
        f.write_str(name)
    }
}

/// Options for a fixture, applied in call order.
///
/// ```rust,no_run
/// use testing::FixtureBuilder;
///
/// # async fn example() -> errors::Result<()> {
/// let mut fixture = FixtureBuilder::new()
///     .name("orders")
///     .version("15-alpine")
///     .timeout_after_secs(60)
///     .start()
///     .await?;
///
/// let pool = fixture.connect(Default::default()).await?;
/// sqlx::query("SELECT 1").execute(&pool).await.ok();
/// fixture.teardown().await?;
/// # Ok(())
/// # }
/// ```
pub struct FixtureBuilder<P: Provisioner = DockerProvisioner> {
    config: FixtureConfig,
    provisioner: P
}

impl FixtureBuilder<DockerProvisioner> {
    pub fn new() -> Self {
        Self::from_config(FixtureConfig::default())
    }

    pub fn from_config(config: FixtureConfig) -> Self {
        Self {
            config,
            provisioner: DockerProvisioner::new()
        }
    }

    /// Builder seeded from `PGFIXTURE_*` and `HOST_NETWORK_NAME`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_config(config::load_from_env()?))
    }
}

impl Default for FixtureBuilder<DockerProvisioner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Provisioner> FixtureBuilder<P> {
    /// Launches through another provisioner.
    pub fn with_provisioner<Q: Provisioner>(self, provisioner: Q) -> FixtureBuilder<Q> {
        FixtureBuilder {
            config: self.config,
            provisioner
        }
    }

    /// Base name of the process and, unless settings are given, the primary
    /// database.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.config.repository = repository.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Explicit connection settings. Host and port are filled in once the
    /// process is running.
    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.config.settings = Some(settings);
        self
    }

    /// Seconds after launch when the provisioner reaps the process.
    pub fn expire_after_secs(mut self, secs: u64) -> Self {
        self.config.expire_after_secs = secs;
        self
    }

    /// Seconds to wait for the server to become ready.
    pub fn timeout_after_secs(mut self, secs: u64) -> Self {
        self.config.timeout_after_secs = secs;
        self
    }

    /// Leave the process running after teardown.
    pub fn skip_teardown(mut self) -> Self {
        self.config.skip_teardown = true;
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.config.mounts.push(mount);
        self
    }

    pub fn mounts(mut self, mounts: impl IntoIterator<Item = Mount>) -> Self {
        self.config.mounts = mounts.into_iter().collect();
        self
    }

    pub fn network(mut self, network_name: impl Into<String>) -> Self {
        self.config.network_name = Some(network_name.into());
        self
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// Launches the process and waits until it is ready.
    ///
    /// On any failure after launch the process is purged before the error is
    /// returned.
    pub async fn start(self) -> Result<PostgresFixture<P>> {
        let mut fixture = self.provision().await?;
        match fixture.await_ready().await {
            Ok(()) => {
                fixture.state = FixtureState::Ready;
                tracing::info!(
                    container = %fixture.describe(),
                    host = %fixture.settings.host,
                    port = fixture.settings.port,
                    database = %fixture.settings.database,
                    state = %fixture.state,
                    "fixture ready"
                );
                Ok(fixture)
            }
            Err(e) => {
                fixture.state = FixtureState::Failed;
                tracing::warn!(
                    container = %fixture.describe(),
                    state = %fixture.state,
                    error = %e,
                    "fixture failed to start"
                );
                if let Some(handle) = fixture.handle.take() {
                    if let Err(purge_err) = fixture.provisioner.purge(handle).await {
                        tracing::warn!(error = %purge_err, "failed to purge unready fixture");
                    }
                }
                Err(e)
            }
        }
    }

    /// Like [`FixtureBuilder::start`], panicking on failure.
    pub async fn must_start(self) -> PostgresFixture<P> {
        match self.start().await {
            Ok(fixture) => fixture,
            Err(e) => panic!("failed to start postgres fixture: {e}")
        }
    }

    /// Launches the process without waiting for readiness.
    pub(crate) async fn provision(self) -> Result<PostgresFixture<P>> {
        self.config.check()?;
        let settings = self.config.resolve_settings(generate_password);
        let scratch = tempfile::Builder::new()
            .prefix("pgfixture")
            .tempdir()
            .map_err(|e| FixtureError::io(std::env::temp_dir(), e))?;
        let spec = launch_spec(&self.config, &settings, scratch.path());

        tracing::info!(
            container = %spec.name,
            image = %spec.image(),
            state = %FixtureState::Provisioning,
            "starting fixture"
        );
        let handle = self.provisioner.launch(&spec).await?;

        Ok(PostgresFixture {
            provisioner: self.provisioner,
            handle: Some(handle),
            settings,
            config: self.config,
            state: FixtureState::Provisioning,
            scratch
        })
    }
}

/// Launch options of one fixture process.
fn launch_spec(config: &FixtureConfig, settings: &ConnectionSettings, scratch: &Path) -> LaunchSpec {
    let tuning_mb = (memory_mb() / 8).clamp(MIN_TUNING_MB, MAX_TUNING_MB);
    let command = [
        "fsync=off".to_string(),
        "synchronous_commit=off".to_string(),
        "full_page_writes=off".to_string(),
        "random_page_cost=1.1".to_string(),
        format!("shared_buffers={tuning_mb}MB"),
        format!("work_mem={tuning_mb}MB"),
    ]
    .into_iter()
    .flat_map(|setting| ["-c".to_string(), setting])
    .collect();

    let mut mounts = vec![Mount::new(scratch, SCRATCH_MOUNT)];
    mounts.extend(config.mounts.iter().cloned());

    LaunchSpec {
        name: random_name(&config.name),
        repository: config.repository.clone(),
        tag: config.version.clone(),
        env: vec![
            ("POSTGRES_USER".to_string(), settings.user.clone()),
            ("POSTGRES_PASSWORD".to_string(), settings.password.clone()),
            ("POSTGRES_DB".to_string(), settings.database.clone()),
        ],
        network: config.network_name.clone(),
        command,
        mounts,
        exposed_port: POSTGRES_PORT,
        expire_after: config.expire_after()
    }
}

/// A running PostgreSQL server owned by a test.
pub struct PostgresFixture<P: Provisioner = DockerProvisioner> {
    pub(crate) provisioner: P,
    pub(crate) handle: Option<P::Handle>,
    pub(crate) settings: ConnectionSettings,
    pub(crate) config: FixtureConfig,
    pub(crate) state: FixtureState,
    pub(crate) scratch: TempDir
}

impl<P: Provisioner> PostgresFixture<P> {
    /// Connection settings of the primary database.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    /// The provisioner's name for the process, `None` after teardown.
    pub fn host_name(&self) -> Option<String> {
        self.handle.as_ref().map(|h| self.provisioner.describe(h))
    }

    pub(crate) fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub(crate) fn handle(&self) -> Result<&P::Handle> {
        self.handle
            .as_ref()
            .ok_or_else(|| FixtureError::provisioning("use", "fixture has been torn down"))
    }

    fn describe(&self) -> String {
        self.host_name().unwrap_or_else(|| "<released>".to_string())
    }

    async fn await_ready(&mut self) -> Result<()> {
        let handle = self.handle()?;
        let host = self.provisioner.resolve_address(handle).await?;
        self.settings.host = host;

        let handle = self.handle()?;
        let port = wait_for_ready(
            &self.provisioner,
            handle,
            &self.settings,
            self.config.timeout_after()
        )
        .await?;
        self.settings.port = port;

        self.ping().await
    }

    /// Runs `command` inside the process and returns its output whatever the
    /// exit status.
    pub(crate) async fn exec(&self, command: Vec<String>) -> Result<ExecOutput> {
        let handle = self.handle()?;
        let output = self.provisioner.exec(handle, &command).await?;
        tracing::debug!(
            command = %command.join(" "),
            status = output.exit_code,
            container = %self.describe(),
            "exec"
        );
        Ok(output)
    }

    /// Runs `command` inside the process, failing on a non-zero exit status.
    pub(crate) async fn exec_checked(&self, command: Vec<String>) -> Result<ExecOutput> {
        let program = command.first().cloned().unwrap_or_default();
        let output = self.exec(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(FixtureError::ExternalCommand {
                program,
                exit_code: output.exit_code,
                output: output.diagnostics()
            })
        }
    }

    /// Releases the backing process. Calling it again is a no-op, as is any
    /// call on a fixture built with `skip_teardown`.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.config.skip_teardown {
            tracing::info!(container = %self.describe(), "skipping teardown");
            return Ok(());
        }
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.state = FixtureState::TornDown;
        self.provisioner.purge(handle).await?;
        tracing::info!(state = %self.state, "fixture torn down");
        Ok(())
    }

    /// Runs `body` against the fixture and tears it down afterwards.
    ///
    /// If `body` panics the fixture is still torn down, teardown failures are
    /// logged, and the panic is resumed.
    ///
    /// ```rust,no_run
    /// use futures_util::FutureExt;
    /// use testing::FixtureBuilder;
    ///
    /// # async fn example() -> errors::Result<()> {
    /// let fixture = FixtureBuilder::new().start().await?;
    /// let tables = fixture
    ///     .run(|f| async move { f.tables("postgres").await }.boxed())
    ///     .await??;
    /// assert!(tables.is_empty());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run<T, F>(mut self, body: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a PostgresFixture<P>) -> BoxFuture<'a, T>
    {
        let outcome = AssertUnwindSafe(body(&self)).catch_unwind().await;
        match outcome {
            Ok(value) => {
                self.teardown().await?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = self.teardown().await {
                    tracing::warn!(error = %e, "failed to tear down");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

impl<P: Provisioner> Drop for PostgresFixture<P> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.config.skip_teardown {
            self.provisioner.abandon(handle);
        } else {
            tracing::debug!(
                container = %self.provisioner.describe(&handle),
                "fixture dropped without teardown"
            );
            drop(handle);
        }
    }
}

#[cfg(test)]
impl<P: Provisioner> PostgresFixture<P> {
    /// Marks a provisioned fixture ready without probing it.
    pub(crate) fn assume_ready(mut self, port: u16) -> Self {
        self.settings.port = port;
        self.state = FixtureState::Ready;
        self
    }
}
