//! Docker-backed [`Provisioner`] built on `testcontainers`.

use async_trait::async_trait;
use errors::{FixtureError, Result};
use fixture_core::{ExecOutput, LaunchSpec, Provisioner};
use std::sync::{Arc, Weak};
use std::time::Duration;
use testcontainers::core::{CmdWaitFor, ContainerPort, ExecCommand, ExecResult, Mount};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ContainerRequest, GenericImage, ImageExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type Container = ContainerAsync<GenericImage>;
type Slot = Arc<Mutex<Option<Container>>>;

/// Launches each fixture as a docker container.
///
/// No wait strategy is attached to the image: readiness is decided by the
/// fixture's prober alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerProvisioner;

/// A launched container.
///
/// The container lives in a shared slot so the expiry task can take it out
/// and remove it when nobody purged it in time.
pub struct DockerHandle {
    name: String,
    network: Option<String>,
    slot: Slot,
    reaper: JoinHandle<()>
}

impl DockerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl DockerProvisioner {
    pub fn new() -> Self {
        Self
    }

    fn request(spec: &LaunchSpec) -> ContainerRequest<GenericImage> {
        let mut request = GenericImage::new(spec.repository.as_str(), spec.tag.as_str())
            .with_exposed_port(ContainerPort::Tcp(spec.exposed_port))
            .with_container_name(spec.name.as_str())
            .with_cmd(spec.command.clone());

        for (key, value) in &spec.env {
            request = request.with_env_var(key.as_str(), value.as_str());
        }
        for mount in &spec.mounts {
            request = request.with_mount(Mount::bind_mount(
                mount.source.display().to_string(),
                mount.target.as_str()
            ));
        }
        if let Some(network) = &spec.network {
            request = request.with_network(network.as_str());
        }
        request
    }
}

fn running<'g>(slot: &'g Option<Container>, name: &str, operation: &str) -> Result<&'g Container> {
    slot.as_ref().ok_or_else(|| {
        FixtureError::provisioning(operation, format!("container {name} is no longer running"))
    })
}

/// Removes the container once `expire_after` has elapsed, unless it was
/// purged first.
fn spawn_reaper(name: String, slot: Weak<Mutex<Option<Container>>>, expire_after: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(expire_after).await;
        let Some(slot) = slot.upgrade() else {
            return;
        };
        let Some(container) = slot.lock().await.take() else {
            return;
        };
        tracing::warn!(container = %name, ?expire_after, "fixture expired, removing container");
        if let Err(e) = container.rm().await {
            tracing::warn!(container = %name, error = %e, "failed to remove expired container");
        }
    })
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    type Handle = DockerHandle;

    async fn launch(&self, spec: &LaunchSpec) -> Result<Self::Handle> {
        let container = Self::request(spec)
            .start()
            .await
            .map_err(|e| FixtureError::provisioning("launch", e))?;

        tracing::info!(
            container = %spec.name,
            id = %container.id(),
            image = %spec.image(),
            network = ?spec.network,
            "launched container"
        );

        let slot: Slot = Arc::new(Mutex::new(Some(container)));
        let reaper = spawn_reaper(spec.name.clone(), Arc::downgrade(&slot), spec.expire_after);
        Ok(DockerHandle {
            name: spec.name.clone(),
            network: spec.network.clone(),
            slot,
            reaper
        })
    }

    async fn purge(&self, handle: Self::Handle) -> Result<()> {
        handle.reaper.abort();
        let container = handle.slot.lock().await.take();
        match container {
            Some(container) => {
                container
                    .rm()
                    .await
                    .map_err(|e| FixtureError::provisioning("purge", e))?;
                tracing::info!(container = %handle.name, "removed container");
            }
            None => tracing::debug!(container = %handle.name, "container already removed")
        }
        Ok(())
    }

    fn abandon(&self, handle: Self::Handle) {
        tracing::info!(container = %handle.name, "leaving container running");
        // The leaked reference keeps the container alive. The reaper still
        // removes it on expiry while the runtime is up.
        std::mem::forget(handle.slot);
    }

    async fn resolve_address(&self, handle: &Self::Handle) -> Result<String> {
        if handle.network.is_some() {
            return Ok(handle.name.clone());
        }
        let guard = handle.slot.lock().await;
        let container = running(&guard, &handle.name, "resolve address")?;
        container
            .get_host()
            .await
            .map(|host| host.to_string())
            .map_err(|e| FixtureError::provisioning("resolve address", e))
    }

    async fn resolve_port(&self, handle: &Self::Handle, internal_port: u16) -> Result<Option<u16>> {
        if handle.network.is_some() {
            return Ok(Some(internal_port));
        }
        let guard = handle.slot.lock().await;
        let container = running(&guard, &handle.name, "resolve port")?;
        match container.get_host_port_ipv4(internal_port).await {
            Ok(port) => Ok(Some(port)),
            Err(e) => {
                tracing::debug!(container = %handle.name, error = %e, "port not mapped yet");
                Ok(None)
            }
        }
    }

    async fn exec(&self, handle: &Self::Handle, command: &[String]) -> Result<ExecOutput> {
        let guard = handle.slot.lock().await;
        let container = running(&guard, &handle.name, "exec")?;

        let exec = ExecCommand::new(command.to_vec()).with_cmd_ready_condition(CmdWaitFor::exit());
        let mut result = container
            .exec(exec)
            .await
            .map_err(|e| FixtureError::provisioning("exec", e))?;

        let stdout = result
            .stdout_to_vec()
            .await
            .map_err(|e| FixtureError::provisioning("exec", e))?;
        let stderr = result
            .stderr_to_vec()
            .await
            .map_err(|e| FixtureError::provisioning("exec", e))?;
        let exit_code = read_exit_code(result).await?.unwrap_or(-1);

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned()
        })
    }

    fn describe(&self, handle: &Self::Handle) -> String {
        handle.name.clone()
    }
}

/// `ExecResult` is not `Sync`, so `exit_code(&self)` cannot be awaited inside
/// a `Send` future. It runs on the blocking pool instead.
async fn read_exit_code(result: ExecResult) -> Result<Option<i64>> {
    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || runtime.block_on(result.exit_code()))
        .await
        .map_err(|e| FixtureError::provisioning("exec", e))?
        .map_err(|e| FixtureError::provisioning("exec", e))
}
