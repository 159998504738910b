//! In-memory provisioner for unit tests.

use crate::fixture::SCRATCH_MOUNT;
use async_trait::async_trait;
use errors::{FixtureError, Result};
use fixture_core::{ExecOutput, LaunchSpec, Provisioner};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Records every call and answers exec calls from a per-program table.
/// Unknown programs exit 0. An `env KEY=VALUE ...` prefix is looked through.
/// Port lookups drain the scripted queue, then answer port 1 unless the port
/// is withheld.
#[derive(Clone, Default)]
pub(crate) struct FakeProvisioner {
    inner: Arc<Recorded>
}

#[derive(Default)]
struct Recorded {
    launches: Mutex<Vec<LaunchSpec>>,
    commands: Mutex<Vec<Vec<String>>>,
    responses: Mutex<HashMap<String, ExecOutput>>,
    ports: Mutex<VecDeque<Option<u16>>>,
    withhold_port: AtomicBool,
    port_lookups: AtomicU32,
    purged: AtomicU32,
    abandoned: AtomicU32,
    fail_purge: AtomicBool
}

impl FakeProvisioner {
    pub(crate) fn respond(&self, program: &str, exit_code: i64, stderr: &str) {
        self.inner.responses.lock().unwrap().insert(
            program.to_string(),
            ExecOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string()
            }
        );
    }

    pub(crate) fn script_ports(&self, ports: impl IntoIterator<Item = Option<u16>>) {
        self.inner.ports.lock().unwrap().extend(ports);
    }

    pub(crate) fn withhold_port(&self) {
        self.inner.withhold_port.store(true, Ordering::SeqCst);
    }

    pub(crate) fn port_lookups(&self) -> u32 {
        self.inner.port_lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_purge(&self) {
        self.inner.fail_purge.store(true, Ordering::SeqCst);
    }

    pub(crate) fn last_launch(&self) -> Option<LaunchSpec> {
        self.inner.launches.lock().unwrap().last().cloned()
    }

    pub(crate) fn launch_count(&self) -> usize {
        self.inner.launches.lock().unwrap().len()
    }

    pub(crate) fn commands(&self) -> Vec<Vec<String>> {
        self.inner.commands.lock().unwrap().clone()
    }

    pub(crate) fn purge_count(&self) -> u32 {
        self.inner.purged.load(Ordering::SeqCst)
    }

    pub(crate) fn abandon_count(&self) -> u32 {
        self.inner.abandoned.load(Ordering::SeqCst)
    }

    /// Emulates `pg_dump --file=/fixture/<name>` by writing into the scratch
    /// mount of the last launch.
    fn write_dump(&self, command: &[String]) {
        let Some(target) = command.iter().find_map(|arg| arg.strip_prefix("--file=")) else {
            return;
        };
        let Some(name) = target.strip_prefix(&format!("{SCRATCH_MOUNT}/")) else {
            return;
        };
        let Some(spec) = self.last_launch() else {
            return;
        };
        if let Some(mount) = spec.mounts.iter().find(|m| m.target == SCRATCH_MOUNT) {
            std::fs::write(mount.source.join(name), b"PGDMP").unwrap();
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    type Handle = String;

    async fn launch(&self, spec: &LaunchSpec) -> Result<Self::Handle> {
        self.inner.launches.lock().unwrap().push(spec.clone());
        Ok(spec.name.clone())
    }

    async fn purge(&self, _handle: Self::Handle) -> Result<()> {
        self.inner.purged.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_purge.load(Ordering::SeqCst) {
            return Err(FixtureError::provisioning("purge", "simulated failure"));
        }
        Ok(())
    }

    fn abandon(&self, _handle: Self::Handle) {
        self.inner.abandoned.fetch_add(1, Ordering::SeqCst);
    }

    async fn resolve_address(&self, _handle: &Self::Handle) -> Result<String> {
        Ok("127.0.0.1".to_string())
    }

    async fn resolve_port(&self, _handle: &Self::Handle, _internal_port: u16) -> Result<Option<u16>> {
        self.inner.port_lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(port) = self.inner.ports.lock().unwrap().pop_front() {
            return Ok(port);
        }
        if self.inner.withhold_port.load(Ordering::SeqCst) {
            return Ok(None);
        }
        // Nothing listens here, so direct connections fail fast.
        Ok(Some(1))
    }

    async fn exec(&self, _handle: &Self::Handle, command: &[String]) -> Result<ExecOutput> {
        self.inner.commands.lock().unwrap().push(command.to_vec());
        let program = command
            .iter()
            .map(String::as_str)
            .find(|arg| *arg != "env" && !arg.contains('='))
            .unwrap_or_default();
        let response = self.inner.responses.lock().unwrap().get(program).cloned();
        let output = response.unwrap_or_default();
        if program == "pg_dump" && output.success() {
            self.write_dump(command);
        }
        Ok(output)
    }

    fn describe(&self, handle: &Self::Handle) -> String {
        handle.clone()
    }
}
