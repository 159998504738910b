//! Readiness probing of a freshly launched server.
//!
//! A server counts as ready once `pg_isready` succeeds inside the process and
//! a direct client connection can be opened and pinged from the test
//! process. Every failure inside the budget is retried with a capped,
//! jittered exponential backoff.

use config::ConnectionSettings;
use errors::{FixtureError, Result};
use fixture_core::Provisioner;
use sqlx::Connection;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

pub(crate) const POSTGRES_PORT: u16 = 5432;

const INITIAL_DELAY_MS: u64 = 10;
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Outcome of one `pg_isready` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Accepting,
    Rejecting,
    NoResponse,
    NoAttempt,
    Unknown(i64)
}

impl ServerStatus {
    pub fn from_exit_code(code: i64) -> Self {
        match code {
            0 => Self::Accepting,
            1 => Self::Rejecting,
            2 => Self::NoResponse,
            3 => Self::NoAttempt,
            other => Self::Unknown(other)
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Accepting
    }

    fn exit_code(self) -> i64 {
        match self {
            Self::Accepting => 0,
            Self::Rejecting => 1,
            Self::NoResponse => 2,
            Self::NoAttempt => 3,
            Self::Unknown(code) => code
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Accepting => "accepting connections",
            Self::Rejecting => "server is rejecting connections",
            Self::NoResponse => "no response",
            Self::NoAttempt => "no attempt was made",
            Self::Unknown(_) => "unknown"
        };
        write!(f, "({}) {}", self.exit_code(), reason)
    }
}

/// Runs `attempt` until it succeeds or `timeout` elapses.
///
/// Attempts are cut short when they would overrun the budget, and the last
/// failure is reported inside [`FixtureError::ReadinessTimeout`].
pub async fn retry_until<T, F, Fut>(timeout: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut backoff = ExponentialBackoff::from_millis(INITIAL_DELAY_MS)
        .max_delay(MAX_DELAY)
        .map(jitter);
    let mut attempts = 0_u32;
    let mut last = FixtureError::not_ready("no attempt completed");

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        attempts += 1;
        match tokio::time::timeout(remaining, attempt()).await {
            Ok(Ok(value)) => {
                tracing::debug!(attempts, elapsed = ?started.elapsed(), "ready");
                return Ok(value);
            }
            Ok(Err(e)) => {
                tracing::debug!(attempt = attempts, error = %e, "not ready yet");
                last = e;
            }
            Err(_) => {
                last = FixtureError::not_ready(format!(
                    "attempt {attempts} did not finish within the remaining {remaining:?}"
                ));
                break;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let delay = backoff.next().unwrap_or(MAX_DELAY).min(remaining);
        tokio::time::sleep(delay).await;
    }

    Err(FixtureError::ReadinessTimeout {
        waited: started.elapsed(),
        attempts,
        last: Box::new(last)
    })
}

/// One readiness attempt against a launched server.
///
/// Returns the externally reachable port so the caller can record it.
pub async fn probe<P: Provisioner>(
    provisioner: &P,
    handle: &P::Handle,
    settings: &ConnectionSettings
) -> Result<u16> {
    let Some(port) = provisioner.resolve_port(handle, POSTGRES_PORT).await? else {
        return Err(FixtureError::not_ready(format!(
            "could not get port from {}",
            provisioner.describe(handle)
        )));
    };

    let command = vec![
        "pg_isready".to_string(),
        "--quiet".to_string(),
        format!("--username={}", settings.user),
        format!("--dbname={}", settings.database),
    ];
    let output = provisioner.exec(handle, &command).await?;
    let status = ServerStatus::from_exit_code(output.exit_code);
    if !status.is_ready() {
        return Err(FixtureError::not_ready(status.to_string()));
    }

    let mut target = settings.clone();
    target.port = port;
    let conn = target.connect().await?;
    conn.close()
        .await
        .map_err(|source| target.connection_error(source))?;
    Ok(port)
}

/// Polls `handle` until it accepts connections or `timeout` elapses.
pub async fn wait_for_ready<P: Provisioner>(
    provisioner: &P,
    handle: &P::Handle,
    settings: &ConnectionSettings,
    timeout: Duration
) -> Result<u16> {
    retry_until(timeout, || probe(provisioner, handle, settings)).await
}
