//! Readiness gate: poll the database listener until it accepts connections
//! or the attempt budget runs out.

use crate::error::{BootgateError, Result};
use crate::secrets::Secrets;
use crate::target::DatabaseTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ProbeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP connect to `host:port`.
    #[default]
    Tcp,
    /// `SELECT 1` over the admin connection.
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default)]
    pub kind: ProbeKind,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::default(),
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// A single lightweight connectivity check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Human-readable target for logs (never includes credentials).
    fn target(&self) -> String;

    /// `Ok(())` when the target accepts connections,
    /// `Err(BootgateError::Unavailable)` otherwise.
    async fn check(&self) -> Result<()>;
}

pub struct TcpProbe {
    address: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn target(&self) -> String {
        self.address.clone()
    }

    async fn check(&self) -> Result<()> {
        let connect = tokio::net::TcpStream::connect(&self.address);
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(BootgateError::Unavailable {
                target: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BootgateError::Unavailable {
                target: self.address.clone(),
                reason: format!("connect timed out after {:?}", self.connect_timeout),
            }),
        }
    }
}

pub struct PostgresProbe {
    options: PgConnectOptions,
    label: String,
    connect_timeout: Duration,
}

impl PostgresProbe {
    pub fn new(admin_url: &str, label: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            options: PgConnectOptions::from_str(admin_url)?.disable_statement_logging(),
            label: label.into(),
            connect_timeout,
        })
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    fn target(&self) -> String {
        self.label.clone()
    }

    async fn check(&self) -> Result<()> {
        let unavailable = |reason: String| BootgateError::Unavailable {
            target: self.label.clone(),
            reason,
        };
        let mut conn = tokio::time::timeout(
            self.connect_timeout,
            PgConnection::connect_with(&self.options),
        )
        .await
        .map_err(|_| unavailable(format!("connect timed out after {:?}", self.connect_timeout)))?
        .map_err(|e| unavailable(e.to_string()))?;
        sqlx::query("SELECT 1")
            .execute(&mut conn)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let _ = conn.close().await;
        Ok(())
    }
}

/// Build the probe configured for `target`.
pub fn build_probe(
    config: &ProbeConfig,
    target: &DatabaseTarget,
    secrets: &Secrets,
) -> Result<Box<dyn Probe>> {
    match config.kind {
        ProbeKind::Tcp => Ok(Box::new(TcpProbe::new(
            target.address(),
            config.connect_timeout(),
        ))),
        ProbeKind::Postgres => {
            let admin_url = secrets.get(&target.admin_url_secret)?;
            Ok(Box::new(PostgresProbe::new(
                admin_url.expose(),
                target.address(),
                config.connect_timeout(),
            )?))
        }
    }
}

// ---------------------------------------------------------------------------
// wait_ready
// ---------------------------------------------------------------------------

/// Proof that a readiness probe succeeded. Only [`wait_ready`] creates one.
#[derive(Debug, Clone)]
pub struct Ready {
    target: String,
    attempts: u32,
}

impl Ready {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[cfg(test)]
    pub(crate) fn for_tests(target: &str) -> Self {
        Self {
            target: target.to_string(),
            attempts: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Ready(Ready),
    TimedOut { target: String, attempts: u32 },
}

impl ProbeOutcome {
    /// Turn an exhausted budget into a fatal error for the calling unit.
    pub fn into_result(self) -> Result<Ready> {
        match self {
            ProbeOutcome::Ready(ready) => Ok(ready),
            ProbeOutcome::TimedOut { target, attempts } => {
                Err(BootgateError::ProbeTimedOut { target, attempts })
            }
        }
    }
}

/// Check `probe` up to `max_attempts` times, sleeping `interval` between
/// attempts (not after the last one). Transient failures are absorbed here.
pub async fn wait_ready<P: Probe + ?Sized>(
    probe: &P,
    max_attempts: u32,
    interval: Duration,
) -> ProbeOutcome {
    let target = probe.target();
    for attempt in 1..=max_attempts {
        match probe.check().await {
            Ok(()) => {
                tracing::info!(addr = %target, attempt, "database is ready");
                return ProbeOutcome::Ready(Ready {
                    target,
                    attempts: attempt,
                });
            }
            Err(e) => {
                tracing::debug!(addr = %target, attempt, max_attempts, error = %e, "not ready");
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    tracing::warn!(addr = %target, attempts = max_attempts, "readiness budget exhausted");
    ProbeOutcome::TimedOut {
        target,
        attempts: max_attempts,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
