//! Migration gate: run the external schema-migration apply step once.
//!
//! The gate requires proof that the database answered a readiness probe and
//! that bootstrap succeeded. Any non-zero exit is fatal; retries, if any, are
//! the migration tool's own business.

use crate::bootstrap::Bootstrapped;
use crate::error::{BootgateError, Result};
use crate::probe::Ready;
use crate::target::ConnectionStrings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrateConfig {
    /// argv of the apply step, e.g. `["prisma", "migrate", "deploy"]`.
    pub command: Vec<String>,
    #[serde(default = "default_primary_env")]
    pub primary_env: String,
    #[serde(default = "default_shadow_env")]
    pub shadow_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

pub const DEFAULT_PRIMARY_ENV: &str = "DATABASE_URL";
pub const DEFAULT_SHADOW_ENV: &str = "SHADOW_DATABASE_URL";

fn default_primary_env() -> String {
    DEFAULT_PRIMARY_ENV.to_string()
}

fn default_shadow_env() -> String {
    DEFAULT_SHADOW_ENV.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub program: String,
    pub duration_ms: u64,
}

/// Resolve the migration program to an absolute path, failing early when it
/// is not installed.
fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return if path.exists() {
            Ok(path)
        } else {
            Err(BootgateError::MigrationToolMissing(program.to_string()))
        };
    }
    which::which(program).map_err(|_| BootgateError::MigrationToolMissing(program.to_string()))
}

/// Apply pending migrations against the primary database, using the shadow
/// database for validation.
pub async fn apply_migrations(
    _ready: &Ready,
    _bootstrapped: &Bootstrapped,
    config: &MigrateConfig,
    conn: &ConnectionStrings,
) -> Result<MigrationReport> {
    let (program, args) = config
        .command
        .split_first()
        .ok_or_else(|| BootgateError::InvalidConfig("migrate.command is empty".to_string()))?;
    let resolved = resolve_program(program)?;

    let mut cmd = Command::new(&resolved);
    cmd.args(args)
        .env(&config.primary_env, conn.primary.expose())
        .env(&config.shadow_env, conn.shadow.expose())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.workdir {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    tracing::info!(program = %program, "applying migrations");
    let mut child = cmd
        .spawn()
        .map_err(|e| BootgateError::MigrationSpawn(format!("{program}: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(async move {
        if let Some(s) = stdout {
            let mut lines = BufReader::new(s).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(unit = "migrate", "{line}");
            }
        }
    });
    let err_task = tokio::spawn(async move {
        if let Some(s) = stderr {
            let mut lines = BufReader::new(s).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(unit = "migrate", "{line}");
            }
        }
    });
    let _ = tokio::join!(out_task, err_task);

    let status = child.wait().await?;
    if !status.success() {
        return Err(BootgateError::MigrationFailed {
            code: status.code(),
        });
    }
    let duration_ms = start.elapsed().as_millis() as u64;
    tracing::info!(program = %program, duration_ms, "migrations applied");
    Ok(MigrationReport {
        program: program.clone(),
        duration_ms,
    })
}
