//! The production [`Launcher`]: external programs plus the database builtins.

use crate::bootstrap::{self, Bootstrapped, PgCatalog};
use crate::error::{BootgateError, Result};
use crate::migrate::{self, MigrateConfig, MigrationReport};
use crate::probe::{self, ProbeConfig, Ready};
use crate::secrets::Secrets;
use crate::supervisor::{Launcher, UnitProcess};
use crate::target::DatabaseTarget;
use crate::unit::{UnitAction, UnitSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// HostContext
// ---------------------------------------------------------------------------

/// Everything a host needs to run its units.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub database: Option<DatabaseTarget>,
    pub probe: ProbeConfig,
    pub migrate: Option<MigrateConfig>,
    pub secrets: Secrets,
    /// Relative `exec` workdirs resolve against this directory.
    pub root: PathBuf,
}

impl HostContext {
    pub fn database(&self) -> Result<&DatabaseTarget> {
        self.database
            .as_ref()
            .ok_or_else(|| BootgateError::InvalidConfig("no database section configured".into()))
    }

    /// Environment names used to export the primary and shadow URLs.
    pub fn url_env(&self) -> (&str, &str) {
        match &self.migrate {
            Some(m) => (m.primary_env.as_str(), m.shadow_env.as_str()),
            None => (migrate::DEFAULT_PRIMARY_ENV, migrate::DEFAULT_SHADOW_ENV),
        }
    }

    /// Probe the database until it answers or the attempt budget runs out.
    pub async fn wait_ready(&self) -> Result<Ready> {
        let target = self.database()?;
        let probe = probe::build_probe(&self.probe, target, &self.secrets)?;
        tracing::info!(
            addr = %probe.target(),
            max_attempts = self.probe.max_attempts,
            "waiting for database"
        );
        probe::wait_ready(probe.as_ref(), self.probe.max_attempts, self.probe.interval())
            .await
            .into_result()
    }

    /// Ensure the application role, its credential, ownership and grants.
    pub async fn bootstrap(&self) -> Result<Bootstrapped> {
        let target = self.database()?;
        target.validate()?;
        let admin_url = self.secrets.get(&target.admin_url_secret)?;
        let password = self.secrets.get(&target.password_secret)?;
        let catalog = PgCatalog::from_admin_url(admin_url)?;
        bootstrap::ensure_role(&catalog, target, password).await
    }

    /// Run the configured migration apply step.
    pub async fn migrate(&self, ready: &Ready, bootstrapped: &Bootstrapped) -> Result<MigrationReport> {
        let config = self
            .migrate
            .as_ref()
            .ok_or_else(|| BootgateError::InvalidConfig("no migrate section configured".into()))?;
        let conn = self.database()?.connection_strings(&self.secrets)?;
        let mut config = config.clone();
        config.workdir = config.workdir.map(|w| self.resolve(&w));
        migrate::apply_migrations(ready, bootstrapped, &config, &conn).await
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.root.join(dir)
        }
    }
}

// ---------------------------------------------------------------------------
// HostLauncher
// ---------------------------------------------------------------------------

/// Launches units on this host. The builtins hand their proof tokens to each
/// other so `migrate` can only run after `wait_ready` and `bootstrap_db`
/// succeeded in this process.
#[derive(Clone)]
pub struct HostLauncher {
    ctx: Arc<HostContext>,
    ready: Arc<Mutex<Option<Ready>>>,
    bootstrapped: Arc<Mutex<Option<Bootstrapped>>>,
}

impl HostLauncher {
    pub fn new(ctx: HostContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            ready: Arc::new(Mutex::new(None)),
            bootstrapped: Arc::new(Mutex::new(None)),
        }
    }

    fn spawn_exec(&self, unit: &UnitSpec, argv: &[String], workdir: Option<&Path>) -> Result<Child> {
        let launch_err = |reason: String| BootgateError::LaunchFailed {
            unit: unit.name.clone(),
            reason,
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| launch_err("empty argv".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&unit.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for name in &unit.secrets {
            cmd.env(name, self.ctx.secrets.get(name)?.expose());
        }
        if unit.database_urls {
            let conn = self.ctx.database()?.connection_strings(&self.ctx.secrets)?;
            let (primary_env, shadow_env) = self.ctx.url_env();
            cmd.env(primary_env, conn.primary.expose())
                .env(shadow_env, conn.shadow.expose());
        }
        cmd.current_dir(match workdir {
            Some(dir) => self.ctx.resolve(dir),
            None => self.ctx.root.clone(),
        });

        let mut child = cmd
            .spawn()
            .map_err(|e| launch_err(format!("{program}: {e}")))?;
        stream_lines(&unit.name, &mut child);
        tracing::info!(unit = %unit.name, pid = child.id().unwrap_or(0), "started");
        Ok(child)
    }

    async fn run_builtin(self, action: UnitAction) -> Result<()> {
        match action {
            UnitAction::WaitReady => {
                let ready = self.ctx.wait_ready().await?;
                *lock(&self.ready) = Some(ready);
            }
            UnitAction::BootstrapDb => {
                let done = self.ctx.bootstrap().await?;
                *lock(&self.bootstrapped) = Some(done);
            }
            UnitAction::Migrate => {
                let ready = lock(&self.ready).clone().ok_or_else(|| {
                    BootgateError::InvalidConfig(
                        "migrate requires a wait_ready unit that succeeded first".into(),
                    )
                })?;
                let done = lock(&self.bootstrapped).clone().ok_or_else(|| {
                    BootgateError::InvalidConfig(
                        "migrate requires a bootstrap_db unit that succeeded first".into(),
                    )
                })?;
                self.ctx.migrate(&ready, &done).await?;
            }
            UnitAction::Exec { argv, .. } => {
                return Err(BootgateError::InvalidConfig(format!(
                    "'{}' is not a builtin",
                    argv.join(" ")
                )))
            }
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Forward the child's output to the log, one event per line.
fn stream_lines(unit: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let unit = unit.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(unit = %unit, "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let unit = unit.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(unit = %unit, "{line}");
            }
        });
    }
}

#[async_trait]
impl Launcher for HostLauncher {
    async fn launch(&self, unit: &UnitSpec) -> Result<Box<dyn UnitProcess>> {
        match &unit.action {
            UnitAction::Exec { argv, workdir } => {
                let child = self.spawn_exec(unit, argv, workdir.as_deref())?;
                Ok(Box::new(ExecProcess(child)))
            }
            action => {
                let task = tokio::spawn(self.clone().run_builtin(action.clone()));
                Ok(Box::new(BuiltinProcess(task)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

struct ExecProcess(Child);

#[async_trait]
impl UnitProcess for ExecProcess {
    async fn wait(&mut self) -> Result<Option<i32>> {
        Ok(self.0.wait().await?.code())
    }
}

/// A builtin running on the runtime. Its error becomes the unit's fatal reason.
struct BuiltinProcess(JoinHandle<Result<()>>);

#[async_trait]
impl UnitProcess for BuiltinProcess {
    async fn wait(&mut self) -> Result<Option<i32>> {
        match (&mut self.0).await {
            Ok(Ok(())) => Ok(Some(0)),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(BootgateError::Io(std::io::Error::other(e.to_string()))),
        }
    }
}

impl Drop for BuiltinProcess {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
