use crate::error::{BootgateError, Result};
use crate::graph::UnitGraph;
use crate::host::{self, AppConfig, HostConfig, HostRole};
use crate::launch::HostContext;
use crate::migrate::MigrateConfig;
use crate::probe::ProbeConfig;
use crate::secrets::{Secrets, SecretsConfig};
use crate::target::DatabaseTarget;
use crate::unit::{UnitAction, UnitSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "bootgate.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn default_version() -> u32 {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".bootgate")
}

/// One host's desired state. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub host: HostConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseTarget>,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate: Option<MigrateConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppConfig>,
    /// Extra units. One named like a default unit replaces it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitSpec>,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BootgateError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Default units for the host role, then the configured units merged in.
    pub fn desired_units(&self) -> Vec<UnitSpec> {
        let mut units = host::default_units(self.host.role, self.app.as_ref());
        for extra in &self.units {
            match units.iter_mut().find(|u| u.name == extra.name) {
                Some(existing) => *existing = extra.clone(),
                None => units.push(extra.clone()),
            }
        }
        units
    }

    pub fn graph(&self) -> Result<UnitGraph> {
        UnitGraph::build(self.desired_units())
    }

    /// Every secret name the desired units can reference.
    pub fn secret_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        if let Some(db) = &self.database {
            names.extend(db.secret_names());
        }
        for unit in self.desired_units() {
            names.extend(unit.secrets);
        }
        names.into_iter().collect()
    }

    /// Resolve secrets once for this run. A relative secrets file resolves
    /// against `root`.
    pub fn load_secrets(&self, root: &Path) -> Result<Secrets> {
        let mut secrets = self.secrets.clone();
        if let Some(file) = &secrets.file {
            if file.is_relative() {
                secrets.file = Some(root.join(file));
            }
        }
        Secrets::load(&secrets, &self.secret_names())
    }

    pub fn state_dir(&self, root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            root.join(&self.state_dir)
        }
    }

    pub fn host_context(&self, root: &Path, secrets: Secrets) -> HostContext {
        HostContext {
            database: self.database.clone(),
            probe: self.probe.clone(),
            migrate: self.migrate.clone(),
            secrets,
            root: root.to_path_buf(),
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning::error(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if self.host.name.trim().is_empty() {
            warnings.push(ConfigWarning::error("host.name is empty"));
        }

        match (&self.database, self.host.role) {
            (None, HostRole::Api) => {
                warnings.push(ConfigWarning::error("role 'api' requires a database section"));
            }
            (Some(_), HostRole::Frontend) => {
                warnings.push(ConfigWarning::warning(
                    "database section is ignored for role 'frontend'",
                ));
            }
            (Some(db), HostRole::Api) => {
                if let Err(e) = db.validate() {
                    warnings.push(ConfigWarning::error(e.to_string()));
                }
            }
            (None, HostRole::Frontend) => {}
        }

        if self.probe.max_attempts == 0 {
            warnings.push(ConfigWarning::error("probe.max_attempts must be at least 1"));
        }

        match &self.migrate {
            Some(m) if m.command.is_empty() => {
                warnings.push(ConfigWarning::error("migrate.command is empty"));
            }
            None if self.host.role == HostRole::Api => {
                warnings.push(ConfigWarning::error("role 'api' requires a migrate section"));
            }
            _ => {}
        }

        if self.app.is_none() {
            warnings.push(ConfigWarning::warning(
                "no app section; no long-running unit will be started",
            ));
        }

        let units = self.desired_units();
        for unit in &units {
            match &unit.action {
                UnitAction::Exec { argv, .. } if argv.is_empty() => {
                    warnings.push(ConfigWarning::error(format!(
                        "unit '{}' has an empty command",
                        unit.name
                    )));
                }
                UnitAction::Exec { .. } => {}
                _ if !self.host.role.needs_database() => {
                    warnings.push(ConfigWarning::error(format!(
                        "unit '{}' uses {} but role '{}' has no database",
                        unit.name,
                        unit.action.label(),
                        self.host.role
                    )));
                }
                _ => {}
            }
            if unit.database_urls && self.database.is_none() {
                warnings.push(ConfigWarning::error(format!(
                    "unit '{}' exports database URLs but no database is configured",
                    unit.name
                )));
            }
        }
        if let Err(e) = UnitGraph::build(units) {
            warnings.push(ConfigWarning::error(e.to_string()));
        }

        warnings
    }
}

/// Walk upward from `start` looking for `bootgate.yaml`.
pub fn discover(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
