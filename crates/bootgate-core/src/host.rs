//! Host roles and the unit graph each one starts with.

use crate::unit::{RestartPolicy, UnitAction, UnitKind, UnitSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const DB_READY: &str = "db-ready";
pub const DB_BOOTSTRAP: &str = "db-bootstrap";
pub const DB_MIGRATE: &str = "db-migrate";
pub const APP: &str = "app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    /// Database-backed API: readiness, bootstrap and migrations gate the app.
    Api,
    /// Public frontend: no database dependency.
    Frontend,
}

impl HostRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Api => "api",
            HostRole::Frontend => "frontend",
        }
    }

    pub fn needs_database(&self) -> bool {
        matches!(self, HostRole::Api)
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,
    pub role: HostRole,
}

fn default_restart_sec() -> u64 {
    5
}

/// The long-running application entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub command: Vec<String>,
    /// Loopback port the app listens on; exported as `PORT`.
    pub port: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default = "default_restart_sec")]
    pub restart_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

impl AppConfig {
    fn unit(&self, role: HostRole) -> UnitSpec {
        let mut env = self.env.clone();
        env.insert("PORT".to_string(), self.port.to_string());
        let mut unit = UnitSpec::new(
            APP,
            UnitKind::LongRunning,
            UnitAction::Exec {
                argv: self.command.clone(),
                workdir: self.workdir.clone(),
            },
        );
        unit.env = env;
        unit.secrets = self.secrets.clone();
        unit.database_urls = role.needs_database();
        unit.restart = self.restart;
        unit.restart_sec = self.restart_sec;
        if role.needs_database() {
            unit = unit.requires(&[DB_MIGRATE]);
        }
        unit
    }
}

/// The units a host of `role` runs before any user-defined units.
pub fn default_units(role: HostRole, app: Option<&AppConfig>) -> Vec<UnitSpec> {
    let mut units = Vec::new();
    if role.needs_database() {
        units.push(UnitSpec::new(DB_READY, UnitKind::Oneshot, UnitAction::WaitReady));
        units.push(
            UnitSpec::new(DB_BOOTSTRAP, UnitKind::Oneshot, UnitAction::BootstrapDb)
                .requires(&[DB_READY]),
        );
        units.push(
            UnitSpec::new(DB_MIGRATE, UnitKind::Oneshot, UnitAction::Migrate)
                .requires(&[DB_BOOTSTRAP]),
        );
    }
    if let Some(app) = app {
        units.push(app.unit(role));
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppConfig {
        AppConfig {
            command: vec!["./server".into(), "serve".into()],
            port: 3000,
            env: BTreeMap::from([("RATE_LIMIT".to_string(), "100".to_string())]),
            secrets: vec!["RESEND_API_KEY".into()],
            restart: RestartPolicy::Always,
            restart_sec: 5,
            workdir: None,
        }
    }

    #[test]
    fn api_chain_gates_app_on_migrations() {
        let units = default_units(HostRole::Api, Some(&app()));
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec![DB_READY, DB_BOOTSTRAP, DB_MIGRATE, APP]);
        assert_eq!(units[1].requires, vec![DB_READY]);
        assert_eq!(units[2].requires, vec![DB_BOOTSTRAP]);

        let app = &units[3];
        assert_eq!(app.kind, UnitKind::LongRunning);
        assert_eq!(app.requires, vec![DB_MIGRATE]);
        assert!(app.database_urls);
        assert_eq!(app.env["PORT"], "3000");
        assert_eq!(app.env["RATE_LIMIT"], "100");
        assert_eq!(app.secrets, vec!["RESEND_API_KEY"]);
    }

    #[test]
    fn frontend_runs_only_the_app() {
        let units = default_units(HostRole::Frontend, Some(&app()));
        assert_eq!(units.len(), 1);
        assert!(units[0].requires.is_empty());
        assert!(!units[0].database_urls);
    }

    #[test]
    fn api_without_app_still_migrates() {
        let units = default_units(HostRole::Api, None);
        assert_eq!(units.len(), 3);
    }
}
